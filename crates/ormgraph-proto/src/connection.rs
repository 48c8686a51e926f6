//! The connection contract consumed by the persistence engine.

use crate::error::Error;
use crate::row::Row;
use crate::schema::TableDef;
use crate::select::Select;
use crate::statement::Statement;

/// One live connection (or unit of work) to a relational backend.
///
/// The engine never begins, commits or rolls back; callers own the
/// transaction around a sequence of persister calls.
pub trait Connection {
    /// Execute a write statement, returning the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> Result<u64, Error>;

    /// Execute statements in order. Backends may group them per table;
    /// the default runs them one by one.
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<u64, Error> {
        let mut affected = 0;
        for statement in statements {
            affected += self.execute(statement)?;
        }
        Ok(affected)
    }

    /// Run a join-tree select, returning rows keyed `alias.column`.
    fn select(&mut self, select: &Select) -> Result<Vec<Row>, Error>;

    /// Table definition, if the backend knows the table.
    fn table(&self, name: &str) -> Option<TableDef>;
}
