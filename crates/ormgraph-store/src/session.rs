//! Sessions: the connection handed to the persistence engine.

use ormgraph_proto::{Connection, Error as StatementError, Row, Select, Statement, TableDef};

use crate::engine::StorageEngine;
use crate::join::HashJoinExecutor;

/// A write to reverse on rollback.
#[derive(Debug)]
enum UndoEntry {
    /// A row was inserted under this key.
    Inserted { table: String, key: Vec<u8> },
    /// A row held this value before it was updated or deleted.
    Overwritten { table: String, key: Vec<u8>, row: Row },
}

/// A connection to a [`StorageEngine`].
///
/// Writes outside a transaction apply immediately. Inside one they are
/// recorded in an undo log and reversed on rollback. Every executed
/// statement is kept in order so callers can inspect what a persister did.
pub struct Session<'a> {
    engine: &'a StorageEngine,
    /// Undo log of the active transaction.
    undo: Option<Vec<UndoEntry>>,
    /// Statements executed successfully, in order.
    executed: Vec<Statement>,
    /// Selects run, in order.
    selects: Vec<Select>,
}

impl<'a> Session<'a> {
    /// Create a session on an engine.
    pub fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            undo: None,
            executed: Vec::new(),
            selects: Vec::new(),
        }
    }

    /// The engine behind this session.
    pub fn engine(&self) -> &'a StorageEngine {
        self.engine
    }

    /// Start a transaction.
    pub fn begin(&mut self) -> Result<(), StatementError> {
        if self.undo.is_some() {
            return Err(StatementError::Transaction(
                "transaction already active".into(),
            ));
        }
        self.undo = Some(Vec::new());
        tracing::debug!("transaction started");
        Ok(())
    }

    /// Commit the active transaction.
    pub fn commit(&mut self) -> Result<(), StatementError> {
        let undo = self
            .undo
            .take()
            .ok_or_else(|| StatementError::Transaction("no active transaction".into()))?;
        tracing::debug!(writes = undo.len(), "transaction committed");
        Ok(())
    }

    /// Roll back the active transaction.
    pub fn rollback(&mut self) -> Result<(), StatementError> {
        let undo = self
            .undo
            .take()
            .ok_or_else(|| StatementError::Transaction("no active transaction".into()))?;
        let writes = undo.len();

        for entry in undo.into_iter().rev() {
            match entry {
                UndoEntry::Inserted { table, key } => self.engine.restore(&table, &key, None)?,
                UndoEntry::Overwritten { table, key, row } => {
                    self.engine.restore(&table, &key, Some(&row))?
                }
            }
        }

        tracing::debug!(writes, "transaction rolled back");
        Ok(())
    }

    /// Check whether a transaction is active.
    pub fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> &[Statement] {
        &self.executed
    }

    /// Selects run so far, in order.
    pub fn selects(&self) -> &[Select] {
        &self.selects
    }

    /// Forget executed statements and selects.
    pub fn clear_log(&mut self) {
        self.executed.clear();
        self.selects.clear();
    }

    fn record(&mut self, entry: UndoEntry) {
        if let Some(undo) = self.undo.as_mut() {
            undo.push(entry);
        }
    }
}

impl Connection for Session<'_> {
    fn execute(&mut self, statement: &Statement) -> Result<u64, StatementError> {
        tracing::trace!(%statement, "execute");

        let affected = match statement {
            Statement::Insert { table, row } => {
                let (key, _) = self.engine.insert(table, row)?;
                self.record(UndoEntry::Inserted {
                    table: table.clone(),
                    key,
                });
                1
            }
            Statement::Update {
                table,
                set,
                predicate,
            } => {
                let previous = self.engine.update(table, set, predicate)?;
                let affected = previous.len() as u64;
                for (key, row) in previous {
                    self.record(UndoEntry::Overwritten {
                        table: table.clone(),
                        key,
                        row,
                    });
                }
                affected
            }
            Statement::Delete { table, predicate } => {
                let deleted = self.engine.delete(table, predicate)?;
                let affected = deleted.len() as u64;
                for (key, row) in deleted {
                    self.record(UndoEntry::Overwritten {
                        table: table.clone(),
                        key,
                        row,
                    });
                }
                affected
            }
        };

        self.executed.push(statement.clone());
        Ok(affected)
    }

    fn select(&mut self, select: &Select) -> Result<Vec<Row>, StatementError> {
        let rows = HashJoinExecutor::execute(self.engine, select)?;
        tracing::trace!(%select, rows = rows.len(), "select");
        self.selects.push(select.clone());
        Ok(rows)
    }

    fn table(&self, name: &str) -> Option<TableDef> {
        self.engine.table_def(name)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.in_transaction() {
            tracing::warn!("session dropped with an active transaction, rolling back");
            if let Err(e) = self.rollback() {
                tracing::error!("rollback on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageConfig;
    use ormgraph_proto::{ColumnDef, Predicate, Value};

    fn engine() -> StorageEngine {
        let engine = StorageEngine::open(StorageConfig::temporary()).unwrap();
        engine
            .create_table(
                TableDef::new("country")
                    .with_column(ColumnDef::required("id"))
                    .with_column(ColumnDef::nullable("name"))
                    .with_primary_key(["id"]),
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_rollback_reverses_writes() {
        let engine = engine();
        engine
            .insert("country", &Row::new().with("id", 1i64).with("name", "France"))
            .unwrap();

        let mut session = Session::new(&engine);
        session.begin().unwrap();
        session
            .execute(&Statement::insert("country", Row::new().with("id", 2i64)))
            .unwrap();
        session
            .execute(&Statement::update(
                "country",
                Row::new().with("name", "Gaule"),
                Predicate::eq("id", 1i64),
            ))
            .unwrap();
        session
            .execute(&Statement::delete("country", Predicate::eq("id", 1i64)))
            .unwrap();
        session.rollback().unwrap();

        let rows = engine.scan("country", &Predicate::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("France")));
    }

    #[test]
    fn test_log_keeps_successful_statements() {
        let engine = engine();
        let mut session = Session::new(&engine);

        let insert = Statement::insert("country", Row::new().with("id", 1i64));
        session.execute(&insert).unwrap();
        assert!(session.execute(&insert).is_err());

        assert_eq!(session.executed(), &[insert]);
        session.clear_log();
        assert!(session.executed().is_empty());
    }

    #[test]
    fn test_transaction_state_errors() {
        let engine = engine();
        let mut session = Session::new(&engine);

        assert!(session.commit().is_err());
        session.begin().unwrap();
        assert!(session.begin().is_err());
        session.commit().unwrap();
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_drop_rolls_back_active_transaction() {
        let engine = engine();
        {
            let mut session = Session::new(&engine);
            session.begin().unwrap();
            session
                .execute(&Statement::insert("country", Row::new().with("id", 7i64)))
                .unwrap();
        }
        assert_eq!(engine.count("country").unwrap(), 0);
    }
}
