//! Join-tree select statements.

use std::fmt;

use crate::row::qualify;
use crate::statement::Predicate;

/// Join flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Drop the left row when nothing matches.
    Inner,
    /// Keep the left row, padding the right side with NULLs.
    LeftOuter,
}

/// A table with its alias in the select.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Table name.
    pub table: String,
    /// Alias unique within the select.
    pub alias: String,
}

impl TableRef {
    /// Create a table reference.
    pub fn new(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
        }
    }
}

/// One equi-join `left_alias.left_column = right.alias.right_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join flavour.
    pub kind: JoinKind,
    /// Joined table.
    pub right: TableRef,
    /// Alias of an already joined table on the left side.
    pub left_alias: String,
    /// Column of the left table.
    pub left_column: String,
    /// Column of the joined table.
    pub right_column: String,
}

/// A select over a join tree. Every column of every table is projected,
/// keyed `alias.column` in result rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Root table.
    pub from: TableRef,
    /// Joins, in dependency order: each left alias is already present.
    pub joins: Vec<Join>,
    /// Filter over qualified `alias.column` names.
    pub filter: Predicate,
}

impl Select {
    /// Select every row of a table.
    pub fn from(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            from: TableRef::new(table, alias),
            joins: Vec::new(),
            filter: Predicate::all(),
        }
    }

    /// Append a join.
    pub fn join(
        mut self,
        kind: JoinKind,
        right: TableRef,
        left_alias: impl Into<String>,
        left_column: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            right,
            left_alias: left_alias.into(),
            left_column: left_column.into(),
            right_column: right_column.into(),
        });
        self
    }

    /// Replace the filter.
    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    /// All aliases in join order, root first.
    pub fn aliases(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.right))
    }

    /// Number of joined tables, root excluded.
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {} {}", self.from.table, self.from.alias)?;
        for join in &self.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::LeftOuter => "LEFT OUTER JOIN",
            };
            write!(
                f,
                " {} {} {} ON {} = {}",
                kind,
                join.right.table,
                join.right.alias,
                qualify(&join.left_alias, &join.left_column),
                qualify(&join.right.alias, &join.right_column)
            )?;
        }
        if !self.filter.is_empty() {
            write!(f, " WHERE {}", self.filter)?;
        }
        Ok(())
    }
}
