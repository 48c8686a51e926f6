//! Write statements and predicates.
//!
//! Statements are backend-neutral. Their `Display` form is ANSI-flavoured SQL
//! used for logging and error context; a dialect layer is free to render them
//! differently.

use std::fmt;

use crate::row::Row;
use crate::value::Value;

/// A single column condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`.
    Eq(String, Value),
    /// `column IN (values)`.
    In(String, Vec<Value>),
    /// `column IS NULL`.
    IsNull(String),
}

impl Condition {
    /// Column this condition tests.
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(c, _) | Condition::In(c, _) | Condition::IsNull(c) => c,
        }
    }

    /// The same test applied to another column.
    pub fn with_column(&self, column: impl Into<String>) -> Self {
        let column = column.into();
        match self {
            Condition::Eq(_, v) => Condition::Eq(column, v.clone()),
            Condition::In(_, vs) => Condition::In(column, vs.clone()),
            Condition::IsNull(_) => Condition::IsNull(column),
        }
    }

    /// Evaluate the condition against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            // NULL never equals anything, as in SQL.
            Condition::Eq(column, value) => {
                let actual = row.get_or_null(column);
                !actual.is_null() && actual == value
            }
            Condition::In(column, values) => {
                let actual = row.get_or_null(column);
                !actual.is_null() && values.contains(actual)
            }
            Condition::IsNull(column) => row.get_or_null(column).is_null(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Eq(column, value) => write!(f, "{} = {}", column, value),
            Condition::In(column, values) => {
                write!(f, "{} IN (", column)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str(")")
            }
            Condition::IsNull(column) => write!(f, "{} IS NULL", column),
        }
    }
}

/// A conjunction of conditions. An empty predicate matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    /// Conditions joined with AND.
    pub conditions: Vec<Condition>,
}

impl Predicate {
    /// A predicate matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    /// `column IN (values)`.
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            conditions: vec![Condition::In(column.into(), values)],
        }
    }

    /// Add an equality condition.
    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    /// Add an `IS NULL` condition.
    pub fn and_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull(column.into()));
        self
    }

    /// Add an `IN` condition.
    pub fn and_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::In(column.into(), values));
        self
    }

    /// Check if this predicate has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}", condition)?;
        }
        Ok(())
    }
}

/// A write statement against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Insert one row.
    Insert {
        /// Target table.
        table: String,
        /// Column values.
        row: Row,
    },
    /// Update matching rows.
    Update {
        /// Target table.
        table: String,
        /// Columns to assign.
        set: Row,
        /// Rows to update.
        predicate: Predicate,
    },
    /// Delete matching rows.
    Delete {
        /// Target table.
        table: String,
        /// Rows to delete.
        predicate: Predicate,
    },
}

impl Statement {
    /// Create an insert statement.
    pub fn insert(table: impl Into<String>, row: Row) -> Self {
        Statement::Insert {
            table: table.into(),
            row,
        }
    }

    /// Create an update statement.
    pub fn update(table: impl Into<String>, set: Row, predicate: Predicate) -> Self {
        Statement::Update {
            table: table.into(),
            set,
            predicate,
        }
    }

    /// Create a delete statement.
    pub fn delete(table: impl Into<String>, predicate: Predicate) -> Self {
        Statement::Delete {
            table: table.into(),
            predicate,
        }
    }

    /// Table this statement writes to.
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Check if this is an insert.
    pub fn is_insert(&self) -> bool {
        matches!(self, Statement::Insert { .. })
    }

    /// Check if this is an update.
    pub fn is_update(&self) -> bool {
        matches!(self, Statement::Update { .. })
    }

    /// Check if this is a delete.
    pub fn is_delete(&self) -> bool {
        matches!(self, Statement::Delete { .. })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Insert { table, row } => {
                let columns: Vec<&str> = row.columns().map(String::as_str).collect();
                let values: Vec<String> = row.iter().map(|(_, v)| v.to_string()).collect();
                write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    values.join(", ")
                )
            }
            Statement::Update {
                table,
                set,
                predicate,
            } => {
                let assignments: Vec<String> =
                    set.iter().map(|(c, v)| format!("{} = {}", c, v)).collect();
                write!(f, "UPDATE {} SET {}", table, assignments.join(", "))?;
                if !predicate.is_empty() {
                    write!(f, " WHERE {}", predicate)?;
                }
                Ok(())
            }
            Statement::Delete { table, predicate } => {
                write!(f, "DELETE FROM {}", table)?;
                if !predicate.is_empty() {
                    write!(f, " WHERE {}", predicate)?;
                }
                Ok(())
            }
        }
    }
}
