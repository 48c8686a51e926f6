//! Errors reported by a connection.

use thiserror::Error;

/// Failures a backend reports while executing a statement.
#[derive(Debug, Error)]
pub enum Error {
    /// Table is not declared.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// Column is not declared on the table.
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// A row with the same primary key exists.
    #[error("duplicate key {key} in table '{table}'")]
    DuplicateKey { table: String, key: String },

    /// NULL written to a NOT NULL column.
    #[error("column '{column}' of table '{table}' cannot be null")]
    NotNull { table: String, column: String },

    /// A foreign key constraint would be broken.
    #[error("foreign key '{constraint}' violated on table '{table}': {detail}")]
    ForeignKeyViolation {
        table: String,
        constraint: String,
        detail: String,
    },

    /// Transaction state error (nested begin, commit without begin, ...).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl Error {
    /// Check whether this is an integrity constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Error::DuplicateKey { .. } | Error::NotNull { .. } | Error::ForeignKeyViolation { .. }
        )
    }
}
