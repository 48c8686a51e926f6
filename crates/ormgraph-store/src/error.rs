//! Store error types.

use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Statement-level failure (constraint, unknown table, ...).
    #[error(transparent)]
    Statement(#[from] ormgraph_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<Error> for ormgraph_proto::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Statement(e) => e,
            other => ormgraph_proto::Error::Backend(other.to_string()),
        }
    }
}
