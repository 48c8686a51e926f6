//! Error types for the persistence engine.

use thiserror::Error;

use crate::entity::EntityKey;

/// Mapping declaration errors, reported while building a
/// [`PersistenceContext`](crate::PersistenceContext).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Two mappings share a name.
    #[error("mapping '{0}' is declared twice")]
    DuplicateMapping(String),

    /// A root mapping has no identifier.
    #[error("mapping '{0}' declares no identifier")]
    MissingIdentifier(String),

    /// A mapping refers to a mapping that is not declared.
    #[error("mapping '{mapping}' refers to unknown mapping '{referenced}'")]
    UnknownMapping { mapping: String, referenced: String },

    /// ASSOCIATION_ONLY cascade on a relation without an association table.
    #[error("relation '{mapping}.{relation}' uses association-only cascade without an association table")]
    AssociationOnlyWithoutTable { mapping: String, relation: String },

    /// Index column on a relation whose foreign key the target side does not own.
    #[error("relation '{mapping}.{relation}' declares an index column without an owning foreign key or association table")]
    IndexWithoutOwningKey { mapping: String, relation: String },

    /// Mapped-by relation without a reverse accessor.
    #[error("mapped-by relation '{mapping}.{relation}' declares no reverse accessor")]
    MissingReverse { mapping: String, relation: String },

    /// Reverse accessor naming a property the target does not declare.
    #[error("relation '{mapping}.{relation}' names reverse accessor '{property}' which the target does not declare")]
    UnknownReverse {
        mapping: String,
        relation: String,
        property: String,
    },

    /// Two mapped properties resolve to the same column of one table.
    #[error("column '{column}' of table '{table}' is mapped more than once")]
    ConflictingColumn { table: String, column: String },

    /// Relation kind and ownership do not combine.
    #[error("relation '{mapping}.{relation}' is not supported: {reason}")]
    UnsupportedRelation {
        mapping: String,
        relation: String,
        reason: String,
    },

    /// Duplicate-tolerant collection without a position column.
    #[error("relation '{mapping}.{relation}' tolerates duplicates but has no index column to tell them apart")]
    DuplicatesWithoutIndex { mapping: String, relation: String },

    /// Invalid inheritance declaration.
    #[error("invalid polymorphism on '{mapping}': {reason}")]
    Polymorphism { mapping: String, reason: String },
}

/// Runtime errors of persister calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Mapping declaration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No mapping with this name.
    #[error("unknown mapping '{0}'")]
    UnknownMapping(String),

    /// Instance type is not handled by the persister it was passed to.
    #[error("persister for '{mapping}' cannot handle instances of '{actual}'")]
    WrongEntityType { mapping: String, actual: String },

    /// Assigned identifier left NULL on a new instance.
    #[error("instance of '{0}' has no identifier")]
    MissingIdentifier(String),

    /// Mandatory relation left empty.
    #[error("mandatory relation '{relation}' of {owner} is not set")]
    MandatoryRelation { relation: String, owner: EntityKey },

    /// An instance's position in its owner's collection cannot be read.
    #[error("index of {instance} in relation '{relation}' cannot be resolved")]
    IndexNotResolved { relation: String, instance: EntityKey },

    /// Update snapshots describe different entities.
    #[error("update snapshots differ in identity: modified {modified}, reference {reference}")]
    IdentifierMismatch {
        modified: EntityKey,
        reference: EntityKey,
    },

    /// Concrete type changed between reference and modified snapshots.
    #[error("{key} changed type from '{from}' to '{to}'")]
    SubtypeChanged {
        key: EntityKey,
        from: String,
        to: String,
    },

    /// Cascade recursion went deeper than configured.
    #[error("cascade depth limit of {0} exceeded")]
    CascadeDepthExceeded(usize),

    /// A write was rejected by the store.
    #[error("statement failed: {statement}: {source}")]
    Statement {
        statement: String,
        #[source]
        source: ormgraph_proto::Error,
    },

    /// A select was rejected by the store.
    #[error("select failed: {select}: {source}")]
    Select {
        select: String,
        #[source]
        source: ormgraph_proto::Error,
    },
}

impl Error {
    /// The store error behind a failed statement or select, if any.
    pub fn store_error(&self) -> Option<&ormgraph_proto::Error> {
        match self {
            Error::Statement { source, .. } | Error::Select { source, .. } => Some(source),
            _ => None,
        }
    }
}
