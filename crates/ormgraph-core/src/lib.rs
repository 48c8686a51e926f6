//! ormgraph core - object-graph persistence over a relational connection.
//!
//! Mappings describe how entity types map onto tables and how they relate
//! to each other. A [`PersistenceContext`] validates them once and hands
//! out a [`Persister`] per mapping, which writes and loads whole entity
//! graphs:
//!
//! - inserts, updates and deletes cascade through relations according to
//!   each relation's [`CascadeMode`]
//! - collections are diffed between a reference and a modified snapshot
//! - loads run one prepared join per mapping and rebuild the trees
//! - polymorphic mappings dispatch to their concrete subtypes
//!
//! The engine never opens or commits transactions; callers wrap persister
//! calls in whatever unit of work their [`Connection`](ormgraph_proto::Connection)
//! offers.

mod cascade;
pub mod config;
pub mod context;
pub mod differ;
pub mod entity;
pub mod error;
pub mod join;
pub mod listener;
pub mod mapping;
pub mod persister;
mod polymorphism;
mod schema;

pub use config::EngineConfig;
pub use context::PersistenceContext;
pub use differ::{diff, CollectionDiff, Held};
pub use entity::{Entity, EntityKey, Related};
pub use error::{ConfigError, Error};
pub use join::JoinPlan;
pub use listener::{ListenerCollection, PersistListener};
pub use mapping::{
    CascadeMode, ColumnMapping, Dispatch, EntityMapping, IdGenerator, IdentifierMapping, IdentifierPolicy,
    MappingRegistry, Ownership, PolymorphismPolicy, RelationDescriptor, RelationKind, SequenceGenerator, Strategy,
    UuidGenerator,
};
pub use persister::Persister;

/// Re-export of the connection contract.
pub use ormgraph_proto as proto;
