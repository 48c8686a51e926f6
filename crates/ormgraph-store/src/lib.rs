//! Embedded relational store for ormgraph.
//!
//! Tables live in sled trees, one per table, with definitions kept in a
//! catalog tree. A [`Session`] implements [`ormgraph_proto::Connection`] on
//! top of a [`StorageEngine`], enforcing primary keys, NOT NULL and foreign
//! keys, and executing join-tree selects with hash joins.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod join;
pub mod session;

pub use config::StorageConfig;
pub use engine::{KeyedRow, StorageEngine};
pub use error::Error;
pub use join::HashJoinExecutor;
pub use session::Session;
