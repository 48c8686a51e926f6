//! ormgraph relational contracts.
//!
//! This crate holds everything the persistence engine and a storage backend
//! must agree on:
//!
//! - [`value`] - column values, identifiers included
//! - [`row`] - named column rows
//! - [`statement`] - insert/update/delete statements and predicates
//! - [`select`] - join-tree selects
//! - [`schema`] - table definitions for the DDL layer
//! - [`connection`] - the connection trait
//! - [`error`] - backend errors

pub mod connection;
pub mod error;
pub mod row;
pub mod schema;
pub mod select;
pub mod statement;
pub mod value;

pub use connection::Connection;
pub use error::Error;
pub use row::{qualify, Row};
pub use schema::{ColumnDef, ForeignKeyDef, TableDef};
pub use select::{Join, JoinKind, Select, TableRef};
pub use statement::{Condition, Predicate, Statement};
pub use value::Value;
