//! Identifier mapping and generation.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ormgraph_proto::Value;

use crate::entity::Entity;

/// Source of identifiers for new instances.
///
/// A generator is injected per mapping and called once per new instance.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Produce the next identifier.
    fn next_id(&self) -> Value;
}

/// Monotonic `Int64` identifiers.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicI64,
}

impl SequenceGenerator {
    /// Start the sequence at `first`.
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceGenerator {
    fn next_id(&self) -> Value {
        Value::Int64(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Random UUID identifiers.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> Value {
        Value::Uuid(*uuid::Uuid::new_v4().as_bytes())
    }
}

/// How identifiers are obtained.
#[derive(Debug, Clone)]
pub enum IdentifierPolicy {
    /// The caller assigns identifiers; the persisted flag tells new
    /// instances from stored ones.
    Assigned,
    /// The engine assigns identifiers to instances that have none; a
    /// non-null identifier means the instance is stored.
    Generated(Arc<dyn IdGenerator>),
}

/// The identifier of an entity mapping.
#[derive(Debug, Clone)]
pub struct IdentifierMapping {
    /// Entity property holding the identifier.
    pub property: String,
    /// Column holding the identifier.
    pub column: String,
    pub policy: IdentifierPolicy,
}

impl IdentifierMapping {
    /// Caller-assigned identifier stored in a column of the same name.
    pub fn assigned(property: impl Into<String>) -> Self {
        let property = property.into();
        Self {
            column: property.clone(),
            property,
            policy: IdentifierPolicy::Assigned,
        }
    }

    /// Engine-generated identifier stored in a column of the same name.
    pub fn generated(property: impl Into<String>, generator: Arc<dyn IdGenerator>) -> Self {
        let property = property.into();
        Self {
            column: property.clone(),
            property,
            policy: IdentifierPolicy::Generated(generator),
        }
    }

    /// Store the identifier in another column.
    pub fn in_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Identifier value of an instance.
    pub fn id<'e>(&self, entity: &'e Entity) -> &'e Value {
        entity.field(&self.property)
    }

    /// Whether an instance is already stored, which decides insert versus
    /// update during cascades.
    pub fn is_persisted(&self, entity: &Entity) -> bool {
        match self.policy {
            IdentifierPolicy::Assigned => entity.is_persisted(),
            IdentifierPolicy::Generated(_) => {
                entity.is_persisted() || !self.id(entity).is_null()
            }
        }
    }

    /// Give a new instance an identifier if the policy generates one and
    /// it has none. Returns whether an identifier was assigned.
    pub fn assign(&self, entity: &mut Entity) -> bool {
        match &self.policy {
            IdentifierPolicy::Generated(generator) if self.id(entity).is_null() => {
                entity.set_field(self.property.clone(), generator.next_id());
                true
            }
            _ => false,
        }
    }
}
