//! Cascade resolution.
//!
//! A [`Cascade`] carries one persister call through the object graph: it
//! holds the connection, the keys already written in this call and the
//! recursion depth. Relation resolvers live in submodules, one per storage
//! shape:
//!
//! - [`to_one`] - the source row holds the foreign key
//! - [`to_many`] - the target rows hold the foreign key (mapped-by)
//! - [`association`] - an association table holds the links

pub(crate) mod association;
pub(crate) mod to_many;
pub(crate) mod to_one;

use std::collections::HashSet;

use ormgraph_proto::{Connection, Predicate, Row, Statement, Value};

use crate::context::PersistenceContext;
use crate::entity::{Entity, EntityKey};
use crate::error::Error;
use crate::mapping::{ConcretePlan, RelationDescriptor};

/// Operation tracked in the visited set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Operation {
    Update,
    Delete,
}

/// An instance queued for insertion, with columns its owner contributes to
/// its base row (mapped-by foreign key, index).
pub(crate) struct Pending<'e> {
    pub entity: &'e mut Entity,
    pub extra: Row,
    /// Already written earlier in this call.
    pub skip: bool,
}

impl<'e> Pending<'e> {
    pub fn new(entity: &'e mut Entity) -> Self {
        Self::with_extra(entity, Row::new())
    }

    pub fn with_extra(entity: &'e mut Entity, extra: Row) -> Self {
        Self {
            entity,
            extra,
            skip: false,
        }
    }
}

/// A (modified, reference) snapshot pair queued for update.
pub(crate) struct UpdatePair<'e> {
    pub modified: &'e mut Entity,
    pub reference: &'e Entity,
    /// Already updated earlier in this call.
    pub skip: bool,
}

impl<'e> UpdatePair<'e> {
    pub fn new(modified: &'e mut Entity, reference: &'e Entity) -> Self {
        Self {
            modified,
            reference,
            skip: false,
        }
    }
}

/// Per-call bookkeeping.
#[derive(Debug)]
struct CascadeState {
    depth: usize,
    max_depth: usize,
    inserted: HashSet<EntityKey>,
    visited: HashSet<(EntityKey, Operation)>,
}

/// One persister call in progress.
pub(crate) struct Cascade<'a, 'c> {
    pub ctx: &'a PersistenceContext,
    conn: &'c mut dyn Connection,
    state: CascadeState,
}

impl<'a, 'c> Cascade<'a, 'c> {
    pub fn new(ctx: &'a PersistenceContext, conn: &'c mut dyn Connection) -> Self {
        Self {
            ctx,
            conn,
            state: CascadeState {
                depth: 0,
                max_depth: ctx.config().max_cascade_depth,
                inserted: HashSet::new(),
                visited: HashSet::new(),
            },
        }
    }

    /// Fail when one more level of recursion would exceed the limit.
    pub fn check_depth(&self) -> Result<(), Error> {
        if self.state.depth >= self.state.max_depth {
            return Err(Error::CascadeDepthExceeded(self.state.max_depth));
        }
        Ok(())
    }

    /// Enter one level of recursion.
    pub fn enter(&mut self) -> Result<(), Error> {
        self.check_depth()?;
        self.state.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.state.depth = self.state.depth.saturating_sub(1);
    }

    /// Record an insert; false when the key was already inserted in this call.
    pub fn mark_inserted(&mut self, key: EntityKey) -> bool {
        self.state.inserted.insert(key)
    }

    pub fn was_inserted(&self, key: &EntityKey) -> bool {
        self.state.inserted.contains(key)
    }

    /// Record a visit; false when the key was already visited for `operation`.
    pub fn mark_visited(&mut self, key: EntityKey, operation: Operation) -> bool {
        self.state.visited.insert((key, operation))
    }

    /// Identity of an instance.
    pub fn key(&self, entity: &Entity) -> Result<EntityKey, Error> {
        self.ctx.registry().key(entity)
    }

    pub fn id_of(&self, entity: &Entity) -> Result<Value, Error> {
        Ok(self
            .ctx
            .registry()
            .identifier(entity.entity_type())?
            .id(entity)
            .clone())
    }

    /// Generate an identifier if the policy asks for one; returns the id.
    pub fn assign_id(&self, entity: &mut Entity) -> Result<Value, Error> {
        let identifier = self.ctx.registry().identifier(entity.entity_type())?;
        identifier.assign(entity);
        Ok(identifier.id(entity).clone())
    }

    pub fn is_persisted(&self, entity: &Entity) -> Result<bool, Error> {
        Ok(self
            .ctx
            .registry()
            .identifier(entity.entity_type())?
            .is_persisted(entity))
    }

    /// Check whether two instances are the same logical entity.
    pub fn same_entity(&self, a: &Entity, b: &Entity) -> Result<bool, Error> {
        let a = self.key(a)?;
        Ok(!a.id.is_null() && a == self.key(b)?)
    }

    /// Whether an instance must be inserted by a cascade rather than
    /// attached. `claimed` collects keys queued within the current resolver.
    pub fn needs_insert(&self, entity: &Entity, claimed: &mut HashSet<EntityKey>) -> Result<bool, Error> {
        if self.is_persisted(entity)? {
            return Ok(false);
        }
        let key = self.key(entity)?;
        if key.id.is_null() {
            return Ok(true);
        }
        Ok(!self.was_inserted(&key) && claimed.insert(key))
    }

    /// Base table and identifier column of an instance's concrete type.
    pub fn base_of(&self, entity: &Entity) -> Result<&'a ConcretePlan, Error> {
        self.ctx.registry().plan(entity.entity_type())
    }

    /// Execute one statement.
    pub fn execute(&mut self, statement: Statement) -> Result<u64, Error> {
        if self.ctx.config().log_statements {
            tracing::debug!(%statement, "execute");
        }
        self.conn
            .execute(&statement)
            .map_err(|source| Error::Statement {
                statement: statement.to_string(),
                source,
            })
    }

    /// Execute statements in order.
    pub fn execute_all(&mut self, statements: Vec<Statement>) -> Result<u64, Error> {
        let mut affected = 0;
        for statement in statements {
            affected += self.execute(statement)?;
        }
        Ok(affected)
    }

    /// `column IN (...)` predicates, split to respect the configured limit.
    pub fn in_predicates(&self, column: &str, values: &[Value]) -> Vec<Predicate> {
        values
            .chunks(self.ctx.config().in_list_chunk())
            .map(|chunk| Predicate::is_in(column.to_string(), chunk.to_vec()))
            .collect()
    }

    /// Foreign key value a source-owned relation writes.
    pub fn foreign_key(&self, entity: &Entity, relation: &RelationDescriptor) -> Result<Value, Error> {
        if let Some(target) = entity.one(&relation.name) {
            return self.id_of(target);
        }
        Ok(entity
            .reference(&relation.name)
            .map(|key| key.id.clone())
            .unwrap_or(Value::Null))
    }
}

/// Identifier of an instance for diffing; `None` when unset.
pub(crate) fn identity(ctx: &PersistenceContext, entity: &Entity) -> Option<Value> {
    let id = ctx
        .registry()
        .identifier(entity.entity_type())
        .ok()?
        .id(entity);
    (!id.is_null()).then(|| id.clone())
}

/// Columns linking a target row to its owner: the foreign key and, for
/// indexed relations, the position.
pub(crate) fn link_row(relation: &RelationDescriptor, column: &str, owner: &Value, position: usize) -> Row {
    let mut row = Row::new().with(column, owner.clone());
    if let Some(index) = &relation.index_column {
        row.set(index.clone(), position as i64);
    }
    row
}
