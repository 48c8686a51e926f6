//! Dynamic entity instances.
//!
//! An [`Entity`] is one node of an object graph: scalar properties plus
//! related entities. Graphs are owned trees; a back-pointer to an owner is
//! held as an [`EntityKey`] rather than a shared reference.

use std::collections::BTreeMap;
use std::fmt;

use ormgraph_proto::Value;

/// Identity of an entity: its root mapping plus identifier value.
///
/// Identifiers are compared by value, so two instances with the same key are
/// the same logical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Root mapping name (shared by every subtype).
    pub entity_type: String,
    /// Identifier value.
    pub id: Value,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// The value of one relation property.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// A single related entity, or none.
    One(Option<Box<Entity>>),
    /// A collection. Order is meaningful for lists.
    Many(Vec<Entity>),
    /// A pointer to an entity by key, without its state.
    Reference(Option<EntityKey>),
}

/// An entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity_type: String,
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
    persisted: bool,
}

impl Entity {
    /// Create a new, not yet persisted entity of a concrete type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
            persisted: false,
        }
    }

    /// Concrete mapping name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Set a scalar property.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Set a single related entity.
    pub fn with_one(mut self, name: impl Into<String>, entity: Entity) -> Self {
        self.set_one(name, Some(entity));
        self
    }

    /// Set a collection.
    pub fn with_many(mut self, name: impl Into<String>, entities: Vec<Entity>) -> Self {
        self.set_many(name, entities);
        self
    }

    /// Set a pointer to an existing entity.
    pub fn with_reference(mut self, name: impl Into<String>, key: EntityKey) -> Self {
        self.relations
            .insert(name.into(), Related::Reference(Some(key)));
        self
    }

    /// Scalar property, NULL when unset.
    pub fn field(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// All scalar properties.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Raw relation value.
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// All relation values.
    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    pub fn set_one(&mut self, name: impl Into<String>, entity: Option<Entity>) {
        self.relations
            .insert(name.into(), Related::One(entity.map(Box::new)));
    }

    pub fn set_many(&mut self, name: impl Into<String>, entities: Vec<Entity>) {
        self.relations.insert(name.into(), Related::Many(entities));
    }

    /// Single related entity, if set.
    pub fn one(&self, name: &str) -> Option<&Entity> {
        match self.relations.get(name) {
            Some(Related::One(Some(entity))) => Some(entity),
            _ => None,
        }
    }

    pub fn one_mut(&mut self, name: &str) -> Option<&mut Entity> {
        match self.relations.get_mut(name) {
            Some(Related::One(Some(entity))) => Some(entity),
            _ => None,
        }
    }

    /// Collection elements; empty when unset.
    pub fn many(&self, name: &str) -> &[Entity] {
        match self.relations.get(name) {
            Some(Related::Many(entities)) => entities,
            _ => &[],
        }
    }

    /// Mutable collection, if the relation holds one.
    pub fn many_mut(&mut self, name: &str) -> Option<&mut Vec<Entity>> {
        match self.relations.get_mut(name) {
            Some(Related::Many(entities)) => Some(entities),
            _ => None,
        }
    }

    /// Back-pointer key, if set.
    pub fn reference(&self, name: &str) -> Option<&EntityKey> {
        match self.relations.get(name) {
            Some(Related::Reference(Some(key))) => Some(key),
            _ => None,
        }
    }

    /// Related entities as a sequence: zero or one for single relations,
    /// every element for collections.
    pub fn related(&self, name: &str) -> Vec<&Entity> {
        match self.relations.get(name) {
            Some(Related::One(Some(entity))) => vec![entity.as_ref()],
            Some(Related::Many(entities)) => entities.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn related_mut(&mut self, name: &str) -> Vec<&mut Entity> {
        match self.relations.get_mut(name) {
            Some(Related::One(Some(entity))) => vec![entity.as_mut()],
            Some(Related::Many(entities)) => entities.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether this instance was loaded from or written to the store.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Flag this instance as stored (or not).
    pub fn set_persisted(&mut self, persisted: bool) {
        self.persisted = persisted;
    }

    /// Builder form of [`Entity::set_persisted`], for hand-built snapshots.
    pub fn persisted(mut self) -> Self {
        self.persisted = true;
        self
    }
}
