//! Row assembly.
//!
//! Folds the flat rows of a join plan back into entity trees. Every row is
//! walked from the root node down; a node instance is keyed by its owner
//! instance, the edge and its identifier, so repeated rows collapse into
//! one instance.

use std::collections::HashMap;

use ormgraph_proto::{Row, Value};

use crate::entity::{Entity, EntityKey};
use crate::error::Error;
use crate::mapping::{MappingRegistry, RelationDescriptor};

use super::plan::{EdgeTarget, JoinPlan, NodeShape, PlanNode};

/// A root entity with its unqualified base table columns.
#[derive(Debug)]
pub(crate) struct LoadedRoot {
    pub entity: Entity,
    pub columns: Row,
}

enum Child {
    Slot(usize),
    Loaded(Entity),
}

struct Attached {
    edge: usize,
    child: Child,
    index: Option<i64>,
}

struct Slot {
    entity: Entity,
    key: EntityKey,
    node: usize,
    /// Owning slot within this assembly; `None` for roots.
    parent: Option<usize>,
    attached: Vec<Attached>,
    /// Source-side foreign keys of deferred edges.
    foreign_keys: Vec<(usize, Value)>,
}

/// (owner slot, edge, child id, position for duplicate-tolerant relations)
type ChildKey = (usize, usize, Value, Option<i64>);

pub(crate) struct Assembly<'p> {
    plan: &'p JoinPlan,
    registry: &'p MappingRegistry,
    slots: Vec<Slot>,
    roots: Vec<(usize, Row)>,
    root_ids: HashMap<Value, usize>,
    children: HashMap<ChildKey, usize>,
}

impl<'p> Assembly<'p> {
    pub fn new(plan: &'p JoinPlan, registry: &'p MappingRegistry) -> Self {
        Self {
            plan,
            registry,
            slots: Vec::new(),
            roots: Vec::new(),
            root_ids: HashMap::new(),
            children: HashMap::new(),
        }
    }

    pub fn add_row(&mut self, row: &Row) -> Result<(), Error> {
        let plan = self.plan;
        let Some((shape, id)) = self.resolve(plan.root(), row)? else {
            return Ok(());
        };
        let slot = match self.root_ids.get(&id) {
            Some(&slot) => slot,
            None => {
                let slot = self.new_slot(0, None, shape, row)?;
                let base = Row::from_pairs(
                    row.iter()
                        .filter_map(|(column, value)| {
                            column
                                .strip_prefix(shape.aliases[0].as_str())
                                .and_then(|c| c.strip_prefix('.'))
                                .map(|c| (c.to_string(), value.clone()))
                        }),
                );
                self.roots.push((slot, base));
                self.root_ids.insert(id, slot);
                slot
            }
        };
        self.visit(slot, 0, shape, row)
    }

    /// Slots owning `edge`, with their identifiers.
    pub fn owners(&self, edge: usize) -> Vec<(usize, Value)> {
        let edge = &self.plan.edges[edge];
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.node == edge.owner && edge.owner_plans.iter().any(|p| p == s.entity.entity_type()))
            .map(|(i, s)| (i, s.key.id.clone()))
            .collect()
    }

    /// Slot keys with their owning slot, owners always listed first.
    pub fn keys(&self) -> impl Iterator<Item = (&EntityKey, Option<usize>)> {
        self.slots.iter().map(|s| (&s.key, s.parent))
    }

    /// Root slots with their unqualified base table columns.
    pub fn roots(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.roots.iter().map(|(slot, columns)| (*slot, columns))
    }

    /// Foreign key a slot holds for a deferred source-side edge.
    pub fn foreign_key(&self, slot: usize, edge: usize) -> Option<&Value> {
        self.slots[slot]
            .foreign_keys
            .iter()
            .find(|(e, _)| *e == edge)
            .map(|(_, value)| value)
    }

    /// Attach an entity loaded by a follow-up query.
    pub fn attach(&mut self, slot: usize, edge: usize, entity: Entity, index: Option<i64>) {
        self.slots[slot].attached.push(Attached {
            edge,
            child: Child::Loaded(entity),
            index,
        });
    }

    /// Build the entity trees, roots in first-seen order.
    pub fn finish(self) -> Vec<LoadedRoot> {
        let plan = self.plan;
        let mut built: Vec<Option<Entity>> = (0..self.slots.len()).map(|_| None).collect();

        // Children always have higher slot numbers than their owner.
        for (position, slot) in self.slots.into_iter().enumerate().rev() {
            let Slot {
                mut entity,
                mut attached,
                ..
            } = slot;
            attached.sort_by_key(|a| (a.edge, a.index));

            let mut grouped: Vec<(usize, Vec<Entity>)> = Vec::new();
            for Attached { edge, child, .. } in attached {
                let child = match child {
                    Child::Slot(slot) => built[slot].take(),
                    Child::Loaded(entity) => Some(entity),
                };
                let Some(child) = child else {
                    continue;
                };
                match grouped.last_mut() {
                    Some((e, children)) if *e == edge => children.push(child),
                    _ => grouped.push((edge, vec![child])),
                }
            }
            for (edge, children) in grouped {
                let relation = &plan.edges[edge].relation;
                if relation.kind.is_collection() {
                    entity.set_many(relation.name.as_str(), children);
                } else {
                    entity.set_one(relation.name.as_str(), children.into_iter().next());
                }
            }
            built[position] = Some(entity);
        }

        self.roots
            .into_iter()
            .filter_map(|(slot, columns)| built[slot].take().map(|entity| LoadedRoot { entity, columns }))
            .collect()
    }

    /// First shape of `node` present in the row, with the instance id.
    fn resolve(&self, node: &'p PlanNode, row: &Row) -> Result<Option<(&'p NodeShape, Value)>, Error> {
        for shape in &node.shapes {
            if !shape.presence.holds(row) {
                continue;
            }
            let plan = self.registry.plan(&shape.plan)?;
            let id = row.qualified(&shape.aliases[0], plan.id_column());
            if !id.is_null() {
                return Ok(Some((shape, id.clone())));
            }
        }
        Ok(None)
    }

    fn new_slot(&mut self, node: usize, parent: Option<usize>, shape: &NodeShape, row: &Row) -> Result<usize, Error> {
        let plan = self.registry.plan(&shape.plan)?;
        let identifier = self.registry.identifier(&plan.root)?;
        let id = row.qualified(&shape.aliases[0], plan.id_column()).clone();

        let mut entity = Entity::new(plan.name.as_str());
        entity.set_field(identifier.property.as_str(), id.clone());
        for (part, alias) in plan.parts.iter().zip(&shape.aliases) {
            for column in &part.columns {
                entity.set_field(column.property.as_str(), row.qualified(alias, &column.column).clone());
            }
        }
        for relation in &plan.relations {
            let descriptor = &relation.descriptor;
            if descriptor.kind.is_collection() {
                entity.set_many(descriptor.name.as_str(), Vec::new());
            } else {
                entity.set_one(descriptor.name.as_str(), None);
            }
        }
        entity.set_persisted(true);

        self.slots.push(Slot {
            entity,
            key: EntityKey::new(plan.root.as_str(), id),
            node,
            parent,
            attached: Vec::new(),
            foreign_keys: Vec::new(),
        });
        Ok(self.slots.len() - 1)
    }

    fn visit(&mut self, slot: usize, node: usize, shape: &'p NodeShape, row: &Row) -> Result<(), Error> {
        let plan = self.plan;
        for &edge_index in &plan.nodes[node].edges {
            let edge = &plan.edges[edge_index];
            if !edge.owner_plans.contains(&shape.plan) {
                continue;
            }
            match edge.target {
                EdgeTarget::Deferred => {
                    let Some(column) = edge.relation.source_column() else {
                        continue;
                    };
                    if self.foreign_key(slot, edge_index).is_some() {
                        continue;
                    }
                    let part = self
                        .registry
                        .plan(&shape.plan)?
                        .relation(&edge.relation.name)
                        .map_or(0, |r| r.part);
                    let value = row.qualified(&shape.aliases[part], column);
                    if !value.is_null() {
                        self.slots[slot].foreign_keys.push((edge_index, value.clone()));
                    }
                }
                EdgeTarget::Joined(child_node) => {
                    let Some((child_shape, child_id)) = self.resolve(&plan.nodes[child_node], row)? else {
                        continue;
                    };
                    let index = match &edge.index {
                        Some(column) => {
                            let key = || {
                                Ok::<_, Error>(EntityKey::new(
                                    self.registry.root_of(&child_shape.plan)?,
                                    child_id.clone(),
                                ))
                            };
                            Some(position(row.get_or_null(column), &edge.relation, key)?)
                        }
                        None => None,
                    };
                    let duplicate_position = index.filter(|_| edge.relation.tolerates_duplicates);
                    let key = (slot, edge_index, child_id, duplicate_position);
                    let child = match self.children.get(&key) {
                        Some(&child) => child,
                        None => {
                            let child = self.new_slot(child_node, Some(slot), child_shape, row)?;
                            self.slots[slot].attached.push(Attached {
                                edge: edge_index,
                                child: Child::Slot(child),
                                index,
                            });
                            self.children.insert(key, child);
                            child
                        }
                    };
                    self.visit(child, child_node, child_shape, row)?;
                }
            }
        }
        Ok(())
    }
}

/// Read an element position; NULL or non-integer positions are errors.
pub(crate) fn position(
    value: &Value,
    relation: &RelationDescriptor,
    instance: impl FnOnce() -> Result<EntityKey, Error>,
) -> Result<i64, Error> {
    match value.as_i64() {
        Some(index) => Ok(index),
        None => Err(Error::IndexNotResolved {
            relation: relation.name.clone(),
            instance: instance()?,
        }),
    }
}
