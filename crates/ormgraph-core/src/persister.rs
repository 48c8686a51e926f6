//! Persister façade and the per-concrete-type write path.

use std::collections::HashMap;
use std::sync::Arc;

use ormgraph_proto::{Connection, Predicate, Row, Statement, Value};

use crate::cascade::{association, to_many, to_one, Cascade, Operation, Pending, UpdatePair};
use crate::context::PersistenceContext;
use crate::entity::{Entity, EntityKey};
use crate::error::Error;
use crate::join::{self, Loader, RootFilter};
use crate::listener::PersistListener;
use crate::mapping::{ConcretePlan, Dispatch, Ownership};

/// Persistence operations for one mapping.
///
/// A persister is a cheap view over its [`PersistenceContext`]. Every call
/// runs against the connection it is given; wrap calls in the backend's
/// transaction to make a whole graph write atomic.
#[derive(Debug, Clone, Copy)]
pub struct Persister<'a> {
    ctx: &'a PersistenceContext,
    mapping: &'a str,
}

impl<'a> Persister<'a> {
    pub(crate) fn new(ctx: &'a PersistenceContext, mapping: &'a str) -> Self {
        Self { ctx, mapping }
    }

    /// Mapping this persister writes.
    pub fn mapping(&self) -> &str {
        self.mapping
    }

    /// Insert an entity and cascade into its relations.
    pub fn insert(&self, conn: &mut dyn Connection, entity: &mut Entity) -> Result<(), Error> {
        self.insert_all(conn, std::slice::from_mut(entity))
    }

    /// Insert several entities in one call. Entities shared between them
    /// are written once.
    pub fn insert_all(&self, conn: &mut dyn Connection, entities: &mut [Entity]) -> Result<(), Error> {
        tracing::debug!(mapping = self.mapping, count = entities.len(), "insert");
        let batch = entities.iter_mut().map(Pending::new).collect();
        Cascade::new(self.ctx, conn).insert(self.mapping, batch)
    }

    /// Write the changes between `reference` (the stored state) and
    /// `modified`. With `all_columns`, every mapped column is written
    /// instead of only the changed ones.
    pub fn update(
        &self,
        conn: &mut dyn Connection,
        modified: &mut Entity,
        reference: &Entity,
        all_columns: bool,
    ) -> Result<(), Error> {
        self.update_all(conn, vec![(modified, reference)], all_columns)
    }

    /// Update several (modified, reference) pairs in one call.
    pub fn update_all(
        &self,
        conn: &mut dyn Connection,
        pairs: Vec<(&mut Entity, &Entity)>,
        all_columns: bool,
    ) -> Result<(), Error> {
        tracing::debug!(mapping = self.mapping, count = pairs.len(), all_columns, "update");
        let pairs = pairs
            .into_iter()
            .map(|(modified, reference)| UpdatePair::new(modified, reference))
            .collect();
        Cascade::new(self.ctx, conn).update(self.mapping, pairs, all_columns)
    }

    /// Delete an entity and cascade into its relations.
    pub fn delete(&self, conn: &mut dyn Connection, entity: &Entity) -> Result<(), Error> {
        self.delete_all(conn, std::slice::from_ref(entity))
    }

    pub fn delete_all(&self, conn: &mut dyn Connection, entities: &[Entity]) -> Result<(), Error> {
        tracing::debug!(mapping = self.mapping, count = entities.len(), "delete");
        Cascade::new(self.ctx, conn).delete(self.mapping, entities.iter().collect())
    }

    /// Load the graph rooted at `id` and delete it. Returns the number of
    /// root entities deleted; unknown identifiers are ignored.
    pub fn delete_by_id(&self, conn: &mut dyn Connection, id: impl Into<Value>) -> Result<usize, Error> {
        self.delete_by_ids(conn, &[id.into()])
    }

    pub fn delete_by_ids(&self, conn: &mut dyn Connection, ids: &[Value]) -> Result<usize, Error> {
        let loaded = self.load(conn, RootFilter::Ids(ids.to_vec()))?;
        self.delete_all(conn, &loaded)?;
        Ok(loaded.len())
    }

    /// Load one entity graph by identifier.
    pub fn select(&self, conn: &mut dyn Connection, id: impl Into<Value>) -> Result<Option<Entity>, Error> {
        Ok(self.select_ids(conn, &[id.into()])?.into_iter().next())
    }

    /// Load entity graphs by identifier, in the order requested. Unknown
    /// identifiers are skipped.
    pub fn select_ids(&self, conn: &mut dyn Connection, ids: &[Value]) -> Result<Vec<Entity>, Error> {
        if let Some(listeners) = self.ctx.listeners(self.mapping) {
            listeners.each(|l| l.before_select(ids));
        }
        let entities = self.load(conn, RootFilter::Ids(ids.to_vec()))?;
        self.notify_selected(&entities)?;
        Ok(entities)
    }

    /// Load every entity graph of the mapping.
    pub fn select_all(&self, conn: &mut dyn Connection) -> Result<Vec<Entity>, Error> {
        if let Some(listeners) = self.ctx.listeners(self.mapping) {
            listeners.each(|l| l.before_select(&[]));
        }
        let entities = self.load(conn, RootFilter::All)?;
        self.notify_selected(&entities)?;
        Ok(entities)
    }

    /// Register a listener on this mapping.
    pub fn add_listener(&self, listener: Arc<dyn PersistListener>) -> Result<(), Error> {
        self.ctx.add_listener(self.mapping, listener)
    }

    fn load(&self, conn: &mut dyn Connection, filter: RootFilter) -> Result<Vec<Entity>, Error> {
        let registry = self.ctx.registry();
        let mut entities: Vec<Entity> = Loader::new(self.ctx, conn)
            .load(self.mapping, &filter)?
            .into_iter()
            .map(|loaded| loaded.entity)
            .collect();
        for entity in &mut entities {
            join::wire_back_references(registry, entity)?;
        }

        if let RootFilter::Ids(ids) = filter {
            let identifier = registry.identifier(self.mapping)?;
            let mut by_id: HashMap<Value, Entity> = entities
                .into_iter()
                .map(|e| (identifier.id(&e).clone(), e))
                .collect();
            entities = ids.iter().filter_map(|id| by_id.remove(id)).collect();
        }
        tracing::debug!(mapping = self.mapping, count = entities.len(), "selected");
        Ok(entities)
    }

    fn notify_selected(&self, entities: &[Entity]) -> Result<(), Error> {
        if let Some(listeners) = self.ctx.listeners(self.mapping) {
            listeners.each(|l| l.after_select(entities));
        }
        if let Dispatch::Polymorphic { concretes, .. } = self.ctx.registry().dispatch(self.mapping)? {
            for concrete in concretes.iter().filter(|c| c.as_str() != self.mapping) {
                let Some(listeners) = self.ctx.listeners(concrete) else {
                    continue;
                };
                let subset: Vec<Entity> = entities
                    .iter()
                    .filter(|e| e.entity_type() == concrete.as_str())
                    .cloned()
                    .collect();
                if !subset.is_empty() {
                    listeners.each(|l| l.after_select(&subset));
                }
            }
        }
        Ok(())
    }
}

impl<'a, 'c> Cascade<'a, 'c> {
    /// Assign identifiers and mark instances already inserted in this call
    /// as skipped.
    pub(crate) fn claim_inserts(&mut self, plan: &ConcretePlan, batch: &mut [Pending<'_>]) -> Result<(), Error> {
        let identifier = self.ctx.registry().identifier(&plan.root)?;
        for pending in batch.iter_mut() {
            identifier.assign(pending.entity);
            let id = identifier.id(pending.entity);
            if id.is_null() {
                return Err(Error::MissingIdentifier(plan.name.clone()));
            }
            if !self.mark_inserted(EntityKey::new(plan.root.as_str(), id.clone())) {
                pending.skip = true;
                pending.entity.set_persisted(true);
            }
        }
        Ok(())
    }

    /// Insert a claimed batch of one concrete type.
    ///
    /// Source-side targets go first, then one row per table part, then
    /// mapped-by and association relations.
    pub(crate) fn insert_concrete(
        &mut self,
        plan: &ConcretePlan,
        batch: &mut [Pending<'_>],
        notify: bool,
    ) -> Result<(), Error> {
        if batch.iter().all(|p| p.skip) {
            return Ok(());
        }
        self.enter()?;

        let ctx = self.ctx;
        let listeners = ctx.listeners(&plan.name).filter(|_| notify);
        if let Some(listeners) = listeners {
            let entities: Vec<&Entity> = batch.iter().filter(|p| !p.skip).map(|p| &*p.entity).collect();
            listeners.each(|l| l.before_insert(&entities));
        }

        for pending in batch.iter().filter(|p| !p.skip) {
            self.check_mandatory(plan, &*pending.entity)?;
        }
        for relation in plan.relations.iter().filter(|r| r.descriptor.is_source_owned()) {
            to_one::before_insert(self, &relation.descriptor, batch)?;
        }

        let mut statements = Vec::new();
        for (index, part) in plan.parts.iter().enumerate() {
            for pending in batch.iter().filter(|p| !p.skip) {
                let mut row = self.part_row(plan, index, &*pending.entity)?;
                if index == 0 {
                    row.extend(&pending.extra);
                }
                statements.push(Statement::insert(part.table.as_str(), row));
            }
        }
        self.execute_all(statements)?;
        for pending in batch.iter_mut().filter(|p| !p.skip) {
            pending.entity.set_persisted(true);
        }

        for relation in &plan.relations {
            let descriptor = &relation.descriptor;
            match &descriptor.ownership {
                Ownership::SourceForeignKey { .. } => {}
                Ownership::TargetForeignKey { column } => to_many::after_insert(self, descriptor, column, batch)?,
                Ownership::AssociationTable { .. } => association::after_insert(self, descriptor, batch)?,
            }
        }
        self.leave();

        if let Some(listeners) = listeners {
            let entities: Vec<&Entity> = batch.iter().filter(|p| !p.skip).map(|p| &*p.entity).collect();
            listeners.each(|l| l.after_insert(&entities));
        }
        Ok(())
    }

    /// Mark pairs already updated in this call as skipped.
    pub(crate) fn claim_updates(&mut self, pairs: &mut [UpdatePair<'_>]) -> Result<(), Error> {
        for pair in pairs.iter_mut() {
            let key = self.key(&*pair.modified)?;
            if !self.mark_visited(key, Operation::Update) {
                pair.skip = true;
            }
        }
        Ok(())
    }

    /// Update a claimed batch of one concrete type.
    pub(crate) fn update_concrete(
        &mut self,
        plan: &ConcretePlan,
        pairs: &mut [UpdatePair<'_>],
        all_columns: bool,
        notify: bool,
    ) -> Result<(), Error> {
        if pairs.iter().all(|p| p.skip) {
            return Ok(());
        }
        self.enter()?;

        let ctx = self.ctx;
        let listeners = ctx.listeners(&plan.name).filter(|_| notify);
        if let Some(listeners) = listeners {
            let views: Vec<(&Entity, &Entity)> =
                pairs.iter().filter(|p| !p.skip).map(|p| (&*p.modified, p.reference)).collect();
            listeners.each(|l| l.before_update(&views));
        }

        for pair in pairs.iter().filter(|p| !p.skip) {
            self.check_mandatory(plan, &*pair.modified)?;
        }
        for relation in plan.relations.iter().filter(|r| r.descriptor.is_source_owned()) {
            to_one::before_update(self, &relation.descriptor, pairs, all_columns)?;
        }

        let mut statements = Vec::new();
        for (index, part) in plan.parts.iter().enumerate() {
            for pair in pairs.iter().filter(|p| !p.skip) {
                let set = self.changed_columns(plan, index, &*pair.modified, pair.reference, all_columns)?;
                if set.is_empty() {
                    continue;
                }
                let id = self.id_of(&*pair.modified)?;
                statements.push(Statement::update(
                    part.table.as_str(),
                    set,
                    Predicate::eq(part.id_column.as_str(), id),
                ));
            }
        }
        self.execute_all(statements)?;

        for relation in &plan.relations {
            let descriptor = &relation.descriptor;
            match &descriptor.ownership {
                Ownership::SourceForeignKey { .. } => to_one::after_update(self, descriptor, pairs)?,
                Ownership::TargetForeignKey { column } => {
                    to_many::on_update(self, descriptor, column, pairs, all_columns)?
                }
                Ownership::AssociationTable { .. } => association::on_update(self, descriptor, pairs, all_columns)?,
            }
        }
        self.leave();

        if let Some(listeners) = listeners {
            let views: Vec<(&Entity, &Entity)> =
                pairs.iter().filter(|p| !p.skip).map(|p| (&*p.modified, p.reference)).collect();
            listeners.each(|l| l.after_update(&views));
        }
        Ok(())
    }

    /// The instances of `batch` not yet deleted in this call.
    pub(crate) fn claim_deletes<'e>(&mut self, batch: Vec<&'e Entity>) -> Result<Vec<&'e Entity>, Error> {
        let mut live = Vec::with_capacity(batch.len());
        for entity in batch {
            let key = self.key(entity)?;
            if self.mark_visited(key, Operation::Delete) {
                live.push(entity);
            }
        }
        Ok(live)
    }

    /// Delete a claimed batch of one concrete type.
    ///
    /// Rows referring to the batch go first (mapped-by elements, association
    /// rows), then the table parts from the most derived one up, then
    /// orphaned source-side targets.
    pub(crate) fn delete_concrete(&mut self, plan: &ConcretePlan, live: &[&Entity], notify: bool) -> Result<(), Error> {
        if live.is_empty() {
            return Ok(());
        }
        self.enter()?;

        let ctx = self.ctx;
        let listeners = ctx.listeners(&plan.name).filter(|_| notify);
        if let Some(listeners) = listeners {
            listeners.each(|l| l.before_delete(live));
        }

        for relation in &plan.relations {
            let descriptor = &relation.descriptor;
            match &descriptor.ownership {
                Ownership::SourceForeignKey { .. } => {}
                Ownership::TargetForeignKey { column } => to_many::on_delete(self, descriptor, column, live)?,
                Ownership::AssociationTable { .. } => association::on_delete(self, descriptor, live)?,
            }
        }

        let ids = live.iter().map(|e| self.id_of(e)).collect::<Result<Vec<Value>, Error>>()?;
        let mut statements = Vec::new();
        for part in plan.parts.iter().rev() {
            for predicate in self.in_predicates(&part.id_column, &ids) {
                statements.push(Statement::delete(part.table.as_str(), predicate));
            }
        }
        self.execute_all(statements)?;

        for relation in plan.relations.iter().filter(|r| r.descriptor.is_source_owned()) {
            to_one::after_delete(self, &relation.descriptor, live)?;
        }
        self.leave();

        if let Some(listeners) = listeners {
            listeners.each(|l| l.after_delete(live));
        }
        Ok(())
    }

    fn check_mandatory(&self, plan: &ConcretePlan, entity: &Entity) -> Result<(), Error> {
        for relation in plan.relations.iter().filter(|r| r.descriptor.mandatory) {
            let name = &relation.descriptor.name;
            if entity.related(name).is_empty() && entity.reference(name).is_none() {
                return Err(Error::MandatoryRelation {
                    relation: name.clone(),
                    owner: self.key(entity)?,
                });
            }
        }
        Ok(())
    }

    /// Full row of one table part.
    fn part_row(&self, plan: &ConcretePlan, index: usize, entity: &Entity) -> Result<Row, Error> {
        let part = &plan.parts[index];
        let mut row = Row::new().with(part.id_column.as_str(), self.id_of(entity)?);
        for column in &part.columns {
            row.set(column.column.as_str(), entity.field(&column.property).clone());
        }
        for relation in plan.relations.iter().filter(|r| r.part == index) {
            if let Some(column) = relation.descriptor.source_column() {
                row.set(column, self.foreign_key(entity, &relation.descriptor)?);
            }
        }
        if let Some((column, value)) = plan.discriminator.as_ref().filter(|_| index == 0) {
            row.set(column.as_str(), value.clone());
        }
        Ok(row)
    }

    /// Columns of one table part to write on update.
    fn changed_columns(
        &self,
        plan: &ConcretePlan,
        index: usize,
        modified: &Entity,
        reference: &Entity,
        all_columns: bool,
    ) -> Result<Row, Error> {
        let part = &plan.parts[index];
        let mut set = Row::new();
        for column in &part.columns {
            let value = modified.field(&column.property);
            if all_columns || value != reference.field(&column.property) {
                set.set(column.column.as_str(), value.clone());
            }
        }
        for relation in plan.relations.iter().filter(|r| r.part == index) {
            if let Some(column) = relation.descriptor.source_column() {
                let value = self.foreign_key(modified, &relation.descriptor)?;
                if all_columns || value != self.foreign_key(reference, &relation.descriptor)? {
                    set.set(column, value);
                }
            }
        }
        Ok(set)
    }
}
