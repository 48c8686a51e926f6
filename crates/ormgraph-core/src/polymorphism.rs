//! Polymorphism dispatcher.
//!
//! Splits a batch handed to a mapping into per-concrete-type sub-batches and
//! routes each to its plan. Listeners on a polymorphic root see the whole
//! batch; listeners on a concrete type see only its sub-batch.

use crate::cascade::{Cascade, Pending, UpdatePair};
use crate::context::PersistenceContext;
use crate::entity::Entity;
use crate::error::Error;
use crate::listener::ListenerCollection;
use crate::mapping::{ConcretePlan, Dispatch};

/// Group items by concrete type, preserving first-seen order.
fn split<'p, T>(
    ctx: &'p PersistenceContext,
    mapping: &str,
    items: Vec<T>,
    type_of: impl Fn(&T) -> &str,
) -> Result<Vec<(&'p ConcretePlan, Vec<T>)>, Error> {
    let registry = ctx.registry();
    let mut groups: Vec<(&ConcretePlan, Vec<T>)> = Vec::new();
    for item in items {
        let concrete = type_of(&item);
        if !registry.accepts(mapping, concrete) {
            return Err(Error::WrongEntityType {
                mapping: mapping.to_string(),
                actual: concrete.to_string(),
            });
        }
        let plan = registry.plan(concrete)?;
        match groups.iter_mut().find(|(p, _)| p.name == plan.name) {
            Some((_, group)) => group.push(item),
            None => groups.push((plan, vec![item])),
        }
    }
    Ok(groups)
}

/// Listeners fired by the dispatcher itself: only polymorphic mappings
/// notify at this level.
fn root_listeners<'p>(ctx: &'p PersistenceContext, mapping: &str) -> Result<Option<&'p ListenerCollection>, Error> {
    Ok(match ctx.registry().dispatch(mapping)? {
        Dispatch::Polymorphic { .. } => ctx.listeners(mapping),
        Dispatch::Concrete(_) => None,
    })
}

/// Whether a concrete persister call notifies its own listeners. A root that
/// is itself instantiable was already notified by the dispatcher.
fn notifies(ctx: &PersistenceContext, mapping: &str, plan: &ConcretePlan) -> Result<bool, Error> {
    Ok(match ctx.registry().dispatch(mapping)? {
        Dispatch::Polymorphic { .. } => plan.name != mapping,
        Dispatch::Concrete(_) => true,
    })
}

impl<'a, 'c> Cascade<'a, 'c> {
    /// Insert a batch through a mapping.
    pub(crate) fn insert(&mut self, mapping: &str, batch: Vec<Pending<'_>>) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx;
        let listeners = root_listeners(ctx, mapping)?;
        let mut groups = split(ctx, mapping, batch, |p| p.entity.entity_type())?;
        for (plan, group) in groups.iter_mut() {
            self.claim_inserts(plan, group)?;
        }
        if groups.iter().all(|(_, g)| g.iter().all(|p| p.skip)) {
            return Ok(());
        }
        self.check_depth()?;

        if let Some(listeners) = listeners {
            let entities = pending_views(&groups);
            listeners.each(|l| l.before_insert(&entities));
        }
        for (plan, group) in groups.iter_mut() {
            let notify = notifies(ctx, mapping, plan)?;
            self.insert_concrete(plan, group, notify)?;
        }
        if let Some(listeners) = listeners {
            let entities = pending_views(&groups);
            listeners.each(|l| l.after_insert(&entities));
        }
        Ok(())
    }

    /// Update (modified, reference) pairs through a mapping.
    pub(crate) fn update(&mut self, mapping: &str, pairs: Vec<UpdatePair<'_>>, all_columns: bool) -> Result<(), Error> {
        if pairs.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx;
        for pair in &pairs {
            let reference = self.key(pair.reference)?;
            if pair.modified.entity_type() != pair.reference.entity_type() {
                return Err(Error::SubtypeChanged {
                    key: reference,
                    from: pair.reference.entity_type().to_string(),
                    to: pair.modified.entity_type().to_string(),
                });
            }
            let modified = self.key(&*pair.modified)?;
            if modified != reference {
                return Err(Error::IdentifierMismatch { modified, reference });
            }
        }

        let listeners = root_listeners(ctx, mapping)?;
        let mut groups = split(ctx, mapping, pairs, |p| p.modified.entity_type())?;
        for (_, group) in groups.iter_mut() {
            self.claim_updates(group)?;
        }
        if groups.iter().all(|(_, g)| g.iter().all(|p| p.skip)) {
            return Ok(());
        }
        self.check_depth()?;

        if let Some(listeners) = listeners {
            let views = update_views(&groups);
            listeners.each(|l| l.before_update(&views));
        }
        for (plan, group) in groups.iter_mut() {
            let notify = notifies(ctx, mapping, plan)?;
            self.update_concrete(plan, group, all_columns, notify)?;
        }
        if let Some(listeners) = listeners {
            let views = update_views(&groups);
            listeners.each(|l| l.after_update(&views));
        }
        Ok(())
    }

    /// Delete a batch through a mapping.
    pub(crate) fn delete(&mut self, mapping: &str, batch: Vec<&Entity>) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx;
        let listeners = root_listeners(ctx, mapping)?;
        let mut groups = Vec::new();
        for (plan, group) in split(ctx, mapping, batch, |e| e.entity_type())? {
            let live = self.claim_deletes(group)?;
            if !live.is_empty() {
                groups.push((plan, live));
            }
        }
        if groups.is_empty() {
            return Ok(());
        }
        self.check_depth()?;

        if let Some(listeners) = listeners {
            let entities: Vec<&Entity> = groups.iter().flat_map(|(_, g)| g.iter().copied()).collect();
            listeners.each(|l| l.before_delete(&entities));
        }
        for (plan, group) in &groups {
            let notify = notifies(ctx, mapping, plan)?;
            self.delete_concrete(plan, group, notify)?;
        }
        if let Some(listeners) = listeners {
            let entities: Vec<&Entity> = groups.iter().flat_map(|(_, g)| g.iter().copied()).collect();
            listeners.each(|l| l.after_delete(&entities));
        }
        Ok(())
    }
}

/// Instances of a claimed batch that are actually written.
fn pending_views<'v>(groups: &'v [(&ConcretePlan, Vec<Pending<'_>>)]) -> Vec<&'v Entity> {
    groups
        .iter()
        .flat_map(|(_, g)| g.iter().filter(|p| !p.skip).map(|p| &*p.entity))
        .collect()
}

fn update_views<'v>(groups: &'v [(&ConcretePlan, Vec<UpdatePair<'_>>)]) -> Vec<(&'v Entity, &'v Entity)> {
    groups
        .iter()
        .flat_map(|(_, g)| g.iter().filter(|p| !p.skip).map(|p| (&*p.modified, p.reference)))
        .collect()
}
