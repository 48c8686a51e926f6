//! Relations whose foreign key lives in the source row.
//!
//! The target row must exist before the source row refers to it, so inserts
//! and updates cascade before the owner's own statements. Orphans are
//! deleted after the owner no longer refers to them.

use crate::entity::Entity;
use crate::error::Error;
use crate::mapping::{CascadeMode, RelationDescriptor};

use super::{Cascade, Pending, UpdatePair};

/// Insert new targets ahead of their owners.
pub(crate) fn before_insert(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    batch: &mut [Pending<'_>],
) -> Result<(), Error> {
    if !relation.cascade.writes() {
        return Ok(());
    }

    let mut claimed = Default::default();
    let mut targets = Vec::new();
    for pending in batch.iter_mut().filter(|p| !p.skip) {
        if let Some(target) = pending.entity.one_mut(&relation.name) {
            if cx.needs_insert(target, &mut claimed)? {
                targets.push(Pending::new(target));
            } else {
                target.set_persisted(true);
            }
        }
    }
    cx.insert(&relation.target, targets)
}

/// Insert replaced-by-new targets and cascade updates into held targets.
pub(crate) fn before_update(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    pairs: &mut [UpdatePair<'_>],
    all_columns: bool,
) -> Result<(), Error> {
    if !relation.cascade.writes() {
        return Ok(());
    }

    let mut claimed = Default::default();
    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    for pair in pairs.iter_mut().filter(|p| !p.skip) {
        let reference: &Entity = pair.reference;
        let Some(target) = pair.modified.one_mut(&relation.name) else {
            continue;
        };
        if cx.needs_insert(target, &mut claimed)? {
            inserts.push(Pending::new(target));
            continue;
        }
        if let Some(previous) = reference.one(&relation.name) {
            if cx.same_entity(target, previous)? {
                updates.push(UpdatePair::new(target, previous));
            }
        }
    }
    cx.insert(&relation.target, inserts)?;
    cx.update(&relation.target, updates, all_columns)
}

/// Delete targets the owners stopped referring to.
pub(crate) fn after_update(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    pairs: &[UpdatePair<'_>],
) -> Result<(), Error> {
    if relation.cascade != CascadeMode::AllOrphanRemoval {
        return Ok(());
    }

    let mut orphans = Vec::new();
    for pair in pairs.iter().filter(|p| !p.skip) {
        let Some(previous) = pair.reference.one(&relation.name) else {
            continue;
        };
        let kept = match pair.modified.one(&relation.name) {
            Some(current) => cx.same_entity(current, previous)?,
            None => false,
        };
        if !kept && cx.is_persisted(previous)? {
            orphans.push(previous);
        }
    }
    cx.delete(&relation.target, orphans)
}

/// Delete the targets of deleted owners.
pub(crate) fn after_delete(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    batch: &[&Entity],
) -> Result<(), Error> {
    if relation.cascade != CascadeMode::AllOrphanRemoval {
        return Ok(());
    }

    let mut targets = Vec::new();
    for owner in batch {
        if let Some(target) = owner.one(&relation.name) {
            if cx.is_persisted(target)? {
                targets.push(target);
            }
        }
    }
    cx.delete(&relation.target, targets)
}
