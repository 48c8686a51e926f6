//! Relations stored in an association table.
//!
//! Association rows reference both sides, so targets are written before
//! links and links are removed before targets.

use std::collections::HashSet;

use ormgraph_proto::{Predicate, Row, Statement, Value};

use crate::differ;
use crate::entity::Entity;
use crate::error::Error;
use crate::mapping::{CascadeMode, Ownership, RelationDescriptor};

use super::{identity, Cascade, Pending, UpdatePair};

/// Association table layout of a relation.
struct Link<'r> {
    relation: &'r RelationDescriptor,
    table: &'r str,
    owner_column: &'r str,
    target_column: &'r str,
}

impl<'r> Link<'r> {
    fn of(relation: &'r RelationDescriptor) -> Option<Self> {
        match &relation.ownership {
            Ownership::AssociationTable {
                table,
                owner_column,
                target_column,
            } => Some(Self {
                relation,
                table,
                owner_column,
                target_column,
            }),
            _ => None,
        }
    }

    fn insert(&self, owner: &Value, target: Value, position: usize) -> Statement {
        let mut row = Row::new()
            .with(self.owner_column, owner.clone())
            .with(self.target_column, target);
        if let Some(index) = &self.relation.index_column {
            row.set(index.clone(), position as i64);
        }
        Statement::insert(self.table, row)
    }

    fn delete(&self, owner: &Value, target: Value, position: usize) -> Statement {
        let mut predicate = Predicate::eq(self.owner_column, owner.clone()).and_eq(self.target_column, target);
        if let Some(index) = &self.relation.index_column {
            predicate = predicate.and_eq(index.clone(), position as i64);
        }
        Statement::delete(self.table, predicate)
    }
}

/// Insert new targets of freshly inserted owners, then their links.
pub(crate) fn after_insert(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    batch: &mut [Pending<'_>],
) -> Result<(), Error> {
    let Some(link) = Link::of(relation) else {
        return Ok(());
    };
    if !relation.cascade.writes() {
        return Ok(());
    }

    let mut claimed = HashSet::new();
    let mut inserts = Vec::new();
    let mut links = Vec::new();
    for pending in batch.iter_mut().filter(|p| !p.skip) {
        let owner = cx.id_of(pending.entity)?;
        let mut seen = HashSet::new();
        for (position, target) in pending.entity.related_mut(&relation.name).into_iter().enumerate() {
            let fresh = cx.needs_insert(target, &mut claimed)?;
            let id = cx.assign_id(target)?;
            if relation.tolerates_duplicates || seen.insert(id.clone()) {
                links.push(link.insert(&owner, id, position));
            }
            if fresh {
                inserts.push(Pending::new(target));
            } else {
                target.set_persisted(true);
            }
        }
    }
    cx.insert(&relation.target, inserts)?;
    cx.execute_all(links)?;
    Ok(())
}

/// Apply the difference between two snapshots of each owner's targets.
///
/// Removed and moved links go first, then removed targets under orphan
/// removal, then new targets, new links and updates of held targets.
pub(crate) fn on_update(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    pairs: &mut [UpdatePair<'_>],
    all_columns: bool,
) -> Result<(), Error> {
    let Some(link) = Link::of(relation) else {
        return Ok(());
    };
    if !relation.cascade.writes() {
        return Ok(());
    }

    let ctx = cx.ctx;
    let mut claimed = HashSet::new();
    let mut unlinks = Vec::new();
    let mut orphans: Vec<&Entity> = Vec::new();
    let mut inserts = Vec::new();
    let mut links = Vec::new();
    let mut updates = Vec::new();

    for pair in pairs.iter_mut().filter(|p| !p.skip) {
        let reference: &Entity = pair.reference;
        let owner = cx.id_of(reference)?;
        let before = reference.related(&relation.name);
        let after = pair.modified.related_mut(&relation.name);
        let diff = differ::diff(
            &before,
            &after,
            |e| identity(ctx, e),
            |e| identity(ctx, e),
        );

        for &position in &diff.removed {
            let gone = before[position];
            unlinks.push(link.delete(&owner, cx.id_of(gone)?, position));
            if relation.cascade == CascadeMode::AllOrphanRemoval {
                orphans.push(gone);
            }
        }

        let mut seen = HashSet::new();
        let mut after: Vec<Option<&mut Entity>> = after.into_iter().map(Some).collect();
        for held in &diff.held {
            let Some(target) = after[held.after].take() else {
                continue;
            };
            let id = cx.id_of(target)?;
            seen.insert(id.clone());
            if relation.index_column.is_some() && held.moved() {
                unlinks.push(link.delete(&owner, id.clone(), held.before));
                links.push(link.insert(&owner, id, held.after));
            }
            updates.push(UpdatePair::new(target, before[held.before]));
        }
        for &position in &diff.added {
            let Some(target) = after[position].take() else {
                continue;
            };
            let fresh = cx.needs_insert(target, &mut claimed)?;
            let id = cx.assign_id(target)?;
            if relation.tolerates_duplicates || seen.insert(id.clone()) {
                links.push(link.insert(&owner, id, position));
            }
            if fresh {
                inserts.push(Pending::new(target));
            } else {
                target.set_persisted(true);
            }
        }
    }

    cx.execute_all(unlinks)?;
    cx.delete(&relation.target, orphans)?;
    cx.insert(&relation.target, inserts)?;
    cx.execute_all(links)?;
    cx.update(&relation.target, updates, all_columns)
}

/// Remove the links of deleted owners, and their targets under orphan
/// removal. Association-only relations never delete targets.
pub(crate) fn on_delete(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    batch: &[&Entity],
) -> Result<(), Error> {
    let Some(link) = Link::of(relation) else {
        return Ok(());
    };
    if !relation.cascade.writes() {
        return Ok(());
    }

    let owners = batch.iter().map(|owner| cx.id_of(owner)).collect::<Result<Vec<Value>, Error>>()?;
    let statements = cx
        .in_predicates(link.owner_column, &owners)
        .into_iter()
        .map(|predicate| Statement::delete(link.table, predicate))
        .collect();
    cx.execute_all(statements)?;

    if relation.cascade == CascadeMode::AllOrphanRemoval {
        let mut targets = Vec::new();
        for owner in batch {
            for target in owner.related(&relation.name) {
                if cx.is_persisted(target)? {
                    targets.push(target);
                }
            }
        }
        cx.delete(&relation.target, targets)?;
    }
    Ok(())
}
