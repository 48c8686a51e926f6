//! Relations whose foreign key lives in the target rows (mapped-by).
//!
//! Owners are written first; each element then carries the owner's
//! identifier and, for lists, its position. New elements get both columns
//! in their insert, existing ones are attached with an update.

use std::collections::HashSet;

use ormgraph_proto::{Predicate, Row, Statement, Value};

use crate::differ;
use crate::entity::Entity;
use crate::error::Error;
use crate::mapping::{CascadeMode, RelationDescriptor};

use super::{identity, link_row, Cascade, Pending, UpdatePair};

/// Insert or attach the elements of freshly inserted owners.
pub(crate) fn after_insert(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    column: &str,
    batch: &mut [Pending<'_>],
) -> Result<(), Error> {
    if !relation.cascade.writes() {
        return Ok(());
    }

    let mut claimed = HashSet::new();
    let mut inserts = Vec::new();
    let mut attaches = Vec::new();
    for pending in batch.iter_mut().filter(|p| !p.skip) {
        let owner = cx.id_of(pending.entity)?;
        for (position, target) in pending.entity.related_mut(&relation.name).into_iter().enumerate() {
            let link = link_row(relation, column, &owner, position);
            if cx.needs_insert(target, &mut claimed)? {
                inserts.push(Pending::with_extra(target, link));
            } else {
                attaches.push(attach(cx, target, link)?);
                target.set_persisted(true);
            }
        }
    }
    cx.insert(&relation.target, inserts)?;
    cx.execute_all(attaches)?;
    Ok(())
}

/// Apply the difference between two snapshots of each owner's elements.
///
/// Removed elements are detached first (or deleted under orphan removal),
/// then added elements are inserted or attached, then held elements that
/// moved get their new position and every held element is updated.
pub(crate) fn on_update(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    column: &str,
    pairs: &mut [UpdatePair<'_>],
    all_columns: bool,
) -> Result<(), Error> {
    if !relation.cascade.writes() {
        return Ok(());
    }

    let ctx = cx.ctx;
    let mut claimed = HashSet::new();
    let mut detaches = Vec::new();
    let mut orphans: Vec<&Entity> = Vec::new();
    let mut inserts = Vec::new();
    let mut attaches = Vec::new();
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
            if relation.cascade == CascadeMode::AllOrphanRemoval {
                orphans.push(gone);
            } else {
                detaches.push(detach(cx, relation, column, gone, &owner)?);
            }
        }

        let mut after: Vec<Option<&mut Entity>> = after.into_iter().map(Some).collect();
        for &position in &diff.added {
            let Some(target) = after[position].take() else {
                continue;
            };
            let link = link_row(relation, column, &owner, position);
            if cx.needs_insert(target, &mut claimed)? {
                inserts.push(Pending::with_extra(target, link));
            } else {
                attaches.push(attach(cx, target, link)?);
                target.set_persisted(true);
            }
        }
        for held in &diff.held {
            let Some(target) = after[held.after].take() else {
                continue;
            };
            if let Some(index) = relation.index_column.as_ref().filter(|_| held.moved()) {
                attaches.push(attach(cx, target, Row::new().with(index.clone(), held.after as i64))?);
            }
            updates.push(UpdatePair::new(target, before[held.before]));
        }
    }

    cx.execute_all(detaches)?;
    cx.delete(&relation.target, orphans)?;
    cx.insert(&relation.target, inserts)?;
    cx.execute_all(attaches)?;
    cx.update(&relation.target, updates, all_columns)
}

/// Delete or detach the elements of deleted owners.
pub(crate) fn on_delete(
    cx: &mut Cascade<'_, '_>,
    relation: &RelationDescriptor,
    column: &str,
    batch: &[&Entity],
) -> Result<(), Error> {
    if !relation.cascade.writes() {
        return Ok(());
    }

    if relation.cascade == CascadeMode::AllOrphanRemoval {
        let targets: Vec<&Entity> = batch.iter().flat_map(|owner| owner.related(&relation.name)).collect();
        return cx.delete(&relation.target, targets);
    }

    let owners = batch.iter().map(|owner| cx.id_of(owner)).collect::<Result<Vec<Value>, Error>>()?;
    let mut set = Row::new().with(column, Value::Null);
    if let Some(index) = &relation.index_column {
        set.set(index.clone(), Value::Null);
    }
    let ctx = cx.ctx;
    let mut statements = Vec::new();
    for table in ctx.registry().base_tables(&relation.target)? {
        for predicate in cx.in_predicates(column, &owners) {
            statements.push(Statement::update(table, set.clone(), predicate));
        }
    }
    cx.execute_all(statements)?;
    Ok(())
}

/// Point an existing element's base row at its owner.
fn attach(cx: &Cascade<'_, '_>, target: &Entity, set: Row) -> Result<Statement, Error> {
    let plan = cx.base_of(target)?;
    Ok(Statement::update(
        plan.base_table(),
        set,
        Predicate::eq(plan.id_column(), cx.id_of(target)?),
    ))
}

/// Clear an element's link, guarded by the owner it is detached from.
fn detach(
    cx: &Cascade<'_, '_>,
    relation: &RelationDescriptor,
    column: &str,
    target: &Entity,
    owner: &Value,
) -> Result<Statement, Error> {
    let plan = cx.base_of(target)?;
    let mut set = Row::new().with(column, Value::Null);
    if let Some(index) = &relation.index_column {
        set.set(index.clone(), Value::Null);
    }
    Ok(Statement::update(
        plan.base_table(),
        set,
        Predicate::eq(plan.id_column(), cx.id_of(target)?).and_eq(column, owner.clone()),
    ))
}
