//! Loading entity graphs through join plans.
//!
//! Each mapping has one prepared [`JoinPlan`] (one per subtype for
//! table-per-class roots). A load runs the plan's select with a root
//! filter, folds the rows into entity trees and then resolves deferred
//! relations with follow-up loads.

mod assembly;
pub(crate) mod plan;

use std::collections::{HashMap, HashSet};

use ormgraph_proto::{qualify, Connection, Predicate, Row, Select, Value};

use crate::context::PersistenceContext;
use crate::entity::{Entity, EntityKey, Related};
use crate::error::Error;
use crate::mapping::{MappingRegistry, Ownership};

pub(crate) use assembly::LoadedRoot;
use assembly::{position, Assembly};
pub use plan::JoinPlan;
use plan::{EdgeTarget, Presence};

/// Restriction on the root rows of a load.
#[derive(Debug, Clone)]
pub(crate) enum RootFilter {
    All,
    /// Root identifiers.
    Ids(Vec<Value>),
    /// Values of a root table column.
    Column(String, Vec<Value>),
}

/// Keys already on the load path above each root row, by the root filter
/// value that row was matched on.
type Lineage = HashMap<Value, HashSet<EntityKey>>;

pub(crate) struct Loader<'a, 'c> {
    ctx: &'a PersistenceContext,
    conn: &'c mut dyn Connection,
}

impl<'a, 'c> Loader<'a, 'c> {
    pub fn new(ctx: &'a PersistenceContext, conn: &'c mut dyn Connection) -> Self {
        Self { ctx, conn }
    }

    /// Load the graphs of `mapping` matching the filter.
    pub fn load(&mut self, mapping: &str, filter: &RootFilter) -> Result<Vec<LoadedRoot>, Error> {
        self.load_under(mapping, filter, &Lineage::new())
    }

    fn load_under(&mut self, mapping: &str, filter: &RootFilter, lineage: &Lineage) -> Result<Vec<LoadedRoot>, Error> {
        let ctx = self.ctx;
        let mut roots = Vec::new();
        for plan in ctx.join_plans(mapping)? {
            let mut assembly = Assembly::new(plan, ctx.registry());
            for select in selects(ctx, plan, filter)? {
                for row in self.select(&select)? {
                    assembly.add_row(&row)?;
                }
            }
            self.expand(plan, &mut assembly, filter, lineage)?;
            roots.extend(assembly.finish());
        }
        Ok(roots)
    }

    fn select(&mut self, select: &Select) -> Result<Vec<Row>, Error> {
        if self.ctx.config().log_statements {
            tracing::debug!(select = %select, "select");
        }
        self.conn.select(select).map_err(|source| Error::Select {
            select: select.to_string(),
            source,
        })
    }

    /// Resolve the deferred edges of every slot that does not repeat one of
    /// its own ancestors.
    fn expand(
        &mut self,
        plan: &JoinPlan,
        assembly: &mut Assembly<'_>,
        filter: &RootFilter,
        lineage: &Lineage,
    ) -> Result<(), Error> {
        let paths = paths(assembly, filter, lineage);

        for (edge_index, edge) in plan.edges.iter().enumerate() {
            if edge.target != EdgeTarget::Deferred {
                continue;
            }
            let owners: Vec<(usize, Value)> = assembly
                .owners(edge_index)
                .into_iter()
                .filter(|(slot, _)| !paths[*slot].is_cycle())
                .collect();
            if owners.is_empty() {
                continue;
            }
            let relation = &edge.relation;
            tracing::trace!(relation = %relation.name, owners = owners.len(), "deferred load");

            match &relation.ownership {
                Ownership::TargetForeignKey { column } => {
                    let mut by_owner: HashMap<Value, Vec<usize>> = HashMap::new();
                    let mut nested = Lineage::new();
                    for (slot, id) in &owners {
                        by_owner.entry(id.clone()).or_default().push(*slot);
                        paths[*slot].extend_into(nested.entry(id.clone()).or_default());
                    }
                    let ids: Vec<Value> = by_owner.keys().cloned().collect();
                    let filter = RootFilter::Column(column.clone(), ids);
                    for child in self.load_under(&relation.target, &filter, &nested)? {
                        let index = match &relation.index_column {
                            Some(index) => Some(position(child.columns.get_or_null(index), relation, || {
                                self.ctx.registry().key(&child.entity)
                            })?),
                            None => None,
                        };
                        for &slot in by_owner.get(child.columns.get_or_null(column)).into_iter().flatten() {
                            assembly.attach(slot, edge_index, child.entity.clone(), index);
                        }
                    }
                }
                Ownership::SourceForeignKey { .. } => {
                    let wanted: Vec<(usize, Value)> = owners
                        .iter()
                        .filter_map(|(slot, _)| assembly.foreign_key(*slot, edge_index).map(|fk| (*slot, fk.clone())))
                        .collect();
                    let mut nested = Lineage::new();
                    for (slot, fk) in &wanted {
                        paths[*slot].extend_into(nested.entry(fk.clone()).or_default());
                    }
                    let mut ids: Vec<Value> = wanted.iter().map(|(_, fk)| fk.clone()).collect();
                    dedup(&mut ids);
                    let targets = self.targets(&relation.target, ids, &nested)?;
                    for (slot, fk) in wanted {
                        if let Some(target) = targets.get(&fk) {
                            assembly.attach(slot, edge_index, target.clone(), None);
                        }
                    }
                }
                Ownership::AssociationTable {
                    table,
                    owner_column,
                    target_column,
                } => {
                    let mut by_owner: HashMap<Value, Vec<usize>> = HashMap::new();
                    for (slot, id) in &owners {
                        by_owner.entry(id.clone()).or_default().push(*slot);
                    }
                    let owner_ids: Vec<Value> = by_owner.keys().cloned().collect();
                    let mut links = Vec::new();
                    for chunk in owner_ids.chunks(self.ctx.config().in_list_chunk()) {
                        let select = Select::from(table.as_str(), "a")
                            .with_filter(Predicate::is_in(qualify("a", owner_column), chunk.to_vec()));
                        links.extend(self.select(&select)?);
                    }

                    let mut nested = Lineage::new();
                    for row in &links {
                        let entry = nested.entry(row.qualified("a", target_column).clone()).or_default();
                        for &slot in by_owner.get(row.qualified("a", owner_column)).into_iter().flatten() {
                            paths[slot].extend_into(entry);
                        }
                    }
                    let mut ids: Vec<Value> = links
                        .iter()
                        .map(|row| row.qualified("a", target_column).clone())
                        .collect();
                    dedup(&mut ids);
                    let targets = self.targets(&relation.target, ids, &nested)?;
                    for row in &links {
                        let target_id = row.qualified("a", target_column);
                        let Some(target) = targets.get(target_id) else {
                            continue;
                        };
                        let index = match &relation.index_column {
                            Some(index) => Some(position(row.qualified("a", index), relation, || {
                                self.ctx.registry().key(target)
                            })?),
                            None => None,
                        };
                        let owner = row.qualified("a", owner_column);
                        for &slot in by_owner.get(owner).into_iter().flatten() {
                            assembly.attach(slot, edge_index, target.clone(), index);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Load targets by identifier, keyed by identifier.
    fn targets(&mut self, mapping: &str, ids: Vec<Value>, lineage: &Lineage) -> Result<HashMap<Value, Entity>, Error> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let identifier = self.ctx.registry().identifier(mapping)?;
        Ok(self
            .load_under(mapping, &RootFilter::Ids(ids), lineage)?
            .into_iter()
            .map(|loaded| (identifier.id(&loaded.entity).clone(), loaded.entity))
            .collect())
    }
}

/// A slot's key and the keys of every instance above it on the load path.
struct Path {
    key: EntityKey,
    ancestors: HashSet<EntityKey>,
}

impl Path {
    /// The slot repeats an instance above it.
    fn is_cycle(&self) -> bool {
        self.ancestors.contains(&self.key)
    }

    /// Add the keys a child of this slot has above it.
    fn extend_into(&self, lineage: &mut HashSet<EntityKey>) {
        lineage.extend(self.ancestors.iter().cloned());
        lineage.insert(self.key.clone());
    }
}

/// Load paths of every slot of an assembly, indexed by slot.
fn paths(assembly: &Assembly<'_>, filter: &RootFilter, lineage: &Lineage) -> Vec<Path> {
    let mut inherited: HashMap<usize, &HashSet<EntityKey>> = HashMap::new();
    if let RootFilter::Column(column, _) = filter {
        for (slot, columns) in assembly.roots() {
            if let Some(above) = lineage.get(columns.get_or_null(column)) {
                inherited.insert(slot, above);
            }
        }
    }

    let mut paths: Vec<Path> = Vec::new();
    for (slot, (key, parent)) in assembly.keys().enumerate() {
        let ancestors = match parent {
            Some(parent) => {
                let mut ancestors = HashSet::new();
                paths[parent].extend_into(&mut ancestors);
                ancestors
            }
            None => match filter {
                RootFilter::Ids(_) => lineage.get(&key.id).cloned().unwrap_or_default(),
                _ => inherited.get(&slot).map(|above| (*above).clone()).unwrap_or_default(),
            },
        };
        paths.push(Path {
            key: key.clone(),
            ancestors,
        });
    }
    paths
}

/// The selects running `plan` under `filter`, split by the `IN` list limit.
fn selects(ctx: &PersistenceContext, plan: &JoinPlan, filter: &RootFilter) -> Result<Vec<Select>, Error> {
    let root = plan.root();
    let Some(first) = root.shapes.first() else {
        return Ok(Vec::new());
    };
    let alias = &first.aliases[0];

    // Narrow a single-table subtype load to its own rows.
    let base = match root.shapes.as_slice() {
        [shape] => match &shape.presence {
            Presence::Equals(column, value) => Predicate::eq(column.clone(), value.clone()),
            Presence::NotNull(_) => Predicate::all(),
        },
        _ => Predicate::all(),
    };

    let (column, values) = match filter {
        RootFilter::All => return Ok(vec![plan.select().clone().with_filter(base)]),
        RootFilter::Ids(ids) => {
            let plan = ctx.registry().plan(&first.plan)?;
            (plan.id_column().to_string(), ids)
        }
        RootFilter::Column(column, values) => (column.clone(), values),
    };
    let mut values = values.clone();
    values.retain(|v| !v.is_null());
    dedup(&mut values);

    Ok(values
        .chunks(ctx.config().in_list_chunk())
        .map(|chunk| {
            let filter = base.clone().and_in(qualify(alias, &column), chunk.to_vec());
            plan.select().clone().with_filter(filter)
        })
        .collect())
}

/// Remove repeated values, keeping first occurrences.
fn dedup(values: &mut Vec<Value>) {
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

/// Point every loaded child's reverse accessor back at its owner.
pub(crate) fn wire_back_references(registry: &MappingRegistry, entity: &mut Entity) -> Result<(), Error> {
    let owner = registry.key(entity)?;
    let plan = registry.plan(entity.entity_type())?;
    for relation in &plan.relations {
        let descriptor = &relation.descriptor;
        for child in entity.related_mut(&descriptor.name) {
            if let Some(reverse) = &descriptor.reverse {
                child.set_relation(reverse.as_str(), Related::Reference(Some(owner.clone())));
            }
            wire_back_references(registry, child)?;
        }
    }
    Ok(())
}
