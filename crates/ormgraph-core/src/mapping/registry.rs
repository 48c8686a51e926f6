//! Mapping registry: validates declared mappings and resolves them into
//! per-type table plans and a dispatch table.

use std::collections::{HashMap, HashSet};

use ormgraph_proto::Value;

use super::entity::{ColumnMapping, EntityMapping, PolymorphismPolicy, Strategy};
use super::identifier::IdentifierMapping;
use super::relation::{CascadeMode, Ownership, RelationDescriptor, RelationKind};
use crate::entity::{Entity, EntityKey};
use crate::error::{ConfigError, Error};

/// The columns a concrete type stores in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePart {
    pub table: String,
    pub id_column: String,
    pub columns: Vec<ColumnMapping>,
}

/// A relation of a concrete type, with the table part holding its
/// source-side foreign key.
#[derive(Debug, Clone)]
pub struct PlanRelation {
    pub descriptor: RelationDescriptor,
    pub part: usize,
    /// Mapping that declared the relation.
    pub declared_by: String,
}

/// Storage plan of one instantiable type.
#[derive(Debug, Clone)]
pub struct ConcretePlan {
    /// Concrete mapping name.
    pub name: String,
    /// Root mapping name.
    pub root: String,
    /// Table parts, parent table first.
    pub parts: Vec<TablePart>,
    pub relations: Vec<PlanRelation>,
    /// Discriminator column and value for single-table types.
    pub discriminator: Option<(String, Value)>,
}

impl ConcretePlan {
    /// Table holding the identifier row every other part refers to.
    pub fn base_table(&self) -> &str {
        &self.parts[0].table
    }

    pub fn id_column(&self) -> &str {
        &self.parts[0].id_column
    }

    pub fn relation(&self, name: &str) -> Option<&PlanRelation> {
        self.relations.iter().find(|r| r.descriptor.name == name)
    }
}

/// How persister calls on a mapping are routed.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// One concrete plan.
    Concrete(String),
    /// Several concrete plans under a polymorphic root.
    Polymorphic {
        root: String,
        strategy: Strategy,
        concretes: Vec<String>,
    },
}

/// Validated, immutable set of entity mappings.
#[derive(Debug)]
pub struct MappingRegistry {
    mappings: HashMap<String, EntityMapping>,
    order: Vec<String>,
    roots: HashMap<String, String>,
    plans: HashMap<String, ConcretePlan>,
    dispatch: HashMap<String, Dispatch>,
}

/// Columns claimed per table, with the declaration that claimed them.
#[derive(Default)]
struct ColumnClaims {
    tables: HashMap<String, HashMap<String, String>>,
}

impl ColumnClaims {
    fn claim(&mut self, table: &str, column: &str, origin: String) -> Result<(), ConfigError> {
        let columns = self.tables.entry(table.to_string()).or_default();
        match columns.get(column) {
            Some(existing) if *existing != origin => Err(ConfigError::ConflictingColumn {
                table: table.to_string(),
                column: column.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                columns.insert(column.to_string(), origin);
                Ok(())
            }
        }
    }
}

impl MappingRegistry {
    /// Validate mappings and resolve their plans.
    pub fn build(mappings: Vec<EntityMapping>) -> Result<Self, ConfigError> {
        let mut by_name = HashMap::new();
        let mut order = Vec::new();
        for mapping in mappings {
            if by_name.contains_key(&mapping.name) {
                return Err(ConfigError::DuplicateMapping(mapping.name));
            }
            order.push(mapping.name.clone());
            by_name.insert(mapping.name.clone(), mapping);
        }

        let mut registry = Self {
            mappings: by_name,
            order,
            roots: HashMap::new(),
            plans: HashMap::new(),
            dispatch: HashMap::new(),
        };

        registry.resolve_hierarchy()?;
        for name in registry.order.clone() {
            let mapping = &registry.mappings[&name];
            for relation in &mapping.relations {
                registry.validate_relation(mapping, relation)?;
            }
        }
        registry.resolve_plans()?;
        registry.check_columns()?;

        tracing::debug!(
            mappings = registry.order.len(),
            plans = registry.plans.len(),
            "mapping registry built"
        );
        Ok(registry)
    }

    /// Declared mapping names in declaration order.
    pub fn mapping_names(&self) -> &[String] {
        &self.order
    }

    pub fn mapping(&self, name: &str) -> Option<&EntityMapping> {
        self.mappings.get(name)
    }

    /// Root mapping of a mapping (itself for roots).
    pub fn root_of(&self, name: &str) -> Result<&str, Error> {
        self.roots
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownMapping(name.to_string()))
    }

    /// Identifier shared by a mapping and its whole hierarchy.
    pub fn identifier(&self, name: &str) -> Result<&IdentifierMapping, Error> {
        let root = self.root_of(name)?;
        self.mappings
            .get(root)
            .and_then(|m| m.identifier.as_ref())
            .ok_or_else(|| Error::UnknownMapping(name.to_string()))
    }

    /// Plan of an instantiable type.
    pub fn plan(&self, name: &str) -> Result<&ConcretePlan, Error> {
        self.plans
            .get(name)
            .ok_or_else(|| Error::UnknownMapping(name.to_string()))
    }

    pub fn dispatch(&self, name: &str) -> Result<&Dispatch, Error> {
        self.dispatch
            .get(name)
            .ok_or_else(|| Error::UnknownMapping(name.to_string()))
    }

    /// Plans a mapping dispatches to.
    pub fn concretes(&self, name: &str) -> Result<Vec<&ConcretePlan>, Error> {
        match self.dispatch(name)? {
            Dispatch::Concrete(plan) => Ok(vec![self.plan(plan)?]),
            Dispatch::Polymorphic { concretes, .. } => {
                concretes.iter().map(|c| self.plan(c)).collect()
            }
        }
    }

    /// All instantiable plans, in declaration order.
    pub fn plans(&self) -> Vec<&ConcretePlan> {
        self.order
            .iter()
            .filter_map(|name| self.plans.get(name))
            .collect()
    }

    /// Base tables of the plans a mapping dispatches to, deduplicated.
    pub fn base_tables(&self, name: &str) -> Result<Vec<&str>, Error> {
        let mut tables: Vec<&str> = Vec::new();
        for plan in self.concretes(name)? {
            if !tables.contains(&plan.base_table()) {
                tables.push(plan.base_table());
            }
        }
        Ok(tables)
    }

    /// Identity of an instance.
    pub fn key(&self, entity: &Entity) -> Result<EntityKey, Error> {
        let root = self.root_of(entity.entity_type())?;
        let id = self.identifier(root)?.id(entity).clone();
        Ok(EntityKey::new(root, id))
    }

    /// Check whether `concrete` is one of the types `mapping` dispatches to.
    pub fn accepts(&self, mapping: &str, concrete: &str) -> bool {
        match self.dispatch.get(mapping) {
            Some(Dispatch::Concrete(plan)) => plan == concrete,
            Some(Dispatch::Polymorphic { concretes, .. }) => concretes.iter().any(|c| c == concrete),
            None => false,
        }
    }

    fn resolve_hierarchy(&mut self) -> Result<(), ConfigError> {
        for name in &self.order {
            let mapping = &self.mappings[name];
            match &mapping.parent {
                None => {
                    if mapping.identifier.is_none() {
                        return Err(ConfigError::MissingIdentifier(name.clone()));
                    }
                    self.roots.insert(name.clone(), name.clone());
                }
                Some(parent) => {
                    let parent_mapping =
                        self.mappings
                            .get(parent)
                            .ok_or_else(|| ConfigError::UnknownMapping {
                                mapping: name.clone(),
                                referenced: parent.clone(),
                            })?;
                    let listed = parent_mapping
                        .polymorphism
                        .as_ref()
                        .is_some_and(|p| p.subtype_names().contains(&name.as_str()));
                    if parent_mapping.parent.is_some() || !listed {
                        return Err(ConfigError::Polymorphism {
                            mapping: name.clone(),
                            reason: format!("'{}' is not a polymorphic root listing it", parent),
                        });
                    }
                    if mapping.identifier.is_some() {
                        return Err(ConfigError::Polymorphism {
                            mapping: name.clone(),
                            reason: "subtypes inherit the root identifier".into(),
                        });
                    }
                    if mapping.polymorphism.is_some() {
                        return Err(ConfigError::Polymorphism {
                            mapping: name.clone(),
                            reason: "nested hierarchies are not supported".into(),
                        });
                    }
                    self.roots.insert(name.clone(), parent.clone());
                }
            }
        }

        for name in &self.order {
            let mapping = &self.mappings[name];
            if let Some(policy) = &mapping.polymorphism {
                for subtype in policy.subtype_names() {
                    let known = subtype == name.as_str()
                        || self.mappings.get(subtype).is_some_and(|s| s.parent.as_deref() == Some(name.as_str()));
                    if !known {
                        return Err(ConfigError::UnknownMapping {
                            mapping: name.clone(),
                            referenced: subtype.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_relation(&self, mapping: &EntityMapping, relation: &RelationDescriptor) -> Result<(), ConfigError> {
        let unsupported = |reason: &str| ConfigError::UnsupportedRelation {
            mapping: mapping.name.clone(),
            relation: relation.name.clone(),
            reason: reason.to_string(),
        };

        let target = self
            .mappings
            .get(&relation.target)
            .ok_or_else(|| ConfigError::UnknownMapping {
                mapping: mapping.name.clone(),
                referenced: relation.target.clone(),
            })?;

        if relation.cascade == CascadeMode::AssociationOnly
            && relation.ownership.association_table().is_none()
        {
            return Err(ConfigError::AssociationOnlyWithoutTable {
                mapping: mapping.name.clone(),
                relation: relation.name.clone(),
            });
        }

        if relation.index_column.is_some() {
            if relation.is_source_owned() {
                return Err(ConfigError::IndexWithoutOwningKey {
                    mapping: mapping.name.clone(),
                    relation: relation.name.clone(),
                });
            }
            if !matches!(relation.kind, RelationKind::OneToManyList | RelationKind::ManyToMany) {
                return Err(unsupported("only lists and many-to-many relations are ordered"));
            }
        }

        match (&relation.kind, &relation.ownership) {
            (RelationKind::OneToOne, _) => {}
            (RelationKind::OneToManySet | RelationKind::OneToManyList, Ownership::SourceForeignKey { .. }) => {
                return Err(unsupported(
                    "collections need a target foreign key or an association table",
                ))
            }
            (RelationKind::ManyToMany, Ownership::AssociationTable { .. }) => {}
            (RelationKind::ManyToMany, _) => {
                return Err(unsupported("many-to-many relations need an association table"))
            }
            _ => {}
        }

        if let Ownership::AssociationTable {
            table,
            owner_column,
            target_column,
        } = &relation.ownership
        {
            let mut seen = HashSet::new();
            let duplicate = [Some(owner_column), Some(target_column), relation.index_column.as_ref()]
                .into_iter()
                .flatten()
                .find(|c| !seen.insert(c.as_str()));
            if let Some(column) = duplicate {
                return Err(ConfigError::ConflictingColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }

        if matches!(relation.ownership, Ownership::TargetForeignKey { .. }) && relation.reverse.is_none() {
            return Err(ConfigError::MissingReverse {
                mapping: mapping.name.clone(),
                relation: relation.name.clone(),
            });
        }

        if let Some(property) = &relation.reverse {
            if !self.declares_back_reference(target, property) {
                return Err(ConfigError::UnknownReverse {
                    mapping: mapping.name.clone(),
                    relation: relation.name.clone(),
                    property: property.clone(),
                });
            }
        }

        if relation.tolerates_duplicates
            && (relation.index_column.is_none() || relation.ownership.association_table().is_none())
        {
            return Err(ConfigError::DuplicatesWithoutIndex {
                mapping: mapping.name.clone(),
                relation: relation.name.clone(),
            });
        }

        Ok(())
    }

    /// A back reference declared by the target, its root or its subtypes.
    fn declares_back_reference(&self, target: &EntityMapping, property: &str) -> bool {
        let root = target
            .parent
            .as_ref()
            .and_then(|p| self.mappings.get(p))
            .unwrap_or(target);
        let mut candidates = vec![target, root];
        if let Some(policy) = &root.polymorphism {
            candidates.extend(policy.subtype_names().into_iter().filter_map(|s| self.mappings.get(s)));
        }
        candidates
            .iter()
            .any(|m| m.back_references.iter().any(|b| b == property))
    }

    fn resolve_plans(&mut self) -> Result<(), ConfigError> {
        let mut plans = Vec::new();
        let mut dispatch = Vec::new();

        for name in &self.order {
            let mapping = &self.mappings[name];
            if mapping.parent.is_some() {
                continue;
            }

            match &mapping.polymorphism {
                None => {
                    plans.push(self.plan_for(mapping, mapping, None)?);
                    dispatch.push((name.clone(), Dispatch::Concrete(name.clone())));
                }
                Some(policy) => {
                    let mut concretes = Vec::new();
                    for subtype in policy.subtype_names() {
                        let concrete = &self.mappings[subtype];
                        plans.push(self.plan_for(mapping, concrete, Some(policy))?);
                        concretes.push(subtype.to_string());
                        if subtype != name.as_str() {
                            dispatch.push((subtype.to_string(), Dispatch::Concrete(subtype.to_string())));
                        }
                    }
                    dispatch.push((
                        name.clone(),
                        Dispatch::Polymorphic {
                            root: name.clone(),
                            strategy: policy.strategy(),
                            concretes,
                        },
                    ));
                }
            }
        }

        self.plans
            .extend(plans.into_iter().map(|plan| (plan.name.clone(), plan)));
        self.dispatch.extend(dispatch);
        Ok(())
    }

    fn plan_for(
        &self,
        root: &EntityMapping,
        concrete: &EntityMapping,
        policy: Option<&PolymorphismPolicy>,
    ) -> Result<ConcretePlan, ConfigError> {
        let id_column = root
            .identifier
            .as_ref()
            .map(|i| i.column.clone())
            .ok_or_else(|| ConfigError::MissingIdentifier(root.name.clone()))?;
        let root_table = root.table.clone().ok_or_else(|| ConfigError::Polymorphism {
            mapping: root.name.clone(),
            reason: "root mapping needs a table".into(),
        })?;
        let is_root = root.name == concrete.name;
        let own_table = || {
            concrete.table.clone().ok_or_else(|| ConfigError::Polymorphism {
                mapping: concrete.name.clone(),
                reason: "subtype needs its own table".into(),
            })
        };

        let part = |table: String, columns: Vec<ColumnMapping>| TablePart {
            table,
            id_column: id_column.clone(),
            columns,
        };
        let merged_columns = || {
            let mut columns = root.columns.clone();
            columns.extend(concrete.columns.iter().cloned());
            columns
        };

        let (parts, relations, discriminator) = match policy {
            _ if is_root => {
                let discriminator = match policy {
                    Some(PolymorphismPolicy::SingleTable {
                        discriminator,
                        subtypes,
                    }) => discriminator_for(discriminator, subtypes, &root.name),
                    _ => None,
                };
                (
                    vec![part(root_table, root.columns.clone())],
                    plan_relations(root, 0),
                    discriminator,
                )
            }
            Some(PolymorphismPolicy::SingleTable {
                discriminator,
                subtypes,
            }) => {
                if concrete.table.as_ref().is_some_and(|t| *t != root_table) {
                    return Err(ConfigError::Polymorphism {
                        mapping: concrete.name.clone(),
                        reason: "single-table subtypes share the root table".into(),
                    });
                }
                (
                    vec![part(root_table, merged_columns())],
                    [plan_relations(root, 0), plan_relations(concrete, 0)].concat(),
                    discriminator_for(discriminator, subtypes, &concrete.name),
                )
            }
            Some(PolymorphismPolicy::JoinedTables { .. }) => (
                vec![
                    part(root_table, root.columns.clone()),
                    part(own_table()?, concrete.columns.clone()),
                ],
                [plan_relations(root, 0), plan_relations(concrete, 1)].concat(),
                None,
            ),
            Some(PolymorphismPolicy::TablePerClass { .. }) => (
                vec![part(own_table()?, merged_columns())],
                [plan_relations(root, 0), plan_relations(concrete, 0)].concat(),
                None,
            ),
            None => (
                vec![part(root_table, root.columns.clone())],
                plan_relations(root, 0),
                None,
            ),
        };

        let mut names = HashSet::new();
        for relation in &relations {
            if !names.insert(relation.descriptor.name.as_str()) {
                return Err(ConfigError::UnsupportedRelation {
                    mapping: concrete.name.clone(),
                    relation: relation.descriptor.name.clone(),
                    reason: "declared twice in one hierarchy".into(),
                });
            }
        }

        Ok(ConcretePlan {
            name: concrete.name.clone(),
            root: root.name.clone(),
            parts,
            relations,
            discriminator,
        })
    }

    /// Every column of every table must be claimed by one declaration.
    fn check_columns(&self) -> Result<(), ConfigError> {
        let mut claims = ColumnClaims::default();

        for plan in self.plans() {
            for part in &plan.parts {
                claims.claim(&part.table, &part.id_column, format!("id:{}", plan.root))?;
            }

            let root = &self.mappings[&plan.root];
            let concrete = &self.mappings[&plan.name];
            let declared: Vec<(&str, &EntityMapping)> = if plan.parts.len() > 1 {
                vec![(plan.parts[0].table.as_str(), root), (plan.parts[1].table.as_str(), concrete)]
            } else if plan.name == plan.root {
                vec![(plan.base_table(), root)]
            } else {
                vec![(plan.base_table(), root), (plan.base_table(), concrete)]
            };
            for (table, mapping) in declared {
                for column in &mapping.columns {
                    claims.claim(table, &column.column, format!("column:{}.{}", mapping.name, column.property))?;
                }
            }

            if let Some((column, _)) = &plan.discriminator {
                claims.claim(plan.base_table(), column, format!("discriminator:{}", plan.root))?;
            }

            for relation in &plan.relations {
                if let Some(column) = relation.descriptor.source_column() {
                    claims.claim(
                        &plan.parts[relation.part].table,
                        column,
                        format!("relation:{}.{}", relation.declared_by, relation.descriptor.name),
                    )?;
                }
            }
        }

        for name in &self.order {
            for relation in &self.mappings[name].relations {
                let Some(column) = relation.target_column() else {
                    continue;
                };
                let tables = self.base_tables(&relation.target).map_err(|_| ConfigError::UnknownMapping {
                    mapping: name.clone(),
                    referenced: relation.target.clone(),
                })?;
                for table in tables {
                    claims.claim(table, column, format!("relation:{}.{}", name, relation.name))?;
                    if let Some(index) = &relation.index_column {
                        claims.claim(table, index, format!("index:{}.{}", name, relation.name))?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn plan_relations(declared_by: &EntityMapping, part: usize) -> Vec<PlanRelation> {
    declared_by
        .relations
        .iter()
        .map(|r| PlanRelation {
            descriptor: r.clone(),
            part,
            declared_by: declared_by.name.clone(),
        })
        .collect()
}

fn discriminator_for(column: &str, subtypes: &[(Value, String)], name: &str) -> Option<(String, Value)> {
    subtypes
        .iter()
        .find(|(_, subtype)| subtype == name)
        .map(|(value, _)| (column.to_string(), value.clone()))
}
