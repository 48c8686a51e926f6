//! Join plan construction.
//!
//! A plan is built once per mapping when the context is created. Each node
//! stands for one related mapping and lists the concrete shapes a row can
//! take there; each edge is one relation, either joined into the same
//! select or deferred to a follow-up load.

use ormgraph_proto::{qualify, JoinKind, Row, Select, TableRef, Value};

use crate::error::{ConfigError, Error};
use crate::mapping::{ConcretePlan, Dispatch, MappingRegistry, Ownership, RelationDescriptor, RelationKind, Strategy};

/// Test telling whether a row carries a given concrete shape.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Presence {
    /// The qualified column is not NULL.
    NotNull(String),
    /// The qualified column holds the value.
    Equals(String, Value),
}

impl Presence {
    pub fn holds(&self, row: &Row) -> bool {
        match self {
            Presence::NotNull(column) => !row.get_or_null(column).is_null(),
            Presence::Equals(column, value) => row.get_or_null(column) == value,
        }
    }
}

/// One concrete type a node can materialize as.
#[derive(Debug, Clone)]
pub(crate) struct NodeShape {
    /// Concrete plan name.
    pub plan: String,
    /// Alias of each table part of the plan.
    pub aliases: Vec<String>,
    pub presence: Presence,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanNode {
    /// Mapping the node was built for.
    pub mapping: String,
    /// Checked in order; the first shape present wins.
    pub shapes: Vec<NodeShape>,
    pub edges: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeTarget {
    Joined(usize),
    /// Loaded by a follow-up query: cycles and table-per-class targets.
    Deferred,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanEdge {
    pub relation: RelationDescriptor,
    pub owner: usize,
    /// Concrete plans of the owner node declaring the relation.
    pub owner_plans: Vec<String>,
    pub target: EdgeTarget,
    /// Qualified column holding each element's position.
    pub index: Option<String>,
}

/// Prepared select over one mapping's relation tree.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub(crate) select: Select,
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) edges: Vec<PlanEdge>,
}

impl JoinPlan {
    /// Plans loading a mapping: one per concrete type for table-per-class
    /// roots, a single one otherwise.
    pub(crate) fn build_all(registry: &MappingRegistry, mapping: &str) -> Result<Vec<JoinPlan>, Error> {
        match registry.dispatch(mapping)? {
            Dispatch::Polymorphic {
                strategy: Strategy::TablePerClass,
                concretes,
                ..
            } => concretes.iter().map(|c| Self::build(registry, c)).collect(),
            _ => Ok(vec![Self::build(registry, mapping)?]),
        }
    }

    pub(crate) fn build(registry: &MappingRegistry, mapping: &str) -> Result<JoinPlan, Error> {
        let mut builder = Builder {
            registry,
            select: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            next_alias: 0,
        };
        builder.node(mapping, None, &mut Vec::new(), true)?;
        let select = builder
            .select
            .ok_or_else(|| Error::UnknownMapping(mapping.to_string()))?;
        Ok(JoinPlan {
            select,
            nodes: builder.nodes,
            edges: builder.edges,
        })
    }

    pub(crate) fn root(&self) -> &PlanNode {
        &self.nodes[0]
    }

    /// Number of joined tables.
    pub fn join_count(&self) -> usize {
        self.select.join_count()
    }

    /// Mappings read by the select, in join order starting at the root.
    pub fn mappings(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.mapping.as_str())
    }

    /// Number of relations loaded by follow-up queries.
    pub fn deferred_count(&self) -> usize {
        self.edges.iter().filter(|e| e.target == EdgeTarget::Deferred).count()
    }

    /// The select, without root filter.
    pub fn select(&self) -> &Select {
        &self.select
    }
}

/// How a node's first table attaches to the tree.
struct Link {
    kind: JoinKind,
    left_alias: String,
    left_column: String,
    /// Column of the node's first table; its identifier when `None`.
    right_column: Option<String>,
}

struct Builder<'r> {
    registry: &'r MappingRegistry,
    select: Option<Select>,
    nodes: Vec<PlanNode>,
    edges: Vec<PlanEdge>,
    next_alias: usize,
}

impl<'r> Builder<'r> {
    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn join(&mut self, kind: JoinKind, table: &str, alias: &str, left_alias: &str, left_column: &str, right_column: &str) {
        self.select = self.select.take().map(|select| {
            select.join(
                kind,
                TableRef::new(table, alias),
                left_alias,
                left_column,
                right_column,
            )
        });
    }

    /// Open a node's first table, either as the select root or joined by `link`.
    fn open(&mut self, table: &str, id_column: &str, link: Option<&Link>) -> String {
        let alias = self.alias();
        match link {
            None => self.select = Some(Select::from(table, alias.as_str())),
            Some(link) => {
                let right = link.right_column.as_deref().unwrap_or(id_column);
                self.join(link.kind, table, &alias, &link.left_alias, &link.left_column, right);
            }
        }
        alias
    }

    fn concrete_shape(&mut self, plan: &ConcretePlan, link: Option<&Link>) -> NodeShape {
        let first = self.open(plan.base_table(), plan.id_column(), link);
        let kind = match link {
            Some(link) if link.kind == JoinKind::LeftOuter => JoinKind::LeftOuter,
            _ => JoinKind::Inner,
        };
        let mut aliases = vec![first.clone()];
        for part in &plan.parts[1..] {
            let alias = self.alias();
            self.join(kind, &part.table, &alias, &first, plan.id_column(), &part.id_column);
            aliases.push(alias);
        }

        let presence = match &plan.discriminator {
            Some((column, value)) => Presence::Equals(qualify(&first, column), value.clone()),
            None => {
                let last = aliases.last().unwrap_or(&first);
                Presence::NotNull(qualify(last, plan.id_column()))
            }
        };
        NodeShape {
            plan: plan.name.clone(),
            aliases,
            presence,
        }
    }

    fn shapes(&mut self, mapping: &str, link: Option<&Link>) -> Result<Vec<NodeShape>, Error> {
        let registry = self.registry;
        let (strategy, concretes) = match registry.dispatch(mapping)? {
            Dispatch::Concrete(name) => {
                return Ok(vec![self.concrete_shape(registry.plan(name)?, link)]);
            }
            Dispatch::Polymorphic {
                strategy, concretes, ..
            } => (*strategy, concretes),
        };
        let plans = concretes
            .iter()
            .map(|c| registry.plan(c))
            .collect::<Result<Vec<_>, Error>>()?;
        let Some(first) = plans.first() else {
            return Err(ConfigError::Polymorphism {
                mapping: mapping.to_string(),
                reason: "no instantiable subtype".into(),
            }
            .into());
        };

        match strategy {
            Strategy::SingleTable => {
                let alias = self.open(first.base_table(), first.id_column(), link);
                Ok(plans
                    .iter()
                    .map(|plan| NodeShape {
                        plan: plan.name.clone(),
                        aliases: vec![alias.clone()],
                        presence: match &plan.discriminator {
                            Some((column, value)) => Presence::Equals(qualify(&alias, column), value.clone()),
                            None => Presence::NotNull(qualify(&alias, plan.id_column())),
                        },
                    })
                    .collect())
            }
            Strategy::JoinedTables => {
                let root_alias = self.open(first.base_table(), first.id_column(), link);
                let mut shapes = Vec::new();
                let mut root_shape = None;
                for plan in &plans {
                    match plan.parts.get(1) {
                        Some(part) => {
                            let alias = self.alias();
                            self.join(
                                JoinKind::LeftOuter,
                                &part.table,
                                &alias,
                                &root_alias,
                                plan.id_column(),
                                &part.id_column,
                            );
                            shapes.push(NodeShape {
                                plan: plan.name.clone(),
                                aliases: vec![root_alias.clone(), alias.clone()],
                                presence: Presence::NotNull(qualify(&alias, &part.id_column)),
                            });
                        }
                        None => {
                            root_shape = Some(NodeShape {
                                plan: plan.name.clone(),
                                aliases: vec![root_alias.clone()],
                                presence: Presence::NotNull(qualify(&root_alias, plan.id_column())),
                            })
                        }
                    }
                }
                shapes.extend(root_shape);
                Ok(shapes)
            }
            Strategy::TablePerClass => Err(ConfigError::Polymorphism {
                mapping: mapping.to_string(),
                reason: "table-per-class hierarchies are loaded per subtype".into(),
            }
            .into()),
        }
    }

    /// Add the node for `mapping` and, depth first, everything below it.
    /// `path` holds the root mappings of the enclosing nodes.
    fn node(&mut self, mapping: &str, link: Option<Link>, path: &mut Vec<String>, inner: bool) -> Result<usize, Error> {
        let registry = self.registry;
        let shapes = self.shapes(mapping, link.as_ref())?;

        // (relation, part, declaring plans, aliases of the first declaring shape)
        let mut relations: Vec<(RelationDescriptor, usize, Vec<String>, Vec<String>)> = Vec::new();
        for shape in &shapes {
            let plan = registry.plan(&shape.plan)?;
            for relation in &plan.relations {
                match relations.iter_mut().find(|(r, ..)| r.name == relation.descriptor.name) {
                    Some((_, _, declaring, _)) => declaring.push(shape.plan.clone()),
                    None => relations.push((
                        relation.descriptor.clone(),
                        relation.part,
                        vec![shape.plan.clone()],
                        shape.aliases.clone(),
                    )),
                }
            }
        }
        let id_column = registry.plan(&shapes[0].plan)?.id_column().to_string();
        let shape_count = shapes.len();

        let index = self.nodes.len();
        self.nodes.push(PlanNode {
            mapping: mapping.to_string(),
            shapes,
            edges: Vec::new(),
        });
        path.push(registry.root_of(mapping)?.to_string());

        for (relation, part, owner_plans, aliases) in relations {
            let target_root = registry.root_of(&relation.target)?;
            let table_per_class = matches!(
                registry.dispatch(&relation.target)?,
                Dispatch::Polymorphic {
                    strategy: Strategy::TablePerClass,
                    ..
                }
            );
            let mut edge = PlanEdge {
                relation,
                owner: index,
                owner_plans,
                target: EdgeTarget::Deferred,
                index: None,
            };

            if !table_per_class && !path.iter().any(|p| p == target_root) {
                let relation = &edge.relation;
                let kind = if relation.kind == RelationKind::OneToOne
                    && relation.mandatory
                    && inner
                    && edge.owner_plans.len() == shape_count
                {
                    JoinKind::Inner
                } else {
                    JoinKind::LeftOuter
                };

                let (link, link_alias) = match &relation.ownership {
                    Ownership::SourceForeignKey { column } => (
                        Link {
                            kind,
                            left_alias: aliases[part].clone(),
                            left_column: column.clone(),
                            right_column: None,
                        },
                        None,
                    ),
                    Ownership::TargetForeignKey { column } => (
                        Link {
                            kind,
                            left_alias: aliases[0].clone(),
                            left_column: id_column.clone(),
                            right_column: Some(column.clone()),
                        },
                        None,
                    ),
                    Ownership::AssociationTable {
                        table,
                        owner_column,
                        target_column,
                    } => {
                        let alias = self.alias();
                        self.join(kind, table, &alias, &aliases[0], &id_column, owner_column);
                        (
                            Link {
                                kind,
                                left_alias: alias.clone(),
                                left_column: target_column.clone(),
                                right_column: None,
                            },
                            Some(alias),
                        )
                    }
                };
                let index_column = relation.index_column.clone();
                let child = self.node(&relation.target, Some(link), path, kind == JoinKind::Inner)?;
                edge.index = index_column.map(|column| match &link_alias {
                    Some(alias) => qualify(alias, &column),
                    None => qualify(&self.nodes[child].shapes[0].aliases[0], &column),
                });
                edge.target = EdgeTarget::Joined(child);
            }

            let edge_index = self.edges.len();
            self.edges.push(edge);
            self.nodes[index].edges.push(edge_index);
        }

        path.pop();
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{EntityMapping, IdentifierMapping, PolymorphismPolicy};

    fn registry(mappings: Vec<EntityMapping>) -> MappingRegistry {
        MappingRegistry::build(mappings).unwrap()
    }

    fn country_city() -> Vec<EntityMapping> {
        vec![
            EntityMapping::new("Country", "country")
                .identifier(IdentifierMapping::assigned("id"))
                .column("name")
                .relation(RelationDescriptor::one_to_one("capital", "City", "capital_id").mandatory())
                .relation(
                    RelationDescriptor::one_to_many_list("cities", "City", "country_id")
                        .indexed_by("position")
                        .reverse("country"),
                ),
            EntityMapping::new("City", "city")
                .identifier(IdentifierMapping::assigned("id"))
                .column("name")
                .back_reference("country"),
        ]
    }

    #[test]
    fn test_join_kinds_and_index() {
        let registry = registry(country_city());
        let plan = JoinPlan::build(&registry, "Country").unwrap();

        assert_eq!(plan.nodes.len(), 3);
        assert_eq!(plan.join_count(), 2);
        assert_eq!(plan.select.joins[0].kind, JoinKind::Inner);
        assert_eq!(plan.select.joins[0].left_column, "capital_id");
        assert_eq!(plan.select.joins[1].kind, JoinKind::LeftOuter);
        assert_eq!(plan.select.joins[1].right_column, "country_id");
        assert_eq!(plan.edges[1].index.as_deref(), Some("t2.position"));
        assert_eq!(plan.deferred_count(), 0);
        assert_eq!(plan.mappings().collect::<Vec<_>>(), vec!["Country", "City", "City"]);
    }

    #[test]
    fn test_self_reference_is_deferred() {
        let registry = registry(vec![EntityMapping::new("Category", "category")
            .identifier(IdentifierMapping::assigned("id"))
            .column("name")
            .back_reference("parent")
            .relation(RelationDescriptor::one_to_many_set("children", "Category", "parent_id").reverse("parent"))]);
        let plan = JoinPlan::build(&registry, "Category").unwrap();

        assert_eq!(plan.join_count(), 0);
        assert_eq!(plan.deferred_count(), 1);
    }

    #[test]
    fn test_joined_tables_shapes() {
        let registry = registry(vec![
            EntityMapping::new("Vehicle", "vehicle")
                .identifier(IdentifierMapping::assigned("id"))
                .column("brand")
                .polymorphism(PolymorphismPolicy::JoinedTables {
                    subtypes: vec!["Car".into(), "Truck".into()],
                }),
            EntityMapping::subtype("Car", "Vehicle").table("car").column("doors"),
            EntityMapping::subtype("Truck", "Vehicle").table("truck").column("payload"),
        ]);
        let plan = JoinPlan::build(&registry, "Vehicle").unwrap();

        let shapes = &plan.root().shapes;
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[1].aliases, vec!["t0".to_string(), "t2".to_string()]);
        assert_eq!(shapes[1].presence, Presence::NotNull("t2.id".into()));
        assert!(plan.select.joins.iter().all(|j| j.kind == JoinKind::LeftOuter));

        let car = JoinPlan::build(&registry, "Car").unwrap();
        assert_eq!(car.select.joins[0].kind, JoinKind::Inner);
    }

    #[test]
    fn test_table_per_class_builds_one_plan_per_subtype() {
        let registry = registry(vec![
            EntityMapping::new("Vehicle", "vehicle")
                .identifier(IdentifierMapping::assigned("id"))
                .column("brand")
                .polymorphism(PolymorphismPolicy::TablePerClass {
                    subtypes: vec!["Car".into(), "Truck".into()],
                }),
            EntityMapping::subtype("Car", "Vehicle").table("car").column("doors"),
            EntityMapping::subtype("Truck", "Vehicle").table("truck").column("payload"),
        ]);
        let plans = JoinPlan::build_all(&registry, "Vehicle").unwrap();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].select.from.table, "truck");
    }
}
