//! Table definitions derived from mappings.

use ormgraph_proto::{ColumnDef, ForeignKeyDef, TableDef};

use crate::error::Error;
use crate::mapping::{MappingRegistry, Ownership};

/// Tables in first-declared order, merged by name.
#[derive(Default)]
struct Tables {
    defs: Vec<TableDef>,
}

impl Tables {
    /// The entity table `name`, created with its identifier primary key.
    fn entity(&mut self, name: &str, id_column: &str) -> &mut TableDef {
        let position = match self.defs.iter().position(|t| t.name == name) {
            Some(position) => position,
            None => {
                self.defs.push(
                    TableDef::new(name)
                        .with_column(ColumnDef::required(id_column))
                        .with_primary_key([id_column]),
                );
                self.defs.len() - 1
            }
        };
        &mut self.defs[position]
    }
}

fn foreign_key(table: &str, column: &str, referenced_table: &str, referenced_column: &str) -> ForeignKeyDef {
    ForeignKeyDef {
        name: format!("fk_{}_{}", table, column),
        column: column.to_string(),
        referenced_table: referenced_table.to_string(),
        referenced_column: referenced_column.to_string(),
    }
}

/// Build the table definitions every mapping needs.
///
/// Foreign keys to or from a table-per-class hierarchy are left out since
/// one column may refer to several tables.
pub(crate) fn table_defs(registry: &MappingRegistry) -> Result<Vec<TableDef>, Error> {
    let mut tables = Tables::default();

    for plan in registry.plans() {
        for (index, part) in plan.parts.iter().enumerate() {
            let table = tables.entity(&part.table, &part.id_column);
            for column in &part.columns {
                table.add_column(ColumnDef::nullable(column.column.as_str()));
            }
            if index > 0 {
                table.add_foreign_key(foreign_key(
                    &part.table,
                    &part.id_column,
                    plan.base_table(),
                    plan.id_column(),
                ));
            }
            if let Some((column, _)) = plan.discriminator.as_ref().filter(|_| index == 0) {
                table.add_column(ColumnDef::required(column.as_str()));
            }
        }

        for relation in &plan.relations {
            let Some(column) = relation.descriptor.source_column() else {
                continue;
            };
            let part = &plan.parts[relation.part];
            let targets = registry.base_tables(&relation.descriptor.target)?;
            let target_id = registry.identifier(&relation.descriptor.target)?.column.as_str();
            let table = tables.entity(&part.table, &part.id_column);
            table.add_column(ColumnDef::nullable(column));
            if let [target] = targets.as_slice() {
                table.add_foreign_key(foreign_key(&part.table, column, target, target_id));
            }
        }
    }

    let mut associations = Vec::new();
    for name in registry.mapping_names() {
        let Some(mapping) = registry.mapping(name) else {
            continue;
        };
        let owners = registry.base_tables(name)?;
        let owner_id = registry.identifier(name)?.column.as_str();

        for relation in &mapping.relations {
            let target_id = registry.identifier(&relation.target)?.column.as_str();
            match &relation.ownership {
                Ownership::SourceForeignKey { .. } => {}
                Ownership::TargetForeignKey { column } => {
                    for target in registry.base_tables(&relation.target)? {
                        let table = tables.entity(target, target_id);
                        table.add_column(ColumnDef::nullable(column.as_str()));
                        if let Some(index) = &relation.index_column {
                            table.add_column(ColumnDef::nullable(index.as_str()));
                        }
                        if let [owner] = owners.as_slice() {
                            table.add_foreign_key(foreign_key(target, column, owner, owner_id));
                        }
                    }
                }
                Ownership::AssociationTable {
                    table,
                    owner_column,
                    target_column,
                } => {
                    let mut def = TableDef::new(table.as_str())
                        .with_column(ColumnDef::required(owner_column.as_str()))
                        .with_column(ColumnDef::required(target_column.as_str()));
                    let mut key = vec![owner_column.clone()];
                    if let Some(index) = &relation.index_column {
                        def.add_column(ColumnDef::required(index.as_str()));
                        key.push(index.clone());
                    }
                    key.push(target_column.clone());
                    def = def.with_primary_key(key);

                    if let [owner] = owners.as_slice() {
                        def.add_foreign_key(foreign_key(table, owner_column, owner, owner_id));
                    }
                    if let [target] = registry.base_tables(&relation.target)?.as_slice() {
                        def.add_foreign_key(foreign_key(table, target_column, target, target_id));
                    }
                    associations.push(def);
                }
            }
        }
    }

    let mut defs = tables.defs;
    defs.extend(associations);
    tracing::debug!(tables = defs.len(), "table definitions derived");
    Ok(defs)
}
