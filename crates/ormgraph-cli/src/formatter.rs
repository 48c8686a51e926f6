//! Output formatting for graphs, rows and table listings.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use ormgraph_core::{Entity, Related};
use ormgraph_proto::{Row, TableDef, Value};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII tables and indented trees
    Table,
    /// JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

pub fn format_entity(entity: &Entity, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut out = String::new();
            write_tree(entity, 0, &mut out);
            out
        }
        OutputFormat::Json => pretty(&entity_json(entity)),
    }
}

pub fn format_rows(def: &TableDef, rows: &[Row], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(def.column_names().map(Cell::new));
            for row in rows {
                table.add_row(def.column_names().map(|c| Cell::new(row.get_or_null(c).to_string())));
            }
            format!("{}\n({} rows)", table, rows.len())
        }
        OutputFormat::Json => pretty(&serde_json::Value::Array(
            rows.iter()
                .map(|row| {
                    serde_json::Value::Object(
                        row.iter()
                            .map(|(column, value)| (column.clone(), value_json(value)))
                            .collect(),
                    )
                })
                .collect(),
        )),
    }
}

pub fn format_tables(tables: &[(String, usize)], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec!["Table", "Rows"]);
            for (name, count) in tables {
                table.add_row(vec![Cell::new(name), Cell::new(count)]);
            }
            table.to_string()
        }
        OutputFormat::Json => pretty(&serde_json::Value::Object(
            tables
                .iter()
                .map(|(name, count)| (name.clone(), serde_json::Value::from(*count)))
                .collect(),
        )),
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn write_tree(entity: &Entity, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let fields: Vec<String> = entity
        .fields()
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    out.push_str(&format!("{}{} {{{}}}\n", indent, entity.entity_type(), fields.join(", ")));
    for (name, related) in entity.relations() {
        match related {
            Related::Reference(Some(key)) => out.push_str(&format!("{}  {} -> {}\n", indent, name, key)),
            Related::Reference(None) => {}
            _ => {
                let children = entity.related(name);
                out.push_str(&format!("{}  {} [{}]\n", indent, name, children.len()));
                for child in children {
                    write_tree(child, depth + 2, out);
                }
            }
        }
    }
}

fn entity_json(entity: &Entity) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert("type".into(), entity.entity_type().into());
    for (name, value) in entity.fields() {
        object.insert(name.clone(), value_json(value));
    }
    for (name, related) in entity.relations() {
        let value = match related {
            Related::One(one) => one.as_deref().map_or(serde_json::Value::Null, entity_json),
            Related::Many(many) => serde_json::Value::Array(many.iter().map(entity_json).collect()),
            Related::Reference(key) => key
                .as_ref()
                .map_or(serde_json::Value::Null, |key| key.to_string().into()),
        };
        object.insert(name.clone(), value);
    }
    serde_json::Value::Object(object)
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::Int32(n) => (*n).into(),
        Value::Int64(n) | Value::Timestamp(n) => (*n).into(),
        Value::Float64(f) => serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, Into::into),
        Value::String(s) => s.as_str().into(),
        Value::Bytes(_) | Value::Uuid(_) => value.to_string().into(),
    }
}
