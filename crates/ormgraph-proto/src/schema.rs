//! Table definitions consumed by the DDL layer of a backend.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A column of a table.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Whether NULL is accepted.
    pub nullable: bool,
}

impl ColumnDef {
    /// A nullable column.
    pub fn nullable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
        }
    }

    /// A NOT NULL column.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
        }
    }
}

/// A single-column foreign key.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced column (usually the primary key).
    pub referenced_column: String,
}

/// A table definition.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary key columns. Empty means rows are keyed by a hidden row id.
    pub primary_key: Vec<String>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.add_column(column);
        self
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, fk: ForeignKeyDef) -> Self {
        self.add_foreign_key(fk);
        self
    }

    /// Add a column unless one with the same name exists.
    ///
    /// Returns `false` when the column was already present.
    pub fn add_column(&mut self, column: ColumnDef) -> bool {
        if self.has_column(&column.name) {
            return false;
        }
        self.columns.push(column);
        true
    }

    /// Add a foreign key unless an identical one exists.
    pub fn add_foreign_key(&mut self, fk: ForeignKeyDef) {
        if !self.foreign_keys.contains(&fk) {
            self.foreign_keys.push(fk);
        }
    }

    /// Check whether a column is declared.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Render as a CREATE TABLE statement.
    pub fn to_ddl(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.nullable {
                    c.name.clone()
                } else {
                    format!("{} NOT NULL", c.name)
                }
            })
            .collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        for fk in &self.foreign_keys {
            parts.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                fk.name, fk.column, fk.referenced_table, fk.referenced_column
            ));
        }
        format!("CREATE TABLE {} ({})", self.name, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_column_is_idempotent() {
        let mut table = TableDef::new("city").with_column(ColumnDef::required("id"));

        assert!(!table.add_column(ColumnDef::nullable("id")));
        assert!(table.add_column(ColumnDef::nullable("country_id")));
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn test_ddl_rendering() {
        let table = TableDef::new("city")
            .with_column(ColumnDef::required("id"))
            .with_column(ColumnDef::nullable("country_id"))
            .with_primary_key(["id"])
            .with_foreign_key(ForeignKeyDef {
                name: "fk_city_country_id".into(),
                column: "country_id".into(),
                referenced_table: "country".into(),
                referenced_column: "id".into(),
            });

        assert_eq!(
            table.to_ddl(),
            "CREATE TABLE city (id NOT NULL, country_id, PRIMARY KEY (id), \
             CONSTRAINT fk_city_country_id FOREIGN KEY (country_id) REFERENCES country (id))"
        );
    }
}
