//! Rows exchanged with a connection.

use std::collections::BTreeMap;

use crate::value::Value;

/// A row of named column values.
///
/// Rows returned by a [`Select`](crate::Select) are keyed by qualified
/// `alias.column` names; rows written by statements use bare column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Set a column value, replacing any previous one.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Get a column value. Absent columns read as `None`, not as NULL.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Get a column value, reading absent columns as NULL.
    pub fn get_or_null(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(column).unwrap_or(&NULL)
    }

    /// Get the value of `alias.column`.
    pub fn qualified(&self, alias: &str, column: &str) -> &Value {
        self.get_or_null(&qualify(alias, column))
    }

    /// Check whether a column is present.
    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    /// Remove a column.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    /// Copy every column of `other` into this row.
    pub fn extend(&mut self, other: &Row) {
        for (column, value) in &other.values {
            self.values.insert(column.clone(), value.clone());
        }
    }

    /// Iterate over columns in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Column names in name order.
    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert into ordered `(column, value)` pairs.
    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.values.into_iter().collect()
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }
}

/// Build the qualified `alias.column` key used in select results.
pub fn qualify(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, column)
}
