//! Storage engine: one sled tree per table plus a table catalog.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ormgraph_proto::{Condition, Error as StatementError, Predicate, Row, TableDef, Value};
use parking_lot::RwLock;
use sled::{Db, Tree};
use tracing::debug;

use super::codec::{decode_row, encode_key, encode_row};
use super::StorageConfig;
use crate::error::Error;

/// Tree name for table definitions.
const CATALOG_TREE: &str = "catalog:tables";

/// Prefix for per-table data trees.
const TABLE_PREFIX: &str = "table:";

/// A stored row together with its tree key.
pub type KeyedRow = (Vec<u8>, Row);

#[derive(Clone)]
struct TableHandle {
    def: Arc<TableDef>,
    tree: Tree,
}

/// The storage engine wrapping sled.
pub struct StorageEngine {
    /// The underlying sled database.
    db: Db,

    /// Table definitions keyed by table name.
    catalog_tree: Tree,

    /// Open tables.
    tables: RwLock<HashMap<String, TableHandle>>,

    /// Whether writes check foreign keys.
    enforce_foreign_keys: bool,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let catalog_tree = db.open_tree(CATALOG_TREE)?;

        let mut tables = HashMap::new();
        for entry in catalog_tree.iter() {
            let (_, bytes) = entry?;
            let def = decode_table_def(&bytes)?;
            let tree = db.open_tree(format!("{}{}", TABLE_PREFIX, def.name))?;
            tables.insert(
                def.name.clone(),
                TableHandle {
                    def: Arc::new(def),
                    tree,
                },
            );
        }

        debug!(tables = tables.len(), "storage engine opened");

        Ok(Self {
            db,
            catalog_tree,
            tables: RwLock::new(tables),
            enforce_foreign_keys: config.enforce_foreign_keys,
        })
    }

    /// Create or replace a table definition. Existing rows are kept.
    pub fn create_table(&self, def: TableDef) -> Result<(), Error> {
        for column in def
            .primary_key
            .iter()
            .chain(def.foreign_keys.iter().map(|fk| &fk.column))
        {
            if !def.has_column(column) {
                return Err(StatementError::UnknownColumn {
                    table: def.name.clone(),
                    column: column.clone(),
                }
                .into());
            }
        }

        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&def)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.catalog_tree.insert(def.name.as_bytes(), bytes)?;

        let tree = self.db.open_tree(format!("{}{}", TABLE_PREFIX, def.name))?;
        debug!(table = %def.name, columns = def.columns.len(), "table created");
        self.tables.write().insert(
            def.name.clone(),
            TableHandle {
                def: Arc::new(def),
                tree,
            },
        );
        Ok(())
    }

    /// Get a table definition.
    pub fn table_def(&self, name: &str) -> Option<TableDef> {
        self.tables.read().get(name).map(|h| (*h.def).clone())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Insert a row, returning its key and the stored (NULL-padded) row.
    pub fn insert(&self, table: &str, row: &Row) -> Result<KeyedRow, Error> {
        let handle = self.handle(table)?;
        let full = normalize(&handle.def, row)?;
        let key = self.row_key(&handle.def, &full)?;

        if handle.tree.contains_key(&key)? {
            return Err(StatementError::DuplicateKey {
                table: table.to_string(),
                key: describe_key(&handle.def, &full),
            }
            .into());
        }

        self.check_references(&handle.def, &full)?;
        handle.tree.insert(key.as_slice(), encode_row(&full)?)?;
        Ok((key, full))
    }

    /// Update matching rows, returning their previous state.
    pub fn update(&self, table: &str, set: &Row, predicate: &Predicate) -> Result<Vec<KeyedRow>, Error> {
        let handle = self.handle(table)?;
        for (column, value) in set.iter() {
            let def = handle.def.column(column).ok_or_else(|| StatementError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            })?;
            if !def.nullable && value.is_null() {
                return Err(StatementError::NotNull {
                    table: table.to_string(),
                    column: column.clone(),
                }
                .into());
            }
            if handle.def.primary_key.contains(column) {
                return Err(StatementError::Backend(format!(
                    "primary key column '{}' of table '{}' cannot be updated",
                    column, table
                ))
                .into());
            }
        }

        let matches = self.scan_handle(&handle, predicate)?;
        let mut updated = Vec::with_capacity(matches.len());
        for (_, old) in &matches {
            let mut new = old.clone();
            new.extend(set);
            self.check_references(&handle.def, &new)?;
            updated.push(encode_row(&new)?);
        }
        for ((key, _), bytes) in matches.iter().zip(updated) {
            handle.tree.insert(key.as_slice(), bytes)?;
        }
        Ok(matches)
    }

    /// Delete matching rows, returning them.
    pub fn delete(&self, table: &str, predicate: &Predicate) -> Result<Vec<KeyedRow>, Error> {
        let handle = self.handle(table)?;
        let matches = self.scan_handle(&handle, predicate)?;
        if matches.is_empty() {
            return Ok(matches);
        }

        self.check_not_referenced(&handle.def, &matches)?;
        for (key, _) in &matches {
            handle.tree.remove(key.as_slice())?;
        }
        Ok(matches)
    }

    /// Rows of a table matching a predicate over bare column names.
    pub fn scan(&self, table: &str, predicate: &Predicate) -> Result<Vec<Row>, Error> {
        let handle = self.handle(table)?;
        Ok(self
            .scan_handle(&handle, predicate)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// Number of rows in a table.
    pub fn count(&self, table: &str) -> Result<usize, Error> {
        Ok(self.handle(table)?.tree.len())
    }

    /// Write or remove a raw row without any checks. Used to undo writes.
    pub(crate) fn restore(&self, table: &str, key: &[u8], row: Option<&Row>) -> Result<(), Error> {
        let handle = self.handle(table)?;
        match row {
            Some(row) => {
                handle.tree.insert(key, encode_row(row)?)?;
            }
            None => {
                handle.tree.remove(key)?;
            }
        }
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the underlying sled database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    fn handle(&self, table: &str) -> Result<TableHandle, Error> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| StatementError::UnknownTable(table.to_string()).into())
    }

    fn row_key(&self, def: &TableDef, row: &Row) -> Result<Vec<u8>, Error> {
        if def.primary_key.is_empty() {
            return Ok(self.db.generate_id()?.to_be_bytes().to_vec());
        }
        let values: Vec<&Value> = def.primary_key.iter().map(|c| row.get_or_null(c)).collect();
        encode_key(&values)
    }

    /// Scan with a point lookup when the predicate pins the primary key.
    fn scan_handle(&self, handle: &TableHandle, predicate: &Predicate) -> Result<Vec<KeyedRow>, Error> {
        if let Some(keys) = point_keys(&handle.def, predicate)? {
            let mut rows = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(bytes) = handle.tree.get(&key)? {
                    let row = decode_row(&bytes)?;
                    if predicate.matches(&row) {
                        rows.push((key, row));
                    }
                }
            }
            return Ok(rows);
        }

        let mut rows = Vec::new();
        for entry in handle.tree.iter() {
            let (key, bytes) = entry?;
            let row = decode_row(&bytes)?;
            if predicate.matches(&row) {
                rows.push((key.to_vec(), row));
            }
        }
        Ok(rows)
    }

    /// Every non-null foreign key value must exist in the referenced table.
    fn check_references(&self, def: &TableDef, row: &Row) -> Result<(), Error> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }

        for fk in &def.foreign_keys {
            let value = row.get_or_null(&fk.column);
            if value.is_null() {
                continue;
            }

            let referenced = self.handle(&fk.referenced_table)?;
            let found = if referenced.def.primary_key.len() == 1
                && referenced.def.primary_key[0] == fk.referenced_column
            {
                referenced.tree.contains_key(encode_key(&[value])?)?
            } else {
                let predicate = Predicate::eq(fk.referenced_column.clone(), value.clone());
                !self.scan_handle(&referenced, &predicate)?.is_empty()
            };

            if !found {
                return Err(StatementError::ForeignKeyViolation {
                    table: def.name.clone(),
                    constraint: fk.name.clone(),
                    detail: format!(
                        "{} = {} has no match in {}.{}",
                        fk.column, value, fk.referenced_table, fk.referenced_column
                    ),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Deleted rows must not be referenced by surviving rows.
    fn check_not_referenced(&self, def: &TableDef, deleted: &[KeyedRow]) -> Result<(), Error> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }

        let deleted_keys: HashSet<&[u8]> = deleted.iter().map(|(k, _)| k.as_slice()).collect();
        let handles: Vec<TableHandle> = self.tables.read().values().cloned().collect();

        for referencing in handles {
            for fk in referencing
                .def
                .foreign_keys
                .iter()
                .filter(|fk| fk.referenced_table == def.name)
            {
                let referenced_values: HashSet<&Value> = deleted
                    .iter()
                    .map(|(_, row)| row.get_or_null(&fk.referenced_column))
                    .filter(|v| !v.is_null())
                    .collect();
                if referenced_values.is_empty() {
                    continue;
                }

                let same_table = referencing.def.name == def.name;
                for entry in referencing.tree.iter() {
                    let (key, bytes) = entry?;
                    if same_table && deleted_keys.contains(&key[..]) {
                        continue;
                    }
                    let row = decode_row(&bytes)?;
                    let value = row.get_or_null(&fk.column);
                    if referenced_values.contains(value) {
                        return Err(StatementError::ForeignKeyViolation {
                            table: referencing.def.name.clone(),
                            constraint: fk.name.clone(),
                            detail: format!(
                                "row with {} = {} still references {}",
                                fk.column, value, def.name
                            ),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

fn decode_table_def(bytes: &[u8]) -> Result<TableDef, Error> {
    // sled values carry no alignment guarantee.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<TableDef, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Deserialization(e.to_string()))
}

/// Check columns, pad missing ones with NULL and enforce NOT NULL.
fn normalize(def: &TableDef, row: &Row) -> Result<Row, Error> {
    for column in row.columns() {
        if !def.has_column(column) {
            return Err(StatementError::UnknownColumn {
                table: def.name.clone(),
                column: column.clone(),
            }
            .into());
        }
    }

    let mut full = Row::new();
    for column in &def.columns {
        let value = row.get_or_null(&column.name).clone();
        if value.is_null() && !column.nullable {
            return Err(StatementError::NotNull {
                table: def.name.clone(),
                column: column.name.clone(),
            }
            .into());
        }
        full.set(column.name.clone(), value);
    }
    Ok(full)
}

fn describe_key(def: &TableDef, row: &Row) -> String {
    let parts: Vec<String> = def
        .primary_key
        .iter()
        .map(|c| format!("{}={}", c, row.get_or_null(c)))
        .collect();
    format!("({})", parts.join(", "))
}

/// Keys to fetch directly when every primary key column is pinned by the
/// predicate (at most one column through `IN`).
fn point_keys(def: &TableDef, predicate: &Predicate) -> Result<Option<Vec<Vec<u8>>>, Error> {
    if def.primary_key.is_empty() {
        return Ok(None);
    }

    let mut candidates: Vec<Vec<&Value>> = vec![Vec::new()];
    for column in &def.primary_key {
        let pinned = predicate.conditions.iter().find_map(|c| match c {
            Condition::Eq(name, value) if name == column => Some(vec![value]),
            Condition::In(name, values) if name == column => Some(values.iter().collect()),
            _ => None,
        });
        let Some(values) = pinned else {
            return Ok(None);
        };
        if values.len() != 1 && candidates.len() != 1 {
            return Ok(None);
        }
        candidates = candidates
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |v| {
                    let mut key = prefix.clone();
                    key.push(*v);
                    key
                })
            })
            .collect();
    }

    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(candidates.len());
    for values in candidates {
        let key = encode_key(&values)?;
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    Ok(Some(keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormgraph_proto::{ColumnDef, ForeignKeyDef};

    struct TestDb {
        engine: StorageEngine,
        _dir: tempfile::TempDir,
    }

    impl std::ops::Deref for TestDb {
        type Target = StorageEngine;
        fn deref(&self) -> &Self::Target {
            &self.engine
        }
    }

    fn test_engine() -> TestDb {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(StorageConfig::new(dir.path())).unwrap();
        engine
            .create_table(
                TableDef::new("country")
                    .with_column(ColumnDef::required("id"))
                    .with_column(ColumnDef::nullable("name"))
                    .with_primary_key(["id"]),
            )
            .unwrap();
        engine
            .create_table(
                TableDef::new("city")
                    .with_column(ColumnDef::required("id"))
                    .with_column(ColumnDef::nullable("name"))
                    .with_column(ColumnDef::nullable("country_id"))
                    .with_primary_key(["id"])
                    .with_foreign_key(ForeignKeyDef {
                        name: "fk_city_country".into(),
                        column: "country_id".into(),
                        referenced_table: "country".into(),
                        referenced_column: "id".into(),
                    }),
            )
            .unwrap();
        TestDb { engine, _dir: dir }
    }

    #[test]
    fn test_insert_and_point_lookup() {
        let engine = test_engine();
        engine
            .insert("country", &Row::new().with("id", 1i64).with("name", "France"))
            .unwrap();

        let rows = engine.scan("country", &Predicate::eq("id", 1i64)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("France")));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let engine = test_engine();
        let row = Row::new().with("id", 1i64);
        engine.insert("country", &row).unwrap();

        let err = engine.insert("country", &row).unwrap_err();
        assert!(matches!(
            err,
            Error::Statement(StatementError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_missing_columns_are_null_padded() {
        let engine = test_engine();
        let (_, stored) = engine.insert("country", &Row::new().with("id", 2i64)).unwrap();

        assert_eq!(stored.get("name"), Some(&Value::Null));
    }

    #[test]
    fn test_not_null_and_unknown_column() {
        let engine = test_engine();

        let err = engine.insert("country", &Row::new().with("name", "x")).unwrap_err();
        assert!(matches!(err, Error::Statement(StatementError::NotNull { .. })));

        let err = engine
            .insert("country", &Row::new().with("id", 1i64).with("capital", "x"))
            .unwrap_err();
        assert!(matches!(err, Error::Statement(StatementError::UnknownColumn { .. })));
    }

    #[test]
    fn test_foreign_key_checked_on_insert() {
        let engine = test_engine();

        let err = engine
            .insert("city", &Row::new().with("id", 10i64).with("country_id", 1i64))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Statement(StatementError::ForeignKeyViolation { .. })
        ));

        engine.insert("country", &Row::new().with("id", 1i64)).unwrap();
        engine
            .insert("city", &Row::new().with("id", 10i64).with("country_id", 1i64))
            .unwrap();
    }

    #[test]
    fn test_referenced_row_cannot_be_deleted() {
        let engine = test_engine();
        engine.insert("country", &Row::new().with("id", 1i64)).unwrap();
        engine
            .insert("city", &Row::new().with("id", 10i64).with("country_id", 1i64))
            .unwrap();

        assert!(engine.delete("country", &Predicate::eq("id", 1i64)).is_err());

        engine
            .update(
                "city",
                &Row::new().with("country_id", Value::Null),
                &Predicate::eq("id", 10i64),
            )
            .unwrap();
        let deleted = engine.delete("country", &Predicate::eq("id", 1i64)).unwrap();
        assert_eq!(deleted.len(), 1);
    }

    #[test]
    fn test_update_returns_previous_rows() {
        let engine = test_engine();
        engine
            .insert("country", &Row::new().with("id", 1i64).with("name", "France"))
            .unwrap();

        let previous = engine
            .update(
                "country",
                &Row::new().with("name", "République"),
                &Predicate::eq("id", 1i64),
            )
            .unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].1.get("name"), Some(&Value::from("France")));

        let err = engine
            .update("country", &Row::new().with("id", 2i64), &Predicate::all())
            .unwrap_err();
        assert!(matches!(err, Error::Statement(StatementError::Backend(_))));
    }

    #[test]
    fn test_table_without_primary_key_allows_duplicates() {
        let engine = test_engine();
        engine
            .create_table(
                TableDef::new("tags")
                    .with_column(ColumnDef::required("owner"))
                    .with_column(ColumnDef::required("tag")),
            )
            .unwrap();
        let row = Row::new().with("owner", 1i64).with("tag", "a");
        engine.insert("tags", &row).unwrap();
        engine.insert("tags", &row).unwrap();

        assert_eq!(engine.count("tags").unwrap(), 2);
    }

    #[test]
    fn test_catalog_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        {
            let engine = StorageEngine::open(config.clone()).unwrap();
            engine
                .create_table(
                    TableDef::new("country")
                        .with_column(ColumnDef::required("id"))
                        .with_primary_key(["id"]),
                )
                .unwrap();
            engine.insert("country", &Row::new().with("id", 1i64)).unwrap();
            engine.flush().unwrap();
        }

        let engine = StorageEngine::open(config).unwrap();
        assert_eq!(engine.table_names(), vec!["country".to_string()]);
        assert_eq!(engine.count("country").unwrap(), 1);
    }
}
