//! Hash join execution of join-tree selects.
//!
//! Algorithm:
//! 1. Scan the root table, pushing down conditions on the root alias
//! 2. For each join, collect the distinct left values, fetch matching right
//!    rows in one scan and build `HashMap<right value, Vec<Row>>`
//! 3. Probe with every current row, dropping (inner) or NULL-padding
//!    (left outer) rows without a match
//! 4. Apply the remaining conditions to the joined rows
//!
//! Complexity: O(N + M) per join where N = current rows, M = right rows.

use std::collections::{HashMap, HashSet};

use ormgraph_proto::{qualify, Error as StatementError, JoinKind, Predicate, Row, Select, Value};

use crate::engine::StorageEngine;
use crate::error::Error;

/// Hash join executor for join-tree selects.
pub struct HashJoinExecutor;

impl HashJoinExecutor {
    /// Execute a select, returning rows keyed `alias.column`.
    pub fn execute(engine: &StorageEngine, select: &Select) -> Result<Vec<Row>, Error> {
        let (root_filter, residual) = split_filter(&select.filter, &select.from.alias);

        let mut rows: Vec<Row> = engine
            .scan(&select.from.table, &root_filter)?
            .into_iter()
            .map(|row| prefix_row(&select.from.alias, row))
            .collect();

        for join in &select.joins {
            let right_def = engine
                .table_def(&join.right.table)
                .ok_or_else(|| StatementError::UnknownTable(join.right.table.clone()))?;
            let left_key = qualify(&join.left_alias, &join.left_column);

            // Build phase: only right rows some left row can match
            let wanted: HashSet<&Value> = rows
                .iter()
                .map(|row| row.get_or_null(&left_key))
                .filter(|v| !v.is_null())
                .collect();
            let mut by_value: HashMap<Value, Vec<Row>> = HashMap::new();
            if !wanted.is_empty() {
                let values: Vec<Value> = wanted.into_iter().cloned().collect();
                let predicate = Predicate::is_in(join.right_column.clone(), values);
                for row in engine.scan(&join.right.table, &predicate)? {
                    let value = row.get_or_null(&join.right_column).clone();
                    by_value
                        .entry(value)
                        .or_default()
                        .push(prefix_row(&join.right.alias, row));
                }
            }

            // Probe phase
            let mut joined = Vec::with_capacity(rows.len());
            for row in rows {
                let value = row.get_or_null(&left_key);
                match by_value.get(value).filter(|_| !value.is_null()) {
                    Some(matches) => {
                        for right in matches {
                            let mut combined = row.clone();
                            combined.extend(right);
                            joined.push(combined);
                        }
                    }
                    None if join.kind == JoinKind::LeftOuter => {
                        let mut padded = row;
                        for column in right_def.column_names() {
                            padded.set(qualify(&join.right.alias, column), Value::Null);
                        }
                        joined.push(padded);
                    }
                    None => {}
                }
            }
            rows = joined;
        }

        if !residual.is_empty() {
            rows.retain(|row| residual.matches(row));
        }
        Ok(rows)
    }
}

/// Split a qualified filter into a root-table predicate over bare column
/// names and the rest.
fn split_filter(filter: &Predicate, root_alias: &str) -> (Predicate, Predicate) {
    let prefix = format!("{}.", root_alias);
    let mut root = Predicate::all();
    let mut residual = Predicate::all();

    for condition in &filter.conditions {
        match condition.column().strip_prefix(&prefix) {
            Some(bare) => root.conditions.push(condition.with_column(bare)),
            None => residual.conditions.push(condition.clone()),
        }
    }
    (root, residual)
}

fn prefix_row(alias: &str, row: Row) -> Row {
    Row::from_pairs(
        row.into_pairs()
            .into_iter()
            .map(|(column, value)| (qualify(alias, &column), value)),
    )
}
