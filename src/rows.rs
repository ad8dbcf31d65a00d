//! Row tables
//!
//! A `RowTable` holds the rows of one table, each row aligned to the column
//! order of the owning `TableDefinition`, indexed by primary key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{BookingError, Result};
use crate::registry::Registry;
use crate::types::TableDefinition;
use crate::value::value_key;

/// Record field carrying a row action
pub const ACTION_FIELD: &str = "_action";

/// Action value requesting deletion of the row
pub const DELETE_SENTINEL: &str = "[delete]";

/// Every node name of a graph mapped to its own row table
pub type RelevantDataSet = BTreeMap<String, RowTable>;

/// One row, values in column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    deleted: bool,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            deleted: false,
        }
    }

    /// Flag the row for explicit deletion
    pub fn marked_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Rows of a single table with a primary-key index
#[derive(Debug, Clone)]
pub struct RowTable {
    definition: Arc<TableDefinition>,
    pk: Option<usize>,
    rows: Vec<Row>,
    index: BTreeMap<String, usize>,
}

impl PartialEq for RowTable {
    fn eq(&self, other: &Self) -> bool {
        self.definition.name == other.definition.name && self.rows == other.rows
    }
}

impl RowTable {
    /// Empty, correctly shaped table
    pub fn new(definition: Arc<TableDefinition>) -> Self {
        let pk = definition.column_index(definition.primary_key());
        Self {
            definition,
            pk,
            rows: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// Build from raw value rows in column order
    pub fn from_rows(definition: Arc<TableDefinition>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut table = Self::new(definition);
        for values in rows {
            table.push(Row::new(values))?;
        }
        Ok(table)
    }

    /// Build from JSON objects keyed by column name
    ///
    /// Missing columns are null. Fields that are not columns are ignored,
    /// except `_action` which may carry the delete sentinel.
    pub fn from_records(definition: Arc<TableDefinition>, records: &[Value]) -> Result<Self> {
        let mut table = Self::new(definition);
        for (n, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| {
                BookingError::validation(format!(
                    "Table '{}' record {} is not an object",
                    table.definition.name, n
                ))
            })?;

            let mut values = Vec::with_capacity(table.definition.columns.len());
            for col in &table.definition.columns {
                let value = object.get(&col.name).cloned().unwrap_or(Value::Null);
                col.column_type.validate_value(&value).map_err(|e| {
                    BookingError::validation(format!(
                        "Table '{}' record {} column '{}': {}",
                        table.definition.name, n, col.name, e
                    ))
                })?;
                values.push(value);
            }

            let mut row = Row::new(values);
            if object.get(ACTION_FIELD).and_then(Value::as_str) == Some(DELETE_SENTINEL) {
                row = row.marked_deleted();
            }
            table.push(row)?;
        }
        Ok(table)
    }

    pub fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Append a row; the first row holding a key owns it in the index
    pub fn push(&mut self, row: Row) -> Result<()> {
        if row.values.len() != self.definition.columns.len() {
            return Err(BookingError::validation(format!(
                "Table '{}' expects {} values per row, got {}",
                self.definition.name,
                self.definition.columns.len(),
                row.values.len()
            )));
        }
        if let Some(key) = self.key_of(&row) {
            self.index.entry(key).or_insert(self.rows.len());
        }
        self.rows.push(row);
        Ok(())
    }

    /// Add the rows of `other` whose keys are not yet present
    ///
    /// Rows without a key are always added. Returns the added rows.
    pub fn merge(&mut self, other: RowTable) -> Result<RowTable> {
        let mut added = RowTable::new(Arc::clone(&self.definition));
        for row in other.rows {
            if let Some(key) = self.key_of(&row) {
                if self.index.contains_key(&key) {
                    continue;
                }
            }
            added.push(row.clone())?;
            self.push(row)?;
        }
        Ok(added)
    }

    /// Primary-key text of a row, `None` for rows not yet persisted
    pub fn key_of(&self, row: &Row) -> Option<String> {
        self.pk.and_then(|i| row.values.get(i)).and_then(value_key)
    }

    /// Row owning a primary key
    pub fn find(&self, key: &str) -> Option<&Row> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    /// Indexed primary keys in key order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.index.keys()
    }

    /// Keys held by more than one row
    pub fn duplicate_keys(&self) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for row in &self.rows {
            if let Some(key) = self.key_of(row) {
                if !seen.insert(key.clone()) {
                    duplicates.insert(key);
                }
            }
        }
        duplicates
    }

    fn column_position(&self, column: &str) -> Result<usize> {
        self.definition.column_index(column).ok_or_else(|| {
            BookingError::configuration(format!(
                "Column '{}' does not exist on table '{}'",
                column, self.definition.name
            ))
        })
    }

    /// Value of a named column in a row of this table
    pub fn value<'a>(&self, row: &'a Row, column: &str) -> Result<&'a Value> {
        let i = self.column_position(column)?;
        Ok(&row.values[i])
    }

    /// Value at a row position and column name
    pub fn get(&self, row: usize, column: &str) -> Result<&Value> {
        let r = self.rows.get(row).ok_or_else(|| {
            BookingError::validation(format!(
                "Table '{}' has no row {}",
                self.definition.name, row
            ))
        })?;
        self.value(r, column)
    }

    /// Overwrite a cell, keeping the key index current
    pub fn set(&mut self, row: usize, column: &str, value: Value) -> Result<()> {
        let i = self.column_position(column)?;
        let len = self.rows.len();
        let r = self.rows.get_mut(row).ok_or_else(|| {
            BookingError::validation(format!(
                "Table '{}' has no row {} (of {})",
                self.definition.name, row, len
            ))
        })?;
        r.values[i] = value;
        if Some(i) == self.pk {
            self.reindex();
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(key) = self.pk.and_then(|p| row.values.get(p)).and_then(value_key) {
                self.index.entry(key).or_insert(i);
            }
        }
    }

    /// Distinct non-blank keys of a column
    pub fn column_keys(&self, column: &str) -> Result<BTreeSet<String>> {
        let i = self.column_position(column)?;
        Ok(self
            .rows
            .iter()
            .filter_map(|r| value_key(&r.values[i]))
            .collect())
    }

    /// Positions of the rows whose value in `column` is one of `keys`
    pub fn positions_in(&self, column: &str, keys: &BTreeSet<String>) -> Result<Vec<usize>> {
        let i = self.column_position(column)?;
        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| value_key(&row.values[i]).is_some_and(|k| keys.contains(&k)))
            .map(|(n, _)| n)
            .collect())
    }

    /// Rows whose value in `column` is one of `keys`
    pub fn filter_in(&self, column: &str, keys: &BTreeSet<String>) -> Result<RowTable> {
        let mut out = RowTable::new(Arc::clone(&self.definition));
        for n in self.positions_in(column, keys)? {
            out.push(self.rows[n].clone())?;
        }
        Ok(out)
    }

    /// A row as a JSON object
    pub fn record(&self, row: &Row) -> Map<String, Value> {
        let mut object: Map<String, Value> = self
            .definition
            .columns
            .iter()
            .zip(&row.values)
            .map(|(c, v)| (c.name.clone(), v.clone()))
            .collect();
        if row.deleted {
            object.insert(ACTION_FIELD.to_string(), Value::from(DELETE_SENTINEL));
        }
        object
    }

    /// All rows as JSON objects
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|r| Value::Object(self.record(r)))
            .collect()
    }
}

/// Parse `{"table": [{"col": value}, ...], ...}` against the registry
pub fn data_set_from_json(registry: &Registry, value: &Value) -> Result<RelevantDataSet> {
    let object = value
        .as_object()
        .ok_or_else(|| BookingError::validation("Relevant data set must be a JSON object"))?;

    let mut set = RelevantDataSet::new();
    for (name, records) in object {
        let definition = registry.require_table(name)?;
        let records = records.as_array().ok_or_else(|| {
            BookingError::validation(format!("Table '{}' must hold an array of records", name))
        })?;
        set.insert(name.clone(), RowTable::from_records(definition, records)?);
    }
    Ok(set)
}

/// Serialize a relevant data set as JSON records
pub fn data_set_to_json(set: &RelevantDataSet) -> Value {
    Value::Object(
        set.iter()
            .map(|(name, table)| (name.clone(), Value::Array(table.to_records())))
            .collect(),
    )
}
