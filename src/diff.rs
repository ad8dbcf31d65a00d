//! Change computation between a persisted data tree and a submitted data set
//!
//! Pure: nothing here touches the database. Tables are reconciled by primary
//! key. Dependent tables (descendants of the root) are owned by the root and
//! lose rows that are omitted from the submission; every other table only
//! loses rows carrying the explicit delete sentinel.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::data_tree::DataTree;
use crate::error::{BookingError, Result};
use crate::rows::{RelevantDataSet, Row, RowTable};
use crate::types::{ColumnDefinition, TableDefinition};
use crate::value::{render_value, values_equal};

/// Shown in place of the previous value of an inserted row
pub const ADD_MARKER: &str = "[add]";

/// Shown in place of the new value of a deleted row
pub const DELETE_MARKER: &str = "[delete]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Before and after of one displayed column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChange {
    pub column: String,
    /// `None` for inserted rows
    pub previous: Option<Value>,
    /// `None` for deleted rows
    pub new: Option<Value>,
    pub changed: bool,
}

impl ColumnChange {
    /// `old -> new` for changed columns, the plain value otherwise
    pub fn render(&self) -> String {
        if !self.changed {
            return self
                .new
                .as_ref()
                .or(self.previous.as_ref())
                .map(render_value)
                .unwrap_or_default();
        }
        let previous = self
            .previous
            .as_ref()
            .map(render_value)
            .unwrap_or_else(|| ADD_MARKER.to_string());
        let new = self
            .new
            .as_ref()
            .map(render_value)
            .unwrap_or_else(|| DELETE_MARKER.to_string());
        format!("{} -> {}", previous, new)
    }
}

/// One row's classification with its before/after state
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub table: String,
    pub kind: ChangeKind,
    /// Primary key; `None` for rows the database has not keyed yet
    pub key: Option<String>,
    /// Displayed non-key columns
    pub columns: Vec<ColumnChange>,
    /// Full row in column order: submitted for inserts and updates, persisted for deletes
    pub values: Vec<Value>,
}

impl ChangeRecord {
    /// Columns whose value differs
    pub fn changed_columns(&self) -> impl Iterator<Item = &ColumnChange> {
        self.columns.iter().filter(|c| c.changed)
    }
}

/// Every change of one table
#[derive(Debug, Clone)]
pub struct TableChanges {
    pub definition: std::sync::Arc<TableDefinition>,
    /// Rows owned by the root: replaced wholesale on any change
    pub dependent: bool,
    pub records: Vec<ChangeRecord>,
    /// Keys of the persisted rows, replaced when `dependent`
    pub persisted_keys: Vec<String>,
    /// Submitted rows minus explicit deletes, re-inserted when `dependent`
    pub surviving: Vec<Vec<Value>>,
}

impl TableChanges {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

/// Changes of one run, in booking order
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub tables: Vec<TableChanges>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableChanges> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub fn records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.tables.iter().flat_map(|t| t.records.iter())
    }

    /// Render every changed table for review
    pub fn preview(&self) -> Vec<PreviewTable> {
        self.tables.iter().map(PreviewTable::from_changes).collect()
    }
}

/// A changed table rendered for review, labeled for users
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewTable {
    pub table: String,
    pub label: String,
    /// Column labels
    pub columns: Vec<String>,
    /// One row per change record, cells aligned to `columns`
    pub data: Vec<Vec<String>>,
}

impl PreviewTable {
    fn from_changes(changes: &TableChanges) -> Self {
        let definition = &changes.definition;
        let shown = compared_columns(definition);
        let data = changes
            .records
            .iter()
            .map(|r| r.columns.iter().map(ColumnChange::render).collect())
            .collect();

        PreviewTable {
            table: definition.name.clone(),
            label: definition.display_label().to_string(),
            columns: shown.iter().map(|c| c.display_label().to_string()).collect(),
            data,
        }
    }
}

/// Displayed columns except the primary key
fn compared_columns(definition: &TableDefinition) -> Vec<&ColumnDefinition> {
    definition
        .visible_columns()
        .filter(|c| !c.primary_key)
        .collect()
}

fn column_changes(
    definition: &TableDefinition,
    previous: Option<&Row>,
    new: Option<&Row>,
) -> Vec<ColumnChange> {
    compared_columns(definition)
        .into_iter()
        .filter_map(|col| {
            let i = definition.column_index(&col.name)?;
            let before = previous.map(|r| r.values()[i].clone());
            let after = new.map(|r| r.values()[i].clone());
            let changed = match (&before, &after) {
                (Some(b), Some(a)) => !values_equal(&col.column_type, b, a),
                _ => true,
            };
            Some(ColumnChange {
                column: col.name.clone(),
                previous: before,
                new: after,
                changed,
            })
        })
        .collect()
}

fn check_unambiguous(side: &str, table: &RowTable) -> Result<()> {
    let duplicates = table.duplicate_keys();
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(BookingError::ambiguous(format!(
        "{} rows of '{}' share primary keys {:?}",
        side,
        table.name(),
        duplicates
    )))
}

/// Reconcile one table
fn diff_table(baseline: &RowTable, submitted: &RowTable, dependent: bool) -> Result<TableChanges> {
    check_unambiguous("Persisted", baseline)?;
    check_unambiguous("Submitted", submitted)?;

    let definition = baseline.definition();
    let table = definition.name.clone();
    let mut records = Vec::new();
    let mut seen = BTreeSet::new();
    let mut surviving = Vec::new();

    for row in submitted.iter() {
        let key = submitted.key_of(row);
        if let Some(k) = &key {
            seen.insert(k.clone());
        }

        if row.is_deleted() {
            let Some(k) = key else {
                return Err(BookingError::ambiguous(format!(
                    "Delete requested for an unkeyed row of '{}'",
                    table
                )));
            };
            let Some(persisted) = baseline.find(&k) else {
                return Err(BookingError::ambiguous(format!(
                    "Delete requested for '{}' row {} which is not persisted",
                    table, k
                )));
            };
            records.push(ChangeRecord {
                table: table.clone(),
                kind: ChangeKind::Delete,
                key: Some(k),
                columns: column_changes(definition, Some(persisted), None),
                values: persisted.values().to_vec(),
            });
            continue;
        }

        surviving.push(row.values().to_vec());
        match key.as_deref().and_then(|k| baseline.find(k)) {
            Some(persisted) => {
                let columns = column_changes(definition, Some(persisted), Some(row));
                if columns.iter().any(|c| c.changed) {
                    records.push(ChangeRecord {
                        table: table.clone(),
                        kind: ChangeKind::Update,
                        key,
                        columns,
                        values: row.values().to_vec(),
                    });
                }
            }
            None => records.push(ChangeRecord {
                table: table.clone(),
                kind: ChangeKind::Insert,
                key,
                columns: column_changes(definition, None, Some(row)),
                values: row.values().to_vec(),
            }),
        }
    }

    if dependent {
        for row in baseline.iter() {
            let Some(k) = baseline.key_of(row) else {
                continue;
            };
            if seen.contains(&k) {
                continue;
            }
            records.push(ChangeRecord {
                table: table.clone(),
                kind: ChangeKind::Delete,
                key: Some(k),
                columns: column_changes(definition, Some(row), None),
                values: row.values().to_vec(),
            });
        }
    }

    Ok(TableChanges {
        definition: std::sync::Arc::clone(definition),
        dependent,
        records,
        persisted_keys: baseline.keys().cloned().collect(),
        surviving,
    })
}

/// Compare a loaded baseline with a submitted data set
///
/// Only tables present in `submitted` are compared; a table left out is not
/// edited. Tables without differences are omitted. Fails before anything is
/// executed on tables outside the graph or ambiguous keys.
pub fn compute_changes(baseline: &DataTree, submitted: &RelevantDataSet) -> Result<ChangeSet> {
    let graph = baseline.graph();
    for (name, rows) in submitted {
        if !graph.contains(name) {
            return Err(BookingError::configuration(format!(
                "Submitted table '{}' is not part of the tree rooted at '{}'",
                name,
                baseline.root_name()
            )));
        }
        if rows.name() != name {
            return Err(BookingError::configuration(format!(
                "Submitted rows under '{}' belong to table '{}'",
                name,
                rows.name()
            )));
        }
    }

    let dependents = graph.descendant_names();
    let mut tables = Vec::new();
    for name in graph.booking_sequence() {
        let Some(rows) = submitted.get(name) else {
            continue;
        };
        let changes = diff_table(baseline.table(name)?, rows, dependents.contains(name))?;
        if !changes.records.is_empty() {
            tables.push(changes);
        }
    }

    let counts: BTreeMap<&str, usize> = tables.iter().map(|t| (t.name(), t.records.len())).collect();
    tracing::debug!(root = %baseline.root_name(), changes = ?counts, "Computed changes");
    Ok(ChangeSet { tables })
}
