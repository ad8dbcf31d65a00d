//! Turning a change set into SQL and running it atomically
//!
//! A `SyncRun` moves through `CollectingDiff` to either `Previewing`
//! (terminal, nothing written) or `Executing`, which ends in `Committed` or
//! `RolledBack`. Statements follow the booking order so referenced rows exist
//! before the rows pointing at them.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::data_tree::DataTree;
use crate::db::Database;
use crate::diff::{ChangeKind, ChangeRecord, ChangeSet, PreviewTable, TableChanges, compute_changes};
use crate::error::{BookingError, Result};
use crate::rows::RelevantDataSet;
use crate::sql::Statement;
use crate::sql::query;
use crate::types::{ColumnDefinition, TableDefinition};

/// What to do with a computed change set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    /// Render changes only
    #[default]
    Preview,
    /// Apply changes in one transaction
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExecutionSummary {
    pub statements: usize,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    Preview(Vec<PreviewTable>),
    Executed(ExecutionSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    CollectingDiff,
    Previewing,
    Executing,
    Committed,
    RolledBack,
}

impl SyncState {
    fn can_become(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (CollectingDiff, Previewing)
                | (CollectingDiff, Executing)
                | (Executing, Committed)
                | (Executing, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncState::Previewing | SyncState::Committed | SyncState::RolledBack
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::CollectingDiff => "collecting_diff",
            SyncState::Previewing => "previewing",
            SyncState::Executing => "executing",
            SyncState::Committed => "committed",
            SyncState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// One diff/execute run over a loaded tree
#[derive(Debug)]
pub struct SyncRun {
    root: String,
    state: SyncState,
    changes: ChangeSet,
}

impl SyncRun {
    /// Compute the changes between `baseline` and `submitted`
    pub fn collect(baseline: &DataTree, submitted: &RelevantDataSet) -> Result<Self> {
        let changes = compute_changes(baseline, submitted)?;
        Ok(Self {
            root: baseline.root_name().to_string(),
            state: SyncState::CollectingDiff,
            changes,
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn transition(&mut self, next: SyncState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(BookingError::invalid_state(format!(
                "Sync run on '{}' cannot move from {} to {}",
                self.root, self.state, next
            )));
        }
        tracing::info!(root = %self.root, from = %self.state, to = %next, "Sync state change");
        self.state = next;
        Ok(())
    }

    /// Render the changes without writing anything
    pub fn preview(&mut self) -> Result<Vec<PreviewTable>> {
        self.transition(SyncState::Previewing)?;
        Ok(self.changes.preview())
    }

    /// Statements the run would execute
    pub fn plan(&self) -> Result<Vec<Statement>> {
        plan_statements(&self.changes)
    }

    /// Apply the changes in one transaction
    ///
    /// An empty change set commits without touching the database.
    pub async fn execute(&mut self, db: &Database) -> Result<ExecutionSummary> {
        let statements = self.plan()?;
        self.transition(SyncState::Executing)?;

        if statements.is_empty() {
            self.transition(SyncState::Committed)?;
            return Ok(ExecutionSummary::default());
        }

        match db.execute_batch(&statements).await {
            Ok(rows_affected) => {
                self.transition(SyncState::Committed)?;
                Ok(ExecutionSummary {
                    statements: statements.len(),
                    rows_affected,
                })
            }
            Err(e) => {
                self.transition(SyncState::RolledBack)?;
                Err(e)
            }
        }
    }

    /// Preview or execute according to `mode`
    pub async fn run(mut self, db: &Database, mode: DiffMode) -> Result<DiffOutcome> {
        match mode {
            DiffMode::Preview => self.preview().map(DiffOutcome::Preview),
            DiffMode::Execute => self.execute(db).await.map(DiffOutcome::Executed),
        }
    }
}

fn primary_key_value(definition: &TableDefinition, record: &ChangeRecord) -> Result<Value> {
    definition
        .column_index(definition.primary_key())
        .and_then(|i| record.values.get(i))
        .cloned()
        .ok_or_else(|| {
            BookingError::invalid_state(format!(
                "Change on '{}' carries no primary key",
                definition.name
            ))
        })
}

fn plan_dependent(changes: &TableChanges, out: &mut Vec<Statement>) {
    let definition = &changes.definition;
    if !changes.persisted_keys.is_empty() {
        out.push(query::delete_matching(
            definition,
            definition.primary_key(),
            changes.persisted_keys.clone(),
        ));
    }
    let rows: Vec<&[Value]> = changes.surviving.iter().map(Vec::as_slice).collect();
    out.extend(query::insert_rows(definition, &rows));
}

fn plan_independent(changes: &TableChanges, out: &mut Vec<Statement>) -> Result<()> {
    let definition = &changes.definition;

    for record in changes.records.iter().filter(|r| r.kind == ChangeKind::Delete) {
        out.push(query::delete_row(definition, &primary_key_value(definition, record)?));
    }

    for record in changes.records.iter().filter(|r| r.kind == ChangeKind::Update) {
        let mut assignments: Vec<(&ColumnDefinition, Value)> = Vec::new();
        for change in record.changed_columns() {
            let column = definition.require_column(&change.column)?;
            assignments.push((column, change.new.clone().unwrap_or(Value::Null)));
        }
        out.push(query::update_row(
            definition,
            &primary_key_value(definition, record)?,
            &assignments,
        ));
    }

    let inserts: Vec<&[Value]> = changes
        .records
        .iter()
        .filter(|r| r.kind == ChangeKind::Insert)
        .map(|r| r.values.as_slice())
        .collect();
    out.extend(query::insert_rows(definition, &inserts));
    Ok(())
}

/// SQL for a change set, table by table in booking order
///
/// A changed dependent table has all its persisted rows deleted and the
/// submitted rows re-inserted. Other tables get per-row deletes, updates of
/// the changed columns and inserts.
pub fn plan_statements(changes: &ChangeSet) -> Result<Vec<Statement>> {
    let mut out = Vec::new();
    for table in &changes.tables {
        if table.dependent {
            plan_dependent(table, &mut out);
        } else {
            plan_independent(table, &mut out)?;
        }
    }
    Ok(out)
}

/// INSERTs of every row of a data tree in booking order
pub fn plan_create(tree: &DataTree) -> Result<Vec<Statement>> {
    let mut out = Vec::new();
    for name in tree.graph().booking_sequence() {
        let table = tree.table(name)?;
        let rows: Vec<&[Value]> = table
            .iter()
            .filter(|r| !r.is_deleted())
            .map(|r| r.values())
            .collect();
        out.extend(query::insert_rows(table.definition(), &rows));
    }
    Ok(out)
}

/// DELETEs of the root rows and their dependents, dependents first
///
/// Parent tables are shared with other roots and are left alone.
pub fn plan_delete(tree: &DataTree) -> Result<Vec<Statement>> {
    let graph = tree.graph();
    let dependents = graph.descendant_names();
    let mut out = Vec::new();
    for name in graph.reading_sequence() {
        if name.as_str() != tree.root_name() && !dependents.contains(name) {
            continue;
        }
        let table = tree.table(name)?;
        let keys: Vec<String> = table.keys().cloned().collect();
        if keys.is_empty() {
            continue;
        }
        let definition = table.definition();
        out.push(query::delete_matching(definition, definition.primary_key(), keys));
    }
    Ok(out)
}
