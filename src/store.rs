//! BookingStore - main entry point for tree loading, editing and persistence
//!
//! Holds the database handle, the shared metadata registry and the stash, and
//! wires graph construction, data tree loading and the sync engine together
//! for callers that work with one root table at a time.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::data_tree::{DataTree, RootFilter, auto_name_table};
use crate::db::Database;
use crate::diff::compute_changes;
use crate::error::Result;
use crate::graph::SchemaGraph;
use crate::registry::{MetadataHandle, Registry};
use crate::rows::{RelevantDataSet, Row, RowTable, data_set_from_json, data_set_to_json};
use crate::stash::{StashEntry, StashStore};
use crate::sync::{DiffMode, DiffOutcome, ExecutionSummary, SyncRun, plan_create, plan_delete};

/// Metadata-driven booking store over one PostgreSQL database
pub struct BookingStore {
    db: Database,
    metadata: MetadataHandle,
    stash: StashStore,
    config: EngineConfig,
}

impl BookingStore {
    /// Connect, load the table definitions and make sure the stash table exists
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let db = Database::connect(&config).await?;
        Self::open(db, config).await
    }

    /// Same as `new` on an existing pool
    pub async fn from_pool(pool: PgPool, config: EngineConfig) -> Result<Self> {
        let db = Database::from_pool(pool, config.statement_timeout);
        Self::open(db, config).await
    }

    /// Use a registry built in memory; nothing is read from the database
    ///
    /// Call `ensure_stash_table` before stashing.
    pub fn with_registry(pool: PgPool, config: EngineConfig, registry: Registry) -> Self {
        Self {
            db: Database::from_pool(pool, config.statement_timeout),
            metadata: MetadataHandle::new(registry, config.metadata_table.clone()),
            stash: StashStore::new(config.stash_table.clone()),
            config,
        }
    }

    async fn open(db: Database, config: EngineConfig) -> Result<Self> {
        let metadata = MetadataHandle::load(&db, config.metadata_table.clone()).await?;
        let stash = StashStore::new(config.stash_table.clone());
        stash.ensure_table(&db).await?;
        Ok(Self {
            db,
            metadata,
            stash,
            config,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry snapshot for one operation
    pub fn registry(&self) -> Arc<Registry> {
        self.metadata.snapshot()
    }

    /// Reload table definitions; trees built earlier keep their definitions
    pub async fn refresh_metadata(&self) -> Result<Arc<Registry>> {
        self.metadata.refresh(&self.db).await
    }

    // =========================================================================
    // Trees
    // =========================================================================

    /// Relationship graph around `root`
    pub fn build_graph(&self, root: &str) -> Result<SchemaGraph> {
        SchemaGraph::build(&self.registry(), root)
    }

    /// Empty data tree around `root`
    pub fn build_tree(&self, root: &str) -> Result<DataTree> {
        DataTree::build(&self.registry(), root)
    }

    /// Data tree filled from the database
    pub async fn load_tree(&self, root: &str, filter: &RootFilter) -> Result<DataTree> {
        let mut tree = self.build_tree(root)?;
        tree.load_from_sql(&self.db, filter).await?;
        Ok(tree)
    }

    /// Data tree pruned from an in-memory working set
    pub fn prune_tree(&self, root: &str, values: RelevantDataSet) -> Result<DataTree> {
        let mut tree = self.build_tree(root)?;
        tree.load_from_value_set(values)?;
        Ok(tree)
    }

    /// Parse JSON records against the current registry
    pub fn parse_data_set(&self, value: &serde_json::Value) -> Result<RelevantDataSet> {
        data_set_from_json(&self.registry(), value)
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Compare a loaded baseline with submitted rows, then preview or apply
    ///
    /// Execution is all-or-nothing; on failure the baseline may be stale and
    /// the caller has to reload before trying again.
    pub async fn diff(
        &self,
        baseline: &DataTree,
        submitted: RelevantDataSet,
        mode: DiffMode,
    ) -> Result<DiffOutcome> {
        SyncRun::collect(baseline, &submitted)?
            .run(&self.db, mode)
            .await
    }

    /// Insert a new root with everything hanging off it
    ///
    /// Blank names are filled from naming columns first, then the working set
    /// is pruned to the rows reachable from its root rows and inserted in
    /// booking order in one transaction.
    pub async fn create_tree(&self, root: &str, mut values: RelevantDataSet) -> Result<ExecutionSummary> {
        for table in values.values_mut() {
            auto_name_table(table)?;
        }
        let tree = self.prune_tree(root, values)?;
        let statements = plan_create(&tree)?;
        if statements.is_empty() {
            tracing::warn!(root = %root, "Nothing to create");
            return Ok(ExecutionSummary::default());
        }

        let rows_affected = self.db.execute_batch(&statements).await?;
        tracing::info!(
            root = %root,
            statements = statements.len(),
            rows = rows_affected,
            "Created data tree"
        );
        Ok(ExecutionSummary {
            statements: statements.len(),
            rows_affected,
        })
    }

    /// Delete the filtered root rows and their dependent rows
    ///
    /// Preview lists what would go, labeled for users. Execution deletes
    /// dependents first, then the root rows, in one transaction. Shared
    /// parent rows are never touched.
    pub async fn delete_tree(&self, root: &str, filter: &RootFilter, mode: DiffMode) -> Result<DiffOutcome> {
        let tree = self.load_tree(root, filter).await?;
        match mode {
            DiffMode::Preview => {
                let changes = compute_changes(&tree, &deletion_request(&tree)?)?;
                Ok(DiffOutcome::Preview(changes.preview()))
            }
            DiffMode::Execute => {
                let statements = plan_delete(&tree)?;
                if statements.is_empty() {
                    return Ok(DiffOutcome::Executed(ExecutionSummary::default()));
                }
                let rows_affected = self.db.execute_batch(&statements).await?;
                tracing::info!(root = %root, rows = rows_affected, "Deleted data tree");
                Ok(DiffOutcome::Executed(ExecutionSummary {
                    statements: statements.len(),
                    rows_affected,
                }))
            }
        }
    }

    // =========================================================================
    // Stash
    // =========================================================================

    /// Create the stash table if it does not exist
    pub async fn ensure_stash_table(&self) -> Result<()> {
        self.stash.ensure_table(&self.db).await
    }

    /// Save a working set under `id`, or under a fresh id
    pub async fn stash(
        &self,
        id: Option<Uuid>,
        root: &str,
        values: &RelevantDataSet,
        comment: Option<&str>,
    ) -> Result<Uuid> {
        self.registry().require_table(root)?;
        self.stash
            .save(&self.db, id, root, data_set_to_json(values), comment)
            .await
    }

    /// Stored entry as saved
    pub async fn stash_entry(&self, id: Uuid) -> Result<StashEntry> {
        self.stash.load(&self.db, id).await
    }

    /// Stored working set, parsed against the current registry
    pub async fn load_stash(&self, id: Uuid) -> Result<RelevantDataSet> {
        let entry = self.stash.load(&self.db, id).await?;
        self.parse_data_set(&entry.payload)
    }

    /// Stored working set pruned around the root it was saved for
    pub async fn load_stashed_tree(&self, id: Uuid) -> Result<DataTree> {
        let entry = self.stash.load(&self.db, id).await?;
        let values = self.parse_data_set(&entry.payload)?;
        self.prune_tree(&entry.root, values)
    }

    pub async fn discard_stash(&self, id: Uuid) -> Result<bool> {
        self.stash.discard(&self.db, id).await
    }
}

/// Submission removing a loaded tree: root rows flagged, dependent tables empty
fn deletion_request(tree: &DataTree) -> Result<RelevantDataSet> {
    let graph = tree.graph();
    let mut request = RelevantDataSet::new();

    let root = tree.root_rows();
    let flagged = root
        .iter()
        .map(|r| Row::new(r.values().to_vec()).marked_deleted());
    let mut rows = RowTable::new(Arc::clone(root.definition()));
    for row in flagged {
        rows.push(row)?;
    }
    request.insert(tree.root_name().to_string(), rows);

    for name in graph.descendant_names() {
        let definition = Arc::clone(tree.table(&name)?.definition());
        request.insert(name, RowTable::new(definition));
    }
    Ok(request)
}
