//! # booking-graph
//!
//! Metadata-driven relationship graph, data tree loader and diff/sync engine
//! for interrelated booking records in PostgreSQL.
//!
//! Table definitions (columns, types, foreign keys, labels) live in a metadata
//! table. From them this crate derives, for any root table, the graph of
//! tables it references and the tables that reference it, loads every row
//! related to a set of root rows, and reconciles edited rows with the
//! database in one transaction, parents before children.
//!
//! ## Features
//!
//! - **Schema Graph**: parents and children of a root derived from foreign keys, with a
//!   booking (insert) sequence and its reverse reading sequence
//! - **Data Tree**: row tables for every node, loaded from SQL or pruned from an in-memory
//!   working set by propagating join values outward from the root
//! - **Diff / Sync**: per-row insert/update/delete classification with type-aware equality,
//!   rendered as a preview or executed atomically
//! - **Nested projection**: the tree as nested tables for UIs, plus dropdown options
//! - **Stash**: unfinished working sets saved as JSON under a UUID
//! - **SQL Injection Prevention**: identifiers are validated and quoted, values are always bound
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use booking_graph::{BookingStore, DiffMode, DiffOutcome, EngineConfig, RootFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder("postgres://localhost/bookings").build();
//!     let store = BookingStore::new(config).await?;
//!
//!     // Everything hanging off project P1
//!     let tree = store.load_tree("project", &RootFilter::by("name", ["P1"])).await?;
//!     println!("{:?}", tree.graph().booking_sequence());
//!
//!     // Edited rows, e.g. from a form
//!     let submitted = store.parse_data_set(&serde_json::json!({
//!         "project_level": [
//!             {"id": 1, "project_name": "P1", "level": 1, "rate": 0.015},
//!             {"project_name": "P1", "level": 3, "rate": 0.03}
//!         ]
//!     }))?;
//!
//!     if let DiffOutcome::Preview(tables) = store.diff(&tree, submitted.clone(), DiffMode::Preview).await? {
//!         for table in &tables {
//!             println!("{}: {} changed rows", table.label, table.data.len());
//!         }
//!     }
//!     store.diff(&tree, submitted, DiffMode::Execute).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use booking_graph::EngineConfig;
//!
//! let config = EngineConfig::builder("postgres://localhost/bookings")
//!     .metadata_table("__table_definitions") // Default metadata table name
//!     .stash_table("__stash")                // Default stash table name
//!     .statement_timeout(Duration::from_secs(30))
//!     .max_connections(10)
//!     .build();
//! ```
//!
//! ## Logging
//!
//! Events are emitted through `tracing`; SQL statements at `debug`, run
//! summaries at `info`, empty root results and rollbacks at `warn`. No
//! subscriber is installed.

pub mod config;
pub mod data_tree;
pub mod db;
pub mod diff;
pub mod error;
pub mod graph;
pub mod nested;
pub mod propagate;
pub mod registry;
pub mod rows;
pub mod sql;
pub mod stash;
pub mod store;
pub mod sync;
pub mod types;
pub mod value;

#[cfg(test)]
mod fixtures;

// Re-export main types for convenience
pub use config::{EngineConfig, EngineConfigBuilder};
pub use data_tree::{DataTree, LoadReport, RootFilter, SelectOptionSource};
pub use db::Database;
pub use diff::{ChangeKind, ChangeRecord, ChangeSet, ColumnChange, PreviewTable, compute_changes};
pub use error::{BookingError, Result};
pub use graph::{Edge, GraphNode, NodeId, Relation, SchemaGraph};
pub use nested::{NestedColumn, NestedView};
pub use registry::{MetadataHandle, Registry};
pub use rows::{
    ACTION_FIELD, DELETE_SENTINEL, RelevantDataSet, Row, RowTable, data_set_from_json,
    data_set_to_json,
};
pub use stash::StashEntry;
pub use store::BookingStore;
pub use sync::{DiffMode, DiffOutcome, ExecutionSummary, SyncRun, SyncState, plan_statements};
pub use types::{ColumnDefinition, ColumnType, ForeignKey, TableDefinition};

// Re-export SQL utilities for advanced users
pub use sql::sanitize::{quote_identifier, validate_identifier};
pub use sql::{SqlParam, Statement};
