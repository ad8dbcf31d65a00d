//! Table definition registry
//!
//! The registry is built once from metadata rows, validated as a whole and
//! then shared read-only. `MetadataHandle` gives callers a cheap snapshot and
//! swaps in a freshly loaded registry on `refresh`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::Row;

use crate::db::Database;
use crate::error::{BookingError, Result};
use crate::sql::sanitize::{quote_identifier, validate_identifier};
use crate::types::{ColumnDefinition, TableDefinition};

/// Read-only set of resolved table definitions
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: Vec<Arc<TableDefinition>>,
    positions: HashMap<String, usize>,
}

impl Registry {
    /// Resolve inheritance and validate a set of definitions
    ///
    /// Listing order is the order of `definitions`. Fails on duplicate or
    /// malformed names, a missing or repeated primary key, unknown or cyclic
    /// ancestors and foreign keys pointing at unknown tables or columns.
    pub fn new(definitions: Vec<TableDefinition>) -> Result<Self> {
        let mut raw: HashMap<&str, &TableDefinition> = HashMap::new();
        for def in &definitions {
            if raw.insert(def.name.as_str(), def).is_some() {
                return Err(BookingError::configuration(format!(
                    "Table '{}' is defined more than once",
                    def.name
                )));
            }
        }

        let mut tables = Vec::with_capacity(definitions.len());
        let mut positions = HashMap::new();
        for def in &definitions {
            let mut stack = Vec::new();
            let columns = resolve_columns(&def.name, &raw, &mut stack)?;
            let resolved = TableDefinition {
                columns,
                ..def.clone()
            };
            validate_table(&resolved)?;
            positions.insert(resolved.name.clone(), tables.len());
            tables.push(Arc::new(resolved));
        }

        let registry = Self { tables, positions };
        registry.validate_foreign_keys()?;
        Ok(registry)
    }

    /// Load and resolve every definition stored in the metadata table
    pub async fn load(db: &Database, metadata_table: &str) -> Result<Self> {
        let sql = format!(
            "SELECT name, label, schema_name, ancestors, columns FROM {} ORDER BY position, name",
            quote_identifier(metadata_table)
        );

        let mut conn = db.acquire().await?;
        let rows = db
            .deadline("load table definitions", sqlx::query(&sql).fetch_all(&mut *conn))
            .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in &rows {
            definitions.push(row_to_definition(row)?);
        }

        let registry = Self::new(definitions)?;
        tracing::info!(
            metadata_table = %metadata_table,
            tables = registry.len(),
            "Loaded table definitions"
        );
        Ok(registry)
    }

    /// Look up a table definition
    pub fn get_table(&self, name: &str) -> Option<Arc<TableDefinition>> {
        self.positions
            .get(name)
            .map(|&i| Arc::clone(&self.tables[i]))
    }

    /// Look up a table definition, failing with a configuration error
    pub fn require_table(&self, name: &str) -> Result<Arc<TableDefinition>> {
        self.get_table(name).ok_or_else(|| {
            BookingError::configuration(format!("Table '{}' does not exist", name))
        })
    }

    /// All definitions in listing order
    pub fn list_tables(&self) -> impl Iterator<Item = &Arc<TableDefinition>> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn validate_foreign_keys(&self) -> Result<()> {
        for table in &self.tables {
            for (col, fk) in table.foreign_key_columns() {
                let target = self.get_table(&fk.table).ok_or_else(|| {
                    BookingError::configuration(format!(
                        "Foreign key {}.{} references unknown table '{}'",
                        table.name, col.name, fk.table
                    ))
                })?;
                if target.schema != fk.schema {
                    return Err(BookingError::configuration(format!(
                        "Foreign key {}.{} references schema '{}' but '{}' lives in '{}'",
                        table.name, col.name, fk.schema, target.name, target.schema
                    )));
                }
                if target.column(&fk.column).is_none() {
                    return Err(BookingError::configuration(format!(
                        "Foreign key {}.{} references unknown column '{}'",
                        table.name, col.name, fk
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Columns of `name` with ancestors' columns first, most distant ancestor first
fn resolve_columns(
    name: &str,
    raw: &HashMap<&str, &TableDefinition>,
    stack: &mut Vec<String>,
) -> Result<Vec<ColumnDefinition>> {
    if stack.iter().any(|s| s == name) {
        stack.push(name.to_string());
        return Err(BookingError::configuration(format!(
            "Cyclic inheritance: {}",
            stack.join(" -> ")
        )));
    }
    let def = raw.get(name).ok_or_else(|| {
        BookingError::configuration(format!(
            "Unknown ancestor '{}' of '{}'",
            name,
            stack.last().map(String::as_str).unwrap_or_default()
        ))
    })?;

    stack.push(name.to_string());
    let mut columns: Vec<ColumnDefinition> = Vec::new();
    for ancestor in def.ancestors.iter().rev() {
        let inherited = resolve_columns(ancestor, raw, stack)?;
        merge_columns(&mut columns, inherited);
    }
    merge_columns(&mut columns, def.columns.clone());
    stack.pop();
    Ok(columns)
}

/// A redeclared column replaces the inherited one in place
fn merge_columns(into: &mut Vec<ColumnDefinition>, columns: Vec<ColumnDefinition>) {
    for col in columns {
        match into.iter_mut().find(|c| c.name == col.name) {
            Some(existing) => *existing = col,
            None => into.push(col),
        }
    }
}

fn validate_table(table: &TableDefinition) -> Result<()> {
    validate_identifier(&table.name)?;
    validate_identifier(&table.schema)?;
    for col in &table.columns {
        validate_identifier(&col.name)?;
    }

    match table.columns.iter().filter(|c| c.primary_key).count() {
        1 => Ok(()),
        0 => Err(BookingError::configuration(format!(
            "Table '{}' has no primary key column",
            table.name
        ))),
        n => Err(BookingError::configuration(format!(
            "Table '{}' has {} primary key columns",
            table.name, n
        ))),
    }
}

fn row_to_definition(row: &sqlx::postgres::PgRow) -> Result<TableDefinition> {
    let name: String = row.try_get("name")?;
    let label: Option<String> = row.try_get("label")?;
    let schema_name: Option<String> = row.try_get("schema_name")?;
    let ancestors: Option<serde_json::Value> = row.try_get("ancestors")?;
    let columns: serde_json::Value = row.try_get("columns")?;

    let columns: Vec<ColumnDefinition> = serde_json::from_value(columns).map_err(|e| {
        BookingError::configuration(format!("Table '{}' has malformed columns: {}", name, e))
    })?;
    let ancestors: Vec<String> = match ancestors {
        Some(value) if !value.is_null() => serde_json::from_value(value).map_err(|e| {
            BookingError::configuration(format!("Table '{}' has malformed ancestors: {}", name, e))
        })?,
        _ => Vec::new(),
    };

    let mut def = TableDefinition::new(name, columns).with_ancestors(ancestors);
    def.label = label;
    if let Some(schema) = schema_name {
        def.schema = schema;
    }
    Ok(def)
}

/// Shared, refreshable access to the current registry
#[derive(Debug)]
pub struct MetadataHandle {
    current: RwLock<Arc<Registry>>,
    metadata_table: String,
}

impl MetadataHandle {
    /// Wrap an already built registry
    pub fn new(registry: Registry, metadata_table: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
            metadata_table: metadata_table.into(),
        }
    }

    /// Load the registry from the metadata table
    pub async fn load(db: &Database, metadata_table: impl Into<String>) -> Result<Self> {
        let metadata_table = metadata_table.into();
        let registry = Registry::load(db, &metadata_table).await?;
        Ok(Self::new(registry, metadata_table))
    }

    /// The registry readers should use for one operation
    pub fn snapshot(&self) -> Arc<Registry> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Reload from the metadata table
    ///
    /// Snapshots taken earlier stay valid. On failure the current registry
    /// is kept.
    pub async fn refresh(&self, db: &Database) -> Result<Arc<Registry>> {
        let registry = Arc::new(Registry::load(db, &self.metadata_table).await?);
        self.replace_arc(Arc::clone(&registry));
        Ok(registry)
    }

    /// Swap in a registry built elsewhere
    pub fn replace(&self, registry: Registry) {
        self.replace_arc(Arc::new(registry));
    }

    fn replace_arc(&self, registry: Arc<Registry>) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = registry;
    }

    pub fn metadata_table(&self) -> &str {
        &self.metadata_table
    }
}
