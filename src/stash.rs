//! Stashed working sets
//!
//! A stash keeps a relevant data set as an opaque JSON payload under a UUID
//! so that an unfinished edit can be picked up later and fed back through
//! `DataTree::load_from_value_set`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{BookingError, Result};
use crate::sql::sanitize::quote_identifier;

/// One stored payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StashEntry {
    pub id: Uuid,
    /// Root table the payload was built for
    pub root: String,
    pub comment: Option<String>,
    /// `{"table": [{"col": value}, ...]}`
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stash storage backed by one Postgres table
#[derive(Debug, Clone)]
pub struct StashStore {
    table: String,
}

impl StashStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the stash table if it does not exist
    pub async fn ensure_table(&self, db: &Database) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id VARCHAR(36) PRIMARY KEY,
                root_table VARCHAR(255) NOT NULL,
                comment TEXT,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
            quote_identifier(&self.table)
        );
        db.deadline("create stash table", sqlx::query(&sql).execute(db.pool()))
            .await?;
        Ok(())
    }

    /// Insert a payload, or overwrite the one stored under `id`
    pub async fn save(
        &self,
        db: &Database,
        id: Option<Uuid>,
        root: &str,
        payload: Value,
        comment: Option<&str>,
    ) -> Result<Uuid> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let sql = format!(
            r#"
            INSERT INTO {} (id, root_table, comment, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                root_table = EXCLUDED.root_table,
                comment = EXCLUDED.comment,
                payload = EXCLUDED.payload,
                updated_at = NOW()
            "#,
            quote_identifier(&self.table)
        );

        db.deadline(
            "save stash",
            sqlx::query(&sql)
                .bind(id.to_string())
                .bind(root)
                .bind(comment)
                .bind(payload)
                .execute(db.pool()),
        )
        .await?;

        tracing::info!(stash = %id, root = %root, "Stashed working set");
        Ok(id)
    }

    /// Fetch a stored payload
    pub async fn load(&self, db: &Database, id: Uuid) -> Result<StashEntry> {
        let sql = format!(
            "SELECT id, root_table, comment, payload, created_at, updated_at FROM {} WHERE id = $1",
            quote_identifier(&self.table)
        );
        let row = db
            .deadline(
                "load stash",
                sqlx::query(&sql)
                    .bind(id.to_string())
                    .fetch_optional(db.pool()),
            )
            .await?
            .ok_or_else(|| BookingError::not_found(format!("Stash '{}' does not exist", id)))?;

        let stored_id: String = row.try_get("id")?;
        Ok(StashEntry {
            id: Uuid::parse_str(&stored_id).map_err(|e| {
                BookingError::invalid_state(format!("Stash id '{}' is not a UUID: {}", stored_id, e))
            })?,
            root: row.try_get("root_table")?,
            comment: row.try_get("comment")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Remove a stored payload; returns whether it existed
    pub async fn discard(&self, db: &Database, id: Uuid) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", quote_identifier(&self.table));
        let done = db
            .deadline(
                "discard stash",
                sqlx::query(&sql).bind(id.to_string()).execute(db.pool()),
            )
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
