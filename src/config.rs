//! Configuration for the booking engine
//!
//! Provides a builder pattern for configuring the store.

use std::time::Duration;

/// Configuration for the booking store
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// PostgreSQL database URL
    pub database_url: String,
    /// Name of the table holding table definitions (default: "__table_definitions")
    pub metadata_table: String,
    /// Name of the table holding stashed relevant data sets (default: "__stash")
    pub stash_table: String,
    /// Deadline applied to every single database call
    pub statement_timeout: Duration,
    /// Upper bound of pooled connections
    pub max_connections: u32,
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> EngineConfigBuilder {
        EngineConfigBuilder::new(database_url)
    }
}

/// Builder for EngineConfig
#[derive(Debug)]
pub struct EngineConfigBuilder {
    database_url: String,
    metadata_table: String,
    stash_table: String,
    statement_timeout: Duration,
    max_connections: u32,
}

impl EngineConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            metadata_table: "__table_definitions".to_string(),
            stash_table: "__stash".to_string(),
            statement_timeout: Duration::from_secs(30),
            max_connections: 10,
        }
    }

    /// Set the metadata table name (default: "__table_definitions")
    pub fn metadata_table(mut self, name: impl Into<String>) -> Self {
        self.metadata_table = name.into();
        self
    }

    /// Set the stash table name (default: "__stash")
    pub fn stash_table(mut self, name: impl Into<String>) -> Self {
        self.stash_table = name.into();
        self
    }

    /// Set the per-call deadline (default: 30 seconds)
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Set the pool size (default: 10)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            database_url: self.database_url,
            metadata_table: self.metadata_table,
            stash_table: self.stash_table,
            statement_timeout: self.statement_timeout,
            max_connections: self.max_connections,
        }
    }
}
