//! Error types for booking graph operations

use thiserror::Error;

/// Errors that can occur while building graphs, loading data trees or syncing changes
#[derive(Debug, Error)]
pub enum BookingError {
    /// Missing table or column, malformed foreign key, bad inheritance chain
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A submitted row could not be matched to exactly one persisted row
    #[error("Ambiguous change: {0}")]
    AmbiguousChange(String),

    /// A statement of a sync batch failed; the whole batch was rolled back
    #[error("Persistence error (rolled back): {0}")]
    Persistence(#[source] sqlx::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BookingError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::AmbiguousChange(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the error comes from the metadata rather than from data or the database
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
