//! Error types for the event store.

use thiserror::Error;

/// Main error type for store operations.
///
/// A duplicate insert is not an error (see [`crate::InsertOutcome`]) and a
/// subscriber that went away is never reported to the producer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Malformed filter, rejected before anything reaches storage.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The caller's cancellation token fired (or its deadline passed).
    /// Safe to retry.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store not initialized")]
    NotInitialized,
}

impl StoreError {
    /// True for cancellation, which callers may retry without side effects.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
