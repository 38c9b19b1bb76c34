use snoozer_core::SnoozerError;
use thiserror::Error;

/// Errors that can occur while reading or writing a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serialized value is larger than the per-item quota.
    #[error("Quota exceeded for key {key}: {size} bytes (max {max})")]
    QuotaExceeded { key: String, size: usize, max: usize },

    /// A value could not be interpreted at all (e.g. the pending set is not an array).
    #[error("Corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// An entry failed validation and was not persisted.
    #[error(transparent)]
    Invalid(#[from] SnoozerError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
