//! Error types for the store module.
//!
//! Every variant here belongs to the `StorageIOError` category: the caller
//! must treat the operation as not having happened.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization of a stored column failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(u64),

    /// A set transition was refused; no record in the set was changed.
    #[error("record {sequence_id} cannot move from {from} to {to}")]
    InvalidTransition {
        sequence_id: u64,
        from: String,
        to: String,
    },

    /// The persisted chain state is not the one the caller chained from.
    #[error("chain state changed concurrently: expected last archive {expected:?}, found {actual:?}")]
    ChainStateConflict { expected: String, actual: String },

    /// Invalid data in storage or in a request.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// The blocking worker running a database call failed.
    #[error("blocking task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
