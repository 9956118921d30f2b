//! Error types for the timestamp module.

use thiserror::Error;

/// Errors that can occur while timestamping batches.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// TSA timed out, was unreachable, or rejected the request.
    #[error("TSA {tsa} unavailable: {reason}")]
    TsaUnavailable { tsa: String, reason: String },

    /// TSA answered, but the token does not cover the submitted batch.
    #[error("TSA {tsa} protocol violation: {reason}")]
    ProtocolViolation { tsa: String, reason: String },

    /// Global configuration lists no TSA endpoints.
    #[error("no timestamping authority configured")]
    NoTsaConfigured,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] messagelog_store::StoreError),

    /// Core primitive failed (e.g. unsupported digest algorithm).
    #[error("core error: {0}")]
    Core(#[from] messagelog_core::CoreError),

    /// Signer collaborator failed or is misconfigured.
    #[error("signer error: {0}")]
    Signer(String),

    /// Another timestamping run is in progress on this node.
    #[error("timestamp job already running")]
    AlreadyRunning,
}

impl TimestampError {
    /// Whether the batch should simply be retried on a later run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TsaUnavailable { .. } | Self::ProtocolViolation { .. } | Self::NoTsaConfigured
        )
    }
}

/// Result type for timestamp operations.
pub type Result<T> = std::result::Result<T, TimestampError>;
