//! Error types for the message log.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML, or fields of the wrong type.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Digest algorithm id is not one of SHA-256, SHA-384, SHA-512.
    #[error("unsupported digest algorithm: {0}")]
    DigestAlgorithmUnsupported(String),

    /// Values parse but do not make sense together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur during message log operations.
#[derive(Debug, Error)]
pub enum MessageLogError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error. Fatal for the exchange being logged.
    #[error("storage error: {0}")]
    Store(#[from] messagelog_store::StoreError),

    /// Timestamping error.
    #[error("timestamp error: {0}")]
    Timestamp(#[from] messagelog_timestamp::TimestampError),

    /// Archive error.
    #[error("archive error: {0}")]
    Archive(#[from] messagelog_archive::ArchiveError),

    /// Core primitive error.
    #[error("core error: {0}")]
    Core(#[from] messagelog_core::CoreError),
}

/// Result type for message log operations.
pub type Result<T> = std::result::Result<T, MessageLogError>;
