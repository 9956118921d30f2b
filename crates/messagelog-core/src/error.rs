//! Error types for the message log core.

use thiserror::Error;

/// Core errors raised by pure computations: algorithm selection and
/// linking info parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The digest algorithm identifier is not one of SHA-256/384/512.
    #[error("unsupported digest algorithm: {0}")]
    DigestAlgorithmUnsupported(String),

    /// The linking info text does not follow the grammar.
    #[error("malformed linking info: {0}")]
    MalformedLinkingInfo(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
