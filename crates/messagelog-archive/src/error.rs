//! Error types for archive building and verification.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or encrypting archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Encryption is configured but the recipient key is missing or invalid.
    /// The archive is withheld.
    #[error("archive encryption key missing: {0}")]
    EncryptionKeyMissing(String),

    /// Decrypting an archive failed.
    #[error("archive decryption failed: {0}")]
    Decryption(String),

    /// A confirmed record carries no timestamp evidence.
    #[error("record {0} has no timestamp evidence")]
    MissingTimestamp(u64),

    /// Evidence container bytes do not have the expected layout.
    #[error("invalid evidence container: {0}")]
    InvalidContainer(String),

    /// Nothing to put into an archive.
    #[error("no records to archive")]
    Empty,

    /// The store already records an archive under this name.
    #[error("archive {0} is already committed")]
    AlreadyArchived(String),

    /// Another archive build is in progress on this node.
    #[error("archive job already running")]
    AlreadyRunning,

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] messagelog_store::StoreError),

    /// Core primitive failed.
    #[error("core error: {0}")]
    Core(#[from] messagelog_core::CoreError),

    /// Zip encoding failed.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// File system error while writing the archive.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker writing the archive failed.
    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Why an archive failed verification.
///
/// The three tamper and continuity variants are kept distinct so an
/// auditor can tell tampering from reordering from deletion.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The linking info names a digest algorithm this verifier cannot compute.
    #[error("unsupported digest algorithm: {0}")]
    DigestAlgorithmUnsupported(String),

    /// Linking info missing or malformed, or entries do not match the
    /// physical contents.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The archive does not chain onto the supplied previous archive.
    #[error("chain continuity violation: supplied {supplied}, archive declares {declared}")]
    ChainContinuityViolation { supplied: String, declared: String },

    /// An entry's bytes do not hash to its declared digest.
    #[error("entry digest mismatch for {entry}: declared {declared}, computed {computed}")]
    EntryDigestMismatch {
        entry: String,
        declared: String,
        computed: String,
    },

    /// The archive file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encrypted archive could not be decrypted.
    #[error("decryption failed: {0}")]
    Decryption(String),
}

impl VerifyError {
    /// Stable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DigestAlgorithmUnsupported(_) => "DigestAlgorithmUnsupported",
            Self::MalformedArchive(_) => "MalformedArchive",
            Self::ChainContinuityViolation { .. } => "ChainContinuityViolation",
            Self::EntryDigestMismatch { .. } => "EntryDigestMismatch",
            Self::Io(_) => "IOError",
            Self::Decryption(_) => "DecryptionError",
        }
    }

    /// Process exit code used by the verifier CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::MalformedArchive(_) => 2,
            Self::ChainContinuityViolation { .. } => 3,
            Self::EntryDigestMismatch { .. } => 4,
            Self::DigestAlgorithmUnsupported(_) => 5,
            Self::Decryption(_) => 6,
        }
    }
}

impl From<messagelog_core::CoreError> for VerifyError {
    fn from(e: messagelog_core::CoreError) -> Self {
        match e {
            messagelog_core::CoreError::DigestAlgorithmUnsupported(id) => {
                Self::DigestAlgorithmUnsupported(id)
            }
            messagelog_core::CoreError::MalformedLinkingInfo(msg) => {
                Self::MalformedArchive(format!("linking info: {}", msg))
            }
        }
    }
}

/// A verification failure in a sequence of archives.
#[derive(Debug, Error)]
#[error("{}: {}", .path.display(), .error)]
pub struct ChainVerifyError {
    /// The archive that failed.
    pub path: PathBuf,
    #[source]
    pub error: VerifyError,
}

/// Result type for verification.
pub type VerifyResult<T> = std::result::Result<T, VerifyError>;
