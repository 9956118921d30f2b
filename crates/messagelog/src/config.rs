//! TOML configuration.
//!
//! ```toml
//! database = "/var/lib/messagelog/messagelog.db"
//! digest_algorithm = "SHA-256"
//!
//! [timestamp]
//! batch_size = 10000
//! interval_secs = 60
//! tsa_timeout_secs = 30
//! backoff_base_secs = 10
//! backoff_max_secs = 3600
//! tsa_urls = ["http://tsa.example.org/tsr"]
//! sign_batch_digest = false
//!
//! [archive]
//! directory = "/var/lib/messagelog/archive"
//! interval_secs = 300
//! max_records_per_archive = 1000
//! min_records = 1
//!
//! [archive.encryption]
//! recipient_key_file = "/etc/messagelog/archive.pub"
//! mandatory = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use messagelog_archive::{ArchiveConfig, EncryptionPolicy};
use messagelog_core::DigestAlgorithm;
use messagelog_timestamp::{BackoffConfig, TimestampConfig};

use crate::error::ConfigError;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageLogConfig {
    /// SQLite database path.
    pub database: PathBuf,
    /// Algorithm for message digests, batch digests and the archive chain.
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
    #[serde(default)]
    pub timestamp: TimestampSection,
    pub archive: ArchiveSection,
}

/// `[timestamp]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimestampSection {
    pub batch_size: usize,
    pub interval_secs: u64,
    pub tsa_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// RFC 3161 endpoints, tried in order.
    pub tsa_urls: Vec<String>,
    pub sign_batch_digest: bool,
    /// Hex Ed25519 seed used when `sign_batch_digest` is set.
    pub signer_key_file: Option<PathBuf>,
}

impl Default for TimestampSection {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            interval_secs: 60,
            tsa_timeout_secs: 30,
            backoff_base_secs: 10,
            backoff_max_secs: 3600,
            tsa_urls: Vec::new(),
            sign_batch_digest: false,
            signer_key_file: None,
        }
    }
}

/// `[archive]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveSection {
    pub directory: PathBuf,
    #[serde(default = "default_archive_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_records")]
    pub max_records_per_archive: usize,
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    pub encryption: Option<EncryptionSection>,
}

/// `[archive.encryption]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionSection {
    /// Hex X25519 public key of the archive recipient.
    pub recipient_key_file: PathBuf,
    #[serde(default = "default_true")]
    pub mandatory: bool,
}

fn default_archive_interval() -> u64 {
    300
}

fn default_max_records() -> usize {
    1000
}

fn default_min_records() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl MessageLogConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = text.parse()?;

        // Report an unknown algorithm as such, not as a generic parse error.
        if let Some(toml::Value::String(id)) = table.get("digest_algorithm") {
            id.parse::<DigestAlgorithm>()
                .map_err(|_| ConfigError::DigestAlgorithmUnsupported(id.clone()))?;
        }

        let config: Self = toml::Value::Table(table).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse individually but conflict.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ts = &self.timestamp;
        if ts.batch_size == 0 {
            return Err(ConfigError::Invalid("timestamp.batch_size must be positive".into()));
        }
        if ts.interval_secs == 0 || self.archive.interval_secs == 0 {
            return Err(ConfigError::Invalid("job intervals must be positive".into()));
        }
        if ts.backoff_base_secs > ts.backoff_max_secs {
            return Err(ConfigError::Invalid(
                "timestamp.backoff_base_secs exceeds backoff_max_secs".into(),
            ));
        }
        if ts.sign_batch_digest && ts.signer_key_file.is_none() {
            return Err(ConfigError::Invalid(
                "timestamp.sign_batch_digest requires signer_key_file".into(),
            ));
        }
        let archive = &self.archive;
        if archive.max_records_per_archive == 0 {
            return Err(ConfigError::Invalid(
                "archive.max_records_per_archive must be positive".into(),
            ));
        }
        if archive.min_records > archive.max_records_per_archive {
            return Err(ConfigError::Invalid(
                "archive.min_records exceeds max_records_per_archive".into(),
            ));
        }
        Ok(())
    }

    pub fn timestamp_config(&self) -> TimestampConfig {
        let ts = &self.timestamp;
        TimestampConfig {
            batch_size: ts.batch_size,
            tsa_timeout: Duration::from_secs(ts.tsa_timeout_secs),
            backoff: BackoffConfig {
                base_delay: Duration::from_secs(ts.backoff_base_secs),
                max_delay: Duration::from_secs(ts.backoff_max_secs),
            },
            sign_batch_digest: ts.sign_batch_digest,
        }
    }

    pub fn archive_config(&self) -> ArchiveConfig {
        let archive = &self.archive;
        ArchiveConfig {
            directory: archive.directory.clone(),
            max_records_per_archive: archive.max_records_per_archive,
            min_records: archive.min_records,
            digest_algorithm: self.digest_algorithm,
            encryption: archive.encryption.as_ref().map(|e| EncryptionPolicy {
                recipient_key_file: e.recipient_key_file.clone(),
                mandatory: e.mandatory,
            }),
        }
    }

    /// How often the scheduled jobs run.
    pub fn job_intervals(&self) -> crate::jobs::JobIntervals {
        crate::jobs::JobIntervals {
            timestamp: Duration::from_secs(self.timestamp.interval_secs),
            archive: Duration::from_secs(self.archive.interval_secs),
        }
    }
}
