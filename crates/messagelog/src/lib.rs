//! # Message Log
//!
//! The secure message log of a Security Server: durable proof of every
//! exchange, trusted timestamps for batches of proofs, and hash-chained
//! archive files that an auditor can verify offline.
//!
//! ## Overview
//!
//! - **Logging**: the proxy hands every completed exchange to
//!   [`MessageLog::log_exchange`] and gets back a durable sequence id
//! - **Timestamping**: pending records are batched and one TSA token is
//!   obtained per batch; a batch is confirmed completely or not at all
//! - **Archiving**: confirmed records are packed into evidence containers
//!   and chained into archive files
//! - **Verification**: [`archive::verify`] replays the chain of an archive
//!   file without access to the database
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use messagelog::{spawn_jobs, MessageLog, MessageLogConfig};
//! use messagelog::core::RecordInput;
//!
//! async fn example() {
//!     let config = MessageLogConfig::load("/etc/messagelog/messagelog.toml").unwrap();
//!     let log = Arc::new(MessageLog::open(&config).unwrap());
//!     let jobs = spawn_jobs(log.clone(), config.job_intervals());
//!
//!     let id = log
//!         .log_exchange(RecordInput::new(b"request".to_vec(), b"response".to_vec(), vec![], vec![]))
//!         .await
//!         .unwrap();
//!     println!("logged as {}", id);
//!
//!     jobs.shutdown().await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `messagelog::core` - Digest engine, linking info, records
//! - `messagelog::store` - Record storage
//! - `messagelog::timestamp` - Batching and TSA clients
//! - `messagelog::archive` - Archive building and verification

pub mod config;
pub mod error;
pub mod jobs;
pub mod log;

// Re-export component crates
pub use messagelog_archive as archive;
pub use messagelog_core as core;
pub use messagelog_store as store;
pub use messagelog_timestamp as timestamp;

pub use config::{ArchiveSection, EncryptionSection, MessageLogConfig, TimestampSection};
pub use error::{ConfigError, MessageLogError, Result};
pub use jobs::{spawn_jobs, JobHandles, JobIntervals};
pub use log::{MessageLog, StatusCounts};

pub use messagelog_archive::{ArchiveOutcome, PreviousDigest, VerifyError};
pub use messagelog_core::{ChainState, DigestAlgorithm, RecordInput, SequenceId};
pub use messagelog_timestamp::BatchOutcome;
