//! # Message Log Timestamping
//!
//! Obtains trusted timestamps for batches of logged records.
//!
//! ## Overview
//!
//! The [`TimestampBatcher`] collects pending records, computes one batch
//! digest over their message digests, and asks a Time-Stamping Authority for
//! a token over it. A batch is confirmed as a whole or stays pending as a
//! whole; failures feed an exponential [`Backoff`].
//!
//! ## Key Types
//!
//! - [`TimestampAuthority`] - Trait for TSAs
//! - [`HttpTsa`] - RFC 3161 client over HTTP
//! - [`MemoryTsa`](tsa::memory::MemoryTsa) - Scriptable TSA for tests
//! - [`GlobalConf`] - Source of trusted TSAs and the digest algorithm
//! - [`Signer`] - Optional batch digest signing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use messagelog_core::DigestAlgorithm;
//! use messagelog_store::MemoryStore;
//! use messagelog_timestamp::{StaticGlobalConf, TimestampAuthority, TimestampBatcher, TimestampConfig};
//! use messagelog_timestamp::tsa::memory::MemoryTsa;
//!
//! async fn example() {
//!     let store = Arc::new(MemoryStore::new());
//!     let tsa: Arc<dyn TimestampAuthority> = Arc::new(MemoryTsa::new("tsa"));
//!     let conf = Arc::new(StaticGlobalConf::new(vec![tsa], DigestAlgorithm::Sha256));
//!     let batcher = TimestampBatcher::new(store, conf, TimestampConfig::default());
//!     let outcome = batcher.run_once().await.unwrap();
//!     println!("{:?}", outcome);
//! }
//! ```

pub mod backoff;
pub mod batcher;
pub mod error;
pub mod globalconf;
pub mod http;
pub mod rfc3161;
pub mod signer;
pub mod tsa;

pub use backoff::{compute_delay, Backoff, BackoffConfig};
pub use batcher::{BatchOutcome, TimestampBatcher, TimestampConfig};
pub use error::{Result, TimestampError};
pub use globalconf::{GlobalConf, StaticGlobalConf};
pub use http::HttpTsa;
pub use signer::{verify_batch_signature, LocalSigner, Signer};
pub use tsa::{TimestampAuthority, TimestampRequest, TimestampResponse};
