//! # Message Log Core
//!
//! Pure primitives for the secure message log: the digest engine, the
//! archive hash chain, and the record data model.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation, so every component (store, builder, offline verifier)
//! shares the exact same chain arithmetic.
//!
//! ## Key Types
//!
//! - [`DigestEngine`] - Stateless hashing and chain-digest computation
//! - [`DigestAlgorithm`] - SHA-256, SHA-384 or SHA-512
//! - [`LinkingInfo`] - Chain metadata carried inside every archive file
//! - [`LogRecord`] - One logged message exchange
//! - [`ChainState`] - Pointer to the last produced archive
//!
//! ## Chaining
//!
//! ```rust
//! use messagelog_core::{DigestAlgorithm, DigestEngine};
//!
//! let engine = DigestEngine::new(DigestAlgorithm::Sha256);
//! let first = engine.chain_digest(b"hello", "");
//! assert_eq!(
//!     first,
//!     "d7914fe546b684688bb95f4f888a92dfc680603a75f23eb823658031fff766d9"
//! );
//! ```

pub mod canonical;
pub mod digest;
pub mod error;
pub mod linking;
pub mod record;

pub use canonical::{batch_digest_input, canonical_message_bytes};
pub use digest::{is_hex_digest, DigestAlgorithm, DigestEngine};
pub use error::{CoreError, Result};
pub use linking::{LinkingChain, LinkingEntry, LinkingInfo, LINKING_INFO_NAME, NO_VALUE};
pub use record::{
    compute_batch_digest, ChainState, LogRecord, RecordInput, SequenceId, TimestampBatch,
    TimestampEvidence, TimestampStatus, TimestampToken,
};
