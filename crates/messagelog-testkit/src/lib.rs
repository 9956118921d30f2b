//! # Message Log Testkit
//!
//! Testing utilities for the message log.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: chain digests every verifier must reproduce
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A memory store, in-memory TSA and archive directory
//! - **Tampering**: Rewrite archives to simulate tampering and reordering
//!
//! ## Golden Vectors
//!
//! ```rust
//! use messagelog_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, computed) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, computed);
//! }
//! ```
//!
//! ## Tampering
//!
//! ```rust,ignore
//! use messagelog_testkit::tamper::flip_byte;
//!
//! let tampered = flip_byte(&archive, "00000000000000000002.asice", 100)?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod tamper;
pub mod vectors;

pub use fixtures::{sample_exchange, TestFixture};
pub use vectors::{all_vectors, compute_vector, verify_all_vectors, ChainVector};
