//! # Message Log Archive
//!
//! Evidence containers, hash-chained archive files and the offline verifier.
//!
//! ## Overview
//!
//! Confirmed records are packed into per-message evidence containers, and
//! containers are grouped into archive files. Each archive carries a
//! `linkinginfo` entry naming the previous archive's final chain digest, so
//! deleting, inserting or reordering whole archive files breaks the chain
//! just like tampering with a single container does.
//!
//! ## Key Types
//!
//! - [`ArchiveBuilder`] - Builds, writes and commits archives
//! - [`ArchiveEncryptor`] - Encrypts archive files at rest (X25519 + ChaCha20-Poly1305)
//! - [`verify`] / [`verify_chain`] - Offline verification
//! - [`VerifyError`] - The tamper and continuity taxonomy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use messagelog_archive::{verify, PreviousDigest};
//!
//! let first = verify(Path::new("mlog-1-10-0123456789abcdef.zip"), &PreviousDigest::First).unwrap();
//! let next = verify(
//!     Path::new("mlog-11-20-fedcba9876543210.zip"),
//!     &PreviousDigest::Digest(first),
//! )
//! .unwrap();
//! println!("{}", next);
//! ```
//!
//! ## Design Notes
//!
//! - **Write, then commit**: the chain state only advances after the file is
//!   durably on disk; files the store never committed are discarded
//! - **Deterministic**: the same records and chain state give the same bytes
//! - **Single archiver**: one build at a time per node; a cluster sharing one
//!   chain needs an external leader lock

pub mod builder;
pub mod container;
pub mod encrypt;
pub mod error;
pub mod verifier;
pub mod zipfile;

pub use builder::{
    archive_name, assemble_archive, ArchiveBuilder, ArchiveConfig, ArchiveOutcome,
    AssembledArchive, BuiltArchive, EncryptionPolicy,
};
pub use container::{build_container, EvidenceContainer};
pub use encrypt::{
    decrypt, is_encrypted, load_public_key, load_secret_key, ArchiveEncryptor, X25519PublicKey,
    X25519SecretKey,
};
pub use error::{ArchiveError, ChainVerifyError, Result, VerifyError, VerifyResult};
pub use verifier::{
    logical_archive_name, verify, verify_bytes, verify_chain, verify_detailed, verify_with_key,
    PreviousDigest, VerifiedArchive,
};
