//! Digest engine: hashing and hash-chain computation for archive linking.
//!
//! The chain step is defined over hex *text*, not raw digest bytes:
//!
//! ```text
//! chain_digest(entry, prev_hex) = hex(H(ascii(prev_hex) || ascii(hex(H(entry)))))
//! ```
//!
//! `prev_hex` is the empty string for the very first entry ever chained.
//! Independent verifiers reproduce this bit for bit, so the exact input
//! layout must never change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::CoreError;

/// A supported digest algorithm.
///
/// Parsed from the identifiers used in configuration and in the linking
/// info header: `SHA-256`, `SHA-384`, `SHA-512`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Every supported algorithm.
    pub const ALL: [Self; 3] = [Self::Sha256, Self::Sha384, Self::Sha512];

    /// The textual identifier written into linking info.
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Raw digest length in bytes.
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Length of the lowercase hex rendering.
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Hash a single byte string.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        self.hash_parts(&[data])
    }

    /// Hash the concatenation of several byte strings without copying them.
    pub fn hash_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha256 => hash_all::<Sha256>(parts),
            Self::Sha384 => hash_all::<Sha384>(parts),
            Self::Sha512 => hash_all::<Sha512>(parts),
        }
    }
}

fn hash_all<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

impl FromStr for DigestAlgorithm {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA-256" => Ok(Self::Sha256),
            "SHA-384" => Ok(Self::Sha384),
            "SHA-512" => Ok(Self::Sha512),
            other => Err(CoreError::DigestAlgorithmUnsupported(other.to_string())),
        }
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DigestAlgorithm> for String {
    fn from(algorithm: DigestAlgorithm) -> Self {
        algorithm.id().to_string()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Stateless digest engine bound to one algorithm.
///
/// Cheap to copy; holds no mutable state, so one engine can be shared
/// freely between the store, the builder, and the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestEngine {
    algorithm: DigestAlgorithm,
}

impl DigestEngine {
    /// Create an engine for the given algorithm.
    pub const fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// The algorithm this engine computes.
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest of `bytes`.
    pub fn digest(&self, bytes: &[u8]) -> String {
        hex::encode(self.algorithm.hash(bytes))
    }

    /// Chain `entry_bytes` onto `prev_hex`.
    ///
    /// Pass `""` as `prev_hex` for the first entry ever chained.
    pub fn chain_digest(&self, entry_bytes: &[u8], prev_hex: &str) -> String {
        self.chain_step(&self.digest(entry_bytes), prev_hex)
    }

    /// Chain an already computed entry digest onto `prev_hex`.
    pub fn chain_step(&self, entry_digest_hex: &str, prev_hex: &str) -> String {
        hex::encode(
            self.algorithm
                .hash_parts(&[prev_hex.as_bytes(), entry_digest_hex.as_bytes()]),
        )
    }
}

/// Check that `s` is a lowercase hex digest of a supported length.
pub fn is_hex_digest(s: &str) -> bool {
    DigestAlgorithm::ALL.iter().any(|a| a.hex_len() == s.len())
        && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_digest_known_value() {
        let engine = DigestEngine::new(DigestAlgorithm::Sha256);
        assert_eq!(engine.digest(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn test_chain_digest_first_entry_vector() {
        let engine = DigestEngine::new(DigestAlgorithm::Sha256);
        assert_eq!(
            engine.chain_digest(b"hello", ""),
            "d7914fe546b684688bb95f4f888a92dfc680603a75f23eb823658031fff766d9"
        );
    }

    #[test]
    fn test_chain_digest_hashes_previous_as_text() {
        let engine = DigestEngine::new(DigestAlgorithm::Sha256);
        let first = engine.chain_digest(b"hello", "");
        let second = engine.chain_digest(b"world", &first);
        assert_eq!(
            second,
            "d2551ae0a817630239cfaf21e6b5de8516caa1cc2ca36d42f62c8bc0293766dd"
        );

        // Hashing the raw previous bytes instead of the hex text must differ.
        let raw_prev = hex::decode(&first).unwrap();
        let wrong = hex::encode(DigestAlgorithm::Sha256.hash_parts(&[
            &raw_prev,
            engine.digest(b"world").as_bytes(),
        ]));
        assert_ne!(second, wrong);
    }

    #[test]
    fn test_chain_step_matches_chain_digest() {
        for algorithm in DigestAlgorithm::ALL {
            let engine = DigestEngine::new(algorithm);
            let entry = engine.digest(b"container");
            assert_eq!(
                engine.chain_step(&entry, "abc"),
                engine.chain_digest(b"container", "abc")
            );
        }
    }

    #[test]
    fn test_output_lengths() {
        for algorithm in DigestAlgorithm::ALL {
            let engine = DigestEngine::new(algorithm);
            assert_eq!(engine.digest(b"x").len(), algorithm.hex_len());
            assert_eq!(engine.chain_digest(b"x", "").len(), algorithm.hex_len());
        }
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        let err = "MD5".parse::<DigestAlgorithm>().unwrap_err();
        assert!(matches!(err, CoreError::DigestAlgorithmUnsupported(ref id) if id == "MD5"));

        // Identifiers are case sensitive.
        assert!("sha-256".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn test_serde_uses_identifier() {
        let json = serde_json::to_string(&DigestAlgorithm::Sha384).unwrap();
        assert_eq!(json, "\"SHA-384\"");

        let parsed: DigestAlgorithm = serde_json::from_str("\"SHA-512\"").unwrap();
        assert_eq!(parsed, DigestAlgorithm::Sha512);

        assert!(serde_json::from_str::<DigestAlgorithm>("\"MD5\"").is_err());
    }

    #[test]
    fn test_is_hex_digest() {
        assert!(is_hex_digest(HELLO_SHA256));
        assert!(!is_hex_digest(&HELLO_SHA256.to_uppercase()));
        assert!(!is_hex_digest("abc"));
        assert!(!is_hex_digest(""));
    }

    fn algorithm() -> impl Strategy<Value = DigestAlgorithm> {
        prop_oneof![
            Just(DigestAlgorithm::Sha256),
            Just(DigestAlgorithm::Sha384),
            Just(DigestAlgorithm::Sha512),
        ]
    }

    proptest! {
        #[test]
        fn chain_digest_is_deterministic(
            algorithm in algorithm(),
            entry in prop::collection::vec(any::<u8>(), 0..512),
            prev in "[0-9a-f]{0,128}",
        ) {
            let engine = DigestEngine::new(algorithm);
            let a = engine.chain_digest(&entry, &prev);
            let b = DigestEngine::new(algorithm).chain_digest(&entry, &prev);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), algorithm.hex_len());
        }
    }
}
