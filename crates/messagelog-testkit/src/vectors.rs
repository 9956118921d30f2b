//! Golden chain vectors.
//!
//! Independent verifiers must reproduce these digests bit for bit. The
//! chain step hashes the previous digest as hex text, not as raw bytes.

use messagelog_core::{DigestAlgorithm, DigestEngine};

/// A golden chain vector.
#[derive(Debug, Clone)]
pub struct ChainVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub algorithm: DigestAlgorithm,
    /// Chain seed; empty for the first archive ever.
    pub previous: &'static str,
    /// Entry contents in write order.
    pub entries: &'static [&'static [u8]],
    /// Expected final chain digest (hex).
    pub expected: &'static str,
}

pub const SHA256_HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
pub const SHA256_HELLO_CHAIN: &str =
    "d7914fe546b684688bb95f4f888a92dfc680603a75f23eb823658031fff766d9";
pub const SHA256_HELLO_WORLD_CHAIN: &str =
    "d2551ae0a817630239cfaf21e6b5de8516caa1cc2ca36d42f62c8bc0293766dd";

/// Get all golden vectors.
pub fn all_vectors() -> Vec<ChainVector> {
    vec![
        ChainVector {
            name: "SHA-256 first archive, single entry hello",
            algorithm: DigestAlgorithm::Sha256,
            previous: "",
            entries: &[b"hello"],
            expected: SHA256_HELLO_CHAIN,
        },
        ChainVector {
            name: "SHA-256 first archive, hello then world",
            algorithm: DigestAlgorithm::Sha256,
            previous: "",
            entries: &[b"hello", b"world"],
            expected: SHA256_HELLO_WORLD_CHAIN,
        },
        ChainVector {
            name: "SHA-256 world chained onto the hello archive",
            algorithm: DigestAlgorithm::Sha256,
            previous: SHA256_HELLO_CHAIN,
            entries: &[b"world"],
            expected: SHA256_HELLO_WORLD_CHAIN,
        },
        ChainVector {
            name: "SHA-384 first archive, single entry hello",
            algorithm: DigestAlgorithm::Sha384,
            previous: "",
            entries: &[b"hello"],
            expected: "49ecbd2a1823a83c206835edf7f79ce5c0d897bebce9e871363e039d9f596d329a1c04f5ae2b89dd073a641815564fc7",
        },
        ChainVector {
            name: "SHA-512 first archive, single entry hello",
            algorithm: DigestAlgorithm::Sha512,
            previous: "",
            entries: &[b"hello"],
            expected: "66c6a0830f3e5e4460d3ff64a23705e600e5d369ad3bda4a77ae9c0328115b813c2f7e6354add00cbad31c758bb9a122e4a4d84d52741b113908e8d735a9ac79",
        },
    ]
}

/// Replay a vector's chain.
pub fn compute_vector(vector: &ChainVector) -> String {
    let engine = DigestEngine::new(vector.algorithm);
    vector
        .entries
        .iter()
        .fold(vector.previous.to_string(), |running, entry| {
            engine.chain_digest(entry, &running)
        })
}

/// Check every vector: `(name, matches, computed)`.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let computed = compute_vector(v);
            (v.name.to_string(), computed == v.expected, computed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, computed) in verify_all_vectors() {
            assert!(matches, "vector '{}' computed {}", name, computed);
        }
    }

    #[test]
    fn test_hello_digest() {
        let engine = DigestEngine::new(DigestAlgorithm::Sha256);
        assert_eq!(engine.digest(b"hello"), SHA256_HELLO);
    }

    #[test]
    fn test_seed_is_hex_text() {
        // Seeding with the raw digest bytes instead of their hex must differ.
        let engine = DigestEngine::new(DigestAlgorithm::Sha256);
        let raw = hex::decode(SHA256_HELLO_CHAIN).unwrap();
        let wrong = DigestAlgorithm::Sha256.hash_parts(&[raw.as_slice(), engine.digest(b"world").as_bytes()]);
        assert_ne!(hex::encode(wrong), SHA256_HELLO_WORLD_CHAIN);
    }
}
