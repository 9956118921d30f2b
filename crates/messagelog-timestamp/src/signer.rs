//! Signer collaborator.
//!
//! The message log never holds the Security Server's signing keys; it asks
//! a [`Signer`] for any signature it needs. [`LocalSigner`] is an Ed25519
//! implementation for single-node setups and tests.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};

use crate::error::{Result, TimestampError};

/// Produces signatures over batch digests.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `message`, returning the raw signature bytes.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Ed25519 signer holding its key in process.
pub struct LocalSigner {
    key: SigningKey,
}

impl LocalSigner {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a hex-encoded 32-byte seed (surrounding whitespace ignored).
    pub fn from_seed_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())
            .map_err(|e| TimestampError::Signer(format!("invalid key hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TimestampError::Signer("signing key seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(seed))
    }

    /// Public half of the key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Check a batch signature produced by a [`LocalSigner`].
pub fn verify_batch_signature(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    Signature::from_slice(signature)
        .map(|sig| key.verify(message, &sig).is_ok())
        .unwrap_or(false)
}
