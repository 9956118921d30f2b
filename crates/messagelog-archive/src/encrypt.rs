//! Archive encryption at rest.
//!
//! Format:
//!
//! ```text
//! "MLOGENC1" || ephemeral X25519 public key (32) || nonce (12) || ciphertext
//! ```
//!
//! The ChaCha20-Poly1305 key is derived with BLAKE3 `derive_key` from the
//! X25519 shared secret and both public keys.

use std::fmt;
use std::path::Path;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{ArchiveError, Result};

/// Leading bytes of every encrypted archive.
pub const MAGIC: &[u8; 8] = b"MLOGENC1";

const KDF_CONTEXT: &str = "messagelog archive encryption v1";
const HEADER_LEN: usize = 8 + 32 + 12;

/// Whether `bytes` look like an encrypted archive.
pub fn is_encrypted(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// An X25519 public key (32 bytes) of an archive recipient.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex (surrounding whitespace ignored).
    pub fn from_hex(text: &str) -> Result<Self> {
        parse_key_hex(text).map(Self)
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &self.to_hex()[..16])
    }
}

/// An X25519 static secret held by an auditor.
pub struct X25519SecretKey(StaticSecret);

impl X25519SecretKey {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Parse from hex (surrounding whitespace ignored).
    pub fn from_hex(text: &str) -> Result<Self> {
        parse_key_hex(text).map(Self::from_bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(*PublicKey::from(&self.0).as_bytes())
    }
}

fn parse_key_hex(text: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(text.trim())
        .map_err(|e| ArchiveError::EncryptionKeyMissing(format!("invalid key hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| ArchiveError::EncryptionKeyMissing("key must be 32 bytes".into()))
}

/// Load a hex public key from a file.
///
/// A missing or unreadable file is `EncryptionKeyMissing`.
pub fn load_public_key(path: &Path) -> Result<X25519PublicKey> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ArchiveError::EncryptionKeyMissing(format!("{}: {}", path.display(), e))
    })?;
    X25519PublicKey::from_hex(&text)
}

/// Load a hex secret key from a file.
pub fn load_secret_key(path: &Path) -> Result<X25519SecretKey> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ArchiveError::EncryptionKeyMissing(format!("{}: {}", path.display(), e))
    })?;
    X25519SecretKey::from_hex(&text)
}

fn derive_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    *hasher.finalize().as_bytes()
}

/// Encrypts finished archives for one recipient.
#[derive(Debug, Clone)]
pub struct ArchiveEncryptor {
    recipient: X25519PublicKey,
}

impl ArchiveEncryptor {
    pub fn new(recipient: X25519PublicKey) -> Self {
        Self { recipient }
    }

    pub fn recipient(&self) -> &X25519PublicKey {
        &self.recipient
    }

    /// Encrypt archive bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.recipient.to_dalek());
        if !shared.was_contributory() {
            return Err(ArchiveError::EncryptionKeyMissing(
                "recipient key is a low-order point".into(),
            ));
        }

        let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes(), self.recipient.as_bytes());
        let mut nonce = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| ArchiveError::EncryptionKeyMissing(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| ArchiveError::EncryptionKeyMissing(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Decrypt an encrypted archive with the recipient's secret key.
pub fn decrypt(data: &[u8], secret: &X25519SecretKey) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN || !is_encrypted(data) {
        return Err(ArchiveError::Decryption("not an encrypted archive".into()));
    }

    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&data[8..40]);
    let nonce = &data[40..HEADER_LEN];

    let shared = secret.0.diffie_hellman(&PublicKey::from(ephemeral));
    let key = derive_key(shared.as_bytes(), &ephemeral, secret.public_key().as_bytes());

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ArchiveError::Decryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), &data[HEADER_LEN..])
        .map_err(|_| ArchiveError::Decryption("authentication failed (wrong key or corrupted data)".into()))
}
