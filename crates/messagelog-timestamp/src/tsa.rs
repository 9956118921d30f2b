//! Time-Stamping Authority abstraction.
//!
//! The batcher only needs "give me a token over this imprint". Implementations
//! may speak RFC 3161 over HTTP or answer from memory in tests.

use async_trait::async_trait;
use bytes::Bytes;

use messagelog_core::DigestAlgorithm;

use crate::error::Result;

/// One timestamp request: the batch digest and the algorithm it was made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    pub algorithm: DigestAlgorithm,
    /// Raw batch digest bytes.
    pub imprint: Vec<u8>,
    pub nonce: u64,
}

/// What a TSA returned: the token and the imprint it actually covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampResponse {
    /// Encoded timestamp token, stored verbatim as evidence.
    pub token: Bytes,
    /// Algorithm of the imprint inside the token.
    pub algorithm: DigestAlgorithm,
    /// Imprint inside the token.
    pub imprint: Vec<u8>,
    /// Nonce inside the token, if any.
    pub nonce: Option<u64>,
}

impl TimestampResponse {
    /// Whether this token covers exactly `request`.
    pub fn covers(&self, request: &TimestampRequest) -> bool {
        self.algorithm == request.algorithm && self.imprint == request.imprint
    }

    /// Whether the token echoes the request nonce. A missing nonce does not.
    pub fn echoes_nonce(&self, request: &TimestampRequest) -> bool {
        self.nonce == Some(request.nonce)
    }
}

/// A trusted timestamping service.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Name used in logs and stored with the token.
    fn name(&self) -> &str;

    /// Request a token over `request.imprint`.
    ///
    /// Timeouts are applied by the caller.
    async fn timestamp(&self, request: &TimestampRequest) -> Result<TimestampResponse>;
}

/// A simple in-memory TSA for testing.
///
/// Can be switched between granting, refusing, stalling and answering with
/// a token over a different imprint.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::error::TimestampError;
    use crate::rfc3161;

    /// How the memory TSA answers.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MemoryTsaMode {
        /// Token over the requested imprint.
        Grant,
        /// Refuse every request.
        Unavailable,
        /// Sleep before answering (exercise caller timeouts).
        Stall(Duration),
        /// Token over this imprint regardless of the request.
        CoverOnly(Vec<u8>),
        /// Token over the requested imprint carrying a different nonce.
        WrongNonce,
    }

    /// In-memory TSA implementation.
    pub struct MemoryTsa {
        name: String,
        mode: Mutex<MemoryTsaMode>,
        calls: AtomicUsize,
    }

    impl MemoryTsa {
        /// A TSA that grants every request.
        pub fn new(name: impl Into<String>) -> Self {
            Self::with_mode(name, MemoryTsaMode::Grant)
        }

        /// A TSA that starts in `mode`.
        pub fn with_mode(name: impl Into<String>, mode: MemoryTsaMode) -> Self {
            Self {
                name: name.into(),
                mode: Mutex::new(mode),
                calls: AtomicUsize::new(0),
            }
        }

        /// Switch answering mode.
        pub fn set_mode(&self, mode: MemoryTsaMode) {
            if let Ok(mut current) = self.mode.lock() {
                *current = mode;
            }
        }

        /// Number of requests received so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Token this TSA issues for an imprint: an unsigned RFC 3161 token.
        pub fn token_for(&self, algorithm: DigestAlgorithm, imprint: &[u8], nonce: u64) -> Bytes {
            Bytes::from(rfc3161::encode_token(
                algorithm,
                imprint,
                self.calls() as u64,
                Some(nonce),
                "20240101000000Z",
            ))
        }

        fn current_mode(&self) -> MemoryTsaMode {
            self.mode
                .lock()
                .map(|m| m.clone())
                .unwrap_or(MemoryTsaMode::Unavailable)
        }
    }

    #[async_trait]
    impl TimestampAuthority for MemoryTsa {
        fn name(&self) -> &str {
            &self.name
        }

        async fn timestamp(&self, request: &TimestampRequest) -> Result<TimestampResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let mut nonce = request.nonce;
            let imprint = match self.current_mode() {
                MemoryTsaMode::Grant => request.imprint.clone(),
                MemoryTsaMode::Unavailable => {
                    return Err(TimestampError::TsaUnavailable {
                        tsa: self.name.clone(),
                        reason: "request refused".into(),
                    })
                }
                MemoryTsaMode::Stall(delay) => {
                    tokio::time::sleep(delay).await;
                    request.imprint.clone()
                }
                MemoryTsaMode::CoverOnly(imprint) => imprint,
                MemoryTsaMode::WrongNonce => {
                    nonce = request.nonce.wrapping_add(1);
                    request.imprint.clone()
                }
            };

            // Read the answer back out of the token, as a network client would.
            let token = self.token_for(request.algorithm, &imprint, nonce);
            let info = rfc3161::parse_tst_info(&token).map_err(|e| {
                TimestampError::ProtocolViolation {
                    tsa: self.name.clone(),
                    reason: e.to_string(),
                }
            })?;

            Ok(TimestampResponse {
                token,
                algorithm: info.algorithm,
                imprint: info.imprint,
                nonce: info.nonce,
            })
        }
    }
}
