//! The timestamping job.
//!
//! Each run takes up to `batch_size` pending records, asks the configured
//! TSAs for one token over the batch digest, and confirms the whole batch
//! or nothing.
//!
//! # Run Flow
//!
//! ```text
//! run_once
//!   ├─ backoff active?         → Deferred, TSA not contacted
//!   ├─ no pending records      → Idle
//!   ├─ sign batch digest       (optional, via Signer)
//!   ├─ TSA 1, TSA 2, ...       first token covering the batch wins
//!   │    timeout / refusal     → next TSA
//!   │    foreign imprint       → ProtocolViolation, next TSA
//!   ├─ all failed              → records stay Pending, backoff grows
//!   └─ mark_confirmed(batch)   → Confirmed
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use messagelog_core::{TimestampBatch, TimestampToken};
use messagelog_store::Store;

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::{Result, TimestampError};
use crate::globalconf::GlobalConf;
use crate::signer::Signer;
use crate::tsa::TimestampRequest;

/// Timestamping job configuration.
#[derive(Debug, Clone)]
pub struct TimestampConfig {
    /// Maximum records per batch.
    pub batch_size: usize,
    /// Bound on each TSA call.
    pub tsa_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Ask the Signer for a signature over each batch digest.
    pub sign_batch_digest: bool,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            tsa_timeout: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            sign_batch_digest: false,
        }
    }
}

/// What a single run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing pending.
    Idle,
    /// Still backing off from earlier failures; retry after this long.
    Deferred(Duration),
    /// A batch was confirmed.
    Confirmed { batch_id: u64, records: usize },
}

/// Groups pending records and obtains timestamp tokens for them.
pub struct TimestampBatcher {
    store: Arc<dyn Store>,
    globalconf: Arc<dyn GlobalConf>,
    signer: Option<Arc<dyn Signer>>,
    config: TimestampConfig,
    /// Held for the duration of a run.
    backoff: tokio::sync::Mutex<Backoff>,
}

impl TimestampBatcher {
    pub fn new(
        store: Arc<dyn Store>,
        globalconf: Arc<dyn GlobalConf>,
        config: TimestampConfig,
    ) -> Self {
        Self {
            store,
            globalconf,
            signer: None,
            backoff: tokio::sync::Mutex::new(Backoff::new(config.backoff)),
            config,
        }
    }

    /// Attach the Signer used for batch signatures.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &TimestampConfig {
        &self.config
    }

    /// Run one timestamping round.
    ///
    /// Non-reentrant: a call made while another is in progress returns
    /// `AlreadyRunning` immediately. On TSA failure the error is returned
    /// after the backoff has been advanced; no record changes state.
    pub async fn run_once(&self) -> Result<BatchOutcome> {
        let mut backoff = self
            .backoff
            .try_lock()
            .map_err(|_| TimestampError::AlreadyRunning)?;

        let now = Instant::now();
        if !backoff.ready(now) {
            let remaining = backoff.remaining(now);
            debug!(remaining_ms = remaining.as_millis() as u64, "timestamping backing off");
            return Ok(BatchOutcome::Deferred(remaining));
        }

        let pending = self.store.list_pending(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(BatchOutcome::Idle);
        }

        let batch = TimestampBatch::from_records(&pending, self.globalconf.digest_algorithm());

        match self.obtain_token(&batch).await {
            Ok(token) => {
                let batch_id = self.store.mark_confirmed(&batch, &token).await?;
                backoff.record_success();
                info!(
                    batch_id,
                    records = batch.len(),
                    tsa = %token.tsa_name,
                    "batch timestamped"
                );
                Ok(BatchOutcome::Confirmed {
                    batch_id,
                    records: batch.len(),
                })
            }
            Err(e) => {
                if e.is_retryable() {
                    backoff.record_failure(Instant::now());
                }
                warn!(error = %e, records = batch.len(), "batch left pending");
                Err(e)
            }
        }
    }

    async fn obtain_token(&self, batch: &TimestampBatch) -> Result<TimestampToken> {
        let batch_signature = self.sign_batch(batch).await?;

        let tsas = self.globalconf.timestamp_authorities();
        if tsas.is_empty() {
            return Err(TimestampError::NoTsaConfigured);
        }

        let request = TimestampRequest {
            algorithm: batch.algorithm,
            imprint: batch.imprint(),
            nonce: rand::random(),
        };

        let mut last_error = TimestampError::NoTsaConfigured;
        for tsa in &tsas {
            let attempt = tokio::time::timeout(self.config.tsa_timeout, tsa.timestamp(&request));
            let error = match attempt.await {
                Ok(Ok(response)) if response.covers(&request) && response.echoes_nonce(&request) => {
                    return Ok(TimestampToken {
                        tsa_name: tsa.name().to_string(),
                        token: response.token,
                        batch_signature: batch_signature.map(Into::into),
                        confirmed_at: now_millis(),
                    });
                }
                Ok(Ok(response)) if response.covers(&request) => TimestampError::ProtocolViolation {
                    tsa: tsa.name().to_string(),
                    reason: match response.nonce {
                        Some(nonce) => format!(
                            "token nonce {} does not match request nonce {}",
                            nonce, request.nonce
                        ),
                        None => "token carries no nonce".to_string(),
                    },
                },
                Ok(Ok(response)) => TimestampError::ProtocolViolation {
                    tsa: tsa.name().to_string(),
                    reason: format!(
                        "token covers {} {} instead of batch digest {}",
                        response.algorithm,
                        hex::encode(&response.imprint),
                        batch.batch_digest
                    ),
                },
                Ok(Err(e)) => e,
                Err(_) => TimestampError::TsaUnavailable {
                    tsa: tsa.name().to_string(),
                    reason: format!("no answer within {:?}", self.config.tsa_timeout),
                },
            };

            warn!(tsa = tsa.name(), error = %error, "TSA attempt failed");
            last_error = error;
        }

        Err(last_error)
    }

    async fn sign_batch(&self, batch: &TimestampBatch) -> Result<Option<Vec<u8>>> {
        if !self.config.sign_batch_digest {
            return Ok(None);
        }
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| TimestampError::Signer("batch signing enabled without a signer".into()))?;
        signer.sign(batch.batch_digest.as_bytes()).await.map(Some)
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
