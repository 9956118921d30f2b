//! RFC 3161 TSA client over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::error::{Result, TimestampError};
use crate::rfc3161;
use crate::tsa::{TimestampAuthority, TimestampRequest, TimestampResponse};

const QUERY_CONTENT_TYPE: &str = "application/timestamp-query";
const REPLY_CONTENT_TYPE: &str = "application/timestamp-reply";

/// A TSA reached by POSTing DER requests to a URL.
pub struct HttpTsa {
    url: String,
    client: reqwest::Client,
}

impl HttpTsa {
    /// Create a client for `url`; every request is bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TimestampError::TsaUnavailable {
                tsa: url.clone(),
                reason: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self { url, client })
    }

    fn unavailable(&self, reason: impl Into<String>) -> TimestampError {
        TimestampError::TsaUnavailable {
            tsa: self.url.clone(),
            reason: reason.into(),
        }
    }

    fn violation(&self, reason: impl Into<String>) -> TimestampError {
        TimestampError::ProtocolViolation {
            tsa: self.url.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TimestampAuthority for HttpTsa {
    fn name(&self) -> &str {
        &self.url
    }

    async fn timestamp(&self, request: &TimestampRequest) -> Result<TimestampResponse> {
        let body = rfc3161::encode_request(request.algorithm, &request.imprint, request.nonce);

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, QUERY_CONTENT_TYPE)
            .header(ACCEPT, REPLY_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.unavailable(format!("HTTP status {}", status)));
        }

        let der = response
            .bytes()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;
        debug!(tsa = %self.url, bytes = der.len(), "timestamp reply received");

        let reply = rfc3161::parse_response(&der).map_err(|e| self.violation(e.to_string()))?;
        if !reply.is_granted() {
            return Err(self.unavailable(format!("request rejected with PKI status {}", reply.status)));
        }

        let token = reply
            .token
            .ok_or_else(|| self.violation("granted reply carries no token"))?;
        let info = rfc3161::parse_tst_info(&token).map_err(|e| self.violation(e.to_string()))?;

        Ok(TimestampResponse {
            token: Bytes::from(token),
            algorithm: info.algorithm,
            imprint: info.imprint,
            nonce: info.nonce,
        })
    }
}
