//! Canonical byte layouts that digests are computed over.
//!
//! Two layouts are defined here:
//!
//! - the canonical message: the request/response pair of one exchange,
//!   length-framed so that no two different splits produce the same bytes;
//! - the batch digest input: the ordered member digests of a timestamp batch.

/// Canonical bytes of one message exchange.
///
/// Layout: `u64 BE len(request) || request || u64 BE len(response) || response`.
pub fn canonical_message_bytes(request: &[u8], response: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + request.len() + response.len());
    buf.extend_from_slice(&(request.len() as u64).to_be_bytes());
    buf.extend_from_slice(request);
    buf.extend_from_slice(&(response.len() as u64).to_be_bytes());
    buf.extend_from_slice(response);
    buf
}

/// Input to the batch digest: the members' hex message digests as ASCII,
/// concatenated in ascending sequence order with no separator.
pub fn batch_digest_input<S: AsRef<str>>(member_digests: &[S]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(member_digests.iter().map(|d| d.as_ref().len()).sum());
    for digest in member_digests {
        buf.extend_from_slice(digest.as_ref().as_bytes());
    }
    buf
}
