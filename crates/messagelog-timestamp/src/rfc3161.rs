//! RFC 3161 time-stamp requests and responses.
//!
//! Requests and locally issued tokens are encoded here; replies are decoded
//! with `der-parser` (through `x509-parser`). Only the fields the batcher
//! checks are interpreted: the PKI status of a response, and the
//! `messageImprint` and `nonce` inside the returned `TSTInfo`. Token
//! signatures are kept as opaque evidence and verified by auditors with
//! standard CMS tooling.

use thiserror::Error;
use x509_parser::asn1_rs::{Any, FromDer, Tag};
use x509_parser::der_parser::ber::{BerObject, BerObjectContent};
use x509_parser::der_parser::der::parse_der;

use messagelog_core::DigestAlgorithm;

/// A DER structure did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed DER: {0}")]
pub struct DerError(pub String);

type DerResult<T> = std::result::Result<T, DerError>;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_GENERALIZED_TIME: u8 = 0x18;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_CONTEXT_0: u8 = 0xA0;

// 2.16.840.1.101.3.4.2.{1,2,3}
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
const OID_SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];
// 1.2.840.113549.1.7.2
const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
// 1.2.840.113549.1.9.16.1.4
const OID_TST_INFO: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x01, 0x04];
// 1.2.3.4.1, used by locally issued tokens
const OID_LOCAL_POLICY: &[u8] = &[0x2A, 0x03, 0x04, 0x01];

/// PKI status values that mean the token was issued.
pub const STATUS_GRANTED: u64 = 0;
pub const STATUS_GRANTED_WITH_MODS: u64 = 1;
/// Request refused by the TSA.
pub const STATUS_REJECTION: u64 = 2;

/// DER content of the OID for a digest algorithm.
pub fn algorithm_oid(algorithm: DigestAlgorithm) -> &'static [u8] {
    match algorithm {
        DigestAlgorithm::Sha256 => OID_SHA256,
        DigestAlgorithm::Sha384 => OID_SHA384,
        DigestAlgorithm::Sha512 => OID_SHA512,
    }
}

fn algorithm_from_oid(oid: &[u8]) -> Option<DigestAlgorithm> {
    DigestAlgorithm::ALL
        .iter()
        .copied()
        .find(|a| algorithm_oid(*a) == oid)
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        let len = (content.len() as u64).to_be_bytes();
        let start = len.iter().position(|b| *b != 0).unwrap_or(len.len() - 1);
        out.push(0x80 | (len.len() - start) as u8);
        out.extend_from_slice(&len[start..]);
    }
    out.extend_from_slice(content);
    out
}

fn integer(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut content = Vec::with_capacity(9);
    if bytes[start] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[start..]);
    tlv(TAG_INTEGER, &content)
}

fn algorithm_identifier(algorithm: DigestAlgorithm) -> Vec<u8> {
    tlv(
        TAG_SEQUENCE,
        &[tlv(TAG_OID, algorithm_oid(algorithm)), tlv(TAG_NULL, &[])].concat(),
    )
}

fn message_imprint(algorithm: DigestAlgorithm, imprint: &[u8]) -> Vec<u8> {
    tlv(
        TAG_SEQUENCE,
        &[algorithm_identifier(algorithm), tlv(TAG_OCTET_STRING, imprint)].concat(),
    )
}

/// Encode a `TimeStampReq` (version 1, nonce, `certReq = TRUE`).
pub fn encode_request(algorithm: DigestAlgorithm, imprint: &[u8], nonce: u64) -> Vec<u8> {
    tlv(
        TAG_SEQUENCE,
        &[
            integer(1),
            message_imprint(algorithm, imprint),
            integer(nonce),
            tlv(TAG_BOOLEAN, &[0xFF]),
        ]
        .concat(),
    )
}

/// Encode an unsigned timestamp token (`ContentInfo` wrapping `SignedData`
/// with an empty signer set) over `imprint`.
///
/// Used by local and test TSAs; real TSAs return signed tokens.
pub fn encode_token(
    algorithm: DigestAlgorithm,
    imprint: &[u8],
    serial: u64,
    nonce: Option<u64>,
    gen_time: &str,
) -> Vec<u8> {
    let mut fields = vec![
        integer(1),
        tlv(TAG_OID, OID_LOCAL_POLICY),
        message_imprint(algorithm, imprint),
        integer(serial),
        tlv(TAG_GENERALIZED_TIME, gen_time.as_bytes()),
    ];
    if let Some(nonce) = nonce {
        fields.push(integer(nonce));
    }
    let tst_info = tlv(TAG_SEQUENCE, &fields.concat());
    let encap = tlv(
        TAG_SEQUENCE,
        &[
            tlv(TAG_OID, OID_TST_INFO),
            tlv(TAG_CONTEXT_0, &tlv(TAG_OCTET_STRING, &tst_info)),
        ]
        .concat(),
    );
    let signed_data = tlv(
        TAG_SEQUENCE,
        &[
            integer(3),
            tlv(TAG_SET, &algorithm_identifier(algorithm)),
            encap,
            tlv(TAG_SET, &[]),
        ]
        .concat(),
    );
    tlv(
        TAG_SEQUENCE,
        &[tlv(TAG_OID, OID_SIGNED_DATA), tlv(TAG_CONTEXT_0, &signed_data)].concat(),
    )
}

/// Encode a `TimeStampResp` with the given status and optional token.
pub fn encode_response(status: u64, token: Option<&[u8]>) -> Vec<u8> {
    let mut body = tlv(TAG_SEQUENCE, &integer(status));
    if let Some(token) = token {
        body.extend_from_slice(token);
    }
    tlv(TAG_SEQUENCE, &body)
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

fn malformed(msg: impl Into<String>) -> DerError {
    DerError(msg.into())
}

/// Parse exactly one DER element spanning all of `der`.
fn parse_whole<'a>(der: &'a [u8], what: &str) -> DerResult<BerObject<'a>> {
    let (rest, object) = parse_der(der).map_err(|e| malformed(format!("{}: {}", what, e)))?;
    if !rest.is_empty() {
        return Err(malformed(format!("trailing bytes after {}", what)));
    }
    Ok(object)
}

fn sequence<'a, 'b>(object: &'b BerObject<'a>, what: &str) -> DerResult<&'b [BerObject<'a>]> {
    object
        .as_sequence()
        .map(Vec::as_slice)
        .map_err(|_| malformed(format!("{} is not a SEQUENCE", what)))
}

fn field<'a, 'b>(
    fields: &'b [BerObject<'a>],
    index: usize,
    what: &str,
) -> DerResult<&'b BerObject<'a>> {
    fields
        .get(index)
        .ok_or_else(|| malformed(format!("{} is missing", what)))
}

fn oid<'b>(object: &'b BerObject<'_>, what: &str) -> DerResult<&'b [u8]> {
    object
        .as_oid()
        .map(|oid| oid.as_bytes())
        .map_err(|_| malformed(format!("{} is not an OBJECT IDENTIFIER", what)))
}

fn octets<'b>(object: &'b BerObject<'_>, what: &str) -> DerResult<&'b [u8]> {
    match object.content {
        BerObjectContent::OctetString(bytes) => Ok(bytes),
        _ => Err(malformed(format!("{} is not an OCTET STRING", what))),
    }
}

fn unsigned(object: &BerObject<'_>, what: &str) -> DerResult<u64> {
    object
        .as_u64()
        .map_err(|_| malformed(format!("{} is not a 64-bit unsigned INTEGER", what)))
}

/// Content of an `[0] EXPLICIT` wrapper.
fn explicit_0<'b>(object: &'b BerObject<'_>, what: &str) -> DerResult<&'b [u8]> {
    if !object.header.is_contextspecific() || object.header.tag().0 != 0 {
        return Err(malformed(format!("{} is not tagged [0]", what)));
    }
    object
        .as_slice()
        .map_err(|_| malformed(format!("{} has no content", what)))
}

/// Decoded `TimeStampResp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeStampReply {
    pub status: u64,
    /// Whole `ContentInfo` encoding, when present.
    pub token: Option<Vec<u8>>,
}

impl TimeStampReply {
    /// Whether the PKI status says a token was issued.
    pub fn is_granted(&self) -> bool {
        matches!(self.status, STATUS_GRANTED | STATUS_GRANTED_WITH_MODS)
    }
}

/// Parse a `TimeStampResp`.
pub fn parse_response(der: &[u8]) -> DerResult<TimeStampReply> {
    let (rest, outer) =
        <Any as FromDer>::from_der(der).map_err(|e| malformed(format!("response: {}", e)))?;
    if !rest.is_empty() {
        return Err(malformed("trailing bytes after response"));
    }
    if outer.header.tag() != Tag::Sequence {
        return Err(malformed("response is not a SEQUENCE"));
    }

    // The token is kept byte for byte, so the content is split by hand
    // after the status element.
    let (token_der, status_info) = parse_der(outer.as_bytes())
        .map_err(|e| malformed(format!("PKIStatusInfo: {}", e)))?;
    let status = unsigned(
        field(sequence(&status_info, "PKIStatusInfo")?, 0, "PKI status")?,
        "PKI status",
    )?;

    let token = if token_der.is_empty() {
        None
    } else {
        let content_info = parse_whole(token_der, "token")?;
        sequence(&content_info, "token ContentInfo")?;
        Some(token_der.to_vec())
    };

    Ok(TimeStampReply { status, token })
}

/// The `TSTInfo` fields checked against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    pub algorithm: DigestAlgorithm,
    /// `messageImprint.hashedMessage`.
    pub imprint: Vec<u8>,
    /// Echo of the request nonce, if the TSA included one.
    pub nonce: Option<u64>,
}

/// Decode the `TSTInfo` carried by a token.
pub fn parse_tst_info(token: &[u8]) -> DerResult<TstInfo> {
    let content_info = parse_whole(token, "token")?;
    let content_info = sequence(&content_info, "ContentInfo")?;
    if oid(field(content_info, 0, "content type")?, "content type")? != OID_SIGNED_DATA {
        return Err(malformed("token content type is not signedData"));
    }

    let signed_data = explicit_0(field(content_info, 1, "content")?, "content")?;
    let signed_data = parse_whole(signed_data, "SignedData")?;
    let signed_data = sequence(&signed_data, "SignedData")?;

    let encap = sequence(
        field(signed_data, 2, "encapContentInfo")?,
        "encapContentInfo",
    )?;
    if oid(field(encap, 0, "eContentType")?, "eContentType")? != OID_TST_INFO {
        return Err(malformed("encapsulated content is not TSTInfo"));
    }
    let econtent = explicit_0(field(encap, 1, "eContent")?, "eContent")?;
    let econtent = parse_whole(econtent, "eContent")?;

    let tst_info = parse_whole(octets(&econtent, "eContent")?, "TSTInfo")?;
    let tst_info = sequence(&tst_info, "TSTInfo")?;

    let imprint = sequence(field(tst_info, 2, "messageImprint")?, "messageImprint")?;
    let hash_algorithm = sequence(field(imprint, 0, "hashAlgorithm")?, "hashAlgorithm")?;
    let algorithm_id = oid(field(hash_algorithm, 0, "hash OID")?, "hash OID")?;
    let algorithm = algorithm_from_oid(algorithm_id).ok_or_else(|| {
        malformed(format!(
            "unsupported hash algorithm OID {}",
            hex::encode(algorithm_id)
        ))
    })?;
    let hashed = octets(field(imprint, 1, "hashedMessage")?, "hashedMessage")?;
    if hashed.len() != algorithm.output_len() {
        return Err(malformed("imprint length does not match its algorithm"));
    }

    // version, policy, messageImprint, serialNumber and genTime come first;
    // the only INTEGER among the optional fields after them is the nonce.
    let nonce = tst_info
        .iter()
        .skip(5)
        .find(|f| matches!(f.content, BerObjectContent::Integer(_)))
        .map(|f| unsigned(f, "nonce"))
        .transpose()?;

    Ok(TstInfo {
        algorithm,
        imprint: hashed.to_vec(),
        nonce,
    })
}
