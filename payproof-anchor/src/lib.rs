//! payproof-anchor
//!
//! Types and codec for PayProof on-chain anchors. A payment's proof hash is
//! packed together with its payment identifier into the opaque data field of
//! a transaction, so that anyone holding the transaction hash can later check
//! which proofs it commits to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod encoding;

pub use encoding::{
    decode, decode_hex, encode_batch, encode_batch_hex, encode_single, encode_single_hex,
    has_anchor_magic, to_hex, try_decode, try_decode_hex,
};

/// Application tag written at the start of every anchor payload
pub const ANCHOR_MAGIC: [u8; 8] = *b"PAYPROOF";

/// Width of a proof hash on the wire
pub const PROOF_HASH_LEN: usize = 32;

/// Width of the fixed payment-id slot on the wire
pub const PAYMENT_ID_SLOT_LEN: usize = 32;

/// Longest payment id that fits its slot (the last byte is always NUL)
pub const MAX_PAYMENT_ID_LEN: usize = PAYMENT_ID_SLOT_LEN - 1;

/// Width of one `proof_hash || payment_id` record
pub const RECORD_LEN: usize = PROOF_HASH_LEN + PAYMENT_ID_SLOT_LEN;

/// Magic prefix plus version byte
pub const HEADER_LEN: usize = ANCHOR_MAGIC.len() + 1;

/// The count prefix of a batch payload is a single byte
pub const MAX_BATCH_RECORDS: usize = u8::MAX as usize;

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Encode-side failures. These are always the caller's input being unfit for
/// the wire format and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("payment id is {len} bytes, at most 31 fit the anchor slot")]
    PaymentIdTooLong { len: usize },

    #[error("payment id contains a NUL byte")]
    PaymentIdContainsNul,

    #[error("batch anchor needs at least one record")]
    EmptyBatch,

    #[error("batch of {0} records exceeds the 255 record limit")]
    BatchTooLarge(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("proof hash must be 32 bytes, got {0}")]
    InvalidHashLength(usize),
}

/// Why a byte string did not decode to an anchor payload.
///
/// [`decode`] folds every one of these into an empty payload; they only
/// surface through [`try_decode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeAnomaly {
    #[error("anchor data is {len} bytes, shorter than the 9 byte header")]
    TooShort { len: usize },

    #[error("unknown anchor format version {0:#04x}")]
    UnknownVersion(u8),

    #[error("anchor data truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("payment id slot of record {index} is not a NUL-terminated UTF-8 string")]
    InvalidPaymentId { index: usize },

    #[error("anchor data is not valid hex: {0}")]
    InvalidHex(String),
}

impl DecodeAnomaly {
    /// True when the data was well-formed enough to carry a version byte we
    /// do not understand, as opposed to being damaged.
    pub fn is_unknown_version(&self) -> bool {
        matches!(self, DecodeAnomaly::UnknownVersion(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte proof digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProofHash([u8; PROOF_HASH_LEN]);

impl ProofHash {
    pub const fn new(bytes: [u8; PROOF_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PROOF_HASH_LEN] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; PROOF_HASH_LEN]> for ProofHash {
    fn from(bytes: [u8; PROOF_HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for ProofHash {
    type Err = EncodingError;

    /// Accepts 64 hex characters with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;

        let bytes: [u8; PROOF_HASH_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| EncodingError::InvalidHashLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for ProofHash {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProofHash> for String {
    fn from(hash: ProofHash) -> Self {
        hash.to_hex()
    }
}

impl fmt::Display for ProofHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Payment identifier that is guaranteed to fit the 32-byte anchor slot.
///
/// The slot holds the UTF-8 bytes followed by NUL padding and always ends in
/// a NUL, so at most [`MAX_PAYMENT_ID_LEN`] bytes are usable. Ids containing a
/// NUL are refused since the decoder stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentId(String);

impl PaymentId {
    pub fn new(id: impl Into<String>) -> Result<Self, EncodingError> {
        let id = id.into();
        if id.len() > MAX_PAYMENT_ID_LEN {
            return Err(EncodingError::PaymentIdTooLong { len: id.len() });
        }
        if id.as_bytes().contains(&0) {
            return Err(EncodingError::PaymentIdContainsNul);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The NUL-padded slot as written on chain
    pub fn to_slot(&self) -> [u8; PAYMENT_ID_SLOT_LEN] {
        let mut slot = [0u8; PAYMENT_ID_SLOT_LEN];
        slot[..self.0.len()].copy_from_slice(self.0.as_bytes());
        slot
    }

    /// Inverse of [`PaymentId::to_slot`]. Returns `None` when the slot is
    /// not NUL-terminated or the text before the first NUL is not UTF-8.
    pub fn from_slot(slot: &[u8; PAYMENT_ID_SLOT_LEN]) -> Option<Self> {
        if slot[PAYMENT_ID_SLOT_LEN - 1] != 0 {
            return None;
        }
        let end = slot.iter().position(|&b| b == 0).unwrap_or(PAYMENT_ID_SLOT_LEN);
        let text = std::str::from_utf8(&slot[..end]).ok()?;
        Some(Self(text.to_owned()))
    }
}

impl TryFrom<String> for PaymentId {
    type Error = EncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for PaymentId {
    type Error = EncodingError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PaymentId> for String {
    fn from(id: PaymentId) -> Self {
        id.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One proof hash and the payment it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub proof_hash: ProofHash,
    pub payment_id: PaymentId,
}

impl AnchorRecord {
    pub fn new(proof_hash: ProofHash, payment_id: PaymentId) -> Self {
        Self {
            proof_hash,
            payment_id,
        }
    }

    /// Build a record from unvalidated strings
    pub fn parse(proof_hash: &str, payment_id: &str) -> Result<Self, EncodingError> {
        Ok(Self {
            proof_hash: proof_hash.parse()?,
            payment_id: PaymentId::new(payment_id)?,
        })
    }
}

/// Anchor format versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FormatVersion {
    /// Exactly one record, no count byte
    Single = 0x01,
    /// Count byte followed by up to 255 records
    Batch = 0x02,
}

impl FormatVersion {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FormatVersion {
    type Error = DecodeAnomaly;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Single),
            0x02 => Ok(Self::Batch),
            other => Err(DecodeAnomaly::UnknownVersion(other)),
        }
    }
}

/// Ordered records tagged with the format they travel in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnchorPayload {
    version: FormatVersion,
    records: Vec<AnchorRecord>,
}

impl AnchorPayload {
    pub fn single(record: AnchorRecord) -> Self {
        Self {
            version: FormatVersion::Single,
            records: vec![record],
        }
    }

    pub fn batch(records: Vec<AnchorRecord>) -> Result<Self, EncodingError> {
        if records.len() > MAX_BATCH_RECORDS {
            return Err(EncodingError::BatchTooLarge(records.len()));
        }
        Ok(Self {
            version: FormatVersion::Batch,
            records,
        })
    }

    /// What tolerant decoding yields for data it cannot read
    pub fn empty() -> Self {
        Self {
            version: FormatVersion::Batch,
            records: Vec::new(),
        }
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn records(&self) -> &[AnchorRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AnchorRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn proof_hashes(&self) -> impl Iterator<Item = &ProofHash> + '_ {
        self.records.iter().map(|r| &r.proof_hash)
    }

    pub fn payment_ids(&self) -> impl Iterator<Item = &PaymentId> + '_ {
        self.records.iter().map(|r| &r.payment_id)
    }

    /// Membership check used when verifying an anchor transaction
    pub fn contains_proof_hash(&self, hash: &ProofHash) -> bool {
        self.proof_hashes().any(|h| h == hash)
    }

    /// Encode in this payload's own format
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        match self.version {
            FormatVersion::Single => {
                let record = &self.records[0];
                Ok(encode_single(&record.proof_hash, &record.payment_id))
            }
            FormatVersion::Batch => encode_batch(&self.records),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROOF HASHING
// ═══════════════════════════════════════════════════════════════════════════════

/// Combine the hashes of a payment's individual proof records into the single
/// hash that gets anchored: SHA-256 over the concatenated hash strings.
pub fn master_proof_hash<I, S>(record_hashes: I) -> ProofHash
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for hash in record_hashes {
        hasher.update(hash.as_ref().as_bytes());
    }
    ProofHash(hasher.finalize().into())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
