//! Anchor data encoding/decoding
//!
//! Byte layout of an anchor payload:
//!
//! ```text
//! magic "PAYPROOF" (8) | version (1) | count (1, batch only) | record * n
//! record = proof_hash (32) | payment_id, NUL padded (32)
//! ```
//!
//! Encoding is strict and refuses anything that would not decode back to the
//! same records. Decoding is lenient: anchors live on an immutable ledger, so
//! [`decode`] reads whatever it can recognise and yields an empty payload for
//! anything else instead of failing. [`try_decode`] exposes the reason.

use tracing::debug;

use crate::{
    AnchorPayload, AnchorRecord, DecodeAnomaly, EncodingError, FormatVersion, PaymentId,
    ProofHash, ANCHOR_MAGIC, HEADER_LEN, MAX_BATCH_RECORDS, PAYMENT_ID_SLOT_LEN, PROOF_HASH_LEN,
    RECORD_LEN,
};

fn push_record(out: &mut Vec<u8>, proof_hash: &ProofHash, payment_id: &PaymentId) {
    out.extend_from_slice(proof_hash.as_bytes());
    out.extend_from_slice(&payment_id.to_slot());
}

/// Encode a single proof anchor (format version 1)
pub fn encode_single(proof_hash: &ProofHash, payment_id: &PaymentId) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(HEADER_LEN + RECORD_LEN);
    encoded.extend_from_slice(&ANCHOR_MAGIC);
    encoded.push(FormatVersion::Single.as_byte());
    push_record(&mut encoded, proof_hash, payment_id);
    encoded
}

/// Encode 1 to 255 proof anchors in order (format version 2)
pub fn encode_batch(records: &[AnchorRecord]) -> Result<Vec<u8>, EncodingError> {
    if records.is_empty() {
        return Err(EncodingError::EmptyBatch);
    }
    if records.len() > MAX_BATCH_RECORDS {
        return Err(EncodingError::BatchTooLarge(records.len()));
    }

    let mut encoded = Vec::with_capacity(HEADER_LEN + 1 + records.len() * RECORD_LEN);
    encoded.extend_from_slice(&ANCHOR_MAGIC);
    encoded.push(FormatVersion::Batch.as_byte());
    encoded.push(records.len() as u8);
    for record in records {
        push_record(&mut encoded, &record.proof_hash, &record.payment_id);
    }

    Ok(encoded)
}

/// String-boundary form of [`encode_single`]: validates the raw hash and id
/// and returns `0x`-prefixed transaction data.
pub fn encode_single_hex(proof_hash: &str, payment_id: &str) -> Result<String, EncodingError> {
    let record = AnchorRecord::parse(proof_hash, payment_id)?;
    Ok(to_hex(&encode_single(&record.proof_hash, &record.payment_id)))
}

/// String-boundary form of [`encode_batch`]
pub fn encode_batch_hex<'a, I>(records: I) -> Result<String, EncodingError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let records = records
        .into_iter()
        .map(|(hash, id)| AnchorRecord::parse(hash, id))
        .collect::<Result<Vec<_>, _>>()?;
    encode_batch(&records).map(|bytes| to_hex(&bytes))
}

/// `0x`-prefixed lowercase hex, the form transaction data travels in
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Whether `data` starts with the PayProof magic. Decoding does not require
/// it; this is for callers that want to tell anchors from unrelated data.
pub fn has_anchor_magic(data: &[u8]) -> bool {
    data.starts_with(&ANCHOR_MAGIC)
}

fn read_record(data: &[u8], offset: usize, index: usize) -> Result<AnchorRecord, DecodeAnomaly> {
    let needed = offset + RECORD_LEN;
    let bytes = data.get(offset..needed).ok_or(DecodeAnomaly::Truncated {
        needed,
        available: data.len(),
    })?;

    let (hash, slot) = bytes.split_at(PROOF_HASH_LEN);
    let mut proof_hash = [0u8; PROOF_HASH_LEN];
    proof_hash.copy_from_slice(hash);
    let mut id_slot = [0u8; PAYMENT_ID_SLOT_LEN];
    id_slot.copy_from_slice(slot);

    let payment_id =
        PaymentId::from_slot(&id_slot).ok_or(DecodeAnomaly::InvalidPaymentId { index })?;

    Ok(AnchorRecord::new(ProofHash::new(proof_hash), payment_id))
}

/// Decode anchor data, reporting why it could not be read.
///
/// The magic prefix is skipped, not checked: dispatch is on the version byte
/// alone. Bytes after the last declared record are ignored.
pub fn try_decode(data: &[u8]) -> Result<AnchorPayload, DecodeAnomaly> {
    if data.len() < HEADER_LEN {
        return Err(DecodeAnomaly::TooShort { len: data.len() });
    }

    match FormatVersion::try_from(data[ANCHOR_MAGIC.len()])? {
        FormatVersion::Single => {
            let record = read_record(data, HEADER_LEN, 0)?;
            Ok(AnchorPayload::single(record))
        }
        FormatVersion::Batch => {
            let count = *data.get(HEADER_LEN).ok_or(DecodeAnomaly::Truncated {
                needed: HEADER_LEN + 1,
                available: data.len(),
            })? as usize;

            let mut records = Vec::with_capacity(count);
            let mut offset = HEADER_LEN + 1;
            for index in 0..count {
                records.push(read_record(data, offset, index)?);
                offset += RECORD_LEN;
            }

            Ok(AnchorPayload {
                version: FormatVersion::Batch,
                records,
            })
        }
    }
}

/// Decode anchor data. Anything unreadable yields an empty payload.
pub fn decode(data: &[u8]) -> AnchorPayload {
    try_decode(data).unwrap_or_else(|anomaly| {
        debug!(%anomaly, "anchor data not decodable, treating as empty");
        AnchorPayload::empty()
    })
}

/// [`try_decode`] for `0x`-prefixed transaction data
pub fn try_decode_hex(data: &str) -> Result<AnchorPayload, DecodeAnomaly> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(digits).map_err(|e| DecodeAnomaly::InvalidHex(e.to_string()))?;
    try_decode(&bytes)
}

/// [`decode`] for `0x`-prefixed transaction data
pub fn decode_hex(data: &str) -> AnchorPayload {
    try_decode_hex(data).unwrap_or_else(|anomaly| {
        debug!(%anomaly, "anchor data not decodable, treating as empty");
        AnchorPayload::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(byte: u8, id: &str) -> AnchorRecord {
        AnchorRecord::new(ProofHash::new([byte; 32]), PaymentId::new(id).unwrap())
    }

    #[test]
    fn test_single_layout() {
        let encoded = encode_single(
            &ProofHash::new([0xab; 32]),
            &PaymentId::new("pay-001").unwrap(),
        );
        assert_eq!(encoded.len(), HEADER_LEN + RECORD_LEN);
        assert_eq!(&encoded[..8], b"PAYPROOF");
        assert_eq!(encoded[8], 0x01);
        assert_eq!(&encoded[9..41], &[0xab; 32]);
        assert_eq!(&encoded[41..48], b"pay-001");
        assert!(encoded[48..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_single_hex_matches_deployed_format() {
        let hex = encode_single_hex(&format!("0x{}", "ab".repeat(32)), "pay-001").unwrap();
        // 0x + magic + version + hash + id slot
        assert_eq!(hex.len(), 2 + 16 + 2 + 64 + 64);
        assert!(hex.starts_with("0x50415950524f4f4601abab"));
        assert!(hex.ends_with(&format!("7061792d303031{}", "00".repeat(25))));
    }

    #[test]
    fn test_single_roundtrip() {
        let hash = format!("0x{}", "ab".repeat(32));
        let payload = decode_hex(&encode_single_hex(&hash, "pay-001").unwrap());

        assert_eq!(payload.version(), FormatVersion::Single);
        let hashes: Vec<String> = payload.proof_hashes().map(|h| h.to_hex()).collect();
        let ids: Vec<&str> = payload.payment_ids().map(|id| id.as_str()).collect();
        assert_eq!(hashes, vec![hash]);
        assert_eq!(ids, vec!["pay-001"]);
    }

    #[test]
    fn test_batch_layout_and_roundtrip() {
        let records = vec![record(0x11, "p1"), record(0x22, "p2")];
        let encoded = encode_batch(&records).unwrap();

        assert_eq!(encoded.len(), HEADER_LEN + 1 + 2 * RECORD_LEN);
        assert_eq!(encoded[8], 0x02);
        assert_eq!(encoded[9], 2);

        let payload = decode(&encoded);
        assert_eq!(payload.version(), FormatVersion::Batch);
        assert_eq!(payload.records(), records.as_slice());
    }

    #[test]
    fn test_batch_size_boundary() {
        let max: Vec<_> = (0..MAX_BATCH_RECORDS)
            .map(|i| record(i as u8, &i.to_string()))
            .collect();
        let encoded = encode_batch(&max).unwrap();
        assert_eq!(encoded[9], 0xff);
        assert_eq!(decode(&encoded).records(), max.as_slice());

        let mut over = max;
        over.push(record(0, "one-too-many"));
        assert_eq!(encode_batch(&over), Err(EncodingError::BatchTooLarge(256)));
        assert_eq!(encode_batch(&[]), Err(EncodingError::EmptyBatch));
    }

    #[test]
    fn test_batch_hex_rejects_bad_record() {
        let good = "11".repeat(32);
        let too_long = "x".repeat(32);
        assert_eq!(
            encode_batch_hex([(good.as_str(), "p1"), (good.as_str(), too_long.as_str())]),
            Err(EncodingError::PaymentIdTooLong { len: 32 })
        );
        assert!(matches!(
            encode_single_hex("0x1234", "p1"),
            Err(EncodingError::InvalidHashLength(2))
        ));
    }

    #[test]
    fn test_payload_encode_dispatches_on_version() {
        let single = AnchorPayload::single(record(0x01, "a"));
        assert_eq!(decode(&single.encode().unwrap()), single);

        let batch = AnchorPayload::batch(vec![record(0x02, "b"), record(0x03, "c")]).unwrap();
        assert_eq!(decode(&batch.encode().unwrap()), batch);
    }

    #[test]
    fn test_short_input_is_empty() {
        assert_eq!(try_decode(&[]), Err(DecodeAnomaly::TooShort { len: 0 }));
        assert_eq!(try_decode(b"PAYPROOF"), Err(DecodeAnomaly::TooShort { len: 8 }));
        assert!(decode(b"PAYPROOF").is_empty());
        assert!(decode_hex("0x").is_empty());
    }

    #[test]
    fn test_unknown_version_is_empty() {
        let mut data = encode_single(&ProofHash::new([1; 32]), &PaymentId::new("p").unwrap());
        data[8] = 0x03;
        let anomaly = try_decode(&data).unwrap_err();
        assert!(anomaly.is_unknown_version());
        assert_eq!(decode(&data), AnchorPayload::empty());

        data[8] = 0x00;
        assert_eq!(try_decode(&data), Err(DecodeAnomaly::UnknownVersion(0)));
    }

    #[test]
    fn test_truncated_batch_is_empty() {
        let encoded = encode_batch(&[record(0x11, "p1"), record(0x22, "p2")]).unwrap();
        let cut = &encoded[..encoded.len() - 1];
        assert_eq!(
            try_decode(cut),
            Err(DecodeAnomaly::Truncated {
                needed: encoded.len(),
                available: encoded.len() - 1,
            })
        );
        assert!(decode(cut).is_empty());

        // header only, count byte missing
        assert!(matches!(
            try_decode(&encoded[..HEADER_LEN]),
            Err(DecodeAnomaly::Truncated { .. })
        ));
    }

    #[test]
    fn test_zero_count_batch_decodes_empty() {
        let mut data = ANCHOR_MAGIC.to_vec();
        data.extend_from_slice(&[0x02, 0x00]);
        let payload = try_decode(&data).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut encoded = encode_single(&ProofHash::new([7; 32]), &PaymentId::new("p7").unwrap());
        encoded.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(decode(&encoded).len(), 1);
    }

    #[test]
    fn test_magic_not_required() {
        let mut encoded = encode_single(&ProofHash::new([7; 32]), &PaymentId::new("p7").unwrap());
        encoded[..8].copy_from_slice(b"OTHERAPP");
        assert!(!has_anchor_magic(&encoded));
        assert_eq!(decode(&encoded).len(), 1);
    }

    #[test]
    fn test_corrupt_payment_id_is_empty() {
        let mut encoded = encode_batch(&[record(0x11, "p1"), record(0x22, "p2")]).unwrap();
        // fill the second record's id slot so it loses its terminator
        let slot_start = HEADER_LEN + 1 + RECORD_LEN + PROOF_HASH_LEN;
        encoded[slot_start..slot_start + PAYMENT_ID_SLOT_LEN].fill(b'x');
        assert_eq!(
            try_decode(&encoded),
            Err(DecodeAnomaly::InvalidPaymentId { index: 1 })
        );
        assert!(decode(&encoded).is_empty());
    }

    #[test]
    fn test_invalid_hex_is_empty() {
        assert!(matches!(
            try_decode_hex("0xnot-hex"),
            Err(DecodeAnomaly::InvalidHex(_))
        ));
        assert!(decode_hex("0x123").is_empty());
    }
}
