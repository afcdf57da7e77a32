//! ASN.1 DER encoding of ECDSA (R, S) pairs
//!
//! Chains that mandate DER signatures (BCH script sigs, XRPL TxnSignature)
//! get their encoding from here. Integers are minimally encoded: leading
//! zeros stripped, a single 0x00 re-added when the high bit is set so the
//! value stays non-negative under two's-complement rules.

use crate::error::{ErrorCode, KeysignError, KeysignResult};

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;

/// Encode (R, S) as a DER SEQUENCE of two INTEGERs.
///
/// Single-byte lengths only; secp256k1 scalars never need more.
pub fn encode_der(r: &[u8], s: &[u8]) -> KeysignResult<Vec<u8>> {
    let r_int = encode_integer(r)?;
    let s_int = encode_integer(s)?;

    let content_len = r_int.len() + s_int.len();
    if content_len > 255 {
        return Err(KeysignError::new(
            ErrorCode::EncodeError,
            format!("DER content too long: {} bytes", content_len),
        ));
    }

    let mut out = Vec::with_capacity(2 + content_len);
    out.push(TAG_SEQUENCE);
    out.push(content_len as u8);
    out.extend_from_slice(&r_int);
    out.extend_from_slice(&s_int);
    Ok(out)
}

/// Decode a DER SEQUENCE of two INTEGERs back into 32-byte (R, S).
///
/// Strict inverse of [`encode_der`]: used for round-trip checks and for
/// validating caller-precomputed DER blobs. Values are left-padded to 32
/// bytes; integers with more than 32 significant bytes are rejected.
pub fn decode_der(der: &[u8]) -> KeysignResult<([u8; 32], [u8; 32])> {
    if der.len() < 2 || der[0] != TAG_SEQUENCE {
        return Err(KeysignError::new(
            ErrorCode::DecodeError,
            "DER signature does not start with a SEQUENCE",
        ));
    }
    if der[1] as usize != der.len() - 2 {
        return Err(KeysignError::new(
            ErrorCode::DecodeError,
            "DER sequence length mismatch",
        ));
    }

    let (r, rest) = decode_integer(&der[2..])?;
    let (s, rest) = decode_integer(rest)?;
    if !rest.is_empty() {
        return Err(KeysignError::new(
            ErrorCode::DecodeError,
            "Trailing bytes after DER sequence",
        ));
    }
    Ok((r, s))
}

fn encode_integer(value: &[u8]) -> KeysignResult<Vec<u8>> {
    if value.is_empty() {
        return Err(KeysignError::invalid_signature_component(
            "Empty integer in DER encoding",
        ));
    }

    // Strip leading zeros, keeping at least one byte.
    let mut start = 0;
    while start < value.len() - 1 && value[start] == 0 {
        start += 1;
    }
    let trimmed = &value[start..];

    let needs_pad = trimmed[0] & 0x80 != 0;
    let len = trimmed.len() + usize::from(needs_pad);

    let mut out = Vec::with_capacity(2 + len);
    out.push(TAG_INTEGER);
    out.push(len as u8);
    if needs_pad {
        out.push(0x00);
    }
    out.extend_from_slice(trimmed);
    Ok(out)
}

fn decode_integer(input: &[u8]) -> KeysignResult<([u8; 32], &[u8])> {
    if input.len() < 2 || input[0] != TAG_INTEGER {
        return Err(KeysignError::new(
            ErrorCode::DecodeError,
            "Expected DER INTEGER marker",
        ));
    }
    let len = input[1] as usize;
    if len == 0 || input.len() < 2 + len {
        return Err(KeysignError::new(
            ErrorCode::DecodeError,
            "Truncated DER INTEGER",
        ));
    }

    let mut value = &input[2..2 + len];
    // Drop the defensive zero added for high-bit values.
    if value.len() > 1 && value[0] == 0x00 {
        value = &value[1..];
    }
    if value.len() > 32 {
        return Err(KeysignError::new(
            ErrorCode::DecodeError,
            format!("DER INTEGER too wide: {} bytes", value.len()),
        ));
    }

    let mut padded = [0u8; 32];
    padded[32 - value.len()..].copy_from_slice(value);
    Ok((padded, &input[2 + len..]))
}
