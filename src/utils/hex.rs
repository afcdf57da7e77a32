//! Hex parsing for externally supplied values
//!
//! Signature components and envelope fields arrive as hex strings from
//! other processes and languages; parsing tolerates an optional `0x`/`0X`
//! prefix and surrounding whitespace but is otherwise strict.

use crate::error::{KeysignError, KeysignResult};

/// Decode a hex string, accepting an optional `0x`/`0X` prefix and
/// surrounding whitespace.
pub fn decode_flexible(input: &str) -> KeysignResult<Vec<u8>> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if stripped.is_empty() {
        return Err(KeysignError::invalid_input("Empty hex string"));
    }
    Ok(hex::decode(stripped)?)
}

/// Decode a hex string into a fixed-width array, erroring with the
/// expected and actual byte counts.
pub fn decode_fixed<const N: usize>(input: &str) -> KeysignResult<[u8; N]> {
    let bytes = decode_flexible(input)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        KeysignError::invalid_input(format!("Expected {} hex bytes, got {}", N, len))
    })
}

/// Decode a single hex byte (e.g. a recovery id supplied as "00"/"01").
pub fn decode_byte(input: &str) -> KeysignResult<u8> {
    let bytes = decode_flexible(input)?;
    if bytes.len() != 1 {
        return Err(KeysignError::invalid_input(format!(
            "Expected 1 hex byte, got {}",
            bytes.len()
        )));
    }
    Ok(bytes[0])
}
