//! Solana Finalization
//!
//! Works on serialized legacy and v0 messages. The Ed25519 signature
//! covers the whole message, so the message bytes pass through
//! untouched; signing prepends the signature array with our share
//! installed at slot 0.

use crate::error::{KeysignError, KeysignResult};
use crate::signing::finalizer::{require_ed25519_pubkey, SigningPayload};
use crate::signing::message_key::derive_key;
use crate::types::{Chain, SignatureMapping};

/// Merge the fee payer's signature into slot 0 and emit the wire bytes
pub(crate) fn sign(
    unsigned: &[u8],
    mapping: &SignatureMapping,
    public_key: &[u8],
) -> KeysignResult<Vec<u8>> {
    let pubkey = require_ed25519_pubkey(public_key)?;
    let message = parse_message(unsigned)?;
    check_slot_zero_signer(&message, &pubkey)?;

    let key = derive_key(unsigned);
    let share = mapping.get(&key).ok_or_else(|| {
        KeysignError::missing_signature("No signature share for the message")
            .with_details(format!("key: {}", key))
    })?;

    let num_sigs = message.num_required_signatures as usize;
    let mut signed = Vec::with_capacity(1 + num_sigs * 64 + unsigned.len());
    write_compact_u16(num_sigs as u16, &mut signed);
    signed.extend_from_slice(&share.to_raw_rs());
    // Remaining slots stay zeroed until their owners sign
    for _ in 1..num_sigs {
        signed.extend_from_slice(&[0u8; 64]);
    }
    signed.extend_from_slice(unsigned);
    Ok(signed)
}

/// One payload over the whole message
pub(crate) fn signing_payloads(
    unsigned: &[u8],
    public_key: &[u8],
) -> KeysignResult<Vec<SigningPayload>> {
    let pubkey = require_ed25519_pubkey(public_key)?;
    let message = parse_message(unsigned)?;
    check_slot_zero_signer(&message, &pubkey)?;

    Ok(vec![SigningPayload::ed25519_message(unsigned.to_vec())])
}

/// Solana transaction id: base58 of the slot-0 signature
pub(crate) fn tx_hash(signed: &[u8]) -> KeysignResult<String> {
    let mut cursor = Cursor::new(signed);
    let count = cursor.read_compact_u16()?;
    if count == 0 {
        return Err(decode_err("transaction carries no signatures"));
    }
    let first: [u8; 64] = cursor.read_array()?;
    Ok(bs58::encode(first).into_string())
}

fn decode_err(msg: impl Into<String>) -> KeysignError {
    KeysignError::decode_error(Chain::Solana, msg)
}

fn check_slot_zero_signer(message: &ParsedMessage, pubkey: &[u8; 32]) -> KeysignResult<()> {
    if message.num_required_signatures == 0 {
        return Err(KeysignError::invalid_input(
            "Message declares no required signers",
        ));
    }
    if message.accounts[0] != *pubkey {
        return Err(KeysignError::invalid_public_key(
            "Public key is not the fee payer at signature slot 0",
        ));
    }
    Ok(())
}

/// Header and static account keys of a decoded message
struct ParsedMessage {
    num_required_signatures: u8,
    accounts: Vec<[u8; 32]>,
}

/// Walk the whole message so corrupt bytes surface as decode errors
/// instead of a signed-but-unparseable transaction
fn parse_message(message: &[u8]) -> KeysignResult<ParsedMessage> {
    let mut cursor = Cursor::new(message);

    // A set high bit on the first byte marks a versioned message;
    // legacy messages start directly with the signature count header
    let first = cursor.read_u8()?;
    let (versioned, num_required_signatures) = if first & 0x80 != 0 {
        let version = first & 0x7f;
        if version != 0 {
            return Err(decode_err(format!("unsupported message version {}", version)));
        }
        (true, cursor.read_u8()?)
    } else {
        (false, first)
    };

    let _num_readonly_signed = cursor.read_u8()?;
    let _num_readonly_unsigned = cursor.read_u8()?;

    let account_count = cursor.read_compact_u16()? as usize;
    if account_count == 0 {
        return Err(decode_err("message has no account keys"));
    }
    if (num_required_signatures as usize) > account_count {
        return Err(decode_err("more required signers than account keys"));
    }
    let mut accounts = Vec::with_capacity(account_count);
    for _ in 0..account_count {
        accounts.push(cursor.read_array::<32>()?);
    }

    // Recent blockhash
    cursor.read_array::<32>()?;

    let instruction_count = cursor.read_compact_u16()? as usize;
    for _ in 0..instruction_count {
        cursor.read_u8()?;
        let index_count = cursor.read_compact_u16()? as usize;
        cursor.skip(index_count)?;
        let data_len = cursor.read_compact_u16()? as usize;
        cursor.skip(data_len)?;
    }

    if versioned {
        let table_count = cursor.read_compact_u16()? as usize;
        for _ in 0..table_count {
            cursor.read_array::<32>()?;
            let writable = cursor.read_compact_u16()? as usize;
            cursor.skip(writable)?;
            let readonly = cursor.read_compact_u16()? as usize;
            cursor.skip(readonly)?;
        }
    }

    if !cursor.done() {
        return Err(decode_err("trailing bytes after message"));
    }

    Ok(ParsedMessage {
        num_required_signatures,
        accounts,
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_u8(&mut self) -> KeysignResult<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| decode_err("message truncated"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_array<const N: usize>(&mut self) -> KeysignResult<[u8; N]> {
        if self.buf.len() - self.pos < N {
            return Err(decode_err("message truncated"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> KeysignResult<()> {
        if self.buf.len() - self.pos < n {
            return Err(decode_err("message truncated"));
        }
        self.pos += n;
        Ok(())
    }

    /// Read Solana's compact-u16 (three 7-bit groups, little end first)
    fn read_compact_u16(&mut self) -> KeysignResult<u16> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            return Ok(u16::from(first));
        }
        let second = self.read_u8()?;
        let mut value = u16::from(first & 0x7f) | u16::from(second & 0x7f) << 7;
        if second & 0x80 == 0 {
            return Ok(value);
        }
        let third = self.read_u8()?;
        if third & 0x80 != 0 || third > 0x03 {
            return Err(decode_err("malformed compact-u16"));
        }
        value |= u16::from(third) << 14;
        Ok(value)
    }
}

/// Write compact-u16 encoding (Solana's variable-length integer)
fn write_compact_u16(value: u16, buf: &mut Vec<u8>) {
    if value < 0x80 {
        buf.push(value as u8);
    } else if value < 0x4000 {
        buf.push((value & 0x7f) as u8 | 0x80);
        buf.push((value >> 7) as u8);
    } else {
        buf.push((value & 0x7f) as u8 | 0x80);
        buf.push(((value >> 7) & 0x7f) as u8 | 0x80);
        buf.push((value >> 14) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::types::SignatureShare;

    const FEE_PAYER: [u8; 32] = [0x11; 32];

    fn sample_message(num_required: u8, versioned: bool) -> Vec<u8> {
        let mut msg = Vec::new();
        if versioned {
            msg.push(0x80);
        }
        msg.push(num_required);
        msg.push(0); // readonly signed
        msg.push(1); // readonly unsigned
        write_compact_u16(3, &mut msg);
        msg.extend_from_slice(&FEE_PAYER);
        msg.extend_from_slice(&[0x22; 32]);
        msg.extend_from_slice(&[0x33; 32]); // program
        msg.extend_from_slice(&[0xab; 32]); // recent blockhash
        write_compact_u16(1, &mut msg);
        msg.push(2); // program index
        write_compact_u16(2, &mut msg);
        msg.extend_from_slice(&[0, 1]);
        write_compact_u16(3, &mut msg);
        msg.extend_from_slice(&[1, 2, 3]);
        if versioned {
            write_compact_u16(0, &mut msg); // no lookup tables
        }
        msg
    }

    fn sample_share() -> SignatureShare {
        SignatureShare::from_raw([0xcc; 32], [0xdd; 32])
    }

    fn mapping_for(message: &[u8]) -> SignatureMapping {
        let mut mapping = SignatureMapping::new();
        mapping.insert(derive_key(message), sample_share()).unwrap();
        mapping
    }

    #[test]
    fn test_compact_u16_round_trip() {
        for (value, expected) in [
            (0u16, vec![0u8]),
            (127, vec![127]),
            (128, vec![0x80, 0x01]),
            (16383, vec![0xff, 0x7f]),
            (16384, vec![0x80, 0x80, 0x01]),
        ] {
            let mut buf = Vec::new();
            write_compact_u16(value, &mut buf);
            assert_eq!(buf, expected);

            let mut cursor = Cursor::new(&buf);
            assert_eq!(cursor.read_compact_u16().unwrap(), value);
            assert!(cursor.done());
        }
    }

    #[test]
    fn test_compact_u16_rejects_overlong() {
        let bytes = [0x80, 0x80, 0x80, 0x01];
        let mut cursor = Cursor::new(&bytes);
        assert!(cursor.read_compact_u16().is_err());
    }

    #[test]
    fn test_sign_legacy_installs_slot_zero() {
        let message = sample_message(1, false);
        let signed = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap();

        assert_eq!(signed[0], 1);
        assert_eq!(&signed[1..65], &sample_share().to_raw_rs());
        assert_eq!(&signed[65..], &message[..]);
    }

    #[test]
    fn test_sign_v0_installs_slot_zero() {
        let message = sample_message(1, true);
        let signed = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap();

        assert_eq!(signed[0], 1);
        assert_eq!(&signed[65..], &message[..]);
    }

    #[test]
    fn test_sign_zero_fills_other_slots() {
        let message = sample_message(2, false);
        let signed = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap();

        assert_eq!(signed.len(), 1 + 2 * 64 + message.len());
        assert_eq!(&signed[1..65], &sample_share().to_raw_rs());
        assert!(signed[65..129].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sign_rejects_non_fee_payer_key() {
        let message = sample_message(1, false);
        let err = sign(&message, &mapping_for(&message), &[0x99; 32]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPublicKey);
    }

    #[test]
    fn test_sign_rejects_zero_required_signers() {
        let message = sample_message(0, false);
        let err = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_sign_rejects_unsupported_version() {
        let mut message = sample_message(1, true);
        message[0] = 0x81; // version 1
        let err = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap_err();
        assert_eq!(err.code, ErrorCode::DecodeError);
    }

    #[test]
    fn test_sign_rejects_trailing_bytes() {
        let mut message = sample_message(1, false);
        message.push(0xff);
        let err = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap_err();
        assert_eq!(err.code, ErrorCode::DecodeError);
    }

    #[test]
    fn test_sign_without_matching_share() {
        let message = sample_message(1, false);
        let mut mapping = SignatureMapping::new();
        mapping.insert("some-other-key", sample_share()).unwrap();

        let err = sign(&message, &mapping, &FEE_PAYER).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingSignature);
    }

    #[test]
    fn test_payload_covers_whole_message() {
        let message = sample_message(1, false);
        let payloads = signing_payloads(&message, &FEE_PAYER).unwrap();

        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].bytes, message);
        assert_eq!(payloads[0].key, derive_key(&message));
    }

    #[test]
    fn test_tx_hash_is_base58_of_first_signature() {
        let message = sample_message(1, false);
        let signed = sign(&message, &mapping_for(&message), &FEE_PAYER).unwrap();

        let hash = tx_hash(&signed).unwrap();
        assert_eq!(hash, bs58::encode(sample_share().to_raw_rs()).into_string());
    }
}
