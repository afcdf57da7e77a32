//! XRPL Finalization
//!
//! Hand-rolled canonical binary codec for the transaction field set a
//! payment flow needs, plus the signing pipeline: encode pre-sign
//! bytes, digest with the STX prefix, verify the supplied share
//! locally, then embed the DER signature. This is the one chain whose
//! finalizer checks the share against the public key before trusting
//! it, since a wrong-but-well-formed signature would still produce a
//! broadcastable blob.

use std::collections::BTreeMap;

use secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha512};

use crate::error::{KeysignError, KeysignResult};
use crate::signing::canonical::{check_r_in_range, normalize_low_s};
use crate::signing::der::encode_der;
use crate::signing::finalizer::{require_compressed_pubkey, SigningPayload};
use crate::signing::message_key::derive_key;
use crate::types::{Chain, SignatureMapping};

/// Digest prefix for signing ("STX\0")
const PREFIX_TXN_SIGNATURE: [u8; 4] = [0x53, 0x54, 0x58, 0x00];
/// Digest prefix for the transaction id ("TXN\0")
const PREFIX_TXN_ID: [u8; 4] = [0x54, 0x58, 0x4e, 0x00];

/// Field identifier: (type code, field code). Tuple order is the
/// canonical serialization order.
type FieldId = (u8, u8);

const TRANSACTION_TYPE: FieldId = (1, 2);
const FLAGS: FieldId = (2, 2);
const SOURCE_TAG: FieldId = (2, 3);
const SEQUENCE: FieldId = (2, 4);
const DESTINATION_TAG: FieldId = (2, 14);
const LAST_LEDGER_SEQUENCE: FieldId = (2, 27);
const AMOUNT: FieldId = (6, 1);
const FEE: FieldId = (6, 8);
const SIGNING_PUB_KEY: FieldId = (7, 3);
const TXN_SIGNATURE: FieldId = (7, 4);
const ACCOUNT: FieldId = (8, 1);
const DESTINATION: FieldId = (8, 3);
const MEMOS: FieldId = (15, 9);

const MEMO_OBJECT: FieldId = (14, 10);
const MEMO_TYPE: FieldId = (7, 12);
const MEMO_DATA: FieldId = (7, 13);
const MEMO_FORMAT: FieldId = (7, 14);
const OBJECT_END: FieldId = (14, 1);
const ARRAY_END: FieldId = (15, 1);

/// Codec-level failures, wrapped into decode/encode errors at the
/// signing boundary
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unknown field: type {type_code}, field {field_code}")]
    UnknownField { type_code: u8, field_code: u8 },
    #[error("duplicate field: type {type_code}, field {field_code}")]
    DuplicateField { type_code: u8, field_code: u8 },
    #[error("non-canonical field header")]
    BadFieldHeader,
    #[error("issued currency amounts are not supported")]
    IssuedAmount,
    #[error("negative native amount")]
    NegativeAmount,
    #[error("amount exceeds 62 bits")]
    AmountRange,
    #[error("length prefix out of range: {0}")]
    BadLength(usize),
    #[error("account id must be 20 bytes, got {0}")]
    BadAccountLength(usize),
    #[error("malformed memo array")]
    BadMemos,
}

/// Verify the share against the pre-sign digest, embed it as DER, and
/// re-encode the full field map
pub(crate) fn sign(
    unsigned: &[u8],
    mapping: &SignatureMapping,
    public_key: &[u8],
) -> KeysignResult<Vec<u8>> {
    let pubkey = require_compressed_pubkey(public_key)?;
    let mut tx = FieldMap::decode(unsigned).map_err(decode_err)?;

    if tx.contains(TXN_SIGNATURE) {
        return Err(KeysignError::already_signed(
            "Transaction already carries a TxnSignature",
        ));
    }

    install_signing_pubkey(&mut tx, &pubkey)?;

    let presign = tx.encode_without(TXN_SIGNATURE).map_err(encode_err)?;
    let digest = signing_digest(&presign);

    let key = derive_key(&digest);
    let share = mapping.get(&key).ok_or_else(|| {
        KeysignError::missing_signature("No signature share for the signing digest")
            .with_details(format!("key: {}", key))
    })?;

    check_r_in_range(&share.r)?;
    let s = normalize_low_s(&share.s)?;
    verify_share(&digest, &share.r, &s, &pubkey)?;

    let der = encode_der(&share.r, &s)?;
    tx.set(TXN_SIGNATURE, FieldValue::Blob(der));

    tx.encode().map_err(encode_err)
}

/// One payload carrying the pre-sign digest
pub(crate) fn signing_payloads(
    unsigned: &[u8],
    public_key: &[u8],
) -> KeysignResult<Vec<SigningPayload>> {
    let pubkey = require_compressed_pubkey(public_key)?;
    let mut tx = FieldMap::decode(unsigned).map_err(decode_err)?;

    if tx.contains(TXN_SIGNATURE) {
        return Err(KeysignError::already_signed(
            "Transaction already carries a TxnSignature",
        ));
    }

    install_signing_pubkey(&mut tx, &pubkey)?;

    let presign = tx.encode_without(TXN_SIGNATURE).map_err(encode_err)?;
    Ok(vec![SigningPayload::ecdsa_digest(signing_digest(&presign))])
}

/// Transaction hash: SHA-512-half over the TXN prefix and signed blob
pub(crate) fn tx_hash(signed: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(PREFIX_TXN_ID);
    hasher.update(signed);
    let full = hasher.finalize();
    hex::encode_upper(&full[..32])
}

fn decode_err(e: CodecError) -> KeysignError {
    KeysignError::decode_error(Chain::Xrpl, e.to_string())
}

fn encode_err(e: CodecError) -> KeysignError {
    KeysignError::encode_error(Chain::Xrpl, e.to_string())
}

fn signing_digest(presign: &[u8]) -> [u8; 32] {
    let mut hasher = Sha512::new();
    hasher.update(PREFIX_TXN_SIGNATURE);
    hasher.update(presign);
    let full = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&full[..32]);
    digest
}

fn install_signing_pubkey(tx: &mut FieldMap, pubkey: &[u8; 33]) -> KeysignResult<()> {
    if let Some(existing) = tx.blob(SIGNING_PUB_KEY) {
        if existing != pubkey.as_slice() {
            return Err(KeysignError::invalid_public_key(
                "SigningPubKey in the transaction does not match the supplied key",
            ));
        }
    } else {
        tx.set(SIGNING_PUB_KEY, FieldValue::Blob(pubkey.to_vec()));
    }
    Ok(())
}

fn verify_share(
    digest: &[u8; 32],
    r: &[u8; 32],
    s: &[u8; 32],
    pubkey: &[u8; 33],
) -> KeysignResult<()> {
    let secp = Secp256k1::new();
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(r);
    compact[32..].copy_from_slice(s);

    let signature = ecdsa::Signature::from_compact(&compact)
        .map_err(|e| KeysignError::invalid_signature_component(format!("R/S rejected: {}", e)))?;
    let key = PublicKey::from_slice(pubkey)
        .map_err(|e| KeysignError::invalid_public_key(format!("Key rejected: {}", e)))?;
    let message = Message::from_digest(*digest);

    secp.verify_ecdsa(&message, &signature, &key).map_err(|_| {
        KeysignError::verification_failed(
            "Share does not verify against the signing digest and public key",
        )
    })
}

// =============================================================================
// Canonical field map
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    U16(u16),
    U32(u32),
    /// Native amount in drops
    Amount(u64),
    Blob(Vec<u8>),
    AccountId([u8; 20]),
    /// Raw array content including the end marker
    Array(Vec<u8>),
}

/// Transaction fields keyed by id; the BTreeMap iterates in canonical
/// serialization order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FieldMap {
    fields: BTreeMap<FieldId, FieldValue>,
}

impl FieldMap {
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(bytes);
        let mut fields = BTreeMap::new();

        while !reader.done() {
            let id = reader.read_field_header()?;
            let value = match id {
                TRANSACTION_TYPE => FieldValue::U16(reader.read_u16()?),
                FLAGS | SOURCE_TAG | SEQUENCE | DESTINATION_TAG | LAST_LEDGER_SEQUENCE => {
                    FieldValue::U32(reader.read_u32()?)
                }
                AMOUNT | FEE => FieldValue::Amount(reader.read_native_amount()?),
                SIGNING_PUB_KEY | TXN_SIGNATURE => {
                    FieldValue::Blob(reader.read_vl_bytes()?.to_vec())
                }
                ACCOUNT | DESTINATION => FieldValue::AccountId(reader.read_account_id()?),
                MEMOS => FieldValue::Array(reader.read_memos_raw()?),
                (type_code, field_code) => {
                    return Err(CodecError::UnknownField {
                        type_code,
                        field_code,
                    })
                }
            };
            if fields.insert(id, value).is_some() {
                return Err(CodecError::DuplicateField {
                    type_code: id.0,
                    field_code: id.1,
                });
            }
        }

        Ok(FieldMap { fields })
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.encode_internal(None)
    }

    fn encode_without(&self, skip: FieldId) -> Result<Vec<u8>, CodecError> {
        self.encode_internal(Some(skip))
    }

    fn encode_internal(&self, skip: Option<FieldId>) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        for (&id, value) in &self.fields {
            if Some(id) == skip {
                continue;
            }
            write_field_header(&mut out, id);
            match value {
                FieldValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
                FieldValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
                FieldValue::Amount(v) => write_native_amount(&mut out, *v)?,
                FieldValue::Blob(b) => write_vl_bytes(&mut out, b)?,
                FieldValue::AccountId(a) => write_vl_bytes(&mut out, a)?,
                FieldValue::Array(raw) => out.extend_from_slice(raw),
            }
        }
        Ok(out)
    }

    fn contains(&self, id: FieldId) -> bool {
        self.fields.contains_key(&id)
    }

    fn blob(&self, id: FieldId) -> Option<&[u8]> {
        match self.fields.get(&id) {
            Some(FieldValue::Blob(b)) => Some(b),
            _ => None,
        }
    }

    fn set(&mut self, id: FieldId, value: FieldValue) {
        self.fields.insert(id, value);
    }
}

// =============================================================================
// Wire primitives
// =============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self.buf.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < n {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Field header: type and field nibbles, with an extension byte for
    /// each code that does not fit its nibble
    fn read_field_header(&mut self) -> Result<FieldId, CodecError> {
        let b0 = self.read_u8()?;
        let mut type_code = b0 >> 4;
        let mut field_code = b0 & 0x0f;
        if type_code == 0 {
            type_code = self.read_u8()?;
            if type_code < 16 {
                return Err(CodecError::BadFieldHeader);
            }
        }
        if field_code == 0 {
            field_code = self.read_u8()?;
            if field_code < 16 {
                return Err(CodecError::BadFieldHeader);
            }
        }
        Ok((type_code, field_code))
    }

    fn read_vl_len(&mut self) -> Result<usize, CodecError> {
        let b1 = self.read_u8()? as usize;
        if b1 <= 192 {
            Ok(b1)
        } else if b1 <= 240 {
            let b2 = self.read_u8()? as usize;
            Ok(193 + ((b1 - 193) << 8) + b2)
        } else if b1 <= 254 {
            let b2 = self.read_u8()? as usize;
            let b3 = self.read_u8()? as usize;
            Ok(12481 + ((b1 - 241) << 16) + (b2 << 8) + b3)
        } else {
            Err(CodecError::BadLength(b1))
        }
    }

    fn read_vl_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_vl_len()?;
        self.read_bytes(len)
    }

    /// Native amount: 8 bytes, issued-currency bit clear, positive bit
    /// set, value in the low 62 bits
    fn read_native_amount(&mut self) -> Result<u64, CodecError> {
        let first = *self.buf.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        if first & 0x80 != 0 {
            return Err(CodecError::IssuedAmount);
        }
        let bytes = self.read_bytes(8)?;
        let raw = u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        if raw & 0x4000_0000_0000_0000 == 0 {
            return Err(CodecError::NegativeAmount);
        }
        Ok(raw & 0x3fff_ffff_ffff_ffff)
    }

    fn read_account_id(&mut self) -> Result<[u8; 20], CodecError> {
        let bytes = self.read_vl_bytes()?;
        if bytes.len() != 20 {
            return Err(CodecError::BadAccountLength(bytes.len()));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Capture a memo array verbatim, walking each memo object to its
    /// end marker so the array boundary is found exactly
    fn read_memos_raw(&mut self) -> Result<Vec<u8>, CodecError> {
        let start = self.pos;
        loop {
            let id = self.read_field_header().map_err(|_| CodecError::BadMemos)?;
            if id == ARRAY_END {
                break;
            }
            if id != MEMO_OBJECT {
                return Err(CodecError::BadMemos);
            }
            loop {
                let inner = self.read_field_header().map_err(|_| CodecError::BadMemos)?;
                if inner == OBJECT_END {
                    break;
                }
                match inner {
                    MEMO_TYPE | MEMO_DATA | MEMO_FORMAT => {
                        self.read_vl_bytes()?;
                    }
                    _ => return Err(CodecError::BadMemos),
                }
            }
        }
        Ok(self.buf[start..self.pos].to_vec())
    }
}

fn write_field_header(buf: &mut Vec<u8>, (type_code, field_code): FieldId) {
    let high = if type_code < 16 { type_code } else { 0 };
    let low = if field_code < 16 { field_code } else { 0 };
    buf.push(high << 4 | low);
    if type_code >= 16 {
        buf.push(type_code);
    }
    if field_code >= 16 {
        buf.push(field_code);
    }
}

fn write_vl_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    let len = bytes.len();
    if len <= 192 {
        buf.push(len as u8);
    } else if len <= 12480 {
        let adjusted = len - 193;
        buf.push(193 + (adjusted >> 8) as u8);
        buf.push((adjusted & 0xff) as u8);
    } else if len <= 918_744 {
        let adjusted = len - 12481;
        buf.push(241 + (adjusted >> 16) as u8);
        buf.push(((adjusted >> 8) & 0xff) as u8);
        buf.push((adjusted & 0xff) as u8);
    } else {
        return Err(CodecError::BadLength(len));
    }
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_native_amount(buf: &mut Vec<u8>, drops: u64) -> Result<(), CodecError> {
    if drops & 0xc000_0000_0000_0000 != 0 {
        return Err(CodecError::AmountRange);
    }
    buf.extend_from_slice(&(drops | 0x4000_0000_0000_0000).to_be_bytes());
    Ok(())
}
