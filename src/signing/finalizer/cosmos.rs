//! Cosmos-Family Finalization
//!
//! Operates on the protobuf transaction envelope (TxRaw) shared by
//! THORChain, MAYAChain, and Gaia. Direct-sign mode uses raw 64-byte
//! R || S signatures, no DER framing. Auth info bytes pass through
//! untouched whenever the envelope already names the signer key, so
//! the embedded bytes stay bit-identical to the signed ones.

use sha2::{Digest, Sha256};

use crate::error::{KeysignError, KeysignResult};
use crate::signing::canonical::{check_r_in_range, normalize_low_s};
use crate::signing::finalizer::require_compressed_pubkey;
use crate::types::SignatureMapping;

const SECP256K1_PUBKEY_TYPE_URL: &str = "/cosmos.crypto.secp256k1.PubKey";

/// ModeInfo for SIGN_MODE_DIRECT: single { mode: 1 }
const MODE_INFO_DIRECT: [u8; 4] = [0x0a, 0x02, 0x08, 0x01];

/// Merge the single expected share into the envelope and re-marshal
pub(crate) fn sign(
    unsigned: &[u8],
    mapping: &SignatureMapping,
    public_key: &[u8],
) -> KeysignResult<Vec<u8>> {
    let pubkey = require_compressed_pubkey(public_key)?;
    let tx = TxRaw::decode(unsigned)?;

    if !tx.signatures.is_empty() {
        return Err(KeysignError::already_signed(format!(
            "Envelope already carries {} signature(s)",
            tx.signatures.len()
        )));
    }

    let share = mapping.sole_entry()?;
    check_r_in_range(&share.r)?;
    let s = normalize_low_s(&share.s)?;

    let mut signature = Vec::with_capacity(64);
    signature.extend_from_slice(&share.r);
    signature.extend_from_slice(&s);

    let auth_info = ensure_signer_pubkey(&tx.auth_info, &pubkey)?;

    let signed = TxRaw {
        body: tx.body,
        auth_info,
        signatures: vec![signature],
    };
    Ok(signed.encode())
}

/// Reproduce the 32-byte digest the remote signer must have hashed.
///
/// Builds the sign doc from the envelope's body and auth info plus the
/// supplied chain id and account number. The auth info is re-derived
/// when `sequence` differs from the envelope's, otherwise its bytes are
/// used verbatim.
pub fn compute_sign_doc_digest(
    unsigned: &[u8],
    account_number: u64,
    sequence: u64,
    chain_id: &str,
) -> KeysignResult<[u8; 32]> {
    let tx = TxRaw::decode(unsigned)?;
    let auth_info = with_sequence(&tx.auth_info, sequence)?;

    let mut sign_doc = Vec::new();

    // Field 1: body_bytes
    if !tx.body.is_empty() {
        write_bytes_field(&mut sign_doc, 1, &tx.body);
    }

    // Field 2: auth_info_bytes
    if !auth_info.is_empty() {
        write_bytes_field(&mut sign_doc, 2, &auth_info);
    }

    // Field 3: chain_id
    if !chain_id.is_empty() {
        write_bytes_field(&mut sign_doc, 3, chain_id.as_bytes());
    }

    // Field 4: account_number
    if account_number > 0 {
        write_varint_field(&mut sign_doc, 4, account_number);
    }

    Ok(Sha256::digest(&sign_doc).into())
}

/// Cosmos transaction hash: uppercase hex SHA-256 of the signed bytes
pub(crate) fn tx_hash(signed: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(signed))
}

fn decode_err(msg: impl Into<String>) -> KeysignError {
    KeysignError::decode_error("cosmos", msg)
}

// =============================================================================
// TxRaw envelope
// =============================================================================

/// TxRaw { body_bytes, auth_info_bytes, signatures }
#[derive(Debug)]
struct TxRaw {
    body: Vec<u8>,
    auth_info: Vec<u8>,
    signatures: Vec<Vec<u8>>,
}

impl TxRaw {
    fn decode(bytes: &[u8]) -> KeysignResult<Self> {
        let mut tx = TxRaw {
            body: Vec::new(),
            auth_info: Vec::new(),
            signatures: Vec::new(),
        };
        let mut reader = ProtoReader::new(bytes);
        while !reader.done() {
            match reader.next_field()? {
                (1, ProtoValue::Bytes(b)) => tx.body = b.to_vec(),
                (2, ProtoValue::Bytes(b)) => tx.auth_info = b.to_vec(),
                (3, ProtoValue::Bytes(b)) => tx.signatures.push(b.to_vec()),
                (field, _) => {
                    return Err(decode_err(format!("unexpected field {} in TxRaw", field)))
                }
            }
        }
        if tx.body.is_empty() {
            return Err(decode_err("missing body bytes"));
        }
        if tx.auth_info.is_empty() {
            return Err(decode_err("missing auth info bytes"));
        }
        Ok(tx)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Field 1: body_bytes
        write_bytes_field(&mut buf, 1, &self.body);
        // Field 2: auth_info_bytes
        write_bytes_field(&mut buf, 2, &self.auth_info);
        // Field 3: signatures (repeated)
        for signature in &self.signatures {
            write_bytes_field(&mut buf, 3, signature);
        }
        buf
    }
}

// =============================================================================
// AuthInfo / SignerInfo
// =============================================================================

/// AuthInfo split into its top-level fields; fee and tip are carried
/// as opaque bytes so re-encoding cannot perturb them
struct AuthInfoParts<'a> {
    signer_info: Option<SignerInfoParts<'a>>,
    fee: Option<&'a [u8]>,
    tip: Option<&'a [u8]>,
}

struct SignerInfoParts<'a> {
    pubkey_any: Option<&'a [u8]>,
    mode_info: Option<&'a [u8]>,
    sequence: u64,
}

impl<'a> AuthInfoParts<'a> {
    fn decode(bytes: &'a [u8]) -> KeysignResult<Self> {
        let mut parts = AuthInfoParts {
            signer_info: None,
            fee: None,
            tip: None,
        };
        let mut reader = ProtoReader::new(bytes);
        while !reader.done() {
            match reader.next_field()? {
                (1, ProtoValue::Bytes(b)) => {
                    if parts.signer_info.is_some() {
                        return Err(KeysignError::invalid_input(
                            "Multi-signer envelopes are not supported",
                        ));
                    }
                    parts.signer_info = Some(SignerInfoParts::decode(b)?);
                }
                (2, ProtoValue::Bytes(b)) => parts.fee = Some(b),
                (3, ProtoValue::Bytes(b)) => parts.tip = Some(b),
                (field, _) => {
                    return Err(decode_err(format!("unexpected field {} in AuthInfo", field)))
                }
            }
        }
        Ok(parts)
    }
}

impl<'a> SignerInfoParts<'a> {
    fn decode(bytes: &'a [u8]) -> KeysignResult<Self> {
        let mut parts = SignerInfoParts {
            pubkey_any: None,
            mode_info: None,
            sequence: 0,
        };
        let mut reader = ProtoReader::new(bytes);
        while !reader.done() {
            match reader.next_field()? {
                (1, ProtoValue::Bytes(b)) => parts.pubkey_any = Some(b),
                (2, ProtoValue::Bytes(b)) => parts.mode_info = Some(b),
                (3, ProtoValue::Varint(v)) => parts.sequence = v,
                (field, _) => {
                    return Err(decode_err(format!(
                        "unexpected field {} in SignerInfo",
                        field
                    )))
                }
            }
        }
        Ok(parts)
    }
}

/// Reuse or build the signer info record. A key already named by the
/// envelope must match ours and the auth bytes pass through untouched;
/// an empty key slot gets our key inserted and the record re-encoded.
fn ensure_signer_pubkey(auth_info: &[u8], pubkey: &[u8; 33]) -> KeysignResult<Vec<u8>> {
    let parsed = AuthInfoParts::decode(auth_info)?;

    match parsed.signer_info {
        Some(ref signer) => {
            if let Some(any) = signer.pubkey_any {
                let existing = pubkey_from_any(any)?;
                if existing.as_slice() != pubkey.as_slice() {
                    return Err(KeysignError::invalid_public_key(
                        "Envelope signer key does not match the supplied public key",
                    )
                    .with_details(format!("envelope key: {}", hex::encode(&existing))));
                }
                return Ok(auth_info.to_vec());
            }

            let any = encode_pubkey_any(pubkey);
            let signer_info = encode_signer_info(
                Some(&any),
                signer.mode_info.unwrap_or(&MODE_INFO_DIRECT),
                signer.sequence,
            );
            Ok(encode_auth_info(&signer_info, parsed.fee, parsed.tip))
        }
        None => {
            let any = encode_pubkey_any(pubkey);
            let signer_info = encode_signer_info(Some(&any), &MODE_INFO_DIRECT, 0);
            Ok(encode_auth_info(&signer_info, parsed.fee, parsed.tip))
        }
    }
}

/// Re-derive the auth info for the given sequence number. Byte-for-byte
/// passthrough when the sequence already matches.
fn with_sequence(auth_info: &[u8], sequence: u64) -> KeysignResult<Vec<u8>> {
    let parsed = AuthInfoParts::decode(auth_info)?;
    let signer = parsed
        .signer_info
        .ok_or_else(|| KeysignError::invalid_input("Auth info carries no signer info"))?;

    if signer.sequence == sequence {
        return Ok(auth_info.to_vec());
    }

    let signer_info = encode_signer_info(
        signer.pubkey_any,
        signer.mode_info.unwrap_or(&MODE_INFO_DIRECT),
        sequence,
    );
    Ok(encode_auth_info(&signer_info, parsed.fee, parsed.tip))
}

fn encode_signer_info(pubkey_any: Option<&[u8]>, mode_info: &[u8], sequence: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    // Field 1: public_key (Any)
    if let Some(any) = pubkey_any {
        write_bytes_field(&mut buf, 1, any);
    }
    // Field 2: mode_info
    write_bytes_field(&mut buf, 2, mode_info);
    // Field 3: sequence
    if sequence > 0 {
        write_varint_field(&mut buf, 3, sequence);
    }
    buf
}

fn encode_auth_info(signer_info: &[u8], fee: Option<&[u8]>, tip: Option<&[u8]>) -> Vec<u8> {
    let mut buf = Vec::new();
    // Field 1: signer_infos
    write_bytes_field(&mut buf, 1, signer_info);
    // Field 2: fee
    if let Some(fee) = fee {
        write_bytes_field(&mut buf, 2, fee);
    }
    // Field 3: tip
    if let Some(tip) = tip {
        write_bytes_field(&mut buf, 3, tip);
    }
    buf
}

/// Wrap a compressed key as Any { type_url, PubKey { key } }
fn encode_pubkey_any(pubkey: &[u8; 33]) -> Vec<u8> {
    let mut pk_proto = Vec::new();
    write_bytes_field(&mut pk_proto, 1, pubkey);

    let mut any = Vec::new();
    write_bytes_field(&mut any, 1, SECP256K1_PUBKEY_TYPE_URL.as_bytes());
    write_bytes_field(&mut any, 2, &pk_proto);
    any
}

/// Extract the raw key bytes from a pubkey Any wrapper
fn pubkey_from_any(any: &[u8]) -> KeysignResult<Vec<u8>> {
    let mut type_url = "";
    let mut value: &[u8] = &[];
    let mut reader = ProtoReader::new(any);
    while !reader.done() {
        match reader.next_field()? {
            (1, ProtoValue::Bytes(b)) => {
                type_url = std::str::from_utf8(b)
                    .map_err(|_| decode_err("pubkey type url is not utf-8"))?;
            }
            (2, ProtoValue::Bytes(b)) => value = b,
            (field, _) => {
                return Err(decode_err(format!("unexpected field {} in pubkey Any", field)))
            }
        }
    }
    if type_url != SECP256K1_PUBKEY_TYPE_URL {
        return Err(KeysignError::invalid_public_key(format!(
            "Unsupported signer key type: {}",
            type_url
        )));
    }

    let mut key = Vec::new();
    let mut reader = ProtoReader::new(value);
    while !reader.done() {
        match reader.next_field()? {
            (1, ProtoValue::Bytes(b)) => key = b.to_vec(),
            (field, _) => return Err(decode_err(format!("unexpected field {} in PubKey", field))),
        }
    }
    Ok(key)
}

// =============================================================================
// Protobuf primitives
// =============================================================================

/// Decoded protobuf field value
enum ProtoValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

/// Minimal protobuf walker. The tx envelope family only uses the varint
/// and length-delimited wire types.
struct ProtoReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ProtoReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn next_field(&mut self) -> KeysignResult<(u64, ProtoValue<'a>)> {
        let tag = self.read_varint()?;
        let field = tag >> 3;
        match tag & 0x07 {
            0 => Ok((field, ProtoValue::Varint(self.read_varint()?))),
            2 => {
                let len = self.read_varint()? as usize;
                if self.buf.len() - self.pos < len {
                    return Err(decode_err("length-delimited field overruns the buffer"));
                }
                let bytes = &self.buf[self.pos..self.pos + len];
                self.pos += len;
                Ok((field, ProtoValue::Bytes(bytes)))
            }
            wire => Err(decode_err(format!(
                "unsupported wire type {} for field {}",
                wire, field
            ))),
        }
    }

    fn read_varint(&mut self) -> KeysignResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| decode_err("truncated varint"))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(decode_err("varint exceeds 64 bits"));
            }
        }
    }
}

/// Encode varint (protobuf base 128 varint)
fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_tag(buf: &mut Vec<u8>, field: u64, wire: u64) {
    encode_varint(field << 3 | wire, buf);
}

fn write_bytes_field(buf: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    write_tag(buf, field, 2);
    encode_varint(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

fn write_varint_field(buf: &mut Vec<u8>, field: u64, value: u64) {
    write_tag(buf, field, 0);
    encode_varint(value, buf);
}
