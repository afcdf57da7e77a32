//! TRON Finalization
//!
//! The raw transaction stays opaque: its SHA-256 is both the signing
//! digest and the transaction id. The signed form is the JSON envelope
//! the HTTP wallet API broadcasts, carrying the raw bytes and one
//! recoverable 65-byte signature in hex.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KeysignError, KeysignResult};
use crate::signing::canonical::{check_r_in_range, normalize_low_s};
use crate::signing::finalizer::{require_secp_pubkey, SigningPayload};
use crate::types::{Chain, SignatureMapping};

/// Offset added to the recovery id in the trailing signature byte
const RECOVERY_ID_BASE: u8 = 27;

/// Broadcast envelope for the HTTP wallet API
#[derive(Debug, Serialize, Deserialize)]
struct SignedEnvelope {
    #[serde(rename = "txID")]
    tx_id: String,
    raw_data_hex: String,
    signature: Vec<String>,
}

/// Attach the sole recoverable share to the raw transaction and wrap
/// it as a broadcast envelope
pub(crate) fn sign(
    unsigned: &[u8],
    mapping: &SignatureMapping,
    public_key: &[u8],
) -> KeysignResult<Vec<u8>> {
    require_secp_pubkey(public_key)?;
    require_raw_bytes(unsigned)?;

    let share = mapping.sole_entry()?;
    let recovery_id = share.recovery_id.ok_or_else(|| {
        KeysignError::invalid_signature_component("Recoverable signature needs a recovery id")
    })?;
    if recovery_id > 3 {
        return Err(KeysignError::invalid_signature_component(format!(
            "Recovery id out of range: {}",
            recovery_id
        )));
    }

    check_r_in_range(&share.r)?;
    let s = normalize_low_s(&share.s)?;

    let mut signature = [0u8; 65];
    signature[..32].copy_from_slice(&share.r);
    signature[32..64].copy_from_slice(&s);
    signature[64] = RECOVERY_ID_BASE + recovery_id;

    let envelope = SignedEnvelope {
        tx_id: hex::encode(txid(unsigned)),
        raw_data_hex: hex::encode(unsigned),
        signature: vec![hex::encode(signature)],
    };

    serde_json::to_vec(&envelope)
        .map_err(|e| KeysignError::encode_error(Chain::Tron, e.to_string()))
}

/// One payload carrying the transaction id digest
pub(crate) fn signing_payloads(
    unsigned: &[u8],
    public_key: &[u8],
) -> KeysignResult<Vec<SigningPayload>> {
    require_secp_pubkey(public_key)?;
    require_raw_bytes(unsigned)?;
    Ok(vec![SigningPayload::ecdsa_digest(txid(unsigned))])
}

/// Transaction id. A signed envelope already carries it; raw bytes
/// hash to it directly.
pub(crate) fn tx_hash(bytes: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<SignedEnvelope>(bytes) {
        return envelope.tx_id;
    }
    hex::encode(Sha256::digest(bytes))
}

fn txid(unsigned: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(unsigned);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn require_raw_bytes(unsigned: &[u8]) -> KeysignResult<()> {
    if unsigned.is_empty() {
        return Err(KeysignError::decode_error(
            Chain::Tron,
            "raw transaction bytes are empty",
        ));
    }
    Ok(())
}
