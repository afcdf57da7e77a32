//! Bitcoin Cash Finalization
//!
//! Computes per-input BIP143 sighashes with the cash fork id, merges
//! DER-encoded signatures into unlock scripts, and assembles the final
//! wire-format transaction. Every input is digested with the BIP143
//! algorithm, including legacy-style prevouts.

use std::str::FromStr;

use bitcoin::absolute;
use bitcoin::consensus;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::script::{self, PushBytesBuf};
use bitcoin::transaction;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};

use crate::error::{KeysignError, KeysignResult};
use crate::signing::canonical::{check_r_in_range, normalize_low_s};
use crate::signing::der::encode_der;
use crate::signing::finalizer::{require_compressed_pubkey, SigningPayload};
use crate::signing::message_key::derive_key;
use crate::types::{Chain, SignatureMapping};

/// SIGHASH_ALL with the cash fork id bit set
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

/// Unsigned transaction template, serialized as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoTemplate {
    /// Transaction version
    pub version: i32,
    /// Locktime
    #[serde(default)]
    pub lock_time: u32,
    /// Inputs with their prevout metadata
    pub inputs: Vec<UtxoInput>,
    /// Outputs
    pub outputs: Vec<UtxoOutput>,
}

impl UtxoTemplate {
    /// Serialize the template to the JSON bytes the finalizer accepts
    pub fn to_bytes(&self) -> KeysignResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| KeysignError::encode_error(Chain::BitcoinCash, e.to_string()))
    }
}

/// Transaction input with prevout metadata needed for sighashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoInput {
    /// Funding transaction id, display-order hex
    pub prev_txid: String,
    /// Output index in the funding transaction
    pub vout: u32,
    /// Prevout script in hex; doubles as the BIP143 script code
    pub script_pubkey: String,
    /// Value in satoshis
    pub value: u64,
    /// Sequence number
    #[serde(default = "default_sequence")]
    pub sequence: u32,
}

fn default_sequence() -> u32 {
    0xffff_ffff
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoOutput {
    /// Value in satoshis
    pub value: u64,
    /// Output script in hex
    pub script_pubkey: String,
}

/// Template with hex fields decoded and txids parsed
struct ParsedTemplate {
    version: i32,
    lock_time: u32,
    inputs: Vec<ParsedInput>,
    outputs: Vec<ParsedOutput>,
}

struct ParsedInput {
    txid: Txid,
    vout: u32,
    script_code: Vec<u8>,
    value: u64,
    sequence: u32,
}

struct ParsedOutput {
    value: u64,
    script_pubkey: Vec<u8>,
}

/// Merge per-input signatures into the template and emit the wire bytes
pub(crate) fn sign(
    unsigned: &[u8],
    mapping: &SignatureMapping,
    public_key: &[u8],
) -> KeysignResult<Vec<u8>> {
    let pubkey = require_compressed_pubkey(public_key)?;
    let template = parse_template(unsigned)?;

    // Collect every unlock script before touching the transaction so a
    // missing share can never produce a partially signed result.
    let mut script_sigs = Vec::with_capacity(template.inputs.len());
    for index in 0..template.inputs.len() {
        let digest = sighash_forkid(&template, index)?;
        let key = derive_key(&digest);
        let share = mapping.get(&key).ok_or_else(|| {
            KeysignError::missing_signature(format!("No signature share for input {}", index))
                .with_details(format!("key: {}", key))
        })?;

        check_r_in_range(&share.r)?;
        let s = normalize_low_s(&share.s)?;
        let mut signature = encode_der(&share.r, &s)?;
        signature.push(SIGHASH_ALL_FORKID as u8);

        script_sigs.push(unlock_script(&signature, &pubkey)?);
    }

    assemble(&template, script_sigs)
}

/// Compute one signing payload per input
pub(crate) fn signing_payloads(
    unsigned: &[u8],
    public_key: &[u8],
) -> KeysignResult<Vec<SigningPayload>> {
    require_compressed_pubkey(public_key)?;
    let template = parse_template(unsigned)?;

    let mut payloads = Vec::with_capacity(template.inputs.len());
    for index in 0..template.inputs.len() {
        let digest = sighash_forkid(&template, index)?;
        payloads.push(SigningPayload::ecdsa_digest(digest).with_input_index(index));
    }
    Ok(payloads)
}

/// Transaction id of a signed wire-format transaction, display-order hex
pub(crate) fn tx_hash(signed: &[u8]) -> KeysignResult<String> {
    let tx: Transaction = consensus::encode::deserialize(signed)
        .map_err(|e| KeysignError::decode_error(Chain::BitcoinCash, e.to_string()))?;
    Ok(tx.compute_txid().to_string())
}

fn parse_template(unsigned: &[u8]) -> KeysignResult<ParsedTemplate> {
    let template: UtxoTemplate = serde_json::from_slice(unsigned)
        .map_err(|e| KeysignError::decode_error(Chain::BitcoinCash, e.to_string()))?;

    if template.inputs.is_empty() {
        return Err(KeysignError::invalid_input("Transaction template has no inputs"));
    }
    if template.outputs.is_empty() {
        return Err(KeysignError::invalid_input("Transaction template has no outputs"));
    }

    let mut inputs = Vec::with_capacity(template.inputs.len());
    for (index, input) in template.inputs.iter().enumerate() {
        let txid = Txid::from_str(&input.prev_txid).map_err(|e| {
            KeysignError::decode_error(
                Chain::BitcoinCash,
                format!("input {}: bad prev_txid: {}", index, e),
            )
        })?;
        let script_code = hex::decode(&input.script_pubkey).map_err(|e| {
            KeysignError::decode_error(
                Chain::BitcoinCash,
                format!("input {}: bad script_pubkey: {}", index, e),
            )
        })?;
        if script_code.is_empty() {
            return Err(KeysignError::invalid_input(format!(
                "input {}: empty script_pubkey",
                index
            )));
        }
        inputs.push(ParsedInput {
            txid,
            vout: input.vout,
            script_code,
            value: input.value,
            sequence: input.sequence,
        });
    }

    let mut outputs = Vec::with_capacity(template.outputs.len());
    for (index, output) in template.outputs.iter().enumerate() {
        let script_pubkey = hex::decode(&output.script_pubkey).map_err(|e| {
            KeysignError::decode_error(
                Chain::BitcoinCash,
                format!("output {}: bad script_pubkey: {}", index, e),
            )
        })?;
        outputs.push(ParsedOutput {
            value: output.value,
            script_pubkey,
        });
    }

    Ok(ParsedTemplate {
        version: template.version,
        lock_time: template.lock_time,
        inputs,
        outputs,
    })
}

/// BIP143 digest with SIGHASH_ALL | FORKID, applied to every input kind
fn sighash_forkid(tx: &ParsedTemplate, input_index: usize) -> KeysignResult<[u8; 32]> {
    let input = tx.inputs.get(input_index).ok_or_else(|| {
        KeysignError::invalid_input(format!("Input index {} out of range", input_index))
    })?;

    let mut serialized = Vec::new();

    // 1. Version
    serialized.extend_from_slice(&tx.version.to_le_bytes());

    // 2. hashPrevouts
    let mut prevouts = Vec::new();
    for inp in &tx.inputs {
        prevouts.extend_from_slice(&inp.txid.to_byte_array());
        prevouts.extend_from_slice(&inp.vout.to_le_bytes());
    }
    serialized.extend_from_slice(&sha256d::Hash::hash(&prevouts).to_byte_array());

    // 3. hashSequence
    let mut sequences = Vec::new();
    for inp in &tx.inputs {
        sequences.extend_from_slice(&inp.sequence.to_le_bytes());
    }
    serialized.extend_from_slice(&sha256d::Hash::hash(&sequences).to_byte_array());

    // 4. outpoint
    serialized.extend_from_slice(&input.txid.to_byte_array());
    serialized.extend_from_slice(&input.vout.to_le_bytes());

    // 5. scriptCode
    write_var_bytes(&mut serialized, &input.script_code);

    // 6. value
    serialized.extend_from_slice(&input.value.to_le_bytes());

    // 7. nSequence
    serialized.extend_from_slice(&input.sequence.to_le_bytes());

    // 8. hashOutputs
    let mut outputs = Vec::new();
    for out in &tx.outputs {
        outputs.extend_from_slice(&out.value.to_le_bytes());
        write_var_bytes(&mut outputs, &out.script_pubkey);
    }
    serialized.extend_from_slice(&sha256d::Hash::hash(&outputs).to_byte_array());

    // 9. nLocktime
    serialized.extend_from_slice(&tx.lock_time.to_le_bytes());

    // 10. sighash type with fork id
    serialized.extend_from_slice(&SIGHASH_ALL_FORKID.to_le_bytes());

    Ok(sha256d::Hash::hash(&serialized).to_byte_array())
}

fn write_var_int(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var_int(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Build the canonical <signature> <pubkey> unlock script
fn unlock_script(signature: &[u8], pubkey: &[u8; 33]) -> KeysignResult<ScriptBuf> {
    let mut sig_push = PushBytesBuf::new();
    sig_push.extend_from_slice(signature).map_err(|_| {
        KeysignError::encode_error(Chain::BitcoinCash, "signature exceeds push limit")
    })?;
    let mut key_push = PushBytesBuf::new();
    key_push.extend_from_slice(pubkey).map_err(|_| {
        KeysignError::encode_error(Chain::BitcoinCash, "public key exceeds push limit")
    })?;
    Ok(script::Builder::new()
        .push_slice(sig_push)
        .push_slice(key_push)
        .into_script())
}

fn assemble(template: &ParsedTemplate, script_sigs: Vec<ScriptBuf>) -> KeysignResult<Vec<u8>> {
    let input = template
        .inputs
        .iter()
        .zip(script_sigs)
        .map(|(inp, script_sig)| TxIn {
            previous_output: OutPoint {
                txid: inp.txid,
                vout: inp.vout,
            },
            script_sig,
            sequence: Sequence(inp.sequence),
            witness: Witness::new(),
        })
        .collect();

    let output = template
        .outputs
        .iter()
        .map(|out| TxOut {
            value: Amount::from_sat(out.value),
            script_pubkey: ScriptBuf::from_bytes(out.script_pubkey.clone()),
        })
        .collect();

    let tx = Transaction {
        version: transaction::Version(template.version),
        lock_time: absolute::LockTime::from_consensus(template.lock_time),
        input,
        output,
    };

    Ok(consensus::encode::serialize(&tx))
}
