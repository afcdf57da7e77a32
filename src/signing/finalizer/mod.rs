//! Transaction Finalization
//!
//! Merges externally produced threshold signatures into unsigned
//! transactions and emits each chain's broadcast encoding. The chain
//! adapters never see private key material; they consume finished
//! (R, S) components keyed by the hash of the signed bytes.

pub mod cosmos;
pub mod solana;
pub mod tron;
pub mod utxo;
pub mod xrpl;

use serde::{Deserialize, Serialize};

use crate::error::{KeysignError, KeysignResult};
use crate::signing::message_key::derive_key;
use crate::types::{Chain, SignatureMapping};

/// A payload that must be signed before a transaction can be finalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningPayload {
    /// Mapping key the finalizer will use to look up the signature
    pub key: String,

    /// Bytes handed to the signer: a 32-byte digest for ECDSA chains,
    /// the full message for Ed25519 chains
    #[serde(with = "crate::serde_bytes::hex_vec")]
    pub bytes: Vec<u8>,

    /// For UTXO chains: which input index this payload covers
    pub input_index: Option<usize>,

    /// Signing algorithm to use
    pub algorithm: SigningAlgorithm,
}

impl SigningPayload {
    pub fn ecdsa_digest(digest: [u8; 32]) -> Self {
        Self {
            key: derive_key(&digest),
            bytes: digest.to_vec(),
            input_index: None,
            algorithm: SigningAlgorithm::EcdsaSecp256k1,
        }
    }

    pub fn ed25519_message(message: Vec<u8>) -> Self {
        Self {
            key: derive_key(&message),
            bytes: message,
            input_index: None,
            algorithm: SigningAlgorithm::Ed25519,
        }
    }

    pub fn with_input_index(mut self, index: usize) -> Self {
        self.input_index = Some(index);
        self
    }

    /// Get payload bytes as hex string
    pub fn bytes_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Signing algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// secp256k1 ECDSA (UTXO, Cosmos, XRPL, TRON)
    EcdsaSecp256k1,
    /// Ed25519 (Solana)
    Ed25519,
}

/// Chain-specific finalization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalizer {
    /// BIP143 sighash with the cash fork id, DER signatures in script_sig
    Utxo,
    /// Protobuf SIGN_MODE_DIRECT, raw 64-byte signature slot
    CosmosProto,
    /// Versioned message, Ed25519 signature over the whole message
    Solana,
    /// Canonical field order, DER signature verified locally before encoding
    Xrpl,
    /// SHA-256 txid, 65-byte recoverable signature in a JSON envelope
    Tron,
}

impl Finalizer {
    /// Select the finalization strategy for a chain
    pub fn for_chain(chain: Chain) -> Self {
        match chain {
            Chain::BitcoinCash => Finalizer::Utxo,
            Chain::Thorchain | Chain::Mayachain | Chain::CosmosHub => Finalizer::CosmosProto,
            Chain::Solana => Finalizer::Solana,
            Chain::Xrpl => Finalizer::Xrpl,
            Chain::Tron => Finalizer::Tron,
        }
    }

    /// Merge threshold signatures into an unsigned transaction.
    ///
    /// `unsigned` holds the chain-native unsigned transaction bytes,
    /// `mapping` holds signature shares keyed by SHA-256 of the signed
    /// bytes, and `public_key` is the wallet's compressed secp256k1 key
    /// (32-byte Ed25519 key for Solana). Returns the fully signed
    /// transaction in the chain's broadcast encoding.
    pub fn sign(
        &self,
        unsigned: &[u8],
        mapping: &SignatureMapping,
        public_key: &[u8],
    ) -> KeysignResult<Vec<u8>> {
        if mapping.is_empty() {
            return Err(KeysignError::no_signatures(
                "Signature mapping contains no entries",
            ));
        }
        // Inconsistent shares are rejected before any chain codec runs.
        for (key, share) in mapping.shares() {
            share
                .check_der_consistency()
                .map_err(|e| e.with_details(format!("key: {}", key)))?;
        }

        match self {
            Finalizer::Utxo => utxo::sign(unsigned, mapping, public_key),
            Finalizer::CosmosProto => cosmos::sign(unsigned, mapping, public_key),
            Finalizer::Solana => solana::sign(unsigned, mapping, public_key),
            Finalizer::Xrpl => xrpl::sign(unsigned, mapping, public_key),
            Finalizer::Tron => tron::sign(unsigned, mapping, public_key),
        }
    }

    /// Compute the payloads that must be signed for an unsigned transaction.
    ///
    /// Each payload's `key` matches what [`Finalizer::sign`] will look up
    /// in the signature mapping.
    pub fn signing_payloads(
        &self,
        unsigned: &[u8],
        public_key: &[u8],
    ) -> KeysignResult<Vec<SigningPayload>> {
        match self {
            Finalizer::Utxo => utxo::signing_payloads(unsigned, public_key),
            Finalizer::CosmosProto => Err(KeysignError::invalid_input(
                "Cosmos sign docs need chain id and account number; \
                 use compute_sign_doc_digest instead",
            )),
            Finalizer::Solana => solana::signing_payloads(unsigned, public_key),
            Finalizer::Xrpl => xrpl::signing_payloads(unsigned, public_key),
            Finalizer::Tron => tron::signing_payloads(unsigned, public_key),
        }
    }

    /// Compute the chain's transaction identifier for a signed transaction
    pub fn transaction_hash(&self, signed: &[u8]) -> KeysignResult<String> {
        match self {
            Finalizer::Utxo => utxo::tx_hash(signed),
            Finalizer::CosmosProto => Ok(cosmos::tx_hash(signed)),
            Finalizer::Solana => solana::tx_hash(signed),
            Finalizer::Xrpl => Ok(xrpl::tx_hash(signed)),
            Finalizer::Tron => Ok(tron::tx_hash(signed)),
        }
    }
}

/// Validate and return a 33-byte compressed secp256k1 public key
pub(crate) fn require_compressed_pubkey(public_key: &[u8]) -> KeysignResult<[u8; 33]> {
    if public_key.len() != 33 {
        return Err(KeysignError::invalid_public_key(format!(
            "Expected 33-byte compressed secp256k1 key, got {} bytes",
            public_key.len()
        )));
    }
    if public_key[0] != 0x02 && public_key[0] != 0x03 {
        return Err(KeysignError::invalid_public_key(format!(
            "Invalid compressed key prefix 0x{:02x}",
            public_key[0]
        )));
    }
    let mut key = [0u8; 33];
    key.copy_from_slice(public_key);
    Ok(key)
}

/// Validate a secp256k1 public key in compressed or uncompressed form
pub(crate) fn require_secp_pubkey(public_key: &[u8]) -> KeysignResult<Vec<u8>> {
    match (public_key.len(), public_key.first()) {
        (33, Some(0x02)) | (33, Some(0x03)) | (65, Some(0x04)) => Ok(public_key.to_vec()),
        (len, _) => Err(KeysignError::invalid_public_key(format!(
            "Expected 33-byte compressed or 65-byte uncompressed secp256k1 key, got {} bytes",
            len
        ))),
    }
}

/// Validate and return a 32-byte Ed25519 public key
pub(crate) fn require_ed25519_pubkey(public_key: &[u8]) -> KeysignResult<[u8; 32]> {
    if public_key.len() != 32 {
        return Err(KeysignError::invalid_public_key(format!(
            "Expected 32-byte Ed25519 key, got {} bytes",
            public_key.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(public_key);
    Ok(key)
}
