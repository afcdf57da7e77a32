//! Signature Finalization
//!
//! This module turns externally produced signature shares into wire-ready
//! signed transactions:
//! 1. Normalize ECDSA shares to canonical low-S form
//! 2. Derive stable lookup keys from signing digests
//! 3. Embed signatures per chain family and re-encode for broadcast
//!
//! Supported chain families:
//! - Bitcoin Cash (BIP143 sighash with the fork id flag)
//! - Cosmos SDK (THORChain, MAYAChain, Cosmos Hub protobuf envelopes)
//! - Solana (legacy and versioned messages)
//! - XRPL (canonical field codec with local verification)
//! - TRON (recoverable signatures in a JSON envelope)

pub mod canonical;
pub mod der;
pub mod finalizer;
pub mod message_key;

pub use canonical::normalize_low_s;
pub use der::{decode_der, encode_der};
pub use finalizer::{Finalizer, SigningAlgorithm, SigningPayload};
pub use message_key::derive_key;

pub use finalizer::cosmos::compute_sign_doc_digest;
