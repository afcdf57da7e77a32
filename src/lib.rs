//! Keysign Core Library
//!
//! Signature-finalization and broadcast layer for a multi-chain
//! threshold-signing wallet.
//!
//! # Architecture
//!
//! This crate provides:
//! - **signing**: canonical ECDSA normalization, DER encoding, digest
//!   key derivation, and per-chain signature finalizers
//! - **tx**: endpoint configuration and sequential-failover broadcasting
//! - **sdk**: per-chain facades composing sign, broadcast, and send
//!
//! Signature shares are produced externally by a threshold-signing
//! ceremony. This crate consumes `(R, S[, recovery id])` shares plus
//! the wallet's public key and produces wire-ready bytes; it never
//! sees key material and never decides what to sign.
//!
//! # Example
//!
//! ```rust,ignore
//! use keysign_core::{Chain, ChainSdk, NetworkTier};
//!
//! let sdk = ChainSdk::new(Chain::Thorchain, NetworkTier::Mainnet);
//! let signed = sdk.sign(&unsigned, &mapping, &public_key)?;
//! let result = sdk.broadcast(&signed)?;
//! println!("txhash: {}", result.tx_id);
//! ```

pub mod error;
pub mod sdk;
pub mod serde_bytes;
pub mod signing;
pub mod tx;
pub mod types;
pub mod utils;

// Re-export key types for convenience
pub use error::{ErrorCode, KeysignError, KeysignResult};
pub use sdk::ChainSdk;
pub use types::{BroadcastResult, Chain, NetworkTier, SignatureMapping, SignatureShare};

// Re-export the signing and broadcast surface
pub use signing::{
    compute_sign_doc_digest, decode_der, derive_key, encode_der, normalize_low_s, Finalizer,
    SigningAlgorithm, SigningPayload,
};
pub use tx::{BroadcastConfig, Broadcaster, CancelToken, Transport};
