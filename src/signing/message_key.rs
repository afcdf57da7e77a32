//! Derived lookup keys for signature mappings
//!
//! An external signing ceremony returns shares keyed by the digest it
//! signed. Finalizers recompute each digest locally and derive the same
//! key to find the matching share. SHA-256 rendered as lowercase hex;
//! determinism is the only contract.

use sha2::{Digest, Sha256};

/// Derive the mapping key for a message or digest.
pub fn derive_key(message: &[u8]) -> String {
    hex::encode(Sha256::digest(message))
}
