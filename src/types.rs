//! Shared types for the keysign core
//!
//! All data structures that cross module boundaries are defined here
//! for consistent serialization across the API boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KeysignError, KeysignResult};
use crate::utils::hex as hexutil;

// =============================================================================
// Chain Types
// =============================================================================

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Chain {
    BitcoinCash,
    Thorchain,
    Mayachain,
    CosmosHub,
    Solana,
    Xrpl,
    Tron,
}

impl Chain {
    /// Chains that share the Cosmos-SDK protobuf transaction envelope
    pub fn is_cosmos(&self) -> bool {
        matches!(self, Chain::Thorchain | Chain::Mayachain | Chain::CosmosHub)
    }

    pub fn is_utxo(&self) -> bool {
        matches!(self, Chain::BitcoinCash)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Chain::BitcoinCash => "BCH",
            Chain::Thorchain => "RUNE",
            Chain::Mayachain => "CACAO",
            Chain::CosmosHub => "ATOM",
            Chain::Solana => "SOL",
            Chain::Xrpl => "XRP",
            Chain::Tron => "TRX",
        }
    }

    /// Network chain id for Cosmos-family sign docs
    pub fn cosmos_chain_id(&self, tier: NetworkTier) -> Option<&'static str> {
        match (self, tier) {
            (Chain::Thorchain, NetworkTier::Mainnet) => Some("thorchain-1"),
            (Chain::Thorchain, NetworkTier::Stagenet) => Some("thorchain-stagenet-2"),
            (Chain::Thorchain, NetworkTier::Testnet) => Some("thorchain-testnet-2"),
            (Chain::Mayachain, NetworkTier::Mainnet) => Some("mayachain-mainnet-v1"),
            (Chain::Mayachain, NetworkTier::Stagenet) => Some("mayachain-stagenet-v1"),
            (Chain::CosmosHub, NetworkTier::Mainnet) => Some("cosmoshub-4"),
            (Chain::CosmosHub, NetworkTier::Testnet) => Some("theta-testnet-001"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Chain::BitcoinCash => "bitcoin-cash",
            Chain::Thorchain => "thorchain",
            Chain::Mayachain => "mayachain",
            Chain::CosmosHub => "cosmos-hub",
            Chain::Solana => "solana",
            Chain::Xrpl => "xrpl",
            Chain::Tron => "tron",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Chain {
    type Err = KeysignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bitcoin_cash" | "bitcoincash" | "bch" => Ok(Chain::BitcoinCash),
            "thorchain" | "thor" | "rune" => Ok(Chain::Thorchain),
            "mayachain" | "maya" | "cacao" => Ok(Chain::Mayachain),
            "cosmos_hub" | "cosmoshub" | "cosmos" | "gaia" | "atom" => Ok(Chain::CosmosHub),
            "solana" | "sol" => Ok(Chain::Solana),
            "xrpl" | "xrp" | "ripple" => Ok(Chain::Xrpl),
            "tron" | "trx" => Ok(Chain::Tron),
            _ => Err(KeysignError::invalid_input(format!("Unknown chain: {}", s))),
        }
    }
}

/// Network tier a facade is wired against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkTier {
    Mainnet,
    Testnet,
    Stagenet,
}

impl std::fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NetworkTier::Mainnet => "mainnet",
            NetworkTier::Testnet => "testnet",
            NetworkTier::Stagenet => "stagenet",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Signature Types
// =============================================================================

/// One externally produced signature share.
///
/// R and S are untrusted until range-checked by the consuming finalizer;
/// `der_signature` is an optional caller-precomputed encoding carried
/// alongside the raw components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureShare {
    #[serde(with = "crate::serde_bytes::hex32")]
    pub r: [u8; 32],
    #[serde(with = "crate::serde_bytes::hex32")]
    pub s: [u8; 32],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_id: Option<u8>,
    #[serde(
        default,
        with = "crate::serde_bytes::hex_vec_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub der_signature: Option<Vec<u8>>,
}

impl SignatureShare {
    pub fn from_raw(r: [u8; 32], s: [u8; 32]) -> Self {
        Self {
            r,
            s,
            recovery_id: None,
            der_signature: None,
        }
    }

    /// Build a share from the hex strings produced by an external signer.
    /// Each component tolerates an optional `0x`/`0X` prefix and
    /// surrounding whitespace; lengths are enforced strictly.
    pub fn from_hex_parts(r: &str, s: &str, recovery_id: Option<&str>) -> KeysignResult<Self> {
        let r = hexutil::decode_fixed::<32>(r)
            .map_err(|e| KeysignError::invalid_signature_component(format!("R: {}", e.message)))?;
        let s = hexutil::decode_fixed::<32>(s)
            .map_err(|e| KeysignError::invalid_signature_component(format!("S: {}", e.message)))?;
        let recovery_id = match recovery_id {
            Some(v) => Some(Self::parse_recovery_id(v)?),
            None => None,
        };
        Ok(Self {
            r,
            s,
            recovery_id,
            der_signature: None,
        })
    }

    pub fn with_recovery_id(mut self, recovery_id: u8) -> Self {
        self.recovery_id = Some(recovery_id);
        self
    }

    pub fn with_der_signature(mut self, der: Vec<u8>) -> Self {
        self.der_signature = Some(der);
        self
    }

    fn parse_recovery_id(input: &str) -> KeysignResult<u8> {
        let v = hexutil::decode_byte(input).map_err(|e| {
            KeysignError::invalid_signature_component(format!("recovery id: {}", e.message))
        })?;
        if v > 3 {
            return Err(KeysignError::invalid_signature_component(format!(
                "recovery id out of range: {}",
                v
            )));
        }
        Ok(v)
    }

    /// Raw 64-byte `R || S` concatenation (no normalization applied).
    pub fn to_raw_rs(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }

    /// Check a caller-precomputed DER blob against the raw components.
    /// A share whose `der_signature` decodes to different integers is
    /// inconsistent input and must not reach any chain codec.
    pub fn check_der_consistency(&self) -> KeysignResult<()> {
        let Some(ref der) = self.der_signature else {
            return Ok(());
        };
        let (r, s) = crate::signing::der::decode_der(der).map_err(|e| {
            KeysignError::invalid_signature_component(format!(
                "Precomputed DER rejected: {}",
                e.message
            ))
        })?;
        if r != self.r || s != self.s {
            return Err(KeysignError::invalid_signature_component(
                "Precomputed DER does not match the share's R/S components",
            ));
        }
        Ok(())
    }
}

/// Derived-key → signature-share mapping supplied by the signing ceremony.
///
/// Keys are unique; iteration order is deterministic. Single-signature
/// chains expect exactly one entry, UTXO chains one entry per input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureMapping {
    shares: BTreeMap<String, SignatureShare>,
}

impl SignatureMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a share under its derived key. Duplicate keys are rejected;
    /// a ceremony never legitimately signs the same digest twice.
    pub fn insert(&mut self, key: impl Into<String>, share: SignatureShare) -> KeysignResult<()> {
        let key = key.into();
        if self.shares.contains_key(&key) {
            return Err(KeysignError::invalid_input(format!(
                "Duplicate signature key: {}",
                key
            )));
        }
        self.shares.insert(key, share);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&SignatureShare> {
        self.shares.get(key)
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.shares.keys().map(|k| k.as_str())
    }

    /// Iterate entries in key order
    pub fn shares(&self) -> impl Iterator<Item = (&str, &SignatureShare)> {
        self.shares.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The single share expected by single-signer chains. Empty mappings
    /// and mappings with extra entries are both rejected.
    pub fn sole_entry(&self) -> KeysignResult<&SignatureShare> {
        let mut values = self.shares.values();
        let first = values
            .next()
            .ok_or_else(|| KeysignError::no_signatures("Signature mapping is empty"))?;
        if values.next().is_some() {
            return Err(KeysignError::invalid_input(format!(
                "Expected exactly one signature, got {}",
                self.shares.len()
            )));
        }
        Ok(first)
    }
}

// =============================================================================
// Broadcast Types
// =============================================================================

/// Outcome of a successful broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub chain: Chain,
    /// Chain-native transaction identifier (txid/txhash/signature)
    pub tx_id: String,
    /// Endpoint that accepted the transaction
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_chain_from_str_aliases() {
        assert_eq!(Chain::from_str("bch").unwrap(), Chain::BitcoinCash);
        assert_eq!(Chain::from_str("Bitcoin-Cash").unwrap(), Chain::BitcoinCash);
        assert_eq!(Chain::from_str("THOR").unwrap(), Chain::Thorchain);
        assert_eq!(Chain::from_str("maya").unwrap(), Chain::Mayachain);
        assert_eq!(Chain::from_str("gaia").unwrap(), Chain::CosmosHub);
        assert_eq!(Chain::from_str("sol").unwrap(), Chain::Solana);
        assert_eq!(Chain::from_str("ripple").unwrap(), Chain::Xrpl);
        assert_eq!(Chain::from_str("trx").unwrap(), Chain::Tron);
        assert!(Chain::from_str("dogecoin").is_err());
    }

    #[test]
    fn test_chain_family_helpers() {
        assert!(Chain::Thorchain.is_cosmos());
        assert!(Chain::Mayachain.is_cosmos());
        assert!(Chain::CosmosHub.is_cosmos());
        assert!(!Chain::Xrpl.is_cosmos());
        assert!(Chain::BitcoinCash.is_utxo());
        assert!(!Chain::Solana.is_utxo());
    }

    #[test]
    fn test_share_from_hex_parts_tolerates_prefixes() {
        let r = format!("0x{}", "11".repeat(32));
        let s = format!("  {}  ", "22".repeat(32));
        let share = SignatureShare::from_hex_parts(&r, &s, Some("01")).unwrap();
        assert_eq!(share.r, [0x11; 32]);
        assert_eq!(share.s, [0x22; 32]);
        assert_eq!(share.recovery_id, Some(1));
    }

    #[test]
    fn test_share_from_hex_parts_rejects_bad_lengths() {
        let err = SignatureShare::from_hex_parts("11", &"22".repeat(32), None).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidSignatureComponent);
        assert!(err.message.contains("R:"));

        let err =
            SignatureShare::from_hex_parts(&"11".repeat(32), &"22".repeat(33), None).unwrap_err();
        assert!(err.message.contains("S:"));
    }

    #[test]
    fn test_share_rejects_recovery_id_out_of_range() {
        let err = SignatureShare::from_hex_parts(&"11".repeat(32), &"22".repeat(32), Some("04"))
            .unwrap_err();
        assert!(err.message.contains("recovery id out of range"));
    }

    #[test]
    fn test_mapping_rejects_duplicate_keys() {
        let mut mapping = SignatureMapping::new();
        let share = SignatureShare::from_raw([1; 32], [2; 32]);
        mapping.insert("k1", share.clone()).unwrap();
        let err = mapping.insert("k1", share).unwrap_err();
        assert!(err.message.contains("Duplicate"));
    }

    #[test]
    fn test_mapping_sole_entry() {
        let mut mapping = SignatureMapping::new();
        assert_eq!(
            mapping.sole_entry().unwrap_err().code,
            crate::error::ErrorCode::NoSignatures
        );

        mapping
            .insert("k1", SignatureShare::from_raw([1; 32], [2; 32]))
            .unwrap();
        assert!(mapping.sole_entry().is_ok());

        mapping
            .insert("k2", SignatureShare::from_raw([3; 32], [4; 32]))
            .unwrap();
        assert!(mapping.sole_entry().is_err());
    }

    #[test]
    fn test_mapping_json_round_trip() {
        let mut mapping = SignatureMapping::new();
        mapping
            .insert(
                "digest-key",
                SignatureShare::from_raw([0xaa; 32], [0xbb; 32]).with_recovery_id(0),
            )
            .unwrap();
        let json = serde_json::to_string(&mapping).unwrap();
        assert!(json.contains("digest-key"));
        assert!(json.contains(&"aa".repeat(32)));

        let back: SignatureMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mapping);
    }

    #[test]
    fn test_der_consistency_check() {
        let r = [0x11; 32];
        let s = [0x22; 32];
        let share = SignatureShare::from_raw(r, s);

        // No precomputed DER: nothing to check
        assert!(share.check_der_consistency().is_ok());

        let der = crate::signing::der::encode_der(&r, &s).unwrap();
        assert!(share
            .clone()
            .with_der_signature(der)
            .check_der_consistency()
            .is_ok());

        // DER over different integers
        let other = crate::signing::der::encode_der(&[0x33; 32], &s).unwrap();
        let err = share
            .clone()
            .with_der_signature(other)
            .check_der_consistency()
            .unwrap_err();
        assert_eq!(
            err.code,
            crate::error::ErrorCode::InvalidSignatureComponent
        );
        assert!(err.message.contains("does not match"));

        // Unparsable DER
        let err = share
            .with_der_signature(vec![0xff, 0x00])
            .check_der_consistency()
            .unwrap_err();
        assert!(err.message.contains("Precomputed DER rejected"));
    }
}
