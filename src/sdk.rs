//! Chain SDK Facade
//!
//! One entry point per chain: composes the signature finalizer and the
//! broadcaster into sign, broadcast, and send operations.

use std::sync::Arc;

use crate::error::{KeysignError, KeysignResult};
use crate::log_debug;
use crate::signing::finalizer::{cosmos, Finalizer, SigningPayload};
use crate::tx::{BroadcastConfig, Broadcaster, CancelToken, Transport};
use crate::types::{BroadcastResult, Chain, NetworkTier, SignatureMapping};

/// Per-chain facade over finalization and broadcast.
///
/// Safe to share across threads: signing is a pure function of its
/// arguments and the endpoint list is read-only after construction.
pub struct ChainSdk {
    chain: Chain,
    tier: NetworkTier,
    finalizer: Finalizer,
    broadcaster: Broadcaster,
}

impl ChainSdk {
    /// Facade with built-in endpoints and a live HTTP transport
    pub fn new(chain: Chain, tier: NetworkTier) -> Self {
        Self::with_config(chain, tier, BroadcastConfig::for_chain(chain, tier))
    }

    /// Facade with a custom endpoint list
    pub fn with_config(chain: Chain, tier: NetworkTier, config: BroadcastConfig) -> Self {
        Self {
            chain,
            tier,
            finalizer: Finalizer::for_chain(chain),
            broadcaster: Broadcaster::new(chain, config),
        }
    }

    /// Facade with an injected transport
    pub fn with_transport(
        chain: Chain,
        tier: NetworkTier,
        config: BroadcastConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            chain,
            tier,
            finalizer: Finalizer::for_chain(chain),
            broadcaster: Broadcaster::with_transport(chain, config, transport),
        }
    }

    /// Facade that finalizes but never touches the network
    pub fn offline(chain: Chain, tier: NetworkTier) -> Self {
        let config = BroadcastConfig::for_chain(chain, tier);
        Self {
            chain,
            tier,
            finalizer: Finalizer::for_chain(chain),
            broadcaster: Broadcaster::without_transport(chain, config),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn tier(&self) -> NetworkTier {
        self.tier
    }

    /// Merge signature shares into broadcast-ready bytes
    pub fn sign(
        &self,
        unsigned: &[u8],
        mapping: &SignatureMapping,
        public_key: &[u8],
    ) -> KeysignResult<Vec<u8>> {
        self.finalizer.sign(unsigned, mapping, public_key)
    }

    /// Digests the signing ceremony must produce, keyed the way
    /// [`ChainSdk::sign`] will look them up
    pub fn signing_payloads(
        &self,
        unsigned: &[u8],
        public_key: &[u8],
    ) -> KeysignResult<Vec<SigningPayload>> {
        self.finalizer.signing_payloads(unsigned, public_key)
    }

    /// SIGN_MODE_DIRECT sign-doc digest for Cosmos-family chains,
    /// using the chain id this facade's tier is wired against
    pub fn sign_doc_digest(
        &self,
        unsigned: &[u8],
        account_number: u64,
        sequence: u64,
    ) -> KeysignResult<[u8; 32]> {
        let chain_id = self.chain.cosmos_chain_id(self.tier).ok_or_else(|| {
            KeysignError::invalid_input(format!(
                "{} {} has no Cosmos sign-doc chain id",
                self.chain, self.tier
            ))
        })?;
        cosmos::compute_sign_doc_digest(unsigned, account_number, sequence, chain_id)
    }

    pub fn broadcast(&self, signed: &[u8]) -> KeysignResult<BroadcastResult> {
        self.broadcaster.broadcast(signed)
    }

    pub fn broadcast_with_cancel(
        &self,
        signed: &[u8],
        cancel: &CancelToken,
    ) -> KeysignResult<BroadcastResult> {
        self.broadcaster.broadcast_with_cancel(signed, cancel)
    }

    /// Sign then broadcast in one call
    pub fn send(
        &self,
        unsigned: &[u8],
        mapping: &SignatureMapping,
        public_key: &[u8],
    ) -> KeysignResult<BroadcastResult> {
        self.send_with_cancel(unsigned, mapping, public_key, &CancelToken::new())
    }

    /// Sign then broadcast. The token affects only the broadcast
    /// phase; finalization always runs to completion.
    pub fn send_with_cancel(
        &self,
        unsigned: &[u8],
        mapping: &SignatureMapping,
        public_key: &[u8],
        cancel: &CancelToken,
    ) -> KeysignResult<BroadcastResult> {
        let signed = self.sign(unsigned, mapping, public_key)?;
        log_debug!(
            "sdk",
            "Transaction finalized",
            chain = self.chain,
            size = signed.len()
        );
        self.broadcaster.broadcast_with_cancel(&signed, cancel)
    }

    /// Chain-native transaction id for signed bytes
    pub fn transaction_hash(&self, signed: &[u8]) -> KeysignResult<String> {
        self.finalizer.transaction_hash(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::tx::TransportReply;
    use crate::types::SignatureShare;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport that always returns one fixed body and counts calls
    struct StaticTransport {
        body: &'static str,
        calls: AtomicUsize,
    }

    impl StaticTransport {
        fn new(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                body,
                calls: AtomicUsize::new(0),
            })
        }

        fn reply(&self) -> KeysignResult<TransportReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransportReply {
                status: 200,
                body: self.body.to_string(),
            })
        }
    }

    impl Transport for StaticTransport {
        fn post_json(
            &self,
            _url: &str,
            _body: String,
            _timeout: Duration,
        ) -> KeysignResult<TransportReply> {
            self.reply()
        }

        fn post_text(
            &self,
            _url: &str,
            _body: String,
            _timeout: Duration,
        ) -> KeysignResult<TransportReply> {
            self.reply()
        }
    }

    fn single_endpoint() -> BroadcastConfig {
        BroadcastConfig::new(vec!["https://node.example.com".to_string()]).unwrap()
    }

    fn tron_share_mapping() -> SignatureMapping {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r[31] = 1;
        s[31] = 2;
        let mut mapping = SignatureMapping::new();
        mapping
            .insert("share", SignatureShare::from_raw(r, s).with_recovery_id(0))
            .unwrap();
        mapping
    }

    fn secp_pubkey() -> Vec<u8> {
        let mut key = vec![0x02];
        key.extend_from_slice(&[0x11; 32]);
        key
    }

    #[test]
    fn test_send_signs_then_broadcasts() {
        let transport = StaticTransport::new(r#"{"result":true,"txid":"cafe01"}"#);
        let sdk = ChainSdk::with_transport(
            Chain::Tron,
            NetworkTier::Mainnet,
            single_endpoint(),
            transport.clone(),
        );

        let result = sdk
            .send(&[0x0a, 0x02, 0x08, 0x01], &tron_share_mapping(), &secp_pubkey())
            .unwrap();
        assert_eq!(result.tx_id, "cafe01");
        assert_eq!(result.chain, Chain::Tron);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_skips_broadcast_when_signing_fails() {
        let transport = StaticTransport::new(r#"{"result":true,"txid":"cafe01"}"#);
        let sdk = ChainSdk::with_transport(
            Chain::Tron,
            NetworkTier::Mainnet,
            single_endpoint(),
            transport.clone(),
        );

        let err = sdk
            .send(&[0x0a], &SignatureMapping::new(), &secp_pubkey())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSignatures);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_offline_facade_signs_but_cannot_broadcast() {
        let sdk = ChainSdk::offline(Chain::Tron, NetworkTier::Mainnet);

        let signed = sdk
            .sign(&[0x0a, 0x02], &tron_share_mapping(), &secp_pubkey())
            .unwrap();
        assert!(!signed.is_empty());

        let err = sdk.broadcast(&signed).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoClientConfigured);
    }

    #[test]
    fn test_sign_doc_digest_needs_a_cosmos_chain() {
        let sdk = ChainSdk::offline(Chain::Solana, NetworkTier::Mainnet);
        let err = sdk.sign_doc_digest(&[], 1, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_tier_selects_sign_doc_chain_id() {
        let mainnet = ChainSdk::offline(Chain::Thorchain, NetworkTier::Mainnet);
        let stagenet = ChainSdk::offline(Chain::Thorchain, NetworkTier::Stagenet);

        // Same envelope, different chain id, different digest
        let unsigned = sample_cosmos_unsigned();
        let a = mainnet.sign_doc_digest(&unsigned, 7, 3).unwrap();
        let b = stagenet.sign_doc_digest(&unsigned, 7, 3).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_transaction_hash_uses_chain_rules() {
        let sdk = ChainSdk::offline(Chain::Tron, NetworkTier::Mainnet);
        let raw = [0x01, 0x02, 0x03];
        let hash = sdk.transaction_hash(&raw).unwrap();
        assert_eq!(hash.len(), 64);
    }

    /// Minimal TxRaw: body with one message, auth info with one signer
    fn sample_cosmos_unsigned() -> Vec<u8> {
        fn varint(mut value: u64, out: &mut Vec<u8>) {
            loop {
                let mut byte = (value & 0x7f) as u8;
                value >>= 7;
                if value != 0 {
                    byte |= 0x80;
                }
                out.push(byte);
                if value == 0 {
                    break;
                }
            }
        }
        fn bytes_field(tag: u8, data: &[u8], out: &mut Vec<u8>) {
            out.push(tag);
            varint(data.len() as u64, out);
            out.extend_from_slice(data);
        }

        let mut body = Vec::new();
        bytes_field(0x0a, b"\x0a\x04/msg", &mut body);

        let mut signer = Vec::new();
        signer.push(0x18);
        varint(3, &mut signer);
        let mut auth = Vec::new();
        bytes_field(0x0a, &signer, &mut auth);

        let mut tx = Vec::new();
        bytes_field(0x0a, &body, &mut tx);
        bytes_field(0x12, &auth, &mut tx);
        tx
    }
}
