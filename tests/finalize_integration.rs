//! Finalization Integration Tests
//!
//! End-to-end flows through the public API:
//! - UTXO payload computation and signature merging with real ECDSA shares
//! - Cosmos sign-doc digests and envelope finalization
//! - TRON recoverable-signature envelopes
//! - The ChainSdk sign-and-broadcast pipeline with endpoint failover

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::consensus;
use bitcoin::Transaction;
use secp256k1::ecdsa::{self, RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use keysign_core::signing::finalizer::utxo::{UtxoInput, UtxoOutput, UtxoTemplate};
use keysign_core::tx::TransportReply;
use keysign_core::{
    derive_key, BroadcastConfig, CancelToken, Chain, ChainSdk, ErrorCode, Finalizer,
    KeysignError, KeysignResult, NetworkTier, SignatureMapping, SignatureShare, Transport,
};

// MARK: - Helper Functions

fn test_wallet() -> (SecretKey, [u8; 33]) {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[0x5c; 32]).expect("valid secret key");
    let pubkey = PublicKey::from_secret_key(&secp, &secret).serialize();
    (secret, pubkey)
}

/// Produce the share a signing ceremony would hand back for a digest
fn ecdsa_share(digest: &[u8], secret: &SecretKey) -> SignatureShare {
    let secp = Secp256k1::new();
    let message = Message::from_digest(digest.try_into().expect("32-byte digest"));
    let compact = secp.sign_ecdsa(&message, secret).serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    SignatureShare::from_raw(r, s)
}

fn proto_bytes_field(buf: &mut Vec<u8>, field: u8, bytes: &[u8]) {
    buf.push(field << 3 | 2);
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

/// Minimal TxRaw: one message body, one signer slot without a key,
/// SIGN_MODE_DIRECT, the given sequence
fn cosmos_unsigned(sequence: u8) -> Vec<u8> {
    let mut signer = Vec::new();
    proto_bytes_field(&mut signer, 2, &[0x0a, 0x02, 0x08, 0x01]);
    signer.push(3 << 3);
    signer.push(sequence);

    let mut auth = Vec::new();
    proto_bytes_field(&mut auth, 1, &signer);

    let mut msg = Vec::new();
    proto_bytes_field(&mut msg, 1, b"/types.MsgSend");

    let mut body = Vec::new();
    proto_bytes_field(&mut body, 1, &msg);

    let mut tx = Vec::new();
    proto_bytes_field(&mut tx, 1, &body);
    proto_bytes_field(&mut tx, 2, &auth);
    tx
}

/// Transport stub that replays canned replies in order and records
/// every URL it was asked to hit
struct ScriptedTransport {
    replies: Mutex<Vec<KeysignResult<TransportReply>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<KeysignResult<TransportReply>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            urls: Mutex::new(Vec::new()),
        }
    }

    fn hits(&self) -> Vec<String> {
        self.urls.lock().expect("url lock").clone()
    }

    fn reply(&self, url: &str) -> KeysignResult<TransportReply> {
        self.urls.lock().expect("url lock").push(url.to_string());
        let mut replies = self.replies.lock().expect("reply lock");
        if replies.is_empty() {
            Err(KeysignError::network_error("scripted transport ran out of replies"))
        } else {
            replies.remove(0)
        }
    }
}

impl Transport for ScriptedTransport {
    fn post_json(
        &self,
        url: &str,
        _body: String,
        _timeout: Duration,
    ) -> KeysignResult<TransportReply> {
        self.reply(url)
    }

    fn post_text(
        &self,
        url: &str,
        _body: String,
        _timeout: Duration,
    ) -> KeysignResult<TransportReply> {
        self.reply(url)
    }
}

fn two_endpoints() -> BroadcastConfig {
    BroadcastConfig::with_timeout(
        vec![
            "https://node-a.example".to_string(),
            "https://node-b.example".to_string(),
        ],
        Duration::from_secs(5),
    )
    .expect("valid endpoints")
}

// MARK: - UTXO Flow

#[test]
fn test_bch_payloads_sign_and_verify_per_input() {
    let (secret, pubkey) = test_wallet();
    let secp = Secp256k1::new();

    let template = UtxoTemplate {
        version: 2,
        lock_time: 0,
        inputs: vec![
            UtxoInput {
                prev_txid: "ab".repeat(32),
                vout: 0,
                script_pubkey: format!("76a914{}88ac", "aa".repeat(20)),
                value: 150_000,
                sequence: 0xffff_ffff,
            },
            UtxoInput {
                prev_txid: "cd".repeat(32),
                vout: 3,
                script_pubkey: format!("76a914{}88ac", "aa".repeat(20)),
                value: 75_000,
                sequence: 0xffff_ffff,
            },
        ],
        outputs: vec![UtxoOutput {
            value: 220_000,
            script_pubkey: format!("76a914{}88ac", "bb".repeat(20)),
        }],
    };
    let unsigned = template.to_bytes().expect("template serializes");

    let finalizer = Finalizer::for_chain(Chain::BitcoinCash);
    let payloads = finalizer
        .signing_payloads(&unsigned, &pubkey)
        .expect("payloads compute");
    assert_eq!(payloads.len(), 2);

    let mut mapping = SignatureMapping::new();
    for payload in &payloads {
        mapping
            .insert(payload.key.clone(), ecdsa_share(&payload.bytes, &secret))
            .expect("distinct keys");
    }

    let signed = finalizer.sign(&unsigned, &mapping, &pubkey).expect("sign");
    let tx: Transaction = consensus::encode::deserialize(&signed).expect("wire format parses");
    assert_eq!(tx.input.len(), 2);
    assert_eq!(tx.output.len(), 1);

    // Each unlock script holds <DER || 0x41> <pubkey>, and the DER part
    // verifies against that input's sighash digest
    let wallet_key = PublicKey::from_slice(&pubkey).expect("valid key");
    for (index, input) in tx.input.iter().enumerate() {
        let script = input.script_sig.as_bytes();
        let sig_len = script[0] as usize;
        assert_eq!(script[sig_len], 0x41);
        assert_eq!(script[1 + sig_len] as usize, 33);
        assert_eq!(&script[2 + sig_len..2 + sig_len + 33], &pubkey[..]);

        let signature = ecdsa::Signature::from_der(&script[1..sig_len]).expect("DER parses");
        let digest: [u8; 32] = payloads[index]
            .bytes
            .as_slice()
            .try_into()
            .expect("32-byte digest");
        secp.verify_ecdsa(&Message::from_digest(digest), &signature, &wallet_key)
            .expect("signature verifies");
    }

    let hash = finalizer.transaction_hash(&signed).expect("txid");
    assert_eq!(hash, tx.compute_txid().to_string());
}

// MARK: - Cosmos Flow

#[test]
fn test_cosmos_sign_doc_flow_finalizes_envelope() {
    let (secret, pubkey) = test_wallet();
    let unsigned = cosmos_unsigned(5);

    let sdk = ChainSdk::offline(Chain::Thorchain, NetworkTier::Mainnet);
    let digest = sdk
        .sign_doc_digest(&unsigned, 1024, 5)
        .expect("sign doc digest");

    let share = ecdsa_share(&digest, &secret);
    let raw_rs = share.to_raw_rs();
    let mut mapping = SignatureMapping::new();
    mapping.insert(derive_key(&digest), share).expect("insert");

    let signed = sdk.sign(&unsigned, &mapping, &pubkey).expect("finalize");
    assert_ne!(signed, unsigned);

    // The 64-byte R || S lands verbatim in the envelope: the signer
    // already produced low-S, so normalization leaves it untouched
    assert!(signed.windows(64).any(|w| w == &raw_rs[..]));

    let hash = sdk.transaction_hash(&signed).expect("tx hash");
    assert_eq!(hash, hex::encode_upper(Sha256::digest(&signed)));

    // Feeding the result back in is an error, not a double signature
    let err = sdk.sign(&signed, &mapping, &pubkey).unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadySigned);
}

#[test]
fn test_cosmos_digest_depends_on_tier_chain_id() {
    let unsigned = cosmos_unsigned(5);

    let mainnet = ChainSdk::offline(Chain::Thorchain, NetworkTier::Mainnet)
        .sign_doc_digest(&unsigned, 1024, 5)
        .expect("mainnet digest");
    let stagenet = ChainSdk::offline(Chain::Thorchain, NetworkTier::Stagenet)
        .sign_doc_digest(&unsigned, 1024, 5)
        .expect("stagenet digest");
    assert_ne!(mainnet, stagenet);
}

// MARK: - TRON Flow

#[test]
fn test_tron_envelope_signature_recovers_wallet_key() {
    let (secret, pubkey) = test_wallet();
    let secp = Secp256k1::new();
    let raw: Vec<u8> = vec![0x0a, 0x02, 0x48, 0x9a, 0x22, 0x08, 0x11, 0xde, 0xad, 0xbe, 0xef];

    let finalizer = Finalizer::for_chain(Chain::Tron);
    let payloads = finalizer
        .signing_payloads(&raw, &pubkey)
        .expect("payloads compute");
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].bytes, Sha256::digest(&raw).to_vec());

    let digest: [u8; 32] = payloads[0].bytes.as_slice().try_into().expect("digest");
    let message = Message::from_digest(digest);
    let (rec_id, compact) = secp
        .sign_ecdsa_recoverable(&message, &secret)
        .serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    let share = SignatureShare::from_raw(r, s).with_recovery_id(rec_id.to_i32() as u8);

    let mut mapping = SignatureMapping::new();
    mapping.insert(payloads[0].key.clone(), share).expect("insert");

    let signed = finalizer.sign(&raw, &mapping, &pubkey).expect("finalize");
    let envelope: serde_json::Value = serde_json::from_slice(&signed).expect("envelope parses");

    assert_eq!(
        envelope["txID"].as_str().expect("txID"),
        hex::encode(Sha256::digest(&raw))
    );
    assert_eq!(
        envelope["raw_data_hex"].as_str().expect("raw_data_hex"),
        hex::encode(&raw)
    );

    let sig_hex = envelope["signature"][0].as_str().expect("signature");
    let sig_bytes = hex::decode(sig_hex).expect("hex signature");
    assert_eq!(sig_bytes.len(), 65);
    assert_eq!(sig_bytes[64], 27 + rec_id.to_i32() as u8);

    // The recoverable form round-trips to the wallet key
    let rec = RecoveryId::from_i32((sig_bytes[64] - 27) as i32).expect("recovery id");
    let rsig = RecoverableSignature::from_compact(&sig_bytes[..64], rec).expect("compact");
    let recovered = secp.recover_ecdsa(&message, &rsig).expect("recover");
    assert_eq!(recovered.serialize(), pubkey);

    assert_eq!(
        finalizer.transaction_hash(&signed).expect("tx hash"),
        hex::encode(Sha256::digest(&raw))
    );
}

// MARK: - Send Pipeline

#[test]
fn test_send_pipeline_fails_over_to_second_endpoint() {
    let (secret, pubkey) = test_wallet();
    let unsigned = cosmos_unsigned(5);

    let txhash = "9B2EA1".repeat(10) + "ABCD";
    let transport = Arc::new(ScriptedTransport::new(vec![
        Err(KeysignError::network_error("connection refused")),
        Ok(TransportReply {
            status: 200,
            body: format!(r#"{{"tx_response":{{"code":0,"txhash":"{}","raw_log":""}}}}"#, txhash),
        }),
    ]));
    let sdk = ChainSdk::with_transport(
        Chain::Thorchain,
        NetworkTier::Mainnet,
        two_endpoints(),
        transport.clone(),
    );

    let digest = sdk.sign_doc_digest(&unsigned, 1024, 5).expect("digest");
    let mut mapping = SignatureMapping::new();
    mapping
        .insert(derive_key(&digest), ecdsa_share(&digest, &secret))
        .expect("insert");

    let result = sdk.send(&unsigned, &mapping, &pubkey).expect("send succeeds");
    assert_eq!(result.chain, Chain::Thorchain);
    assert_eq!(result.tx_id, txhash);
    assert_eq!(result.endpoint, "https://node-b.example");

    let hits = transport.hits();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].starts_with("https://node-a.example"));
    assert!(hits[1].starts_with("https://node-b.example"));
}

#[test]
fn test_cancelled_send_finalizes_but_never_broadcasts() {
    let (secret, pubkey) = test_wallet();
    let unsigned = cosmos_unsigned(5);

    let transport = Arc::new(ScriptedTransport::new(vec![Ok(TransportReply {
        status: 200,
        body: r#"{"tx_response":{"code":0,"txhash":"AA","raw_log":""}}"#.to_string(),
    })]));
    let sdk = ChainSdk::with_transport(
        Chain::Thorchain,
        NetworkTier::Mainnet,
        two_endpoints(),
        transport.clone(),
    );

    let digest = sdk.sign_doc_digest(&unsigned, 1024, 5).expect("digest");
    let mut mapping = SignatureMapping::new();
    mapping
        .insert(derive_key(&digest), ecdsa_share(&digest, &secret))
        .expect("insert");

    let cancel = CancelToken::new();
    cancel.cancel();

    // Signing completed (the error is Cancelled, not a signing error)
    // and no endpoint was contacted
    let err = sdk
        .send_with_cancel(&unsigned, &mapping, &pubkey, &cancel)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Cancelled);
    assert!(transport.hits().is_empty());
}

#[test]
fn test_offline_sdk_signs_but_refuses_to_broadcast() {
    let sdk = ChainSdk::offline(Chain::Tron, NetworkTier::Mainnet);
    let err = sdk.broadcast(b"{}").unwrap_err();
    assert_eq!(err.code, ErrorCode::NoClientConfigured);
}
