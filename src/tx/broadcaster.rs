//! Transaction Broadcaster
//!
//! Submits signed transactions to blockchain networks with sequential
//! endpoint failover. One request shape per chain family; the first
//! endpoint returning a non-rejecting, parsable response wins. No
//! concurrent fan-out, so a transaction is never submitted twice by a
//! single call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, KeysignError, KeysignResult};
use crate::signing::finalizer;
use crate::tx::endpoints::BroadcastConfig;
use crate::types::{BroadcastResult, Chain};
use crate::{log_info, log_warn};

const USER_AGENT: &str = concat!("keysign-core/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Transport
// =============================================================================

/// Raw HTTP reply before chain-specific parsing
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

/// Blocking HTTP seam so broadcasts can run against a scripted
/// transport in tests
pub trait Transport: Send + Sync {
    fn post_json(&self, url: &str, body: String, timeout: Duration)
        -> KeysignResult<TransportReply>;
    fn post_text(&self, url: &str, body: String, timeout: Duration)
        -> KeysignResult<TransportReply>;
}

/// Production transport backed by a blocking reqwest client
pub struct HttpTransport;

impl HttpTransport {
    fn client(&self, timeout: Duration) -> KeysignResult<Client> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| KeysignError::internal(format!("Failed to create HTTP client: {}", e)))
    }

    fn post(
        &self,
        url: &str,
        body: String,
        content_type: &'static str,
        timeout: Duration,
    ) -> KeysignResult<TransportReply> {
        let response = self
            .client(timeout)?
            .post(url)
            .header("Content-Type", content_type)
            .header("User-Agent", USER_AGENT)
            .body(body)
            .send()?;

        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(TransportReply { status, body })
    }
}

impl Transport for HttpTransport {
    fn post_json(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> KeysignResult<TransportReply> {
        self.post(url, body, "application/json", timeout)
    }

    fn post_text(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> KeysignResult<TransportReply> {
        self.post(url, body, "text/plain", timeout)
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancel signal for the broadcast phase. Checked before
/// each endpoint attempt; an in-flight request runs to its timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

pub struct Broadcaster {
    chain: Chain,
    config: BroadcastConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl Broadcaster {
    pub fn new(chain: Chain, config: BroadcastConfig) -> Self {
        Self {
            chain,
            config,
            transport: Some(Arc::new(HttpTransport)),
        }
    }

    /// A broadcaster with no transport; every broadcast fails with
    /// NoClientConfigured. For flows that finalize offline.
    pub fn without_transport(chain: Chain, config: BroadcastConfig) -> Self {
        Self {
            chain,
            config,
            transport: None,
        }
    }

    pub fn with_transport(
        chain: Chain,
        config: BroadcastConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            chain,
            config,
            transport: Some(transport),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    pub fn broadcast(&self, signed: &[u8]) -> KeysignResult<BroadcastResult> {
        self.broadcast_with_cancel(signed, &CancelToken::new())
    }

    /// Try endpoints in order until one accepts. Transport failures,
    /// non-2xx replies, and chain rejections all advance to the next
    /// endpoint; only the last failure is reported.
    pub fn broadcast_with_cancel(
        &self,
        signed: &[u8],
        cancel: &CancelToken,
    ) -> KeysignResult<BroadcastResult> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| KeysignError::no_client("No broadcast transport configured"))?;
        if self.config.endpoints.is_empty() {
            return Err(KeysignError::no_client("Endpoint list is empty"));
        }

        let mut last_error = KeysignError::broadcast_failed("All endpoints failed");
        for endpoint in &self.config.endpoints {
            if cancel.is_cancelled() {
                return Err(KeysignError::cancelled("Broadcast cancelled"));
            }
            match self.attempt(transport.as_ref(), endpoint, signed) {
                Ok(tx_id) => {
                    log_info!(
                        "broadcaster",
                        "Transaction accepted",
                        chain = self.chain,
                        endpoint = endpoint,
                        tx_id = tx_id
                    );
                    return Ok(BroadcastResult {
                        chain: self.chain,
                        tx_id,
                        endpoint: endpoint.clone(),
                    });
                }
                Err(e) => {
                    log_warn!(
                        "broadcaster",
                        "Endpoint failed",
                        chain = self.chain,
                        endpoint = endpoint,
                        error = e
                    );
                    last_error = e;
                }
            }
        }

        // A rejection from the last node keeps its chain-native code
        // and log; transport failures collapse into one aggregate.
        if last_error.code == ErrorCode::ChainRejected {
            return Err(last_error);
        }
        Err(
            KeysignError::broadcast_failed(format!(
                "All {} endpoints failed for {}: {}",
                self.config.endpoints.len(),
                self.chain,
                last_error.message
            ))
            .with_details(format!("last error code: {:?}", last_error.code)),
        )
    }

    fn attempt(
        &self,
        transport: &dyn Transport,
        endpoint: &str,
        signed: &[u8],
    ) -> KeysignResult<String> {
        let timeout = self.config.timeout;
        match self.chain {
            Chain::BitcoinCash => attempt_utxo(transport, endpoint, signed, timeout),
            Chain::Thorchain | Chain::Mayachain | Chain::CosmosHub => {
                attempt_cosmos(transport, endpoint, signed, timeout)
            }
            Chain::Solana => attempt_solana(transport, endpoint, signed, timeout),
            Chain::Xrpl => attempt_xrpl(transport, endpoint, signed, timeout),
            Chain::Tron => attempt_tron(transport, endpoint, signed, timeout),
        }
    }
}

// =============================================================================
// UTXO Broadcasting
// =============================================================================

/// Esplora-style text submit: hex body to `{base}/tx`, txid in the
/// response body
fn attempt_utxo(
    transport: &dyn Transport,
    endpoint: &str,
    signed: &[u8],
    timeout: Duration,
) -> KeysignResult<String> {
    let url = format!("{}/tx", endpoint.trim_end_matches('/'));
    let reply = transport.post_text(&url, hex::encode(signed), timeout)?;

    if !is_ok_status(reply.status) {
        // Node-level rejections come back as 400 with the error text
        if reply.status == 400 {
            return Err(KeysignError::chain_rejected(
                reply.status,
                snippet(&reply.body),
            ));
        }
        return Err(KeysignError::network_error(format!(
            "HTTP {}: {}",
            reply.status,
            snippet(&reply.body)
        )));
    }

    let txid = reply.body.trim().to_string();
    if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeysignError::network_error(format!(
            "Unexpected broadcast response: {}",
            snippet(&reply.body)
        )));
    }
    Ok(txid)
}

// =============================================================================
// Cosmos-Family Broadcasting
// =============================================================================

fn attempt_cosmos(
    transport: &dyn Transport,
    endpoint: &str,
    signed: &[u8],
    timeout: Duration,
) -> KeysignResult<String> {
    #[derive(Serialize)]
    struct BroadcastRequest {
        tx_bytes: String,
        mode: &'static str,
    }

    #[derive(Deserialize)]
    struct BroadcastResponse {
        tx_response: Option<TxResponse>,
    }

    #[derive(Deserialize)]
    struct TxResponse {
        code: u32,
        txhash: String,
        #[serde(default)]
        raw_log: String,
    }

    let request = BroadcastRequest {
        tx_bytes: BASE64.encode(signed),
        mode: "BROADCAST_MODE_SYNC",
    };
    let url = format!("{}/cosmos/tx/v1beta1/txs", endpoint.trim_end_matches('/'));
    let reply = transport.post_json(&url, encode_request(&request)?, timeout)?;
    require_ok_status(&reply)?;

    let parsed: BroadcastResponse = parse_reply(&reply)?;
    let tx_response = parsed
        .tx_response
        .ok_or_else(|| KeysignError::network_error("Response is missing tx_response"))?;

    if tx_response.code != 0 {
        return Err(KeysignError::chain_rejected(
            tx_response.code,
            tx_response.raw_log,
        ));
    }
    Ok(tx_response.txhash)
}

// =============================================================================
// Solana Broadcasting
// =============================================================================

fn attempt_solana(
    transport: &dyn Transport,
    endpoint: &str,
    signed: &[u8],
    timeout: Duration,
) -> KeysignResult<String> {
    #[derive(Serialize)]
    struct RpcRequest {
        jsonrpc: &'static str,
        id: u32,
        method: &'static str,
        params: (String, SendOptions),
    }

    #[derive(Serialize)]
    struct SendOptions {
        encoding: &'static str,
        #[serde(rename = "preflightCommitment")]
        preflight_commitment: &'static str,
    }

    #[derive(Deserialize)]
    struct RpcResponse {
        result: Option<String>,
        error: Option<RpcError>,
    }

    #[derive(Deserialize)]
    struct RpcError {
        code: i64,
        message: String,
    }

    let request = RpcRequest {
        jsonrpc: "2.0",
        id: 1,
        method: "sendTransaction",
        params: (
            BASE64.encode(signed),
            SendOptions {
                encoding: "base64",
                preflight_commitment: "confirmed",
            },
        ),
    };
    let reply = transport.post_json(endpoint, encode_request(&request)?, timeout)?;
    require_ok_status(&reply)?;

    let parsed: RpcResponse = parse_reply(&reply)?;
    if let Some(error) = parsed.error {
        return Err(KeysignError::chain_rejected(error.code, error.message));
    }
    parsed
        .result
        .ok_or_else(|| KeysignError::network_error("Response is missing a signature"))
}

// =============================================================================
// XRPL Broadcasting
// =============================================================================

fn attempt_xrpl(
    transport: &dyn Transport,
    endpoint: &str,
    signed: &[u8],
    timeout: Duration,
) -> KeysignResult<String> {
    #[derive(Serialize)]
    struct RpcRequest {
        method: &'static str,
        params: Vec<SubmitParams>,
    }

    #[derive(Serialize)]
    struct SubmitParams {
        tx_blob: String,
        fail_hard: bool,
    }

    #[derive(Deserialize)]
    struct RpcResponse {
        result: SubmitResult,
    }

    #[derive(Deserialize)]
    struct SubmitResult {
        engine_result: Option<String>,
        engine_result_message: Option<String>,
        tx_json: Option<TxJson>,
    }

    #[derive(Deserialize)]
    struct TxJson {
        hash: Option<String>,
    }

    let request = RpcRequest {
        method: "submit",
        params: vec![SubmitParams {
            tx_blob: hex::encode_upper(signed),
            fail_hard: false,
        }],
    };
    let reply = transport.post_json(endpoint, encode_request(&request)?, timeout)?;
    require_ok_status(&reply)?;

    let parsed: RpcResponse = parse_reply(&reply)?;
    let engine_result = parsed
        .result
        .engine_result
        .ok_or_else(|| KeysignError::network_error("Response is missing engine_result"))?;

    if engine_result != "tesSUCCESS" {
        let log = parsed
            .result
            .engine_result_message
            .unwrap_or_else(|| engine_result.clone());
        return Err(KeysignError::chain_rejected(engine_result, log));
    }

    match parsed.result.tx_json.and_then(|t| t.hash) {
        Some(hash) => Ok(hash),
        None => Ok(finalizer::xrpl::tx_hash(signed)),
    }
}

// =============================================================================
// TRON Broadcasting
// =============================================================================

/// The signed bytes already are the JSON envelope the wallet API
/// expects; they are posted verbatim
fn attempt_tron(
    transport: &dyn Transport,
    endpoint: &str,
    signed: &[u8],
    timeout: Duration,
) -> KeysignResult<String> {
    #[derive(Deserialize)]
    struct BroadcastReply {
        #[serde(default)]
        result: bool,
        txid: Option<String>,
        code: Option<String>,
        message: Option<String>,
    }

    let body = String::from_utf8(signed.to_vec())
        .map_err(|_| KeysignError::encode_error(Chain::Tron, "signed envelope is not JSON text"))?;
    let url = format!(
        "{}/wallet/broadcasttransaction",
        endpoint.trim_end_matches('/')
    );
    let reply = transport.post_json(&url, body, timeout)?;
    require_ok_status(&reply)?;

    let parsed: BroadcastReply = parse_reply(&reply)?;
    if !parsed.result {
        let code = parsed.code.unwrap_or_else(|| "UNKNOWN".to_string());
        // The node hex-encodes the message field
        let message = match parsed.message {
            Some(m) => hex::decode(&m)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or(m),
            None => code.clone(),
        };
        return Err(KeysignError::chain_rejected(code, message));
    }

    match parsed.txid {
        Some(txid) => Ok(txid),
        None => Ok(finalizer::tron::tx_hash(signed)),
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn encode_request<T: Serialize>(request: &T) -> KeysignResult<String> {
    serde_json::to_string(request)
        .map_err(|e| KeysignError::internal(format!("Failed to encode request: {}", e)))
}

fn parse_reply<'a, T: Deserialize<'a>>(reply: &'a TransportReply) -> KeysignResult<T> {
    serde_json::from_str(&reply.body).map_err(|e| {
        KeysignError::network_error(format!(
            "Unparsable broadcast response: {} ({})",
            e,
            snippet(&reply.body)
        ))
    })
}

fn is_ok_status(status: u16) -> bool {
    (200..300).contains(&status)
}

fn require_ok_status(reply: &TransportReply) -> KeysignResult<()> {
    if !is_ok_status(reply.status) {
        return Err(KeysignError::network_error(format!(
            "HTTP {}: {}",
            reply.status,
            snippet(&reply.body)
        )));
    }
    Ok(())
}

/// First line of a response body, bounded, for error messages
fn snippet(body: &str) -> String {
    let line = body.lines().next().unwrap_or("");
    if line.chars().count() > 200 {
        let bounded: String = line.chars().take(200).collect();
        format!("{}...", bounded)
    } else {
        line.to_string()
    }
}
