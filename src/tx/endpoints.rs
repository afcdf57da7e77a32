//! Endpoint Configuration
//!
//! Ordered endpoint lists per chain and network tier, consumed by the
//! broadcaster as a sequential failover sequence. Lists are read-only
//! after construction.

use std::time::Duration;

use url::Url;

use crate::error::{KeysignError, KeysignResult};
use crate::types::{Chain, NetworkTier};

/// Per-call timeout applied to every endpoint attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Broadcast configuration
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Failover order; the first endpoint that accepts wins
    pub endpoints: Vec<String>,
    pub timeout: Duration,
}

impl BroadcastConfig {
    /// Custom endpoint list with the default timeout
    pub fn new(endpoints: Vec<String>) -> KeysignResult<Self> {
        Self::with_timeout(endpoints, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoints: Vec<String>, timeout: Duration) -> KeysignResult<Self> {
        for endpoint in &endpoints {
            validate_endpoint(endpoint)?;
        }
        Ok(Self { endpoints, timeout })
    }

    /// Built-in endpoint list for a chain and tier
    pub fn for_chain(chain: Chain, tier: NetworkTier) -> Self {
        let endpoints = default_endpoints(chain, tier)
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            endpoints,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

fn validate_endpoint(endpoint: &str) -> KeysignResult<()> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(KeysignError::invalid_input(format!(
                "Unsupported endpoint scheme: {}",
                other
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(KeysignError::invalid_input(format!(
            "Endpoint has no host: {}",
            endpoint
        )));
    }
    Ok(())
}

fn default_endpoints(chain: Chain, tier: NetworkTier) -> &'static [&'static str] {
    match (chain, tier) {
        (Chain::BitcoinCash, NetworkTier::Mainnet) => &[
            "https://explorer.melroy.org/api",
            "https://api.haskoin.com/bch",
        ],
        (Chain::BitcoinCash, _) => &["https://chipnet.imaginary.cash/api"],
        (Chain::Thorchain, NetworkTier::Mainnet) => &[
            "https://thornode.ninerealms.com",
            "https://thornode.thorchain.liquify.com",
        ],
        (Chain::Thorchain, _) => &["https://stagenet-thornode.ninerealms.com"],
        (Chain::Mayachain, NetworkTier::Mainnet) => &[
            "https://mayanode.mayachain.info",
            "https://api-maya.liquify.com",
        ],
        (Chain::Mayachain, _) => &["https://stagenet.mayanode.mayachain.info"],
        (Chain::CosmosHub, NetworkTier::Mainnet) => &[
            "https://cosmos-rest.publicnode.com",
            "https://rest.cosmos.directory/cosmoshub",
        ],
        (Chain::CosmosHub, _) => &["https://rest.sentry-01.theta-testnet.polypore.xyz"],
        (Chain::Solana, NetworkTier::Mainnet) => &[
            "https://api.mainnet-beta.solana.com",
            "https://solana-rpc.publicnode.com",
        ],
        (Chain::Solana, _) => &["https://api.devnet.solana.com"],
        (Chain::Xrpl, NetworkTier::Mainnet) => &[
            "https://xrplcluster.com",
            "https://s1.ripple.com:51234",
            "https://s2.ripple.com:51234",
        ],
        (Chain::Xrpl, _) => &["https://s.altnet.rippletest.net:51234"],
        (Chain::Tron, NetworkTier::Mainnet) => {
            &["https://api.trongrid.io", "https://api.tronstack.io"]
        }
        (Chain::Tron, _) => &["https://api.shasta.trongrid.io"],
    }
}
