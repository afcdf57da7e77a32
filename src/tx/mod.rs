//! Transaction Module
//!
//! Handles broadcasting of finalized transactions: endpoint
//! configuration and sequential-failover submission.

pub mod broadcaster;
pub mod endpoints;

pub use broadcaster::{Broadcaster, CancelToken, HttpTransport, Transport, TransportReply};
pub use endpoints::{BroadcastConfig, DEFAULT_TIMEOUT};
