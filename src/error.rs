//! Unified error types for the keysign core
//!
//! All errors flow through this module for consistent handling
//! and serializable error reporting across the API boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for all keysign operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysignError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl KeysignError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, msg)
    }

    pub fn invalid_public_key(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPublicKey, msg)
    }

    pub fn no_signatures(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoSignatures, msg)
    }

    pub fn missing_signature(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingSignature, msg)
    }

    pub fn invalid_signature_component(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSignatureComponent, msg)
    }

    pub fn crypto_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::CryptoError, msg)
    }

    pub fn verification_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::VerificationFailed, msg)
    }

    pub fn already_signed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadySigned, msg)
    }

    pub fn decode_error(chain: impl fmt::Display, msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecodeError, format!("{} decode: {}", chain, msg.into()))
    }

    pub fn encode_error(chain: impl fmt::Display, msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::EncodeError, format!("{} encode: {}", chain, msg.into()))
    }

    pub fn network_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, msg)
    }

    pub fn no_client(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoClientConfigured, msg)
    }

    pub fn chain_rejected(code: impl fmt::Display, log: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChainRejected, log).with_details(format!("code: {}", code))
    }

    pub fn broadcast_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::BroadcastFailed, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }
}

impl fmt::Display for KeysignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for KeysignError {}

/// Error codes for categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Input validation errors: bad lengths, bad hex, empty signature set.
    // Never retried; the violated constraint is named in the message.
    InvalidInput,
    InvalidHex,
    InvalidPublicKey,
    NoSignatures,
    MissingSignature,
    InvalidSignatureComponent,

    // Cryptographic errors: fatal, never downgraded. A signature out of
    // range or a failed local verification aborts finalization.
    CryptoError,
    SignatureOutOfRange,
    VerificationFailed,
    AlreadySigned,

    // Codec errors: unsigned bytes that cannot be parsed or re-serialized.
    DecodeError,
    EncodeError,

    // Transport and broadcast errors. Transport failures are recoverable
    // via endpoint failover; ChainRejected carries the node's verdict
    // verbatim and is never retried automatically.
    NoClientConfigured,
    NetworkError,
    Timeout,
    BroadcastFailed,
    ChainRejected,
    Cancelled,

    // Internal
    Internal,
}

/// Result type alias for keysign operations
pub type KeysignResult<T> = Result<T, KeysignError>;

// Conversions from common error types

impl From<serde_json::Error> for KeysignError {
    fn from(e: serde_json::Error) -> Self {
        KeysignError::new(ErrorCode::DecodeError, e.to_string())
    }
}

impl From<hex::FromHexError> for KeysignError {
    fn from(e: hex::FromHexError) -> Self {
        KeysignError::new(ErrorCode::InvalidHex, e.to_string())
    }
}

impl From<reqwest::Error> for KeysignError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            KeysignError::new(ErrorCode::Timeout, "Request timed out")
        } else if e.is_connect() {
            KeysignError::new(ErrorCode::NetworkError, "Connection failed")
        } else {
            KeysignError::new(ErrorCode::NetworkError, e.to_string())
        }
    }
}

impl From<secp256k1::Error> for KeysignError {
    fn from(e: secp256k1::Error) -> Self {
        KeysignError::new(ErrorCode::CryptoError, format!("Secp256k1 error: {}", e))
    }
}

impl From<url::ParseError> for KeysignError {
    fn from(e: url::ParseError) -> Self {
        KeysignError::new(ErrorCode::InvalidInput, format!("Invalid endpoint URL: {}", e))
    }
}
