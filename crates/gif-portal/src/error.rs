//! error types for the portal client

use thiserror::Error;

use crate::sync::MutationKind;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("no wallet provider available")]
    NoWalletProvider,

    #[error("wallet connection rejected: {0}")]
    ConnectionRejected(String),

    #[error("wallet has not trusted this client before")]
    NotTrusted,

    #[error("no wallet identity bound")]
    NotConnected,

    #[error("network error: {0}")]
    Network(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("{0} cancelled")]
    Cancelled(&'static str),

    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("{0} already in flight")]
    MutationInFlight(MutationKind),

    #[error("link is empty")]
    EmptyLink,

    #[error("remote account is not provisioned")]
    NotProvisioned,

    #[error("remote account is already provisioned")]
    AlreadyProvisioned,

    #[error("remote account state not loaded, refresh first")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, PortalError>;

impl PortalError {
    /// failure that may go away if the same call is repeated
    pub fn is_transient(&self) -> bool {
        match self {
            PortalError::Network(_) | PortalError::Timeout(_) => true,
            // preflight failures and bad params repeat identically
            PortalError::Rpc { code, .. } => *code != -32002 && *code != -32602,
            _ => false,
        }
    }

    /// remote state exists but does not have the expected shape
    pub fn is_malformed(&self) -> bool {
        matches!(self, PortalError::Decoding(_))
    }
}

impl From<std::io::Error> for PortalError {
    fn from(e: std::io::Error) -> Self {
        PortalError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PortalError::Timeout("rpc request")
        } else if e.is_decode() {
            PortalError::Decoding(e.to_string())
        } else {
            PortalError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(e: serde_json::Error) -> Self {
        PortalError::Decoding(e.to_string())
    }
}

impl From<toml::de::Error> for PortalError {
    fn from(e: toml::de::Error) -> Self {
        PortalError::Config(e.to_string())
    }
}
