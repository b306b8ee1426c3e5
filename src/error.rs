//! Error taxonomy for the sync client.
//!
//! None of these are fatal: transport errors drive a reconnect, protocol errors
//! drop one message, fetch errors wait for the next trigger.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Push-channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not establish the socket.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Socket errored while reading.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// An inbound push message could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed push message: {reason}")]
pub struct ProtocolError {
    pub reason: String,
}

impl ProtocolError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Range query failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network failure before a response arrived.
    #[error("range request failed: {0}")]
    Transport(String),

    /// Server answered with a non-success status.
    #[error("range endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected document.
    #[error("malformed range response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, FetchError::Malformed(_))
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// The server returned as many records as it is willing to send, so the range
/// may hold more data than is displayed. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitWarning {
    pub count: u64,
    pub limit: u64,
}

impl fmt::Display for LimitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record limit reached: {} records returned (limit {}); narrow the range to see everything",
            self.count, self.limit
        )
    }
}
