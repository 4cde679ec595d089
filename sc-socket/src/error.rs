//! Errors carried through the connection state machine.
//!
//! These errors are never returned to callers of the socket manager. They are
//! stored in [`ConnectionState`](crate::state::ConnectionState) payloads so the
//! application can render "reconnecting" or "offline" with a diagnostic cause.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sc_core::constants::{INVALID_TOKEN_ERROR_CODES, NORMAL_CLOSURE_CODE};

/// Error payload sent by the server inside an `{"error": {...}}` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Server-specific error code.
    pub code: i64,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// HTTP status code the error maps to.
    #[serde(rename = "StatusCode", default)]
    pub status_code: u16,
}

impl ErrorPayload {
    /// Whether the server rejected or expired the user token.
    pub fn is_invalid_token(&self) -> bool {
        INVALID_TOKEN_ERROR_CODES.contains(&self.code)
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {} (status {}): {}", self.code, self.status_code, self.message)
    }
}

/// Inbound message shape used by the server to announce a fatal error.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    /// The error the server is about to close the connection with.
    pub error: ErrorPayload,
}

impl ErrorEnvelope {
    /// Opportunistically parse an error envelope out of an undecodable message.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }
}

/// Broad classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The device has no usable network route.
    Offline,
    /// The TCP/TLS/WebSocket handshake failed.
    ConnectFailed,
    /// The handshake did not complete in time.
    Timeout,
    /// The connection was closed, possibly with a close frame.
    Closed,
    /// The peer violated the WebSocket protocol or an I/O error occurred mid-stream.
    Protocol,
}

/// Error reported by a transport engine when the connection ends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct EngineError {
    /// Failure classification.
    pub kind: EngineErrorKind,
    /// Description from the transport.
    pub message: String,
    /// WebSocket close code, when the peer sent one.
    pub code: Option<u16>,
}

impl EngineError {
    /// Create an engine error without a close code.
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Create an error for a connection closed with the given close code.
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Closed,
            message: reason.into(),
            code: Some(code),
        }
    }

    /// Whether the error is a loss of underlying network connectivity.
    pub fn is_internet_offline(&self) -> bool {
        self.kind == EngineErrorKind::Offline
    }

    /// Whether the connection ended with a normal, requested closure.
    pub fn is_normal_closure(&self) -> bool {
        self.code == Some(NORMAL_CLOSURE_CODE)
    }
}

/// Error wrapped into connection states and disconnection sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The server announced an error before closing the connection.
    #[error("server error {0}")]
    Server(ErrorPayload),

    /// The transport failed or was closed.
    #[error("transport error {0}")]
    Engine(#[from] EngineError),
}

impl SocketError {
    /// The server payload, when the error originated from the server.
    pub fn server_payload(&self) -> Option<&ErrorPayload> {
        match self {
            Self::Server(payload) => Some(payload),
            Self::Engine(_) => None,
        }
    }

    /// Whether the error is a loss of underlying network connectivity.
    pub fn is_internet_offline(&self) -> bool {
        matches!(self, Self::Engine(e) if e.is_internet_offline())
    }

    /// Whether the connection ended with a normal, requested closure.
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, Self::Engine(e) if e.is_normal_closure())
    }

    /// Whether the server rejected the user token.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::Server(payload) if payload.is_invalid_token())
    }
}
