//! Transport engine abstraction.
//!
//! A [`WebSocketEngine`] owns one physical connection for one
//! [`WsRequest`]. It reports lifecycle changes and inbound frames to a
//! [`WebSocketEngineDelegate`], always on the engine queue.

use std::sync::{Arc, Weak};
use std::time::Duration;

use sc_core::config::ServerConfig;
use sc_core::constants::{
    CLOSE_HANDSHAKE_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_MESSAGE_BYTES,
};

use crate::endpoint::WsRequest;
use crate::error::EngineError;
use crate::queue::EngineQueue;

/// Capability interface of a WebSocket transport.
///
/// All operations return immediately; their outcome is reported through the
/// delegate.
pub trait WebSocketEngine: Send + Sync {
    /// The request this engine connects with.
    fn request(&self) -> &WsRequest;

    /// Open the connection.
    fn connect(&self);

    /// Close the connection with a normal closure.
    fn disconnect(&self);

    /// Send a WebSocket ping frame.
    fn send_ping(&self);

    /// Stop delivering callbacks. Used before the engine is replaced.
    fn detach_delegate(&self);
}

/// Receiver of transport callbacks.
pub trait WebSocketEngineDelegate: Send + Sync {
    fn did_connect(&self);
    fn did_receive_message(&self, message: &str);
    fn did_receive_pong(&self);
    /// The connection is gone. `None` means a clean, locally requested close.
    fn did_disconnect(&self, error: Option<EngineError>);
}

/// Transport tuning shared by every engine a manager creates.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long the handshake may take.
    pub connect_timeout: Duration,
    /// How long a requested close waits for the peer before the socket is dropped.
    pub close_timeout: Duration,
    /// Largest inbound message accepted.
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            close_timeout: Duration::from_millis(CLOSE_HANDSHAKE_TIMEOUT_MS),
            max_message_size: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl From<&ServerConfig> for TransportConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            ..Self::default()
        }
    }
}

/// Builds engines for the socket manager.
pub type EngineFactory = Arc<
    dyn Fn(
            WsRequest,
            TransportConfig,
            EngineQueue,
            Weak<dyn WebSocketEngineDelegate>,
        ) -> Arc<dyn WebSocketEngine>
        + Send
        + Sync,
>;
