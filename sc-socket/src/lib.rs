//! Stream Client Socket - auto-reconnecting client for the real-time event stream.
//!
//! This crate provides the socket connection manager that handles:
//! - The connection lifecycle state machine
//! - Automatic reconnection with exponential backoff and jitter
//! - Ping/pong heartbeat with missed-pong detection
//! - Decoding of server events and health checks
//! - Time-windowed batching of events for the application
//! - A WebSocket transport over tokio-tungstenite

pub mod batcher;
pub mod decoder;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod ping;
pub mod queue;
pub mod reconnect;
pub mod state;
pub mod timer;
pub mod tungstenite_engine;

// Re-export key types
pub use batcher::{Batcher, EventBatcher};
pub use decoder::{DecodeError, EventDecoder, JsonEventDecoder};
pub use endpoint::{DefaultRequestEncoder, Endpoint, RequestEncoder, WsRequest};
pub use engine::{EngineFactory, TransportConfig, WebSocketEngine, WebSocketEngineDelegate};
pub use error::{EngineError, EngineErrorKind, ErrorPayload, SocketError};
pub use events::{
    ConnectionStatusUpdated, Event, EventDispatcher, EventType, HealthCheckEvent, ServerEvent,
};
pub use manager::{ConnectionStateObserver, SocketManager, SocketManagerBuilder};
pub use ping::{HealthCheckConfig, PingController, PingControllerDelegate};
pub use queue::EngineQueue;
pub use reconnect::{DefaultReconnectionStrategy, ReconnectConfig, ReconnectionStrategy};
pub use state::{ConnectionState, ConnectionStatus, DisconnectionSource, StateEffect};
pub use timer::{Timer, TimerControl, TokioTimer};
pub use tungstenite_engine::TungsteniteEngine;
