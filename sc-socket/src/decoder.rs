//! Decoding of raw socket payloads into typed events.

use serde::Deserialize;
use thiserror::Error;

use sc_core::constants::HEALTH_CHECK_EVENT_TYPE;

use crate::events::{Event, EventType, HealthCheckEvent, ServerEvent};

/// Why a payload could not be turned into an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is a well-formed event of a type this client does not handle.
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// The payload is not an event at all.
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Turns raw payloads into events.
pub trait EventDecoder: Send + Sync {
    /// Decode a single inbound payload.
    fn decode(&self, data: &[u8]) -> Result<Event, DecodeError>;
}

#[derive(Deserialize)]
struct EventHeader {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    connection_id: Option<String>,
}

/// Decoder for JSON events of the form `{"type": "...", ...}`.
#[derive(Debug, Clone, Default)]
pub struct JsonEventDecoder;

impl JsonEventDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl EventDecoder for JsonEventDecoder {
    fn decode(&self, data: &[u8]) -> Result<Event, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_slice(data).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let header = EventHeader::deserialize(&value)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if header.event_type == HEALTH_CHECK_EVENT_TYPE {
            let connection_id = header.connection_id.ok_or_else(|| {
                DecodeError::Malformed("health check without connection_id".into())
            })?;
            return Ok(Event::HealthCheck(HealthCheckEvent { connection_id }));
        }

        match EventType::from_str(&header.event_type) {
            EventType::Unknown(name) => Err(DecodeError::UnsupportedEventType(name)),
            event_type => Ok(Event::Server(ServerEvent {
                event_type,
                data: value,
            })),
        }
    }
}
