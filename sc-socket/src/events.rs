//! Socket event types and the application-facing event dispatcher.
//!
//! Defines the events decoded from the server stream, the status event the
//! socket manager synthesises itself, and a broadcast-based dispatcher that
//! can be installed as the batch handler.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::ConnectionStatus;

/// Domain event types emitted by the chat server.
///
/// Payload schemas belong to the application layer; the socket only needs
/// the names to tell supported events from unsupported ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A new message was posted (`message.new`).
    MessageNew,
    /// A message was edited (`message.updated`).
    MessageUpdated,
    /// A message was deleted (`message.deleted`).
    MessageDeleted,
    /// A channel was marked read (`message.read`).
    MessageRead,
    /// A reaction was added (`reaction.new`).
    ReactionNew,
    /// A reaction was removed (`reaction.deleted`).
    ReactionDeleted,
    /// A member started typing (`typing.start`).
    TypingStart,
    /// A member stopped typing (`typing.stop`).
    TypingStop,
    /// Channel data changed (`channel.updated`).
    ChannelUpdated,
    /// A channel was deleted (`channel.deleted`).
    ChannelDeleted,
    /// A member was added to a channel (`member.added`).
    MemberAdded,
    /// A member was removed from a channel (`member.removed`).
    MemberRemoved,
    /// A user's online presence changed (`user.presence.changed`).
    UserPresenceChanged,
    /// A new message in a channel the client is not watching (`notification.message_new`).
    NotificationMessageNew,
    /// Unknown/unsupported event type.
    Unknown(String),
}

impl EventType {
    /// Parse an event type string from the server.
    pub fn from_str(s: &str) -> Self {
        match s {
            "message.new" => Self::MessageNew,
            "message.updated" => Self::MessageUpdated,
            "message.deleted" => Self::MessageDeleted,
            "message.read" => Self::MessageRead,
            "reaction.new" => Self::ReactionNew,
            "reaction.deleted" => Self::ReactionDeleted,
            "typing.start" => Self::TypingStart,
            "typing.stop" => Self::TypingStop,
            "channel.updated" => Self::ChannelUpdated,
            "channel.deleted" => Self::ChannelDeleted,
            "member.added" => Self::MemberAdded,
            "member.removed" => Self::MemberRemoved,
            "user.presence.changed" => Self::UserPresenceChanged,
            "notification.message_new" => Self::NotificationMessageNew,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Convert to the server event string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::MessageNew => "message.new",
            Self::MessageUpdated => "message.updated",
            Self::MessageDeleted => "message.deleted",
            Self::MessageRead => "message.read",
            Self::ReactionNew => "reaction.new",
            Self::ReactionDeleted => "reaction.deleted",
            Self::TypingStart => "typing.start",
            Self::TypingStop => "typing.stop",
            Self::ChannelUpdated => "channel.updated",
            Self::ChannelDeleted => "channel.deleted",
            Self::MemberAdded => "member.added",
            Self::MemberRemoved => "member.removed",
            Self::UserPresenceChanged => "user.presence.changed",
            Self::NotificationMessageNew => "notification.message_new",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether this event type relates to messages.
    pub fn is_message_event(&self) -> bool {
        matches!(
            self,
            Self::MessageNew | Self::MessageUpdated | Self::MessageDeleted
        )
    }

    /// Whether this event type is a typing indicator.
    pub fn is_typing_event(&self) -> bool {
        matches!(self, Self::TypingStart | Self::TypingStop)
    }
}

/// An ordinary domain event with its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    /// The type of event.
    pub event_type: EventType,
    /// The full event payload from the server.
    pub data: serde_json::Value,
}

impl ServerEvent {
    /// Channel id (`cid`) the event belongs to, if present.
    pub fn cid(&self) -> Option<&str> {
        self.data.get("cid").and_then(|v| v.as_str())
    }
}

/// Liveness signal from the server carrying the connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckEvent {
    /// Server-assigned id of this connection.
    pub connection_id: String,
}

/// Synthesised whenever the externally visible connection status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatusUpdated {
    /// The new status.
    pub connection_status: ConnectionStatus,
}

/// Everything that can travel through the socket event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Server(ServerEvent),
    HealthCheck(HealthCheckEvent),
    ConnectionStatusUpdated(ConnectionStatusUpdated),
}

impl Event {
    /// Short label for logging.
    pub fn label(&self) -> &str {
        match self {
            Self::Server(e) => e.event_type.as_str(),
            Self::HealthCheck(_) => "health.check",
            Self::ConnectionStatusUpdated(_) => "connection.status_updated",
        }
    }
}

/// Broadcast-based event dispatcher for decoupled event handling.
///
/// Installed as the socket's batch handler, it re-publishes every event of a
/// flushed batch in order. Slow consumers that fall behind receive
/// `RecvError::Lagged` and may miss events.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<Event>,
}

impl EventDispatcher {
    /// Create a new EventDispatcher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive socket events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Dispatch a flushed batch, preserving its order.
    pub fn process(&self, events: Vec<Event>) {
        for event in events {
            self.dispatch(event);
        }
    }

    /// Dispatch an event to all active subscribers.
    pub fn dispatch(&self, event: Event) {
        let label = event.label().to_string();
        match self.sender.send(event) {
            Ok(count) => {
                debug!("dispatched {label} to {count} subscriber(s)");
            }
            Err(_) => {
                // No active receivers -- this is fine during startup/shutdown
                debug!("no subscribers for event {label}");
            }
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
