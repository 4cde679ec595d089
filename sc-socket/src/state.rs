//! Connection state machine types.
//!
//! [`ConnectionState`] is the internal, fine-grained lifecycle of the socket.
//! [`ConnectionStatus`] is the coarse status the application renders. Every
//! transition yields a list of [`StateEffect`]s that the socket manager runs
//! right after committing the new state.

use crate::error::SocketError;

/// Why a disconnection happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectionSource {
    /// The user asked to disconnect.
    UserInitiated,
    /// The system asked to disconnect (e.g. connectivity loss, app suspended).
    SystemInitiated,
    /// The server closed the connection, possibly with an error.
    ServerInitiated { error: Option<SocketError> },
    /// The heartbeat went unanswered.
    NoPongReceived,
}

impl DisconnectionSource {
    /// The server-sent error attached to this source, if any.
    pub fn server_error(&self) -> Option<&SocketError> {
        match self {
            Self::ServerInitiated { error } => error.as_ref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisconnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "user"),
            Self::SystemInitiated => write!(f, "system"),
            Self::ServerInitiated { error: Some(e) } => write!(f, "server ({e})"),
            Self::ServerInitiated { error: None } => write!(f, "server"),
            Self::NoPongReceived => write!(f, "no pong received"),
        }
    }
}

/// Lifecycle state of the socket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing has happened yet.
    Initialized,
    /// The transport is opening.
    Connecting,
    /// The transport is open; waiting for the server health-check.
    WaitingForConnectionId,
    /// Fully established with a server-assigned connection id.
    Connected { connection_id: String },
    /// A disconnection was requested or announced and is in progress.
    Disconnecting { source: DisconnectionSource },
    /// The connection is down and no retry is scheduled.
    Disconnected { source: DisconnectionSource },
    /// The connection dropped and a reconnection timer is pending.
    WaitingForReconnect { error: Option<SocketError> },
}

impl ConnectionState {
    /// Whether the state is `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Whether a connection attempt is underway or established, making
    /// further `connect()` calls no-ops.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::WaitingForConnectionId | Self::Connected { .. }
        )
    }

    /// The connection id when connected.
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Self::Connected { connection_id } => Some(connection_id),
            _ => None,
        }
    }

    /// Whether a disconnected client should reconnect on its own once
    /// conditions allow (e.g. connectivity comes back).
    pub fn is_automatic_reconnection_enabled(&self) -> bool {
        let Self::Disconnected { source } = self else {
            return false;
        };
        match source {
            DisconnectionSource::UserInitiated => false,
            DisconnectionSource::SystemInitiated | DisconnectionSource::NoPongReceived => true,
            DisconnectionSource::ServerInitiated { error } => !error
                .as_ref()
                .is_some_and(|e| e.is_normal_closure() || e.is_invalid_token()),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::WaitingForConnectionId => write!(f, "waiting for connection id"),
            Self::Connected { connection_id } => write!(f, "connected ({connection_id})"),
            Self::Disconnecting { source } => write!(f, "disconnecting [{source}]"),
            Self::Disconnected { source } => write!(f, "disconnected [{source}]"),
            Self::WaitingForReconnect { error: Some(e) } => {
                write!(f, "waiting for reconnect ({e})")
            }
            Self::WaitingForReconnect { error: None } => write!(f, "waiting for reconnect"),
        }
    }
}

/// Connection status as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Initialized,
    /// Connecting, or transparently reconnecting.
    Connecting,
    Connected,
    Disconnecting,
    /// Offline with the server error that caused it, if any.
    Disconnected { error: Option<SocketError> },
}

impl From<&ConnectionState> for ConnectionStatus {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Initialized => Self::Initialized,
            ConnectionState::Connecting
            | ConnectionState::WaitingForConnectionId
            | ConnectionState::WaitingForReconnect { .. } => Self::Connecting,
            ConnectionState::Connected { .. } => Self::Connected,
            ConnectionState::Disconnecting { .. } => Self::Disconnecting,
            ConnectionState::Disconnected { source } => {
                if state.is_automatic_reconnection_enabled() {
                    Self::Connecting
                } else {
                    Self::Disconnected {
                        error: source.server_error().cloned(),
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Disconnected { error: Some(e) } => write!(f, "offline ({e})"),
            Self::Disconnected { error: None } => write!(f, "offline"),
        }
    }
}

/// Side effect of committing a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEffect {
    /// Tell the observer and the state watch channel about the new state.
    NotifyObserver,
    /// Reset the reconnection backoff after a successful connection.
    ResetReconnectionBackoff,
    /// Start or stop the heartbeat for the new state.
    UpdateHeartbeat,
    /// Publish a status-changed event into the batch stream.
    PublishStatus(ConnectionStatus),
}

impl StateEffect {
    /// Effects to run, in order, after moving from `old` to `new`.
    pub fn for_transition(old: &ConnectionState, new: &ConnectionState) -> Vec<StateEffect> {
        let mut effects = vec![StateEffect::NotifyObserver];

        if new.is_connected() {
            effects.push(StateEffect::ResetReconnectionBackoff);
        }

        effects.push(StateEffect::UpdateHeartbeat);

        let previous = ConnectionStatus::from(old);
        let next = ConnectionStatus::from(new);
        if previous != next {
            effects.push(StateEffect::PublishStatus(next));
        }

        effects
    }
}
