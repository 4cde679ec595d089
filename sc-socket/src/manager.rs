//! Real-time socket connection manager.
//!
//! [`SocketManager`] keeps one logical connection to the streaming endpoint.
//! It owns the connection state machine, creates the transport engine, feeds
//! decoded events into the batcher and decides when to reconnect.
//!
//! Every transport operation and callback runs on the manager's
//! [`EngineQueue`]. Transitions additionally hold a reentrant lock, so a
//! decision and its side effects are never interleaved with another
//! transition while effect handlers can still call back into the manager.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sc_core::config::AppConfig;
use sc_core::constants::{CLOSE_CONFIRM_TIMEOUT_MS, EVENT_BATCH_PERIOD_MS, SERVER_CLOSE_GRACE_MS};

use crate::batcher::{BatchHandler, EventBatcher};
use crate::decoder::{DecodeError, EventDecoder, JsonEventDecoder};
use crate::endpoint::{DefaultRequestEncoder, Endpoint, RequestEncoder};
use crate::engine::{EngineFactory, TransportConfig, WebSocketEngine, WebSocketEngineDelegate};
use crate::error::{EngineError, ErrorEnvelope, SocketError};
use crate::events::{ConnectionStatusUpdated, Event, EventDispatcher};
use crate::ping::{HealthCheckConfig, PingController, PingControllerDelegate};
use crate::queue::EngineQueue;
use crate::reconnect::{DefaultReconnectionStrategy, ReconnectConfig, ReconnectionStrategy};
use crate::state::{ConnectionState, DisconnectionSource, StateEffect};
use crate::timer::{Timer, TimerControl, TokioTimer};
use crate::tungstenite_engine::TungsteniteEngine;

/// Synchronous observer of every state transition.
pub trait ConnectionStateObserver: Send + Sync {
    fn connection_state_did_change(&self, state: &ConnectionState);
}

/// Builder for [`SocketManager`].
pub struct SocketManagerBuilder {
    request_encoder: Arc<dyn RequestEncoder>,
    connect_endpoint: Option<Endpoint>,
    reconnection_strategy: Box<dyn ReconnectionStrategy>,
    health_config: HealthCheckConfig,
    timer: Arc<dyn Timer>,
    engine_factory: EngineFactory,
    decoder: Arc<dyn EventDecoder>,
    event_handler: Option<BatchHandler<Event>>,
    state_observer: Option<Arc<dyn ConnectionStateObserver>>,
    batch_period: Duration,
    transport_config: TransportConfig,
    server_close_grace: Duration,
    close_confirm_timeout: Duration,
}

impl SocketManagerBuilder {
    fn new(request_encoder: Arc<dyn RequestEncoder>) -> Self {
        Self {
            request_encoder,
            connect_endpoint: None,
            reconnection_strategy: Box::new(DefaultReconnectionStrategy::default()),
            health_config: HealthCheckConfig::default(),
            timer: Arc::new(TokioTimer),
            engine_factory: TungsteniteEngine::factory(),
            decoder: Arc::new(JsonEventDecoder),
            event_handler: None,
            state_observer: None,
            batch_period: Duration::from_millis(EVENT_BATCH_PERIOD_MS),
            transport_config: TransportConfig::default(),
            server_close_grace: Duration::from_millis(SERVER_CLOSE_GRACE_MS),
            close_confirm_timeout: Duration::from_millis(CLOSE_CONFIRM_TIMEOUT_MS),
        }
    }

    pub fn with_connect_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.connect_endpoint = Some(endpoint);
        self
    }

    pub fn with_reconnection_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnection_strategy = Box::new(strategy);
        self
    }

    /// Set custom health check configuration.
    pub fn with_health_config(mut self, config: HealthCheckConfig) -> Self {
        self.health_config = config;
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = factory;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn EventDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Receive flushed event batches.
    pub fn with_event_handler(mut self, handler: impl Fn(Vec<Event>) + Send + Sync + 'static) -> Self {
        self.event_handler = Some(Arc::new(handler));
        self
    }

    /// Broadcast flushed batches through `dispatcher`.
    pub fn with_dispatcher(self, dispatcher: EventDispatcher) -> Self {
        self.with_event_handler(move |batch| dispatcher.process(batch))
    }

    pub fn with_state_observer(mut self, observer: Arc<dyn ConnectionStateObserver>) -> Self {
        self.state_observer = Some(observer);
        self
    }

    pub fn with_batch_period(mut self, period: Duration) -> Self {
        self.batch_period = period;
        self
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// How long to wait for the server to close the socket after it sent an error.
    pub fn with_server_close_grace(mut self, grace: Duration) -> Self {
        self.server_close_grace = grace;
        self
    }

    /// How long a requested close may go unconfirmed by the engine before the
    /// manager abandons the engine and finishes the disconnect itself.
    pub fn with_close_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.close_confirm_timeout = timeout;
        self
    }

    /// Build the manager. Must be called from within a Tokio runtime; the
    /// built manager can then be used from any thread.
    pub fn build(self) -> SocketManager {
        let engine_queue = EngineQueue::new("socket-engine");
        let (state_tx, _) = watch::channel(ConnectionState::Initialized);

        let handler: BatchHandler<Event> = match self.event_handler {
            Some(handler) => handler,
            None => Arc::new(|batch: Vec<Event>| {
                debug!("dropping batch of {} event(s) without a handler", batch.len());
            }),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let ping_delegate: Weak<dyn PingControllerDelegate> = weak.clone();
            Inner {
                state: RwLock::new(ConnectionState::Initialized),
                transition_lock: ReentrantMutex::new(()),
                state_tx,
                observer: self.state_observer,
                request_encoder: self.request_encoder,
                engine_factory: self.engine_factory,
                transport_config: self.transport_config,
                decoder: self.decoder,
                connect_endpoint: RwLock::new(self.connect_endpoint),
                engine: Mutex::new(None),
                reconnection_strategy: Mutex::new(self.reconnection_strategy),
                reconnection_timer: Mutex::new(None),
                close_timer: Mutex::new(None),
                server_close_grace: self.server_close_grace,
                close_confirm_timeout: self.close_confirm_timeout,
                ping_controller: PingController::new(
                    self.health_config,
                    self.timer.clone(),
                    engine_queue.clone(),
                    ping_delegate,
                ),
                events_batch: EventBatcher::new(
                    self.batch_period,
                    self.timer.clone(),
                    engine_queue.clone(),
                    handler,
                ),
                timer: self.timer,
                engine_queue,
                self_ref: weak.clone(),
            }
        });

        SocketManager { inner }
    }
}

/// Connection manager for the real-time event stream.
///
/// Manages the full lifecycle of the socket connection including:
/// - Lazy engine creation, reused while the connect request is unchanged
/// - Automatic reconnection with exponential backoff + jitter
/// - Heartbeat pings while connected
/// - Batched hand-off of decoded events to the application
#[derive(Clone)]
pub struct SocketManager {
    inner: Arc<Inner>,
}

impl SocketManager {
    /// Start building a manager that encodes requests with `encoder`.
    pub fn builder(encoder: impl RequestEncoder + 'static) -> SocketManagerBuilder {
        SocketManagerBuilder::new(Arc::new(encoder))
    }

    /// Builder preconfigured from the application configuration.
    pub fn builder_from_config(config: &AppConfig) -> SocketManagerBuilder {
        let socket = &config.socket;
        Self::builder(DefaultRequestEncoder::from_server_config(&config.server))
            .with_connect_endpoint(Endpoint::connect())
            .with_reconnection_strategy(DefaultReconnectionStrategy::new(ReconnectConfig::from(socket)))
            .with_health_config(HealthCheckConfig::from(socket))
            .with_batch_period(Duration::from_millis(socket.batch_period_ms))
            .with_transport_config(TransportConfig::from(&config.server))
            .with_server_close_grace(Duration::from_millis(socket.server_close_grace_ms))
    }

    /// Open the connection unless one is already being established.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the connection, flushing buffered events first.
    pub fn disconnect(&self, source: DisconnectionSource) {
        self.inner.disconnect(source);
    }

    /// Tell the manager whether the network is usable.
    pub fn network_reachability_changed(&self, available: bool) {
        let state = self.connection_state();
        if available {
            if state.is_automatic_reconnection_enabled() {
                info!("network is back, reconnecting");
                self.connect();
            }
        } else if state.is_active() {
            info!("network lost, disconnecting");
            self.disconnect(DisconnectionSource::SystemInitiated);
        }
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.read().clone()
    }

    /// Server-assigned id of the current connection.
    pub fn connection_id(&self) -> Option<String> {
        self.inner.state.read().connection_id().map(str::to_string)
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Replace the endpoint; takes effect on the next `connect()`.
    pub fn set_connect_endpoint(&self, endpoint: Option<Endpoint>) {
        *self.inner.connect_endpoint.write() = endpoint;
    }

    pub fn connect_endpoint(&self) -> Option<Endpoint> {
        self.inner.connect_endpoint.read().clone()
    }

    /// Time the last pong or health check arrived.
    pub fn last_pong_at(&self) -> Option<tokio::time::Instant> {
        self.inner.ping_controller.last_pong_at()
    }

    /// Wait until all work queued so far has run.
    pub async fn flush_engine_queue(&self) {
        self.inner.engine_queue.sync().await;
    }
}

struct Inner {
    state: RwLock<ConnectionState>,
    transition_lock: ReentrantMutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    observer: Option<Arc<dyn ConnectionStateObserver>>,
    request_encoder: Arc<dyn RequestEncoder>,
    engine_factory: EngineFactory,
    transport_config: TransportConfig,
    decoder: Arc<dyn EventDecoder>,
    connect_endpoint: RwLock<Option<Endpoint>>,
    engine: Mutex<Option<Arc<dyn WebSocketEngine>>>,
    engine_queue: EngineQueue,
    timer: Arc<dyn Timer>,
    reconnection_strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    reconnection_timer: Mutex<Option<TimerControl>>,
    /// Server-error grace or close-confirmation deadline; at most one at a time.
    close_timer: Mutex<Option<TimerControl>>,
    server_close_grace: Duration,
    close_confirm_timeout: Duration,
    ping_controller: PingController,
    events_batch: EventBatcher,
    self_ref: Weak<Inner>,
}

impl Inner {
    /// Commit the state returned by `next` and run its effects.
    ///
    /// `next` returning `None` leaves the state untouched.
    fn transition(&self, next: impl FnOnce(&ConnectionState) -> Option<ConnectionState>) -> bool {
        let _guard = self.transition_lock.lock();
        let (old, new) = {
            let mut state = self.state.write();
            let Some(new) = next(&state) else {
                return false;
            };
            let old = std::mem::replace(&mut *state, new.clone());
            (old, new)
        };

        info!("socket state: {} -> {}", old, new);
        for effect in StateEffect::for_transition(&old, &new) {
            if effect != StateEffect::NotifyObserver && *self.state.read() != new {
                debug!("state changed while applying effects of {new}");
                break;
            }
            self.apply_effect(effect, &new);
        }
        true
    }

    fn set_state(&self, state: ConnectionState) {
        self.transition(|_| Some(state));
    }

    fn apply_effect(&self, effect: StateEffect, state: &ConnectionState) {
        match effect {
            StateEffect::NotifyObserver => {
                self.state_tx.send_replace(state.clone());
                if let Some(observer) = &self.observer {
                    observer.connection_state_did_change(state);
                }
            }
            StateEffect::ResetReconnectionBackoff => {
                self.reconnection_strategy.lock().successfully_connected();
            }
            StateEffect::UpdateHeartbeat => {
                self.ping_controller.connection_state_did_change(state);
            }
            StateEffect::PublishStatus(connection_status) => {
                self.events_batch
                    .append(Event::ConnectionStatusUpdated(ConnectionStatusUpdated {
                        connection_status,
                    }));
            }
        }
    }

    fn connect(&self) {
        let _guard = self.transition_lock.lock();

        let endpoint = self.connect_endpoint.read().clone();
        let Some(endpoint) = endpoint else {
            error!("connect() called without a connect endpoint");
            return;
        };

        let current = self.state.read().clone();
        if current.is_active() {
            debug!("already {current}, skipping connect");
            return;
        }

        let engine = self.create_engine_if_needed(&endpoint);
        self.cancel_reconnection_timer();
        self.cancel_close_timer();
        self.set_state(ConnectionState::Connecting);
        self.engine_queue.execute(move || engine.connect());
    }

    fn create_engine_if_needed(&self, endpoint: &Endpoint) -> Arc<dyn WebSocketEngine> {
        let request = match self.request_encoder.encode_request(endpoint) {
            Ok(request) => request,
            Err(e) => panic!("failed to encode the connect request for {:?}: {e}", endpoint.path),
        };

        let mut slot = self.engine.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.request() == &request {
                return existing.clone();
            }
            info!("connect request changed, replacing the socket engine");
            existing.detach_delegate();
            let previous = existing.clone();
            self.engine_queue.execute(move || previous.disconnect());
        }

        let delegate: Weak<dyn WebSocketEngineDelegate> = self.self_ref.clone();
        let engine = (self.engine_factory)(
            request,
            self.transport_config.clone(),
            self.engine_queue.clone(),
            delegate,
        );
        *slot = Some(engine.clone());
        engine
    }

    fn disconnect(&self, source: DisconnectionSource) {
        let _guard = self.transition_lock.lock();

        let engine = self.engine.lock().clone();
        let has_live_connection = engine.is_some()
            && matches!(
                *self.state.read(),
                ConnectionState::Connecting
                    | ConnectionState::WaitingForConnectionId
                    | ConnectionState::Connected { .. }
                    | ConnectionState::Disconnecting { .. }
            );

        self.cancel_reconnection_timer();
        self.cancel_close_timer();
        self.set_state(ConnectionState::Disconnecting {
            source: source.clone(),
        });
        if has_live_connection {
            self.await_close_confirmation(ConnectionState::Disconnecting {
                source: source.clone(),
            });
        }

        let events_batch = self.events_batch.clone();
        let weak = self.self_ref.clone();
        self.engine_queue.execute(move || {
            events_batch.process_immediately();

            if has_live_connection {
                if let Some(engine) = engine {
                    engine.disconnect();
                }
                return;
            }

            // Nothing will report a close; finish the transition here.
            if let Some(inner) = weak.upgrade() {
                let expected = ConnectionState::Disconnecting {
                    source: source.clone(),
                };
                inner.transition(|current| {
                    (*current == expected).then(|| ConnectionState::Disconnected { source })
                });
            }
        });
    }

    fn cancel_reconnection_timer(&self) {
        if let Some(mut timer) = self.reconnection_timer.lock().take() {
            debug!("cancelling pending reconnection");
            timer.cancel();
        }
    }

    fn cancel_close_timer(&self) {
        if let Some(mut timer) = self.close_timer.lock().take() {
            timer.cancel();
        }
    }

    fn arm_close_timer(&self, delay: Duration, job: impl FnOnce(&Inner) + Send + 'static) {
        let weak = self.self_ref.clone();
        let control = self.timer.schedule(
            delay,
            &self.engine_queue,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.close_timer.lock().take();
                    job(&inner);
                }
            }),
        );
        if let Some(mut previous) = self.close_timer.lock().replace(control) {
            previous.cancel();
        }
    }

    /// Bound the wait for the engine to confirm a close of `expected`.
    fn await_close_confirmation(&self, expected: ConnectionState) {
        self.arm_close_timer(self.close_confirm_timeout, move |inner| {
            inner.close_confirmation_timed_out(&expected);
        });
    }

    fn close_confirmation_timed_out(&self, expected: &ConnectionState) {
        let _guard = self.transition_lock.lock();
        if *self.state.read() != *expected {
            return;
        }

        warn!("engine did not confirm the close in time, abandoning it");
        if let Some(engine) = self.engine.lock().take() {
            engine.detach_delegate();
        }
        WebSocketEngineDelegate::did_disconnect(self, None);
    }

    fn schedule_reconnection(&self, delay: Duration) {
        let weak = self.self_ref.clone();
        let control = self.timer.schedule(
            delay,
            &self.engine_queue,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.reconnection_timer.lock().take();
                    inner.connect();
                }
            }),
        );
        if let Some(mut previous) = self.reconnection_timer.lock().replace(control) {
            previous.cancel();
        }
    }

    fn handle_server_error(&self, error: SocketError) {
        let _guard = self.transition_lock.lock();

        let source = DisconnectionSource::ServerInitiated { error: Some(error) };
        self.set_state(ConnectionState::Disconnecting {
            source: source.clone(),
        });

        let expected = ConnectionState::Disconnecting { source };
        self.arm_close_timer(self.server_close_grace, move |inner| {
            inner.server_close_grace_elapsed(expected);
        });
    }

    fn server_close_grace_elapsed(&self, expected: ConnectionState) {
        let _guard = self.transition_lock.lock();
        if *self.state.read() != expected {
            return;
        }

        let engine = self.engine.lock().clone();
        match engine {
            Some(engine) => {
                warn!("server did not close the connection after an error, closing it");
                engine.disconnect();
                self.await_close_confirmation(expected);
            }
            None => {
                if let ConnectionState::Disconnecting { source } = expected {
                    self.set_state(ConnectionState::Disconnected { source });
                }
            }
        }
    }
}

impl WebSocketEngineDelegate for Inner {
    fn did_connect(&self) {
        let changed = self.transition(|current| {
            matches!(current, ConnectionState::Connecting)
                .then_some(ConnectionState::WaitingForConnectionId)
        });
        if !changed {
            debug!("ignoring transport open in state {}", self.state.read());
        }
    }

    fn did_receive_message(&self, message: &str) {
        match self.decoder.decode(message.as_bytes()) {
            Ok(Event::HealthCheck(health_check)) => {
                self.ping_controller.pong_received();
                let connection_id = health_check.connection_id;
                let changed = self.transition(|current| {
                    matches!(
                        current,
                        ConnectionState::WaitingForConnectionId | ConnectionState::Connected { .. }
                    )
                    .then(|| ConnectionState::Connected { connection_id })
                });
                if !changed {
                    debug!("ignoring health check in state {}", self.state.read());
                }
            }
            Ok(event) => {
                debug!("socket event: {}", event.label());
                self.events_batch.append(event);
            }
            Err(DecodeError::UnsupportedEventType(event_type)) => {
                info!("skipping unsupported event type: {event_type}");
            }
            Err(DecodeError::Malformed(reason)) => match ErrorEnvelope::parse(message.as_bytes()) {
                Some(envelope) => {
                    warn!("server reported an error: {}", envelope.error);
                    self.handle_server_error(SocketError::Server(envelope.error));
                }
                None => {
                    warn!("failed to decode socket message: {reason}");
                    debug!("undecodable payload: {message}");
                }
            },
        }
    }

    fn did_receive_pong(&self) {
        self.ping_controller.pong_received();
    }

    fn did_disconnect(&self, engine_error: Option<EngineError>) {
        let _guard = self.transition_lock.lock();
        self.cancel_close_timer();

        let current = self.state.read().clone();
        let current_source = match &current {
            ConnectionState::Disconnecting { source } => Some(source.clone()),
            _ => None,
        };

        // A server-initiated disconnect keeps its pre-marked error, even none.
        let error = match &current_source {
            Some(DisconnectionSource::ServerInitiated { error }) => error.clone(),
            _ => engine_error.map(SocketError::from),
        };

        let suppressed = matches!(
            current_source,
            Some(DisconnectionSource::UserInitiated | DisconnectionSource::SystemInitiated)
        );

        if !suppressed {
            let delay = self
                .reconnection_strategy
                .lock()
                .reconnection_delay(error.as_ref());
            if let Some(delay) = delay {
                info!("reconnecting in {:.1}s", delay.as_secs_f64());
                self.set_state(ConnectionState::WaitingForReconnect { error });
                self.schedule_reconnection(delay);
                return;
            }
        }

        let source = match current_source {
            Some(source) => source,
            None if error.as_ref().is_some_and(SocketError::is_internet_offline) => {
                DisconnectionSource::SystemInitiated
            }
            None => DisconnectionSource::ServerInitiated { error },
        };
        self.set_state(ConnectionState::Disconnected { source });
    }
}

impl PingControllerDelegate for Inner {
    fn send_ping(&self) {
        let engine = self.engine.lock().clone();
        if let Some(engine) = engine {
            engine.send_ping();
        }
    }

    fn disconnect_on_no_pong_received(&self) {
        self.disconnect(DisconnectionSource::NoPongReceived);
    }
}
