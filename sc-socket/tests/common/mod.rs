//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use sc_socket::{
    ConnectionState, ConnectionStateObserver, ConnectionStatus, DefaultReconnectionStrategy,
    DefaultRequestEncoder, EngineError, EngineFactory, EngineQueue, Endpoint, Event,
    ReconnectConfig, ReconnectionStrategy, SocketError, SocketManager, SocketManagerBuilder,
    TransportConfig, WebSocketEngine, WebSocketEngineDelegate, WsRequest,
};

/// Shared, ordered log of engine calls and flushed batches.
pub type Journal = Arc<Mutex<Vec<String>>>;

type DelegateSlot = Arc<Mutex<Option<Weak<dyn WebSocketEngineDelegate>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCall {
    Connect,
    Disconnect,
    SendPing,
}

/// Engine that records calls and lets tests drive the delegate callbacks.
pub struct MockEngine {
    request: WsRequest,
    queue: EngineQueue,
    delegate: DelegateSlot,
    calls: Mutex<Vec<EngineCall>>,
    journal: Journal,
    confirms_close: AtomicBool,
}

impl MockEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: EngineCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    pub fn is_detached(&self) -> bool {
        self.delegate.lock().is_none()
    }

    /// Behave like a transport whose peer never answers a close.
    pub fn withhold_close_confirmation(&self) {
        self.confirms_close.store(false, Ordering::SeqCst);
    }

    fn post(&self, callback: impl FnOnce(&dyn WebSocketEngineDelegate) + Send + 'static) {
        let slot = self.delegate.clone();
        self.queue.execute(move || {
            let delegate = slot.lock().as_ref().and_then(Weak::upgrade);
            if let Some(delegate) = delegate {
                callback(delegate.as_ref());
            }
        });
    }

    pub fn simulate_open(&self) {
        self.post(|d| d.did_connect());
    }

    pub fn simulate_message(&self, text: &str) {
        let text = text.to_string();
        self.post(move |d| d.did_receive_message(&text));
    }

    pub fn simulate_health_check(&self, connection_id: &str) {
        let text = serde_json::json!({
            "type": "health.check",
            "connection_id": connection_id,
            "cid": "*",
        })
        .to_string();
        self.post(move |d| d.did_receive_message(&text));
    }

    pub fn simulate_event(&self, event_type: &str) {
        let text = serde_json::json!({
            "type": event_type,
            "cid": "messaging:general",
        })
        .to_string();
        self.post(move |d| d.did_receive_message(&text));
    }

    pub fn simulate_pong(&self) {
        self.post(|d| d.did_receive_pong());
    }

    pub fn simulate_close(&self, error: Option<EngineError>) {
        self.post(move |d| d.did_disconnect(error));
    }
}

impl WebSocketEngine for MockEngine {
    fn request(&self) -> &WsRequest {
        &self.request
    }

    fn connect(&self) {
        self.calls.lock().push(EngineCall::Connect);
        self.journal.lock().push("engine.connect".into());
    }

    fn disconnect(&self) {
        self.calls.lock().push(EngineCall::Disconnect);
        self.journal.lock().push("engine.disconnect".into());
        // A real transport confirms a requested close without an error.
        if self.confirms_close.load(Ordering::SeqCst) {
            self.post(|d| d.did_disconnect(None));
        }
    }

    fn send_ping(&self) {
        self.calls.lock().push(EngineCall::SendPing);
    }

    fn detach_delegate(&self) {
        *self.delegate.lock() = None;
    }
}

/// Observer recording every state it is told about.
#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<ConnectionState>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }
}

impl ConnectionStateObserver for RecordingObserver {
    fn connection_state_did_change(&self, state: &ConnectionState) {
        self.states.lock().push(state.clone());
    }
}

/// Policy returning the same answer every time.
pub struct FixedDelayStrategy {
    pub delay: Option<Duration>,
}

impl ReconnectionStrategy for FixedDelayStrategy {
    fn reconnection_delay(&mut self, _error: Option<&SocketError>) -> Option<Duration> {
        self.delay
    }

    fn successfully_connected(&mut self) {}
}

/// Deterministic exponential backoff: 1s, 2s, 4s, ... capped at 25s.
pub fn backoff_without_jitter() -> DefaultReconnectionStrategy {
    DefaultReconnectionStrategy::new(ReconnectConfig {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(25),
        max_attempts: 0,
        jitter_factor: 0.0,
    })
}

pub fn test_encoder() -> DefaultRequestEncoder {
    DefaultRequestEncoder::new("https://chat.example.com", "test-key").with_user_token("jwt")
}

/// A manager wired to mock engines, with everything it emits recorded.
pub struct Harness {
    pub manager: SocketManager,
    pub engines: Arc<Mutex<Vec<Arc<MockEngine>>>>,
    pub batches: Arc<Mutex<Vec<Vec<Event>>>>,
    pub observer: Arc<RecordingObserver>,
    pub journal: Journal,
}

impl Harness {
    /// Harness with deterministic backoff and the default connect endpoint.
    pub fn new() -> Self {
        Self::build(|builder| {
            builder
                .with_connect_endpoint(Endpoint::connect())
                .with_reconnection_strategy(backoff_without_jitter())
        })
    }

    pub fn build(configure: impl FnOnce(SocketManagerBuilder) -> SocketManagerBuilder) -> Self {
        sc_core::logging::init_console_logging("sc_socket=debug");

        let engines: Arc<Mutex<Vec<Arc<MockEngine>>>> = Arc::new(Mutex::new(Vec::new()));
        let batches: Arc<Mutex<Vec<Vec<Event>>>> = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(RecordingObserver::default());
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));

        let factory_engines = engines.clone();
        let factory_journal = journal.clone();
        let factory: EngineFactory = Arc::new(
            move |request: WsRequest,
                  _config: TransportConfig,
                  queue: EngineQueue,
                  delegate: Weak<dyn WebSocketEngineDelegate>| {
                let engine = Arc::new(MockEngine {
                    request,
                    queue,
                    delegate: Arc::new(Mutex::new(Some(delegate))),
                    calls: Mutex::new(Vec::new()),
                    journal: factory_journal.clone(),
                    confirms_close: AtomicBool::new(true),
                });
                factory_engines.lock().push(engine.clone());
                engine as Arc<dyn WebSocketEngine>
            },
        );

        let handler_batches = batches.clone();
        let handler_journal = journal.clone();
        let builder = SocketManager::builder(test_encoder())
            .with_engine_factory(factory)
            .with_state_observer(observer.clone())
            .with_event_handler(move |batch: Vec<Event>| {
                let labels: Vec<&str> = batch.iter().map(Event::label).collect();
                handler_journal
                    .lock()
                    .push(format!("batch[{}]", labels.join(",")));
                handler_batches.lock().push(batch);
            });

        Self {
            manager: configure(builder).build(),
            engines,
            batches,
            observer,
            journal,
        }
    }

    /// The most recently created engine.
    pub fn engine(&self) -> Arc<MockEngine> {
        self.engines
            .lock()
            .last()
            .cloned()
            .expect("no engine has been created")
    }

    pub fn engine_count(&self) -> usize {
        self.engines.lock().len()
    }

    /// Run queued work, including work queued by queued work.
    pub async fn settle(&self) {
        for _ in 0..4 {
            self.manager.flush_engine_queue().await;
        }
    }

    /// Let virtual time pass, then settle.
    pub async fn advance(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
        self.settle().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.connection_state()
    }

    /// Drive the manager to `Connected(connection_id)`.
    pub async fn connect_fully(&self, connection_id: &str) {
        self.manager.connect();
        self.settle().await;
        let engine = self.engine();
        engine.simulate_open();
        engine.simulate_health_check(connection_id);
        self.settle().await;
    }

    /// Every event from every flushed batch, in order.
    pub fn events(&self) -> Vec<Event> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Published status updates, in order.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ConnectionStatusUpdated(update) => Some(update.connection_status),
                _ => None,
            })
            .collect()
    }
}
