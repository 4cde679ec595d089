//! WebSocket engine backed by `tokio-tungstenite`.
//!
//! Each `connect()` spawns a connection task that performs the handshake and
//! then pumps frames in both directions. Callbacks are posted to the engine
//! queue tagged with the connection generation that produced them; callbacks
//! from a superseded connection are dropped before reaching the delegate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, WebSocketConfig};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};

use crate::endpoint::WsRequest;
use crate::engine::{EngineFactory, TransportConfig, WebSocketEngine, WebSocketEngineDelegate};
use crate::error::{EngineError, EngineErrorKind};
use crate::queue::EngineQueue;

type DelegateSlot = Arc<Mutex<Option<Weak<dyn WebSocketEngineDelegate>>>>;

enum Command {
    Ping,
    Close,
}

struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Production [`WebSocketEngine`].
pub struct TungsteniteEngine {
    request: WsRequest,
    config: TransportConfig,
    queue: EngineQueue,
    delegate: DelegateSlot,
    generation: Arc<AtomicU64>,
    connection: Mutex<Option<Connection>>,
}

impl TungsteniteEngine {
    pub fn new(
        request: WsRequest,
        config: TransportConfig,
        queue: EngineQueue,
        delegate: Weak<dyn WebSocketEngineDelegate>,
    ) -> Self {
        Self {
            request,
            config,
            queue,
            delegate: Arc::new(Mutex::new(Some(delegate))),
            generation: Arc::new(AtomicU64::new(0)),
            connection: Mutex::new(None),
        }
    }

    /// Factory to install on the socket manager.
    pub fn factory() -> EngineFactory {
        Arc::new(|request, config, queue, delegate| {
            Arc::new(TungsteniteEngine::new(request, config, queue, delegate))
                as Arc<dyn WebSocketEngine>
        })
    }
}

impl WebSocketEngine for TungsteniteEngine {
    fn request(&self) -> &WsRequest {
        &self.request
    }

    fn connect(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let callbacks = Callbacks {
            queue: self.queue.clone(),
            delegate: self.delegate.clone(),
            current: self.generation.clone(),
            generation,
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        let task = self.queue.spawn(run_connection(
            self.request.clone(),
            self.config.clone(),
            receiver,
            callbacks,
        ));

        if let Some(previous) = self.connection.lock().replace(Connection { commands, task }) {
            debug!("replacing connection task, generation {}", generation - 1);
            previous.task.abort();
        }
    }

    fn disconnect(&self) {
        match self.connection.lock().as_ref() {
            Some(connection) => {
                if connection.commands.send(Command::Close).is_err() {
                    debug!("connection task already finished");
                }
            }
            None => debug!("disconnect requested without a connection"),
        }
    }

    fn send_ping(&self) {
        if let Some(connection) = self.connection.lock().as_ref() {
            let _ = connection.commands.send(Command::Ping);
        }
    }

    fn detach_delegate(&self) {
        *self.delegate.lock() = None;
    }
}

impl Drop for TungsteniteEngine {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.task.abort();
        }
    }
}

#[derive(Clone)]
struct Callbacks {
    queue: EngineQueue,
    delegate: DelegateSlot,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl Callbacks {
    fn post(&self, callback: impl FnOnce(&dyn WebSocketEngineDelegate) + Send + 'static) {
        let this = self.clone();
        self.queue.execute(move || {
            if this.current.load(Ordering::SeqCst) != this.generation {
                debug!("dropping callback from stale connection {}", this.generation);
                return;
            }
            let delegate = this.delegate.lock().as_ref().and_then(Weak::upgrade);
            if let Some(delegate) = delegate {
                callback(delegate.as_ref());
            }
        });
    }
}

async fn run_connection(
    request: WsRequest,
    config: TransportConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    callbacks: Callbacks,
) {
    let client_request = match build_client_request(&request) {
        Ok(r) => r,
        Err(e) => {
            warn!("cannot build handshake request: {e}");
            callbacks.post(move |d| d.did_disconnect(Some(e)));
            return;
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);

    info!("connecting to {}", request.url);
    let handshake = timeout(
        config.connect_timeout,
        connect_async_with_config(client_request, Some(ws_config), true),
    );
    tokio::pin!(handshake);

    let ws_stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(e)) => {
                    let error = classify(e, EngineErrorKind::ConnectFailed);
                    warn!("handshake failed: {error}");
                    callbacks.post(move |d| d.did_disconnect(Some(error)));
                    return;
                }
                Err(_) => {
                    let error = EngineError::new(
                        EngineErrorKind::Timeout,
                        format!("handshake timed out after {:?}", config.connect_timeout),
                    );
                    warn!("{error}");
                    callbacks.post(move |d| d.did_disconnect(Some(error)));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Ping) => {}
                Some(Command::Close) | None => {
                    debug!("close requested during handshake");
                    callbacks.post(|d| d.did_disconnect(None));
                    return;
                }
            },
        }
    };

    callbacks.post(|d| d.did_connect());
    let (mut sink, mut stream) = ws_stream.split();
    let mut closing = false;
    // Armed when a close is requested; a silent peer never answers it.
    let close_deadline = sleep(config.close_timeout);
    tokio::pin!(close_deadline);

    let outcome = loop {
        tokio::select! {
            _ = &mut close_deadline, if closing => {
                warn!("peer did not answer the close within {:?}, dropping the socket", config.close_timeout);
                break None;
            }
            command = commands.recv() => match command {
                Some(Command::Ping) => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        break Some(classify(e, EngineErrorKind::Protocol));
                    }
                }
                Some(Command::Close) => {
                    if closing {
                        continue;
                    }
                    closing = true;
                    close_deadline.as_mut().reset(Instant::now() + config.close_timeout);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_err() {
                        break None;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break None;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    callbacks.post(move |d| d.did_receive_message(&text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => callbacks.post(move |d| d.did_receive_message(&text)),
                    Err(_) => warn!("dropping binary frame that is not UTF-8"),
                },
                Some(Ok(Message::Pong(_))) => callbacks.post(|d| d.did_receive_pong()),
                Some(Ok(Message::Close(frame))) => {
                    let _ = sink.close().await;
                    if closing {
                        break None;
                    }
                    break Some(match frame {
                        Some(frame) => EngineError::closed(u16::from(frame.code), frame.reason.to_string()),
                        None => EngineError::closed(u16::from(CloseCode::Status), ""),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if closing {
                        break None;
                    }
                    break Some(classify(e, EngineErrorKind::Protocol));
                }
                None => {
                    if closing {
                        break None;
                    }
                    break Some(EngineError::closed(
                        u16::from(CloseCode::Abnormal),
                        "connection dropped without close frame",
                    ));
                }
            },
        }
    };

    drop(sink);
    drop(stream);

    match &outcome {
        Some(error) => info!("connection ended: {error}"),
        None => info!("connection closed"),
    }
    callbacks.post(move |d| d.did_disconnect(outcome));
}

fn build_client_request(request: &WsRequest) -> Result<Request, EngineError> {
    let invalid = |e: String| EngineError::new(EngineErrorKind::ConnectFailed, e);

    let mut client_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(format!("invalid url: {e}")))?;

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| invalid(format!("invalid header name {name}: {e}")))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| invalid(format!("invalid header value: {e}")))?;
        client_request.headers_mut().append(name, value);
    }
    Ok(client_request)
}

/// Map a tungstenite error onto an engine error, using `fallback` for
/// anything that is not a connectivity or closure problem.
fn classify(error: WsError, fallback: EngineErrorKind) -> EngineError {
    match error {
        WsError::Io(e) if is_offline(&e) => EngineError::new(EngineErrorKind::Offline, e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            EngineError::new(EngineErrorKind::Closed, "connection already closed")
        }
        WsError::Http(response) => EngineError {
            kind: EngineErrorKind::ConnectFailed,
            message: format!("handshake rejected with HTTP {}", response.status()),
            code: None,
        },
        other => EngineError::new(fallback, other.to_string()),
    }
}

fn is_offline(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    if matches!(error.kind(), ErrorKind::NotConnected | ErrorKind::AddrNotAvailable) {
        return true;
    }
    let message = error.to_string().to_lowercase();
    message.contains("network is unreachable")
        || message.contains("failed to lookup address")
        || message.contains("no route to host")
}
