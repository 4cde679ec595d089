//! Heartbeat (ping/pong) controller.
//!
//! While the socket is connected, a ping is sent every `interval`. Each ping
//! arms a `timeout` deadline; a deadline that elapses without a pong counts
//! as a missed pong and the ping is resent. Reaching `max_missed_pings`
//! asks the delegate to drop the connection.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use sc_core::config::SocketConfig;

use crate::queue::EngineQueue;
use crate::state::ConnectionState;
use crate::timer::{Timer, TimerControl};

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between health check pings.
    pub interval: Duration,
    /// Timeout for each ping response.
    pub timeout: Duration,
    /// Number of missed pongs before considering the connection dead.
    pub max_missed_pings: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::from(&SocketConfig::default())
    }
}

impl From<&SocketConfig> for HealthCheckConfig {
    fn from(config: &SocketConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.ping_interval_secs),
            timeout: Duration::from_secs(config.pong_timeout_secs),
            max_missed_pings: config.max_missed_pongs.max(1),
        }
    }
}

/// Receiver of heartbeat decisions.
pub trait PingControllerDelegate: Send + Sync {
    fn send_ping(&self);
    fn disconnect_on_no_pong_received(&self);
}

#[derive(Default)]
struct PingState {
    ping_timer: Option<TimerControl>,
    deadline_timer: Option<TimerControl>,
    ping_sent_at: Option<Instant>,
    last_pong_at: Option<Instant>,
    missed_pongs: u32,
}

impl PingState {
    fn reset(&mut self) {
        self.ping_timer = None;
        self.deadline_timer = None;
        self.ping_sent_at = None;
        self.missed_pongs = 0;
    }
}

struct Shared {
    config: HealthCheckConfig,
    delegate: Weak<dyn PingControllerDelegate>,
    timer: Arc<dyn Timer>,
    queue: EngineQueue,
    state: Mutex<PingState>,
}

impl Shared {
    fn tick(self: &Arc<Self>) {
        if self.state.lock().ping_sent_at.is_some() {
            // The deadline timer owns outstanding pings.
            return;
        }
        self.send_ping();
    }

    fn send_ping(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.ping_sent_at = Some(Instant::now());
            let weak = Arc::downgrade(self);
            state.deadline_timer = Some(self.timer.schedule(
                self.config.timeout,
                &self.queue,
                Box::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.deadline_elapsed();
                    }
                }),
            ));
        }

        debug!("sending ping");
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.send_ping();
        }
    }

    fn deadline_elapsed(self: &Arc<Self>) {
        let missed = {
            let mut state = self.state.lock();
            if state.ping_sent_at.is_none() {
                return;
            }
            state.deadline_timer = None;
            state.missed_pongs += 1;
            state.missed_pongs
        };

        if missed >= self.config.max_missed_pings {
            warn!("no pong received after {missed} ping(s), dropping connection");
            if let Some(delegate) = self.delegate.upgrade() {
                delegate.disconnect_on_no_pong_received();
            }
        } else {
            warn!(
                "missed pong #{missed}/{}, resending ping",
                self.config.max_missed_pings
            );
            self.send_ping();
        }
    }
}

/// Keeps an established connection honest.
pub struct PingController {
    shared: Arc<Shared>,
}

impl PingController {
    pub fn new(
        config: HealthCheckConfig,
        timer: Arc<dyn Timer>,
        queue: EngineQueue,
        delegate: Weak<dyn PingControllerDelegate>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                delegate,
                timer,
                queue,
                state: Mutex::new(PingState::default()),
            }),
        }
    }

    /// Restart the heartbeat for `state`: run it only while connected.
    pub fn connection_state_did_change(&self, state: &ConnectionState) {
        let mut ping_state = self.shared.state.lock();
        ping_state.reset();

        if state.is_connected() {
            let weak = Arc::downgrade(&self.shared);
            ping_state.ping_timer = Some(self.shared.timer.schedule_repeating(
                self.shared.config.interval,
                &self.shared.queue,
                Arc::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        shared.tick();
                    }
                }),
            ));
        }
    }

    /// Record a pong (or any proof of life from the server).
    pub fn pong_received(&self) {
        let mut state = self.shared.state.lock();
        state.ping_sent_at = None;
        state.deadline_timer = None;
        state.missed_pongs = 0;
        state.last_pong_at = Some(Instant::now());
    }

    pub fn last_pong_at(&self) -> Option<Instant> {
        self.shared.state.lock().last_pong_at
    }

    pub fn is_ping_outstanding(&self) -> bool {
        self.shared.state.lock().ping_sent_at.is_some()
    }

    pub fn missed_pongs(&self) -> u32 {
        self.shared.state.lock().missed_pongs
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.shared.config
    }
}
