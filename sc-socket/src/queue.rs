//! Serial execution context for engine operations and callbacks.
//!
//! Every transport operation, transport callback and timer firing is posted
//! to one [`EngineQueue`]. Jobs run one at a time in submission order, which
//! turns the socket manager into an effectively single-threaded state machine.
//!
//! The queue also remembers the runtime it was created on, so timers and
//! connection tasks can be spawned from threads outside that runtime.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A unit of work for the engine queue.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a serial job queue backed by a Tokio task.
#[derive(Clone)]
pub struct EngineQueue {
    sender: mpsc::UnboundedSender<Job>,
    runtime: Handle,
    label: Arc<str>,
}

impl EngineQueue {
    /// Spawn the queue's worker task.
    ///
    /// Must be called from within a Tokio runtime. The worker exits once every
    /// handle has been dropped.
    pub fn new(label: &str) -> Self {
        Self::with_runtime(label, Handle::current())
    }

    /// Spawn the worker on `runtime`; usable from any thread.
    pub fn with_runtime(label: &str, runtime: Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let label: Arc<str> = Arc::from(label);

        let worker_label = label.clone();
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                // A panicking job (e.g. an application handler) must not take
                // the queue down with it.
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("job on engine queue {worker_label} panicked");
                }
            }
            debug!("engine queue {worker_label} stopped");
        });

        Self {
            sender,
            runtime,
            label,
        }
    }

    /// Spawn a task on the queue's runtime, whatever thread calls this.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Queue label, used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Post a job; returns immediately.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(job)).is_err() {
            warn!("engine queue {} is gone, dropping job", self.label);
        }
    }

    /// Wait until every job posted before this call has run.
    pub async fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl std::fmt::Debug for EngineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineQueue").field("label", &self.label).finish()
    }
}
