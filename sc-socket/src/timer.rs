//! Cancelable timers that fire onto the engine queue.
//!
//! The [`Timer`] trait is the pluggable time source for the reconnection
//! timer, the heartbeat and the event batcher. Each scheduled timer returns
//! an owned [`TimerControl`]; cancelling it (or dropping it) guarantees the
//! job will not run, even when the firing was already queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};

use crate::queue::{EngineQueue, Job};

/// Repeating timer job.
pub type RepeatingJob = Arc<dyn Fn() + Send + Sync + 'static>;

/// Source of one-shot and repeating timers.
pub trait Timer: Send + Sync + 'static {
    /// Run `job` on `queue` once, after `delay`.
    fn schedule(&self, delay: Duration, queue: &EngineQueue, job: Job) -> TimerControl;

    /// Run `job` on `queue` every `period`, first firing after one period.
    fn schedule_repeating(
        &self,
        period: Duration,
        queue: &EngineQueue,
        job: RepeatingJob,
    ) -> TimerControl;
}

/// Owned handle to a scheduled timer.
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerControl {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TimerControl {
    /// Wrap a cancellation flag and the task driving it.
    pub fn new(cancelled: Arc<AtomicBool>, task: Option<JoinHandle<()>>) -> Self {
        Self { cancelled, task }
    }

    /// Stop the timer. Firings already queued become no-ops.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerControl {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Timer backed by the Tokio clock (honours `tokio::time::pause`).
///
/// Timer tasks are spawned on the queue's runtime, not the caller's.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, queue: &EngineQueue, job: Job) -> TimerControl {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let target = queue.clone();

        let task = queue.spawn(async move {
            sleep(delay).await;
            target.execute(move || {
                if !flag.load(Ordering::SeqCst) {
                    job();
                }
            });
        });

        TimerControl::new(cancelled, Some(task))
    }

    fn schedule_repeating(
        &self,
        period: Duration,
        queue: &EngineQueue,
        job: RepeatingJob,
    ) -> TimerControl {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let target = queue.clone();

        let task = queue.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                let job = job.clone();
                let flag = flag.clone();
                target.execute(move || {
                    if !flag.load(Ordering::SeqCst) {
                        job();
                    }
                });
            }
        });

        TimerControl::new(cancelled, Some(task))
    }
}
