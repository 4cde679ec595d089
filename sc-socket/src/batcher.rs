//! Time-window batching of outgoing events.
//!
//! The first item appended to an empty window arms a one-shot timer; when it
//! fires, everything collected so far is handed to the handler as one ordered
//! batch.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::events::Event;
use crate::queue::EngineQueue;
use crate::timer::{Timer, TimerControl};

/// Batch handler.
pub type BatchHandler<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

struct Inner<T> {
    period: Duration,
    timer: Arc<dyn Timer>,
    queue: EngineQueue,
    handler: BatchHandler<T>,
    current: Mutex<Vec<T>>,
    processing_timer: Mutex<Option<TimerControl>>,
    // Serialises flushes so batches reach the handler in order.
    flush_lock: Mutex<()>,
}

/// Collects items and flushes them in batches.
pub struct Batcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Batcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Batcher for socket events.
pub type EventBatcher = Batcher<Event>;

impl<T: Send + 'static> Batcher<T> {
    pub fn new(
        period: Duration,
        timer: Arc<dyn Timer>,
        queue: EngineQueue,
        handler: BatchHandler<T>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                period,
                timer,
                queue,
                handler,
                current: Mutex::new(Vec::new()),
                processing_timer: Mutex::new(None),
                flush_lock: Mutex::new(()),
            }),
        }
    }

    /// Add an item to the current window.
    pub fn append(&self, item: T) {
        self.inner.current.lock().push(item);

        let mut processing_timer = self.inner.processing_timer.lock();
        if processing_timer.is_none() {
            let weak = Arc::downgrade(&self.inner);
            *processing_timer = Some(self.inner.timer.schedule(
                self.inner.period,
                &self.inner.queue,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        Batcher { inner }.process();
                    }
                }),
            ));
        }
    }

    /// Cancel the pending timer and flush right now, on the calling thread.
    pub fn process_immediately(&self) {
        self.process();
    }

    /// Number of items waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.current.lock().len()
    }

    fn process(&self) {
        let _flush = self.inner.flush_lock.lock();
        // Take the timer first: items appended after this point arm a new one.
        drop(self.inner.processing_timer.lock().take());
        let batch = std::mem::take(&mut *self.inner.current.lock());
        if !batch.is_empty() {
            (self.inner.handler)(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TokioTimer;

    fn batcher(period_ms: u64) -> (Batcher<u32>, Arc<Mutex<Vec<Vec<u32>>>>, EngineQueue) {
        let queue = EngineQueue::new("batch-test");
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let batcher = Batcher::new(
            Duration::from_millis(period_ms),
            Arc::new(TokioTimer),
            queue.clone(),
            Arc::new(move |batch: Vec<u32>| sink.lock().push(batch)),
        );
        (batcher, batches, queue)
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_flushes_in_order() {
        let (batcher, batches, queue) = batcher(500);
        batcher.append(1);
        batcher.append(2);
        assert_eq!(batcher.pending(), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        queue.sync().await;
        assert!(batches.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        queue.sync().await;
        assert_eq!(*batches.lock(), vec![vec![1, 2]]);
        assert_eq!(batcher.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_window_starts_on_next_append() {
        let (batcher, batches, queue) = batcher(500);
        batcher.append(1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        queue.sync().await;

        batcher.append(2);
        batcher.append(3);
        tokio::time::sleep(Duration::from_millis(600)).await;
        queue.sync().await;

        assert_eq!(*batches.lock(), vec![vec![1], vec![2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_immediately_cancels_timer() {
        let (batcher, batches, queue) = batcher(500);
        batcher.append(7);
        batcher.process_immediately();
        assert_eq!(*batches.lock(), vec![vec![7]]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.sync().await;
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_flush_skips_handler() {
        let (batcher, batches, _queue) = batcher(500);
        batcher.process_immediately();
        assert!(batches.lock().is_empty());
    }
}
