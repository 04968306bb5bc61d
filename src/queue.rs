//! Bounded retry queue with a background drain loop
//!
//! FIFO over accepted entries; `enqueue` is non-blocking and reports a full
//! queue instead of evicting, `dequeue` parks the drain worker until an
//! entry arrives or shutdown fires. At most one drainer runs at a time.
//! Entries re-enqueued after a failed processing attempt go to the back, so
//! strict FIFO is not preserved across failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;

/// A queued item plus how many processing attempts it has seen
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub item: T,
    pub attempts: u32,
}

/// Callback driven by [`RetryQueue::drain`]
#[async_trait]
pub trait QueueProcessor<T>: Send + Sync {
    /// Process one entry. An error re-enqueues the entry with an
    /// incremented attempt count.
    async fn process(&self, shutdown: &Shutdown, item: &T, attempts: u32) -> Result<()>;

    /// Called when a failed entry could not be re-enqueued because the
    /// queue was full at that moment. This is the terminal path.
    async fn reject(&self, item: &T, attempts: u32);
}

/// Bounded FIFO retry queue
pub struct RetryQueue<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
    capacity: usize,
    notify: Notify,
    draining: AtomicBool,
    /// Total entries ever accepted
    total_enqueued: AtomicU64,
    /// Total entries rejected because the queue was full
    total_rejected: AtomicU64,
}

impl<T: Send> RetryQueue<T> {
    /// Create a queue with a fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            draining: AtomicBool::new(false),
            total_enqueued: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue; `Error::QueueFull` when at capacity.
    pub fn enqueue(&self, item: T) -> Result<()> {
        self.push(Entry { item, attempts: 0 }).map_err(|_| Error::QueueFull)
    }

    fn push(&self, entry: Entry<T>) -> std::result::Result<(), Entry<T>> {
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                return Err(entry);
            }
            entries.push_back(entry);
        }
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest entry, parking until one arrives. Returns `None` once
    /// shutdown fires.
    pub async fn dequeue(&self, shutdown: &Shutdown) -> Option<Entry<T>> {
        loop {
            // Arm the notification before checking so an enqueue between the
            // check and the await cannot be missed.
            let notified = self.notify.notified();

            if let Some(entry) = self.entries.lock().pop_front() {
                return Some(entry);
            }
            if shutdown.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = notified => {}
                _ = shutdown.cancelled() => return None,
            }
        }
    }

    /// Run the drain loop until shutdown.
    ///
    /// Failed entries are re-enqueued with an incremented attempt count and
    /// the worker pauses for `retry_backoff` before pulling the next entry.
    /// Only one drainer is allowed; a second call returns immediately.
    pub async fn drain(
        &self,
        shutdown: &Shutdown,
        processor: &dyn QueueProcessor<T>,
        retry_backoff: Duration,
    ) {
        if self.draining.swap(true, Ordering::SeqCst) {
            tracing::warn!("drain already running, ignoring second drainer");
            return;
        }

        tracing::info!(capacity = self.capacity, "queue drain worker started");

        while let Some(entry) = self.dequeue(shutdown).await {
            match processor.process(shutdown, &entry.item, entry.attempts).await {
                Ok(()) => {}
                Err(err) => {
                    tracing::debug!(
                        attempts = entry.attempts,
                        error = %err,
                        "queued entry failed, re-enqueueing"
                    );

                    let retry = Entry {
                        item: entry.item,
                        attempts: entry.attempts + 1,
                    };
                    if let Err(dropped) = self.push(retry) {
                        processor.reject(&dropped.item, dropped.attempts).await;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(retry_backoff) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }

        self.draining.store(false, Ordering::SeqCst);
        tracing::info!("queue drain worker stopped");
    }

    /// Best-effort current depth.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }
}
