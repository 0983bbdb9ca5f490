//! Bulk disposal of logs removed from sessions

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use ulogview_logs::DisplayableLog;

/// Logs released per tick
pub const DISPOSE_CHUNK_SIZE: usize = 65536;

/// Interval between two disposal ticks
pub const DISPOSE_INTERVAL: Duration = Duration::from_millis(100);

struct Inner {
    pending: Mutex<VecDeque<Arc<DisplayableLog>>>,
    chunk_size: usize,
    aggressive: bool,
    disposed: AtomicU64,
    batches: AtomicU64,
}

impl Inner {
    /// Release up to one chunk, returns how many logs were released
    fn dispose_chunk(&self) -> usize {
        let chunk: Vec<_> = {
            let mut pending = self.pending.lock();
            let count = pending.len().min(self.chunk_size);
            let chunk = pending.drain(..count).collect();
            if pending.is_empty() && count > 0 {
                if self.aggressive {
                    pending.shrink_to_fit();
                } else {
                    pending.shrink_to(self.chunk_size);
                }
            }
            chunk
        };
        let count = chunk.len();
        drop(chunk);
        if count > 0 {
            self.disposed.fetch_add(count as u64, Ordering::Relaxed);
            if self.pending.lock().is_empty() {
                self.batches.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    disposed = self.disposed.load(Ordering::Relaxed),
                    "Disposal batch completed"
                );
            }
        }
        count
    }
}

/// Queue releasing removed logs in bounded chunks on a fixed interval
///
/// Dropping millions of logs at once blocks for a long time, the queue
/// spreads that cost over several ticks instead.
pub struct DisposeQueue {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl DisposeQueue {
    /// Spawn the disposal task, must be called within a tokio runtime
    pub fn new(aggressive: bool) -> Self {
        Self::with_chunk_size(DISPOSE_CHUNK_SIZE, DISPOSE_INTERVAL, aggressive)
    }

    pub fn with_chunk_size(chunk_size: usize, interval: Duration, aggressive: bool) -> Self {
        let inner = Arc::new(Inner {
            pending: Mutex::new(VecDeque::new()),
            chunk_size: chunk_size.max(1),
            aggressive,
            disposed: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        tokio::spawn(run_disposal(Arc::clone(&inner), interval, cancel.clone()));
        Self { inner, cancel }
    }

    /// Queue logs for disposal
    pub fn push(&self, logs: impl IntoIterator<Item = Arc<DisplayableLog>>) {
        self.inner.pending.lock().extend(logs);
    }

    /// Logs waiting to be released
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Logs released so far
    pub fn disposed_count(&self) -> u64 {
        self.inner.disposed.load(Ordering::Relaxed)
    }

    /// Batches fully drained so far
    pub fn completed_batches(&self) -> u64 {
        self.inner.batches.load(Ordering::Relaxed)
    }
}

impl Drop for DisposeQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_disposal(inner: Arc<Inner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                inner.dispose_chunk();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulogview_logs::{LogBuilder, LogIdGenerator};

    fn logs(count: usize) -> Vec<Arc<DisplayableLog>> {
        let ids = LogIdGenerator::new();
        let mut builder = LogBuilder::new();
        (0..count)
            .map(|i| {
                builder.set("Message", format!("log {i}"));
                Arc::new(DisplayableLog::new(ids.next_id(), Arc::new(builder.build_and_reset()), 1))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_disposes_in_chunks() {
        let queue = DisposeQueue::with_chunk_size(40, Duration::from_millis(10), true);
        let batch = logs(100);
        let weak = Arc::downgrade(&batch[99]);
        queue.push(batch);
        for _ in 0..100 {
            if queue.pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.disposed_count(), 100);
        assert_eq!(queue.completed_batches(), 1);
        assert!(weak.upgrade().is_none());
    }
}
