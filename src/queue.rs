//! Bounded FIFO queue with atomic accounting and load shedding.
//!
//! Multiple producers call [`Queue::put`] concurrently; one or more drain
//! workers call [`Queue::get`]. The lock itself is the only contended
//! resource in the hot path — nothing calls into the sink with it held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::event::Event;
use crate::metrics::Metrics;

struct Inner {
    events: VecDeque<(Event, Instant)>,
}

pub struct Queue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_size: std::sync::atomic::AtomicUsize,
    max_event_age: std::sync::Mutex<Duration>,
    drop_on_full: std::sync::atomic::AtomicBool,
    total_enqueued: AtomicU64,
    total_dropped: AtomicU64,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub current_size: usize,
    pub max_size: usize,
    pub utilization: f64,
    pub total_enqueued: u64,
    pub total_dropped: u64,
}

impl Queue {
    pub fn new(max_size: usize, max_event_age: Duration, drop_on_full: bool, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
            }),
            notify: Notify::new(),
            max_size: std::sync::atomic::AtomicUsize::new(max_size),
            max_event_age: std::sync::Mutex::new(max_event_age),
            drop_on_full: std::sync::atomic::AtomicBool::new(drop_on_full),
            total_enqueued: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            metrics,
        }
    }

    /// Applies a reloaded config's queue knobs without recreating the
    /// queue (and losing whatever it currently holds).
    pub fn reconfigure(&self, max_size: usize, max_event_age: Duration, drop_on_full: bool) {
        self.max_size.store(max_size, Ordering::Relaxed);
        *self.max_event_age.lock().unwrap() = max_event_age;
        self.drop_on_full.store(drop_on_full, Ordering::Relaxed);
    }

    fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Relaxed)
    }

    /// Non-blocking enqueue. Returns `true` iff the event ends up
    /// observable by a future `get`.
    pub async fn put(&self, event: Event) -> bool {
        let max_size = self.max_size();
        let mut inner = self.inner.lock().await;

        if inner.events.len() < max_size {
            inner.events.push_back((event, Instant::now()));
            self.total_enqueued.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_queued();
            drop(inner);
            self.notify.notify_one();
            return true;
        }

        if self.drop_on_full.load(Ordering::Relaxed) {
            // B2: drop the incoming event, not any existing one.
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_dropped("queue_full");
            false
        } else {
            // Head-drop: make room for the new event by evicting the oldest.
            inner.events.pop_front();
            inner.events.push_back((event, Instant::now()));
            self.total_enqueued.fetch_add(1, Ordering::Relaxed);
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_queued();
            self.metrics.record_dropped("queue_full_head_drop");
            drop(inner);
            self.notify.notify_one();
            true
        }
    }

    /// Reaps events older than `max_event_age` from the front, counting
    /// each as `stale`. Called opportunistically from `get`.
    async fn reap_stale(&self, inner: &mut Inner) {
        let max_age = *self.max_event_age.lock().unwrap();
        let now = Instant::now();
        while let Some((_, enqueued_at)) = inner.events.front() {
            if now.duration_since(*enqueued_at) > max_age {
                inner.events.pop_front();
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_dropped("stale");
            } else {
                break;
            }
        }
    }

    /// Blocks up to `timeout` for an event; returns `None` on timeout.
    pub async fn get(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                self.reap_stale(&mut inner).await;
                if let Some((event, enqueued_at)) = inner.events.pop_front() {
                    let wait_ms = enqueued_at.elapsed().as_secs_f64() * 1000.0;
                    self.metrics.observe_queue_wait_ms(wait_ms);
                    return Some(event);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let current_size = inner.events.len();
        let max_size = self.max_size();
        QueueStats {
            current_size,
            max_size,
            utilization: if max_size == 0 {
                0.0
            } else {
                current_size as f64 / max_size as f64
            },
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Stream};
    use proptest::prelude::*;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new())
    }

    #[tokio::test]
    async fn put_then_get_preserves_order() {
        let q = Queue::new(10, Duration::from_secs(60), true, metrics());
        let e1 = Event::new(EventKind::TestStart, Stream::Events);
        let e2 = Event::new(EventKind::TestEnd, Stream::Events);
        let id1 = e1.id.clone();
        let id2 = e2.id.clone();
        assert!(q.put(e1).await);
        assert!(q.put(e2).await);
        assert_eq!(q.get(Duration::from_millis(10)).await.unwrap().id, id1);
        assert_eq!(q.get(Duration::from_millis(10)).await.unwrap().id, id2);
    }

    #[tokio::test]
    async fn drop_on_full_rejects_incoming_not_existing() {
        let q = Queue::new(2, Duration::from_secs(60), true, metrics());
        let first = Event::new(EventKind::Log, Stream::Logs);
        let first_id = first.id.clone();
        assert!(q.put(first).await);
        assert!(q.put(Event::new(EventKind::Log, Stream::Logs)).await);
        // Queue is full now; the third is rejected.
        assert!(!q.put(Event::new(EventKind::Log, Stream::Logs)).await);
        assert_eq!(q.get(Duration::from_millis(10)).await.unwrap().id, first_id);
    }

    #[tokio::test]
    async fn head_drop_evicts_oldest_when_configured() {
        let q = Queue::new(1, Duration::from_secs(60), false, metrics());
        let first = Event::new(EventKind::Log, Stream::Logs);
        let second = Event::new(EventKind::Log, Stream::Logs);
        let second_id = second.id.clone();
        assert!(q.put(first).await);
        assert!(q.put(second).await);
        assert_eq!(q.len().await, 1);
        assert_eq!(q.get(Duration::from_millis(10)).await.unwrap().id, second_id);
    }

    #[tokio::test]
    async fn get_times_out_when_empty() {
        let q = Queue::new(4, Duration::from_secs(60), true, metrics());
        let start = Instant::now();
        assert!(q.get(Duration::from_millis(20)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let q = Queue::new(5, Duration::from_secs(60), true, metrics());
        for _ in 0..50 {
            q.put(Event::new(EventKind::Log, Stream::Logs)).await;
        }
        assert!(q.len().await <= 5);
    }

    proptest! {
        // P2: for any capacity and any burst of puts, the queue never
        // holds more than `capacity` events, regardless of shedding policy.
        #[test]
        fn capacity_bound_holds_for_any_burst(
            capacity in 1usize..64,
            burst in 0usize..500,
            drop_on_full in proptest::bool::ANY,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let q = Queue::new(capacity, Duration::from_secs(60), drop_on_full, metrics());
                for _ in 0..burst {
                    q.put(Event::new(EventKind::Log, Stream::Logs)).await;
                }
                prop_assert!(q.len().await <= capacity);
                Ok(())
            })?;
        }
    }
}
