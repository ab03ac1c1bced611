//! Ingestion API: `submit(event)` and `observe(op, fn)`.
//!
//! `observe` is the keystone fail-open contract: whatever `fn` does,
//! the call returns normally. Panics are caught with
//! `std::panic::catch_unwind`, so callers only ever see the ordinary
//! result type, never a propagated panic.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::config::Config;
use crate::event::{Event, Stream};
use crate::metrics::Metrics;
use crate::queue::Queue;
use crate::sampler::Sampler;

pub struct Ingestion {
    queue: Arc<Queue>,
    sampler: Arc<Sampler>,
    metrics: Arc<Metrics>,
    config: Arc<arc_swap::ArcSwap<Config>>,
}

impl Ingestion {
    pub fn new(
        queue: Arc<Queue>,
        sampler: Arc<Sampler>,
        metrics: Arc<Metrics>,
        config: Arc<arc_swap::ArcSwap<Config>>,
    ) -> Self {
        Self {
            queue,
            sampler,
            metrics,
            config,
        }
    }

    /// Enqueues an already-constructed event. Returns `true` iff it ends
    /// up observable by a drain worker, `false` if sampled-out or
    /// dropped. Never panics outward (every failure path here is a
    /// return value, not an error type, so there is nothing to catch).
    /// An event flagged `anomaly` opens the sampler's anomaly window
    /// before the sampling decision is made, so the boosted rate applies
    /// to this event too when adaptive sampling is enabled.
    pub async fn submit(&self, event: Event) -> bool {
        let config = self.config.load();

        if event.stream != Stream::Metrics && !config.enabled {
            return false;
        }

        if event.serialized_len() > crate::event::MAX_EVENT_BYTES {
            self.metrics.record_dropped("oversize");
            return false;
        }

        if config.sampling.adaptive.enabled && event.anomaly {
            self.sampler.mark_anomaly(config.sampling.adaptive.decay);
        }

        if !self.sampler.should_sample(event.stream, &config, &self.metrics) {
            self.metrics.record_sampled_out(event.stream);
            return false;
        }

        self.queue.put(event).await
    }

    /// Runs `fn` under the fail-open contract: it never returns an error
    /// to the caller. Duration is always recorded; on panic, `errors_total{operation}`
    /// is incremented exactly once and `sentinel()` is returned instead
    /// of propagating.
    pub async fn observe<F, Fut, T>(&self, operation_name: &str, fn_: F, sentinel: impl FnOnce() -> T, metrics: &Metrics) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let start = Instant::now();
        match AssertUnwindSafe(fn_()).catch_unwind().await {
            Ok(value) => {
                metrics.observe_processing_duration_ms(start.elapsed().as_secs_f64() * 1000.0);
                value
            }
            Err(panic) => {
                metrics.observe_processing_duration_ms(start.elapsed().as_secs_f64() * 1000.0);
                metrics.record_error(operation_name);
                let summary = panic_summary(&panic);
                tracing::error!(operation = operation_name, panic = %summary, "observed operation panicked; returning sentinel");
                sentinel()
            }
        }
    }
}

fn panic_summary(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn build() -> (Ingestion, Arc<Queue>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let config = Arc::new(arc_swap::ArcSwap::from_pointee(Config::default()));
        let queue = Arc::new(Queue::new(100, std::time::Duration::from_secs(60), true, metrics.clone()));
        let sampler = Arc::new(Sampler::new());
        (
            Ingestion::new(queue.clone(), sampler, metrics.clone(), config),
            queue,
            metrics,
        )
    }

    #[tokio::test]
    async fn submit_enqueues_when_sampled_in() {
        let (ingestion, queue, _metrics) = build();
        let event = Event::new(EventKind::TestEnd, Stream::Events);
        assert!(ingestion.submit(event).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn submit_with_anomaly_flag_opens_the_sampler_anomaly_window() {
        let metrics = Arc::new(Metrics::new());
        let mut cfg = Config::default();
        cfg.sampling.adaptive.enabled = true;
        cfg.sampling.adaptive.anomaly_boost_factor = 5.0;
        cfg.sampling.rates.events = 0.1;
        let config = Arc::new(arc_swap::ArcSwap::from_pointee(cfg.clone()));
        let queue = Arc::new(Queue::new(100, std::time::Duration::from_secs(60), true, metrics.clone()));
        let sampler = Arc::new(Sampler::new());
        let ingestion = Ingestion::new(queue.clone(), sampler.clone(), metrics.clone(), config);

        assert!((sampler.effective_rate(Stream::Events, &cfg) - 0.1).abs() < 1e-9);

        let mut event = Event::new(EventKind::TestEnd, Stream::Events);
        event.anomaly = true;
        ingestion.submit(event).await;

        assert!((sampler.effective_rate(Stream::Events, &cfg) - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn submit_drops_oversize_events() {
        let (ingestion, queue, metrics) = build();
        let mut event = Event::new(EventKind::Log, Stream::Logs);
        event
            .payload
            .insert("blob".into(), serde_json::Value::String("x".repeat(crate::event::MAX_EVENT_BYTES * 2)));
        assert!(!ingestion.submit(event).await);
        assert_eq!(queue.len().await, 0);
        assert_eq!(metrics.total_dropped(), 1);
    }

    #[tokio::test]
    async fn observe_is_fail_open_on_panic() {
        let (_ingestion, _queue, metrics) = build();
        let result: i32 = Ingestion::new(
            Arc::new(Queue::new(1, std::time::Duration::from_secs(1), true, metrics.clone())),
            Arc::new(Sampler::new()),
            metrics.clone(),
            Arc::new(arc_swap::ArcSwap::from_pointee(Config::default())),
        )
        .observe(
            "flaky_op",
            || async { panic!("boom") },
            || -1,
            &metrics,
        )
        .await;
        assert_eq!(result, -1);
        assert_eq!(metrics.total_errors(), 1);
    }

    #[tokio::test]
    async fn observe_returns_value_on_success() {
        let (_ingestion, _queue, metrics) = build();
        let result = Ingestion::new(
            Arc::new(Queue::new(1, std::time::Duration::from_secs(1), true, metrics.clone())),
            Arc::new(Sampler::new()),
            metrics.clone(),
            Arc::new(arc_swap::ArcSwap::from_pointee(Config::default())),
        )
        .observe("benign_op", || async { 42 }, || -1, &metrics)
        .await;
        assert_eq!(result, 42);
        assert_eq!(metrics.total_errors(), 0);
    }
}
