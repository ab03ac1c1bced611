//! Drain worker(s): `get(timeout) -> sink.accept(event) -> record
//! duration`, wrapped so a sink panic never takes the worker down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::Metrics;
use crate::queue::Queue;
use crate::sink::Sink;

const GET_TIMEOUT: Duration = Duration::from_secs(1);

pub struct DrainWorker {
    queue: Arc<Queue>,
    sink: Arc<dyn Sink>,
    metrics: Arc<Metrics>,
    shutdown: Arc<AtomicBool>,
}

impl DrainWorker {
    pub fn new(queue: Arc<Queue>, sink: Arc<dyn Sink>, metrics: Arc<Metrics>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            queue,
            sink,
            metrics,
            shutdown,
        }
    }

    /// Runs until `shutdown` is set, then drains whatever remains for up
    /// to `grace` before stopping.
    pub async fn run(self, grace: Duration) {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.drain_one(GET_TIMEOUT).await;
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.queue.len().await == 0 {
                break;
            }
            self.drain_one(Duration::from_millis(100)).await;
        }

        let remaining = self.queue.len().await;
        for _ in 0..remaining {
            self.metrics.record_dropped("shutdown");
        }
    }

    async fn drain_one(&self, timeout: Duration) {
        let Some(event) = self.queue.get(timeout).await else {
            return;
        };

        let sink = self.sink.clone();
        let metrics = self.metrics.clone();
        let start = Instant::now();

        let result = std::panic::AssertUnwindSafe(sink.accept(event))
            .catch_unwind_ext()
            .await;

        metrics.observe_processing_duration_ms(start.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(Ok(())) => metrics.record_processed(),
            Ok(Err(err)) => {
                metrics.record_error("event_processing");
                tracing::error!(error = %err, "sink rejected event");
            }
            Err(_panic) => {
                metrics.record_error("event_processing");
                tracing::error!("sink panicked while accepting an event; event dropped, worker continues");
            }
        }
    }
}

trait CatchUnwindExt: std::future::Future + Sized {
    fn catch_unwind_ext(
        self,
    ) -> futures::future::CatchUnwind<std::panic::AssertUnwindSafe<Self>>;
}

impl<F: std::future::Future> CatchUnwindExt for std::panic::AssertUnwindSafe<F> {
    fn catch_unwind_ext(self) -> futures::future::CatchUnwind<std::panic::AssertUnwindSafe<F>> {
        use futures::FutureExt;
        self.catch_unwind()
    }
}
