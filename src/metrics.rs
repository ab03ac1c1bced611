//! Metrics registry.
//!
//! Emits through the `metrics` crate facade via `gauge!`/`counter!` so
//! `/metrics` can render Prometheus 0.0.4 text exposition via
//! `metrics-exporter-prometheus`.
//!
//! A handful of counters are *also* mirrored in plain atomics here, because
//! `/health` and `/ready` need to read current values back synchronously
//! and re-parsing rendered Prometheus text for that would be both slow
//! and fragile. No observable torn reads: satisfied by atomic adds and
//! a mutex-guarded reservoir for histograms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::event::Stream;

const LATENCY_RESERVOIR_CAP: usize = 2048;

struct Reservoir {
    samples: Mutex<Vec<f64>>,
}

impl Reservoir {
    fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::with_capacity(LATENCY_RESERVOIR_CAP)),
        }
    }

    fn observe(&self, value_ms: f64) {
        let mut samples = self.samples.lock().unwrap();
        if samples.len() >= LATENCY_RESERVOIR_CAP {
            samples.remove(0);
        }
        samples.push(value_ms);
    }

    fn avg(&self) -> f64 {
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }
}

pub struct Metrics {
    handle: PrometheusHandle,
    events_queued_total: AtomicU64,
    events_processed_total: AtomicU64,
    events_dropped: Mutex<HashMap<&'static str, u64>>,
    events_sampled_out: [AtomicU64; 4],
    errors_total: Mutex<HashMap<String, u64>>,
    profiling_disabled_total: AtomicU64,
    logs_dropped_total: AtomicU64,
    processing_duration: Reservoir,
    queue_wait: Reservoir,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub total_events: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

impl Metrics {
    /// Installs the global Prometheus recorder on first call; subsequent
    /// calls (e.g. multiple tests in one binary) reuse the cached handle,
    /// since `metrics` only allows one recorder per process.
    pub fn new() -> Self {
        let handle = RECORDER
            .get_or_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .expect("install the process-wide Prometheus recorder")
            })
            .clone();
        Self {
            handle,
            events_queued_total: AtomicU64::new(0),
            events_processed_total: AtomicU64::new(0),
            events_dropped: Mutex::new(HashMap::new()),
            events_sampled_out: Default::default(),
            errors_total: Mutex::new(HashMap::new()),
            profiling_disabled_total: AtomicU64::new(0),
            logs_dropped_total: AtomicU64::new(0),
            processing_duration: Reservoir::new(),
            queue_wait: Reservoir::new(),
        }
    }

    pub fn record_queued(&self) {
        self.events_queued_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("events_queued_total").increment(1);
    }

    pub fn record_processed(&self) {
        self.events_processed_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("events_processed_total").increment(1);
    }

    pub fn record_dropped(&self, reason: &'static str) {
        *self.events_dropped.lock().unwrap().entry(reason).or_insert(0) += 1;
        metrics::counter!("events_dropped_total", "reason" => reason).increment(1);
    }

    pub fn record_sampled_out(&self, stream: Stream) {
        self.events_sampled_out[stream as usize].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("events_sampled_out_total", "stream" => stream.as_str()).increment(1);
    }

    pub fn record_error(&self, operation: &str) {
        *self
            .errors_total
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_insert(0) += 1;
        metrics::counter!("errors_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_profiling_disabled(&self) {
        self.profiling_disabled_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("profiling_disabled_total").increment(1);
    }

    pub fn record_log_dropped(&self) {
        self.logs_dropped_total.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("logs_dropped_total").increment(1);
    }

    pub fn observe_processing_duration_ms(&self, ms: f64) {
        self.processing_duration.observe(ms);
        metrics::histogram!("event_processing_duration_ms").record(ms);
    }

    pub fn observe_queue_wait_ms(&self, ms: f64) {
        self.queue_wait.observe(ms);
        metrics::histogram!("queue_wait_ms").record(ms);
    }

    pub fn set_queue_gauges(&self, size: usize, utilization: f64) {
        metrics::gauge!("queue_size").set(size as f64);
        metrics::gauge!("queue_utilization").set(utilization);
    }

    pub fn set_resource_gauges(&self, cpu_percent: f64, memory_mb: f64) {
        metrics::gauge!("cpu_usage_percent").set(cpu_percent);
        metrics::gauge!("memory_usage_mb").set(memory_mb);
    }

    pub fn set_sampling_rate(&self, stream: Stream, rate: f64) {
        metrics::gauge!("sampling_rate", "stream" => stream.as_str()).set(rate);
    }

    pub fn set_config_generation(&self, generation: u64) {
        metrics::gauge!("config_generation").set(generation as f64);
    }

    pub fn total_dropped(&self) -> u64 {
        self.events_dropped.lock().unwrap().values().sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.errors_total.lock().unwrap().values().sum()
    }

    pub fn events_queued_total(&self) -> u64 {
        self.events_queued_total.load(Ordering::Relaxed)
    }

    pub fn events_processed_total(&self) -> u64 {
        self.events_processed_total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_events = self.events_queued_total();
        let total_errors = self.total_errors();
        let error_rate = if total_events == 0 {
            0.0
        } else {
            total_errors as f64 / total_events as f64
        };
        MetricsSnapshot {
            total_events,
            total_errors,
            error_rate,
            avg_latency_ms: self.processing_duration.avg(),
        }
    }

    /// Prometheus 0.0.4 text exposition for `/metrics`.
    pub fn render_prometheus(&self) -> String {
        self.handle.render()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_error_rate_is_bounded() {
        let m = Metrics::new();
        m.record_queued();
        m.record_error("flaky_op");
        let snap = m.snapshot();
        assert_eq!(snap.total_events, 1);
        assert_eq!(snap.total_errors, 1);
        assert!((snap.error_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dropped_reasons_accumulate_independently() {
        let m = Metrics::new();
        m.record_dropped("oversize");
        m.record_dropped("oversize");
        m.record_dropped("queue_full");
        assert_eq!(m.total_dropped(), 3);
    }
}
