//! Per-stream Bernoulli sampler with optional adaptive boost.
//!
//! The resource monitor can force an override (disable profiling,
//! halve events) without calling back into the sampler's rate logic.
//! Breaking that cycle only needs a one-way channel from the monitor
//! to the sampler, so a small `ArcSwapOption<f64>` per stream does it:
//! `effective_rate = override.unwrap_or(configured_rate)`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use rand::Rng;

use crate::config::Config;
use crate::event::Stream;
use crate::metrics::Metrics;

struct StreamCounters {
    total: AtomicU64,
    sampled: AtomicU64,
}

impl StreamCounters {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
        }
    }
}

/// Decaying timestamp implementing the adaptive boost window without a
/// background timer: the boost is active iff `now < until`.
struct AnomalyWindow {
    until: std::sync::Mutex<Option<Instant>>,
}

impl AnomalyWindow {
    fn new() -> Self {
        Self {
            until: std::sync::Mutex::new(None),
        }
    }

    fn trigger(&self, decay: Duration) {
        *self.until.lock().unwrap() = Some(Instant::now() + decay);
    }

    fn active(&self) -> bool {
        match *self.until.lock().unwrap() {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }
}

pub struct Sampler {
    counters: [StreamCounters; 4],
    /// Resource-monitor override, keyed by stream index; `None` means
    /// "use the configured rate". `0.0` disables the stream entirely.
    overrides: [ArcSwapOption<f64>; 4],
    anomaly: AnomalyWindow,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamStats {
    pub configured_rate: f64,
    pub actual_rate: f64,
    pub total_events: u64,
    pub sampled_events: u64,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            counters: [
                StreamCounters::new(),
                StreamCounters::new(),
                StreamCounters::new(),
                StreamCounters::new(),
            ],
            overrides: Default::default(),
            anomaly: AnomalyWindow::new(),
        }
    }

    fn configured_rate(stream: Stream, config: &Config) -> f64 {
        match stream {
            Stream::Events => config.sampling.rates.events,
            Stream::Logs => config.sampling.rates.logs,
            Stream::Profiling => config.sampling.rates.profiling,
            Stream::Metrics => 1.0,
        }
    }

    /// Rate actually applied for a sample decision: override wins, else
    /// the configured rate, boosted for `events` while an anomaly window
    /// is active.
    pub fn effective_rate(&self, stream: Stream, config: &Config) -> f64 {
        if stream == Stream::Metrics {
            return 1.0;
        }
        if let Some(over) = self.overrides[stream as usize].load().as_deref() {
            return *over;
        }
        let base = Self::configured_rate(stream, config);
        if stream == Stream::Events && config.sampling.adaptive.enabled && self.anomaly.active() {
            (base * config.sampling.adaptive.anomaly_boost_factor).min(1.0)
        } else {
            base
        }
    }

    /// Marks the start of an anomaly window (host called back after a
    /// failure/anomaly signal). No-op if adaptive sampling is disabled
    /// by the current config at call sites; callers check that first.
    pub fn mark_anomaly(&self, decay: Duration) {
        self.anomaly.trigger(decay);
    }

    /// One-way override hook the resource monitor writes into.
    pub fn set_override(&self, stream: Stream, rate: Option<f64>) {
        self.overrides[stream as usize].store(rate.map(Arc::new));
    }

    pub fn should_sample(&self, stream: Stream, config: &Config, metrics: &Metrics) -> bool {
        let rate = self.effective_rate(stream, config);
        metrics.set_sampling_rate(stream, rate);
        let counters = &self.counters[stream as usize];
        counters.total.fetch_add(1, Ordering::Relaxed);

        if stream == Stream::Metrics {
            counters.sampled.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            counters.sampled.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let accepted = draw < rate;
        if accepted {
            counters.sampled.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    pub fn stats(&self, stream: Stream, config: &Config) -> StreamStats {
        let counters = &self.counters[stream as usize];
        let total = counters.total.load(Ordering::Relaxed);
        let sampled = counters.sampled.load(Ordering::Relaxed);
        StreamStats {
            configured_rate: Self::configured_rate(stream, config),
            actual_rate: if total == 0 {
                0.0
            } else {
                sampled as f64 / total as f64
            },
            total_events: total,
            sampled_events: sampled,
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
