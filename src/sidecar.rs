//! Top-level orchestrator and state machine.
//!
//! `Sidecar` owns every component as an explicitly-constructed value —
//! no globals, every collaborator is passed in or built here and shared
//! via `Arc`. `submit`/`observe` and the HTTP handlers all borrow it
//! through `Arc<Sidecar>`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::adapters::{self, AdapterArchive};
use crate::config::{Config, ConfigPatch};
use crate::correlation;
use crate::drain::DrainWorker;
use crate::ingestion::Ingestion;
use crate::metrics::Metrics;
use crate::queue::Queue;
use crate::resource_monitor::ResourceMonitor;
use crate::sampler::Sampler;
use crate::sink::Sink;

const DRAIN_WORKER_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarState {
    Initializing,
    Ready,
    Degraded,
    Draining,
    Stopped,
}

pub struct Sidecar {
    config: Arc<ArcSwap<Config>>,
    pub metrics: Arc<Metrics>,
    sampler: Arc<Sampler>,
    queue: Arc<Queue>,
    resource_monitor: Arc<ResourceMonitor>,
    ingestion: Arc<Ingestion>,
    sink: Arc<dyn Sink>,
    state: RwLock<SidecarState>,
    shutdown_requested: Arc<AtomicBool>,
    adapter_archives: RwLock<Vec<AdapterArchive>>,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub enabled: bool,
    pub timestamp: f64,
    pub queue: QueueHealth,
    pub resources: ResourcesHealth,
    pub metrics: MetricsHealth,
    pub issues: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub size: usize,
    pub utilization: f64,
    pub dropped_events: u64,
}

#[derive(Debug, Serialize)]
pub struct ResourcesHealth {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub profiling_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct MetricsHealth {
    pub total_events: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct ReadySnapshot {
    pub ready: bool,
    pub enabled: bool,
    pub queue_utilization: f64,
    pub timestamp: f64,
}

impl Sidecar {
    pub fn new(config: Config, sink: Arc<dyn Sink>) -> Arc<Self> {
        let metrics = Arc::new(Metrics::new());
        let sampler = Arc::new(Sampler::new());
        let queue = Arc::new(Queue::new(
            config.queue.max_size,
            config.queue.max_event_age,
            config.queue.drop_on_full,
            metrics.clone(),
        ));
        let resource_monitor = Arc::new(ResourceMonitor::new(
            sampler.clone(),
            metrics.clone(),
            config.resources.check_interval,
        ));
        let config = Arc::new(ArcSwap::from_pointee(config));
        let ingestion = Arc::new(Ingestion::new(
            queue.clone(),
            sampler.clone(),
            metrics.clone(),
            config.clone(),
        ));

        Arc::new(Self {
            config,
            metrics,
            sampler,
            queue,
            resource_monitor,
            ingestion,
            sink,
            state: RwLock::new(SidecarState::Initializing),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            adapter_archives: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Spawns the resource-monitor loop and drain workers, transitions
    /// to `Ready`, and scans the adapter archive directory once so
    /// `/adapters` has results immediately.
    pub async fn start(self: &Arc<Self>) {
        if let Some(dir) = self.config().adapters.archive_dir.clone() {
            let archives = adapters::discover(&dir);
            *self.adapter_archives.write().await = archives;
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.resource_monitor_loop().await;
        });

        for _ in 0..DRAIN_WORKER_COUNT {
            let queue = self.queue.clone();
            let sink = self.sink.clone();
            let metrics = self.metrics.clone();
            let shutdown = self.shutdown_requested.clone();
            let grace = self.config().shutdown_grace.unwrap_or(Duration::from_secs(5));
            tokio::spawn(async move {
                DrainWorker::new(queue, sink, metrics, shutdown).run(grace).await;
            });
        }

        *self.state.write().await = SidecarState::Ready;
        tracing::info!("sidecar transitioned to Ready");
    }

    async fn resource_monitor_loop(self: Arc<Self>) {
        loop {
            if self.shutdown_requested.load(Ordering::Relaxed) {
                return;
            }
            let config = self.config();
            let snapshot = self.resource_monitor.check_resources(&config).await;
            let stats = self.queue.stats().await;
            self.metrics.set_queue_gauges(stats.current_size, stats.utilization);
            self.refresh_degradation(&snapshot).await;
            tokio::time::sleep(config.resources.check_interval).await;
        }
    }

    async fn refresh_degradation(&self, snapshot: &crate::resource_monitor::ResourceSnapshot) {
        let issues = self.compute_issues(snapshot).await;
        let mut state = self.state.write().await;
        if *state == SidecarState::Draining || *state == SidecarState::Stopped {
            return;
        }
        *state = if issues.is_empty() {
            SidecarState::Ready
        } else {
            SidecarState::Degraded
        };
    }

    async fn compute_issues(&self, snapshot: &crate::resource_monitor::ResourceSnapshot) -> Vec<&'static str> {
        let mut issues = Vec::new();
        let stats = self.queue.stats().await;
        if stats.utilization >= 0.8 {
            issues.push("queue_near_capacity");
        }
        let snap = self.metrics.snapshot();
        if snap.error_rate >= 0.1 {
            issues.push("high_error_rate");
        }
        if snapshot.cpu_over_budget {
            issues.push("cpu_over_budget");
        }
        if snapshot.memory_over_budget {
            issues.push("memory_over_budget");
        }
        if !snapshot.profiling_enabled {
            issues.push("profiling_disabled");
        }
        issues
    }

    /// Rejects new events once a drain has begun: only `Ready` and
    /// `Degraded` accept submissions, `Draining` and `Stopped` do not.
    pub async fn submit(&self, event: crate::event::Event) -> bool {
        if self.shutdown_requested.load(Ordering::Relaxed) {
            self.metrics.record_dropped("draining");
            return false;
        }
        self.ingestion.submit(event).await
    }

    pub async fn observe<F, Fut, T>(&self, operation_name: &str, fn_: F, sentinel: impl FnOnce() -> T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.ingestion.observe(operation_name, fn_, sentinel, &self.metrics).await
    }

    pub fn set_run_id(&self, id: impl Into<String>) {
        correlation::set_run_id(id);
    }

    pub fn set_test_id(&self, id: impl Into<String>) {
        correlation::set_test_id(id);
    }

    pub fn clear_context(&self) {
        correlation::clear_context();
    }

    pub async fn health(&self) -> HealthSnapshot {
        let config = self.config();
        let stats = self.queue.stats().await;
        let snap = self.metrics.snapshot();
        let resources = self.resource_monitor.check_resources(&config).await;
        let issues = self.compute_issues(&resources).await;
        let status = if issues.is_empty() { "ok" } else { "degraded" };

        HealthSnapshot {
            status,
            enabled: config.enabled,
            timestamp: unix_seconds(),
            queue: QueueHealth {
                size: stats.current_size,
                utilization: stats.utilization,
                dropped_events: stats.total_dropped,
            },
            resources: ResourcesHealth {
                cpu_percent: resources.cpu_percent,
                memory_mb: resources.memory_mb,
                profiling_enabled: resources.profiling_enabled,
            },
            metrics: MetricsHealth {
                total_events: snap.total_events,
                total_errors: snap.total_errors,
                error_rate: snap.error_rate,
                avg_latency_ms: snap.avg_latency_ms,
            },
            issues,
        }
    }

    pub async fn ready(&self) -> ReadySnapshot {
        let config = self.config();
        let stats = self.queue.stats().await;
        let resources = self.resource_monitor.check_resources(&config).await;
        let ready = config.enabled
            && stats.utilization < 0.9
            && !resources.cpu_over_budget
            && !resources.memory_over_budget;
        ReadySnapshot {
            ready,
            enabled: config.enabled,
            queue_utilization: stats.utilization,
            timestamp: unix_seconds(),
        }
    }

    pub fn render_metrics(&self) -> String {
        self.metrics.render_prometheus()
    }

    /// Validates and atomically commits a config patch from
    /// `/sidecar/config/reload`. The whole `Config` is replaced in one
    /// `ArcSwap::store`, so no reader ever observes a half-updated
    /// snapshot.
    pub fn reload(&self, patch: ConfigPatch) -> Result<Arc<Config>, Vec<crate::config::ConfigError>> {
        let base = self.config.load_full();
        let next = Arc::new(crate::config::apply_patch(&base, patch)?);
        self.config.store(next.clone());
        self.queue
            .reconfigure(next.queue.max_size, next.queue.max_event_age, next.queue.drop_on_full);
        self.metrics.set_config_generation(next.generation);
        tracing::info!(generation = next.generation, "config reloaded");
        Ok(next)
    }

    pub async fn adapters(&self) -> Vec<String> {
        self.adapter_archives
            .read()
            .await
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    pub async fn adapter_path(&self, name: &str) -> Option<PathBuf> {
        let archives = self.adapter_archives.read().await;
        adapters::find(&archives, name).map(|a| a.path.clone())
    }

    /// Transitions to `Draining`: new events are rejected, drain workers
    /// keep running for `shutdown_grace`, then the process can exit.
    /// Idempotent: calling twice after the first has already set the
    /// flag is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write().await = SidecarState::Draining;
        tracing::info!("sidecar transitioned to Draining");
        let grace = self.config().shutdown_grace.unwrap_or(Duration::from_secs(5));
        tokio::time::sleep(grace).await;
        *self.state.write().await = SidecarState::Stopped;
        tracing::info!("sidecar transitioned to Stopped");
    }

    pub async fn state(&self) -> SidecarState {
        *self.state.read().await
    }
}

fn unix_seconds() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind, Stream};
    use crate::sink::NullSink;

    fn sidecar() -> Arc<Sidecar> {
        let mut cfg = Config::default();
        cfg.queue.max_size = 100;
        cfg.shutdown_grace = Some(Duration::from_millis(20));
        Sidecar::new(cfg, Arc::new(NullSink))
    }

    #[tokio::test]
    async fn happy_path_single_producer() {
        let sc = sidecar();
        sc.start().await;
        for _ in 0..50 {
            assert!(sc.submit(Event::new(EventKind::TestEnd, Stream::Events)).await);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        let health = sc.health().await;
        assert_eq!(health.metrics.total_events, 50);
    }

    #[tokio::test]
    async fn idempotent_shutdown() {
        let sc = sidecar();
        sc.start().await;
        sc.shutdown().await;
        sc.shutdown().await; // second call is a no-op, no panic
        assert_eq!(sc.state().await, SidecarState::Stopped);
    }

    #[tokio::test]
    async fn submit_is_rejected_once_draining_begins() {
        let sc = sidecar();
        sc.start().await;
        assert!(sc.submit(Event::new(EventKind::TestEnd, Stream::Events)).await);
        sc.shutdown().await;
        assert!(!sc.submit(Event::new(EventKind::TestEnd, Stream::Events)).await);
    }

    #[tokio::test]
    async fn reload_bumps_generation_atomically() {
        let sc = sidecar();
        sc.start().await;
        let before = sc.config().generation;
        let patch = ConfigPatch {
            sampling_rates: Some(crate::config::SamplingRatesPatch {
                events: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let next = sc.reload(patch).unwrap();
        assert_eq!(next.generation, before + 1);
        assert_eq!(sc.config().generation, next.generation);
    }
}
