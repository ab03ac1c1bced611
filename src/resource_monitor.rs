//! Periodic CPU/RSS sampling, budget enforcement and capability gating.
//!
//! A periodic sampler emits smoothed gauges and logs poll failures at
//! low severity rather than propagating them (`tracing::debug!` on
//! poll failure, never a propagated error). The poll source is
//! `sysinfo` rather than raw procfs/cgroup parsing, since the budget
//! tracked here is process-wide, not per-container.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::RwLock;

use crate::config::{Config, OverBudgetAction};
use crate::event::Stream;
use crate::metrics::Metrics;
use crate::sampler::Sampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Normal,
    OverBudget,
    Recovering,
}

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub cpu_over_budget: bool,
    pub memory_over_budget: bool,
    pub profiling_enabled: bool,
}

/// EWMA smoother with a configurable half-life. Carries no timer of
/// its own: the caller drives each `update` from its own poll loop, so
/// there is no second timer competing with `check_interval`.
struct Ewma {
    value: Option<f64>,
    alpha: f64,
}

impl Ewma {
    fn with_half_life(half_life: Duration, sample_interval: Duration) -> Self {
        let ratio = sample_interval.as_secs_f64() / half_life.as_secs_f64().max(f64::EPSILON);
        let alpha = 1.0 - 0.5_f64.powf(ratio);
        Self { value: None, alpha }
    }

    fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (sample - prev),
            None => sample,
        };
        self.value = Some(next);
        next
    }
}

const RECOVERY_CHECKS_REQUIRED: u8 = 2;
const WARN_RATE_LIMIT_CHECKS: u64 = 10;

pub struct ResourceMonitor {
    system: RwLock<System>,
    pid: Pid,
    cpu_ewma: RwLock<Ewma>,
    state: RwLock<BudgetState>,
    consecutive_under_budget: AtomicU8,
    checks_since_warn: std::sync::atomic::AtomicU64,
    profiling_force_disabled: AtomicBool,
    sampler: Arc<Sampler>,
    metrics: Arc<Metrics>,
}

impl ResourceMonitor {
    pub fn new(sampler: Arc<Sampler>, metrics: Arc<Metrics>, check_interval: Duration) -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());
        system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
        Self {
            system: RwLock::new(system),
            pid,
            cpu_ewma: RwLock::new(Ewma::with_half_life(check_interval * 3, check_interval)),
            state: RwLock::new(BudgetState::Normal),
            consecutive_under_budget: AtomicU8::new(0),
            checks_since_warn: std::sync::atomic::AtomicU64::new(WARN_RATE_LIMIT_CHECKS),
            profiling_force_disabled: AtomicBool::new(false),
            sampler,
            metrics,
        }
    }

    /// One sampling pass: refresh, smooth, compare to budget, mitigate.
    /// Returns the snapshot exposed via `/health`.
    pub async fn check_resources(&self, config: &Config) -> ResourceSnapshot {
        let (cpu_raw, memory_mb) = {
            let mut system = self.system.write().await;
            system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[self.pid]), true);
            match system.process(self.pid) {
                Some(proc) => (proc.cpu_usage() as f64, proc.memory() as f64 / (1024.0 * 1024.0)),
                None => (0.0, 0.0),
            }
        };

        let cpu_percent = self.cpu_ewma.write().await.update(cpu_raw);
        self.metrics.set_resource_gauges(cpu_percent, memory_mb);

        let cpu_over = cpu_percent > config.resources.max_cpu_percent;
        let memory_over = memory_mb > config.resources.max_memory_mb as f64;
        let over_budget = cpu_over || memory_over;

        self.transition(over_budget, config).await;

        ResourceSnapshot {
            cpu_percent,
            memory_mb,
            cpu_over_budget: cpu_over,
            memory_over_budget: memory_over,
            profiling_enabled: !self.profiling_force_disabled.load(Ordering::Relaxed),
        }
    }

    async fn transition(&self, over_budget: bool, config: &Config) {
        let mut state = self.state.write().await;
        let previous = *state;

        if over_budget {
            self.consecutive_under_budget.store(0, Ordering::Relaxed);
            let checks = self.checks_since_warn.fetch_add(1, Ordering::Relaxed);
            if checks >= WARN_RATE_LIMIT_CHECKS {
                self.checks_since_warn.store(0, Ordering::Relaxed);
                tracing::warn!("resource budget exceeded; applying mitigation");
            }
            self.apply_mitigation(config);
            *state = BudgetState::OverBudget;
        } else if *state == BudgetState::OverBudget || *state == BudgetState::Recovering {
            let consecutive = self.consecutive_under_budget.fetch_add(1, Ordering::Relaxed) + 1;
            if consecutive >= RECOVERY_CHECKS_REQUIRED {
                self.restore();
                *state = BudgetState::Normal;
            } else {
                *state = BudgetState::Recovering;
            }
        } else {
            *state = BudgetState::Normal;
        }

        if *state != previous {
            tracing::info!(from = ?previous, to = ?state, "resource monitor state transition");
        }
    }

    fn apply_mitigation(&self, config: &Config) {
        match config.resources.over_budget_action {
            OverBudgetAction::DisableProfiling => {
                if !self.profiling_force_disabled.swap(true, Ordering::Relaxed) {
                    self.sampler.set_override(Stream::Profiling, Some(0.0));
                    self.metrics.record_profiling_disabled();
                }
            }
            OverBudgetAction::ShedEvents => {
                let halved = self.sampler.effective_rate(Stream::Events, config) / 2.0;
                self.sampler.set_override(Stream::Events, Some(halved));
            }
            OverBudgetAction::LogOnly => {}
        }
    }

    fn restore(&self) {
        self.profiling_force_disabled.store(false, Ordering::Relaxed);
        self.sampler.set_override(Stream::Profiling, None);
        self.sampler.set_override(Stream::Events, None);
        self.consecutive_under_budget.store(0, Ordering::Relaxed);
    }

    pub async fn state(&self) -> BudgetState {
        *self.state.read().await
    }
}
