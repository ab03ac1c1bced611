//! Configuration model and loader.
//!
//! Loaded once from a YAML file at startup, then overridden by `SIDECAR_*`
//! env vars, validated, and held behind an [`arc_swap::ArcSwap`] so hot
//! reload (`/sidecar/config/reload`) can swap the whole snapshot
//! atomically — no component ever observes a partially-updated config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverBudgetAction {
    DisableProfiling,
    ShedEvents,
    LogOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size: usize,
    #[serde(with = "humantime_serde")]
    pub max_event_age: Duration,
    pub drop_on_full: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_event_age: Duration::from_secs(60),
            drop_on_full: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingRates {
    pub events: f64,
    pub logs: f64,
    pub profiling: f64,
    #[serde(default = "one")]
    pub metrics: f64,
}

fn one() -> f64 {
    1.0
}

impl Default for SamplingRates {
    fn default() -> Self {
        Self {
            events: 1.0,
            logs: 1.0,
            profiling: 1.0,
            metrics: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveSampling {
    pub enabled: bool,
    pub anomaly_boost_factor: f64,
    #[serde(with = "humantime_serde")]
    pub decay: Duration,
}

impl Default for AdaptiveSampling {
    fn default() -> Self {
        Self {
            enabled: false,
            anomaly_boost_factor: 2.0,
            decay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub rates: SamplingRates,
    pub adaptive: AdaptiveSampling,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rates: SamplingRates::default(),
            adaptive: AdaptiveSampling::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub max_cpu_percent: f64,
    pub max_memory_mb: u64,
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    pub over_budget_action: OverBudgetAction,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: 5.0,
            max_memory_mb: 100,
            check_interval: Duration::from_secs(1),
            over_budget_action: OverBudgetAction::DisableProfiling,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub port: u16,
    pub bind: String,
    pub auth_token: Option<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            bind: "0.0.0.0".to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptersConfig {
    /// Directory the collaborator populates with framework-adapter archives.
    pub archive_dir: Option<std::path::PathBuf>,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self { archive_dir: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub enabled: bool,
    pub queue: QueueConfig,
    pub sampling: SamplingConfig,
    pub resources: ResourcesConfig,
    pub health: HealthConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
    #[serde(default)]
    pub shutdown_grace: Option<Duration>,
    /// Bumped on every successfully-applied reload.
    #[serde(default)]
    pub generation: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            queue: QueueConfig::default(),
            sampling: SamplingConfig::default(),
            resources: ResourcesConfig::default(),
            health: HealthConfig::default(),
            adapters: AdaptersConfig::default(),
            shutdown_grace: Some(Duration::from_secs(5)),
            generation: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Collects every validation failure instead of stopping at the first,
/// so a reload reports the complete set of problems at once.
pub fn validate(cfg: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if cfg.queue.max_size == 0 || cfg.queue.max_size > 1_000_000 {
        errors.push(ConfigError::Invalid(format!(
            "queue.max_size must be in [1, 1_000_000], got {}",
            cfg.queue.max_size
        )));
    }

    for (name, rate) in [
        ("events", cfg.sampling.rates.events),
        ("logs", cfg.sampling.rates.logs),
        ("profiling", cfg.sampling.rates.profiling),
    ] {
        if !(0.0..=1.0).contains(&rate) {
            errors.push(ConfigError::Invalid(format!(
                "sampling.rates.{name} must be in [0, 1], got {rate}"
            )));
        }
    }
    if cfg.sampling.rates.metrics != 1.0 {
        errors.push(ConfigError::Invalid(
            "sampling.rates.metrics must always be 1.0".to_string(),
        ));
    }
    if cfg.sampling.adaptive.anomaly_boost_factor < 1.0 {
        errors.push(ConfigError::Invalid(
            "sampling.adaptive.anomaly_boost_factor must be >= 1.0".to_string(),
        ));
    }

    if !(0.0..=100.0).contains(&cfg.resources.max_cpu_percent) || cfg.resources.max_cpu_percent <= 0.0 {
        errors.push(ConfigError::Invalid(format!(
            "resources.max_cpu_percent must be in (0, 100], got {}",
            cfg.resources.max_cpu_percent
        )));
    }
    if cfg.resources.max_memory_mb == 0 {
        errors.push(ConfigError::Invalid(
            "resources.max_memory_mb must be > 0".to_string(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Loads a YAML config file, then applies `SIDECAR_*` env var overrides,
/// then validates. Startup is the only place a config error is fatal.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut cfg: Config = serde_yaml::from_str(&text)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg).map_err(|errs| {
        ConfigError::Invalid(
            errs.into_iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    })?;
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SIDECAR_SAMPLE_EVENTS") {
        if let Ok(v) = v.parse() {
            cfg.sampling.rates.events = v;
        }
    }
    if let Ok(v) = std::env::var("SIDECAR_SAMPLE_LOGS") {
        if let Ok(v) = v.parse() {
            cfg.sampling.rates.logs = v;
        }
    }
    if let Ok(v) = std::env::var("SIDECAR_SAMPLE_PROFILING") {
        if let Ok(v) = v.parse() {
            cfg.sampling.rates.profiling = v;
        }
    }
    if let Ok(v) = std::env::var("SIDECAR_MAX_CPU") {
        if let Ok(v) = v.parse() {
            cfg.resources.max_cpu_percent = v;
        }
    }
    if let Ok(v) = std::env::var("SIDECAR_QUEUE_SIZE") {
        if let Ok(v) = v.parse() {
            cfg.queue.max_size = v;
        }
    }
    if let Ok(v) = std::env::var("SIDECAR_HEALTH_PORT") {
        if let Ok(v) = v.parse() {
            cfg.health.port = v;
        }
    }
}

/// Apply a JSON patch (partial config) over a base snapshot, bumping the
/// generation. Used by the `/sidecar/config/reload` handler. Unknown
/// fields cause a 400 at the HTTP layer (`serde(deny_unknown_fields)`
/// on the patch type defined there); this function only merges known
/// subsets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub sampling_rates: Option<SamplingRatesPatch>,
    pub max_queue_size: Option<usize>,
    pub resources: Option<ResourcesPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingRatesPatch {
    pub events: Option<f64>,
    pub logs: Option<f64>,
    pub profiling: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesPatch {
    pub max_cpu_percent: Option<f64>,
    pub max_memory_mb: Option<u64>,
}

pub fn apply_patch(base: &Config, patch: ConfigPatch) -> Result<Config, Vec<ConfigError>> {
    let mut next = base.clone();
    if let Some(enabled) = patch.enabled {
        next.enabled = enabled;
    }
    if let Some(rates) = patch.sampling_rates {
        if let Some(v) = rates.events {
            next.sampling.rates.events = v;
        }
        if let Some(v) = rates.logs {
            next.sampling.rates.logs = v;
        }
        if let Some(v) = rates.profiling {
            next.sampling.rates.profiling = v;
        }
    }
    if let Some(size) = patch.max_queue_size {
        next.queue.max_size = size;
    }
    if let Some(resources) = patch.resources {
        if let Some(v) = resources.max_cpu_percent {
            next.resources.max_cpu_percent = v;
        }
        if let Some(v) = resources.max_memory_mb {
            next.resources.max_memory_mb = v;
        }
    }
    validate(&next)?;
    next.generation = base.generation + 1;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_rate_out_of_range() {
        let mut cfg = Config::default();
        cfg.sampling.rates.events = 1.5;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_queue_size() {
        let mut cfg = Config::default();
        cfg.queue.max_size = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn round_trip_yaml() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.queue.max_size, cfg.queue.max_size);
        assert_eq!(back.sampling.rates.events, cfg.sampling.rates.events);
    }

    #[test]
    fn patch_bumps_generation_and_validates() {
        let base = Config::default();
        let patch = ConfigPatch {
            sampling_rates: Some(SamplingRatesPatch {
                events: Some(1.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let next = apply_patch(&base, patch).unwrap();
        assert_eq!(next.generation, base.generation + 1);
        assert_eq!(next.sampling.rates.events, 1.0);
    }

    #[test]
    fn patch_rejects_invalid_result() {
        let base = Config::default();
        let patch = ConfigPatch {
            max_queue_size: Some(0),
            ..Default::default()
        };
        assert!(apply_patch(&base, patch).is_err());
    }
}
