use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AccelError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_ACCEL_{KEY} first, falls back to ACCEL_{KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_ACCEL_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(&format!("ACCEL_{}", key))
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str) -> Option<T> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

/// Full configuration for the accelerator admission-control subsystem.
///
/// Parsed from `accel.toml`, then overridden from `ACCEL_*` environment
/// variables. When `ACCEL_PROFILE` is set (e.g. `PROD`), every key is first
/// looked up as `{PROFILE}_ACCEL_{KEY}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccelConfig {
    /// Active profile name (empty = default).
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

impl AccelConfig {
    /// Parse TOML, apply env overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, AccelError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AccelError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load `.env`, then the TOML file if given (defaults otherwise), then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AccelError> {
        load_dotenv();
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        let profile = env_opt("ACCEL_PROFILE").unwrap_or_default().to_uppercase();
        let p = profile.as_str();
        self.profile = profile.clone();

        if let Some(v) = profiled_env_opt(p, "DEVICE_ID") {
            self.device.id = v;
        }
        if let Some(v) = profiled_env_parse(p, "MAX_MEMORY_BYTES") {
            self.device.max_memory_bytes = v;
        }
        if let Some(v) = profiled_env_parse(p, "MAX_COMPUTE_UNITS") {
            self.device.max_compute_units = v;
        }
        if let Some(v) = profiled_env_parse(p, "MAX_BANDWIDTH_MBPS") {
            self.device.max_bandwidth_mbps = v;
        }
        if let Some(v) = profiled_env_parse(p, "RESERVATION_FRACTION") {
            self.device.reservation_fraction = v;
        }
        if let Some(v) = profiled_env_parse(p, "MAX_CONCURRENT") {
            self.scheduler.max_concurrent = v;
        }
        if let Some(v) = profiled_env_opt(p, "ADMISSION_POLICY") {
            match v.to_lowercase().as_str() {
                "head_of_line" | "head-of-line" => {
                    self.scheduler.admission_policy = AdmissionPolicy::HeadOfLine
                }
                "skip_and_continue" | "skip-and-continue" => {
                    self.scheduler.admission_policy = AdmissionPolicy::SkipAndContinue
                }
                other => tracing::warn!(policy = %other, "unknown admission policy, keeping configured value"),
            }
        }
        if let Some(v) = profiled_env_parse(p, "CACHE_CAPACITY_BYTES") {
            self.cache.capacity_bytes = v;
        }
        if let Some(v) = profiled_env_parse(p, "GC_INTERVAL_SECS") {
            self.resources.gc_interval_secs = v;
        }
        if let Some(v) = profiled_env_parse(p, "RECLAIM_TIMEOUT_MS") {
            self.resources.reclaim_timeout_ms = v;
        }
        if let Some(v) = profiled_env_parse(p, "MAX_RETRIES") {
            self.recovery.max_retries = v;
        }
        if let Some(v) = profiled_env_parse(p, "FALLBACK_ENABLED") {
            self.recovery.fallback_enabled = v;
        }
        if let Some(v) = profiled_env_parse(p, "MONITOR_INTERVAL_SECS") {
            self.monitor.interval_secs = v;
        }
        if let Some(v) = profiled_env_parse(p, "BATCH_SIZE") {
            self.tuning.batch_size = v;
        }
    }

    pub fn validate(&self) -> Result<(), AccelError> {
        let frac = self.device.reservation_fraction;
        if !(0.0..1.0).contains(&frac) {
            return Err(AccelError::Config(format!(
                "device.reservation_fraction must be in [0, 1), got {}",
                frac
            )));
        }
        if self.scheduler.max_concurrent == 0 {
            return Err(AccelError::Config("scheduler.max_concurrent must be > 0".into()));
        }
        for (name, value) in [
            ("resources.pressure_knob_reduction", self.resources.pressure_knob_reduction),
            ("recovery.oom_knob_reduction", self.recovery.oom_knob_reduction),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(AccelError::Config(format!("{} must be in (0, 1), got {}", name, value)));
            }
        }
        let threshold = self.resources.pressure_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AccelError::Config(format!(
                "resources.pressure_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.resources.gc_interval_secs == 0 || self.monitor.interval_secs == 0 {
            return Err(AccelError::Config("intervals must be > 0".into()));
        }
        let t = &self.tuning;
        if t.min_batch_size == 0 || t.min_batch_size > t.max_batch_size {
            return Err(AccelError::Config(format!(
                "tuning batch range [{}, {}] is empty",
                t.min_batch_size, t.max_batch_size
            )));
        }
        if !(t.min_batch_size..=t.max_batch_size).contains(&t.batch_size) {
            return Err(AccelError::Config(format!(
                "tuning.batch_size {} outside [{}, {}]",
                t.batch_size, t.min_batch_size, t.max_batch_size
            )));
        }
        if self.cache.capacity_bytes > self.device.max_memory_bytes {
            tracing::warn!(
                cache = self.cache.capacity_bytes,
                device = self.device.max_memory_bytes,
                "cache capacity exceeds device memory; cache will always be under pressure"
            );
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a one-line-per-section summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  device:     id={}, memory={} MiB, compute={}, reservation={:.0}%",
            self.device.id,
            self.device.max_memory_bytes / 1_048_576,
            self.device.max_compute_units,
            self.device.reservation_fraction * 100.0
        );
        tracing::info!(
            "  scheduler:  max_concurrent={}, policy={:?}",
            self.scheduler.max_concurrent,
            self.scheduler.admission_policy
        );
        tracing::info!(
            "  resources:  gc_interval={}s, reclaim_timeout={}ms",
            self.resources.gc_interval_secs,
            self.resources.reclaim_timeout_ms
        );
        tracing::info!("  cache:      capacity={} MiB", self.cache.capacity_bytes / 1_048_576);
        tracing::info!(
            "  recovery:   max_retries={}, fallback={}",
            self.recovery.max_retries,
            self.recovery.fallback_enabled
        );
        tracing::info!("  monitor:    interval={}s", self.monitor.interval_secs);
        tracing::info!(
            "  tuning:     batch_size={} [{}..{}]",
            self.tuning.batch_size,
            self.tuning.min_batch_size,
            self.tuning.max_batch_size
        );
    }

    /// JSON view of the effective configuration.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "device": self.device,
            "scheduler": self.scheduler,
            "resources": self.resources,
            "cache": self.cache,
            "recovery": self.recovery,
            "monitor": self.monitor,
            "tuning": self.tuning,
        })
    }
}

// ── Device ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: u64,
    #[serde(default = "default_max_compute")]
    pub max_compute_units: u64,
    #[serde(default = "default_max_bandwidth")]
    pub max_bandwidth_mbps: u64,
    /// Share of each limit held back from allocation.
    #[serde(default = "default_reservation")]
    pub reservation_fraction: f64,
}

fn default_device_id() -> String { "gpu0".into() }
fn default_max_memory() -> u64 { 12 * 1_073_741_824 }
fn default_max_compute() -> u64 { 2496 }
fn default_max_bandwidth() -> u64 { 240_000 }
fn default_reservation() -> f64 { 0.2 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            max_memory_bytes: default_max_memory(),
            max_compute_units: default_max_compute(),
            max_bandwidth_mbps: default_max_bandwidth(),
            reservation_fraction: default_reservation(),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// What the admission loop does when the queue head does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Stop at the first task that does not fit; nothing behind it is tried.
    #[default]
    HeadOfLine,
    /// Set the starved task aside and try the next one.
    SkipAndContinue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub admission_policy: AdmissionPolicy,
    /// Terminal task statuses kept for lookup.
    #[serde(default = "default_status_history")]
    pub status_history: usize,
    /// Capacity of the task event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_concurrent() -> usize { 4 }
fn default_status_history() -> usize { 1024 }
fn default_event_capacity() -> usize { 256 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            admission_policy: AdmissionPolicy::default(),
            status_history: default_status_history(),
            event_capacity: default_event_capacity(),
        }
    }
}

// ── Resources ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Periodic reclamation interval in seconds.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
    /// Upper bound on each device call made during reclamation.
    #[serde(default = "default_reclaim_timeout")]
    pub reclaim_timeout_ms: u64,
    /// Knob reduction requested under allocation pressure.
    #[serde(default = "default_pressure_knob_reduction")]
    pub pressure_knob_reduction: f64,
    /// Memory occupancy (of available) above which the periodic sweep evicts.
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,
}

fn default_gc_interval() -> u64 { 300 }
fn default_reclaim_timeout() -> u64 { 2_000 }
fn default_pressure_knob_reduction() -> f64 { 0.2 }
fn default_pressure_threshold() -> f64 { 0.9 }

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: default_gc_interval(),
            reclaim_timeout_ms: default_reclaim_timeout(),
            pressure_knob_reduction: default_pressure_knob_reduction(),
            pressure_threshold: default_pressure_threshold(),
        }
    }
}

impl ResourceConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn reclaim_timeout(&self) -> Duration {
        Duration::from_millis(self.reclaim_timeout_ms)
    }
}

// ── Cache ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity_bytes: u64,
}

fn default_cache_capacity() -> u64 { 2 * 1_073_741_824 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity_bytes: default_cache_capacity() }
    }
}

// ── Recovery ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive failed recoveries per failure class before escalating.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Escalate to the host (CPU) fallback once retries are exhausted.
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,
    /// Knob reduction applied by the OOM strategy.
    #[serde(default = "default_oom_knob_reduction")]
    pub oom_knob_reduction: f64,
    /// Recovery attempts kept in the audit history.
    #[serde(default = "default_recovery_history")]
    pub history_limit: usize,
}

fn default_max_retries() -> u32 { 3 }
fn default_fallback_enabled() -> bool { true }
fn default_oom_knob_reduction() -> f64 { 0.3 }
fn default_recovery_history() -> usize { 1024 }

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            fallback_enabled: default_fallback_enabled(),
            oom_knob_reduction: default_oom_knob_reduction(),
            history_limit: default_recovery_history(),
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_temperature_threshold")]
    pub temperature_threshold_c: f64,
    #[serde(default = "default_usage_threshold")]
    pub memory_usage_threshold: f64,
    #[serde(default = "default_usage_threshold")]
    pub utilization_threshold: f64,
    #[serde(default = "default_monitor_history")]
    pub history_limit: usize,
}

fn default_monitor_interval() -> u64 { 10 }
fn default_temperature_threshold() -> f64 { 80.0 }
fn default_usage_threshold() -> f64 { 0.95 }
fn default_monitor_history() -> usize { 512 }

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            temperature_threshold_c: default_temperature_threshold(),
            memory_usage_threshold: default_usage_threshold(),
            utilization_threshold: default_usage_threshold(),
            history_limit: default_monitor_history(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ── Tuning ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_min_batch")]
    pub min_batch_size: u32,
    #[serde(default = "default_max_batch")]
    pub max_batch_size: u32,
    #[serde(default = "default_batch_step")]
    pub batch_step: u32,
    /// Reductions closer together than this are ignored.
    #[serde(default = "default_knob_cooldown")]
    pub cooldown_ms: u64,
}

fn default_batch_size() -> u32 { 256 }
fn default_min_batch() -> u32 { 32 }
fn default_max_batch() -> u32 { 512 }
fn default_batch_step() -> u32 { 32 }
fn default_knob_cooldown() -> u64 { 1_000 }

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            min_batch_size: default_min_batch(),
            max_batch_size: default_max_batch(),
            batch_step: default_batch_step(),
            cooldown_ms: default_knob_cooldown(),
        }
    }
}

impl TuningConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}
