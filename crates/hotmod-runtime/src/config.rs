//! Hot reload configuration
//!
//! Defaults are usable as is. Files in YAML, TOML or JSON are detected by
//! extension and layered under `HOTMOD_` environment overrides, with `__`
//! separating nested keys (`HOTMOD_WATCH__DEBOUNCE_MS=250`).

use config::{Config as Cfg, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{HotError, HotResult};

/// Backoff schedule for re-reading an artifact that is locked, missing or
/// still empty while its writer finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 25,
            max_backoff_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }
}

/// Per-binding watch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period that coalesces bursts of change events into one reload
    pub debounce_ms: u64,
    /// Load the artifact once at bind time if it exists
    pub initial_load: bool,
    /// Skip reloads whose bytes hash equal to the last published artifact
    pub skip_unchanged: bool,
    pub read_retry: RetryPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            initial_load: true,
            skip_unchanged: true,
            read_retry: RetryPolicy::default(),
        }
    }
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Set debounce duration
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_initial_load(mut self, enabled: bool) -> Self {
        self.initial_load = enabled;
        self
    }

    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }
}

/// What binding an already watched module does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateBindPolicy {
    /// Fail the second bind
    #[default]
    Reject,
    /// Dispose the existing binding and watch the new path instead
    Reattach,
}

/// Runtime-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub watch: WatchConfig,
    pub duplicate_bind: DuplicateBindPolicy,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
    /// Keep a module's current unit registered after its binding goes away
    pub retain_units_on_unbind: bool,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            watch: WatchConfig::default(),
            duplicate_bind: DuplicateBindPolicy::Reject,
            event_capacity: 1024,
            retain_units_on_unbind: true,
        }
    }
}

impl HotReloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_duplicate_bind(mut self, policy: DuplicateBindPolicy) -> Self {
        self.duplicate_bind = policy;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_retain_units_on_unbind(mut self, retain: bool) -> Self {
        self.retain_units_on_unbind = retain;
        self
    }

    /// Load from a file, applying `HOTMOD_` overrides from the process
    /// environment
    pub fn from_file(path: impl AsRef<Path>) -> HotResult<Self> {
        Self::load(path.as_ref(), None)
    }

    /// Load from a file, applying `HOTMOD_` overrides from `vars` instead of
    /// the process environment
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
        vars: HashMap<String, String>,
    ) -> HotResult<Self> {
        Self::load(path.as_ref(), Some(vars))
    }

    fn load(path: &Path, vars: Option<HashMap<String, String>>) -> HotResult<Self> {
        let attach_path = |report: error_stack::Report<HotError>| {
            report.attach(format!("loading hot reload config from {}", path.display()))
        };

        let format = detect_format(path).map_err(error_stack::Report::new).map_err(attach_path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| HotError::Config(e.to_string()))
            .map_err(error_stack::Report::new)
            .map_err(attach_path)?;

        let environment = Environment::with_prefix("HOTMOD")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(vars);

        Cfg::builder()
            .add_source(File::from_str(&content, format))
            .add_source(environment)
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Self>())
            .map_err(|e| HotError::Config(e.to_string()))
            .map_err(error_stack::Report::new)
            .map_err(attach_path)
    }
}

/// Detect the config format from the file extension
pub fn detect_format(path: &Path) -> Result<FileFormat, HotError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| HotError::Config("no file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        other => Err(HotError::Config(format!("unsupported format: {}", other))),
    }
}
