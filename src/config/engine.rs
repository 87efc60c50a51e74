// src/config/engine.rs
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use crate::interpolate::Bounds;
use crate::policy::{Policy, DEFAULT_COMPLETENESS_RATIO};

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/aggregator.toml";
pub const DEFAULT_JSON_PATH: &str = "config/aggregator.json";

/// A cadence longer than the hour leaves a single slot per window.
pub const MAX_CADENCE_SECS: u64 = 3600;
pub const MAX_HISTORY_LOOKBACK_HOURS: i64 = 24 * 31;

fn default_window_capacity() -> usize {
    12
}
fn default_cadence_secs() -> u64 {
    300
}
fn default_completeness_ratio() -> f64 {
    DEFAULT_COMPLETENESS_RATIO
}
fn default_monitor_interval_secs() -> u64 {
    60
}
fn default_store_timeout_secs() -> u64 {
    5
}
fn default_history_path() -> PathBuf {
    PathBuf::from("data/sensor_data.csv")
}
fn default_history_lookback_hours() -> i64 {
    24
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/hourly_averages.jsonl")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Expected samples per hour (one per cadence slot).
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
    /// Fraction of `window_capacity` needed before an hour is averageable.
    #[serde(default = "default_completeness_ratio")]
    pub completeness_ratio: f64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Bound on each duplicate-check / insert call.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    #[serde(default = "default_history_lookback_hours")]
    pub history_lookback_hours: i64,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Prometheus listener, e.g. "0.0.0.0:9100". Disabled when absent.
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
    #[serde(default)]
    pub bounds: Bounds,
    /// Drop telegrams that arrive off the cadence grid (minute not a multiple
    /// of the cadence).
    #[serde(default)]
    pub align_to_cadence: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            cadence_secs: default_cadence_secs(),
            completeness_ratio: default_completeness_ratio(),
            monitor_interval_secs: default_monitor_interval_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            history_path: default_history_path(),
            history_lookback_hours: default_history_lookback_hours(),
            store_path: default_store_path(),
            metrics_listen: None,
            bounds: Bounds::default(),
            align_to_cadence: false,
        }
    }
}

impl EngineConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: EngineConfig = if ext == "json" {
            serde_json::from_str(&content).context("parsing engine config JSON")?
        } else {
            toml::from_str(&content).context("parsing engine config TOML")?
        };
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $AGGREGATOR_CONFIG_PATH
    /// 2) config/aggregator.toml
    /// 3) config/aggregator.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_TOML_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_TOML_PATH))?
        } else if Path::new(DEFAULT_JSON_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_JSON_PATH))?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides().sanitized())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("AGGREGATOR_WINDOW_CAPACITY") {
            self.window_capacity = v;
        }
        if let Some(v) = env_parse("AGGREGATOR_MONITOR_INTERVAL_SECS") {
            self.monitor_interval_secs = v;
        }
        if let Ok(v) = env::var("AGGREGATOR_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("AGGREGATOR_HISTORY_PATH") {
            self.history_path = PathBuf::from(v);
        }
        if let Some(v) = env_parse("AGGREGATOR_METRICS_LISTEN") {
            self.metrics_listen = Some(v);
        }
        if let Some(v) = env_parse("AGGREGATOR_ALIGN_TO_CADENCE") {
            self.align_to_cadence = v;
        }
        self
    }

    /// Replace out-of-range values with something usable.
    pub fn sanitized(mut self) -> Self {
        if self.window_capacity < 2 {
            self.window_capacity = default_window_capacity();
        }
        if self.cadence_secs == 0 || self.cadence_secs > MAX_CADENCE_SECS {
            self.cadence_secs = default_cadence_secs();
        }
        if !(self.completeness_ratio > 0.0 && self.completeness_ratio <= 1.0) {
            self.completeness_ratio = default_completeness_ratio();
        }
        if self.monitor_interval_secs == 0 {
            self.monitor_interval_secs = default_monitor_interval_secs();
        }
        if self.store_timeout_secs == 0 {
            self.store_timeout_secs = default_store_timeout_secs();
        }
        if self.history_lookback_hours < 0 {
            self.history_lookback_hours = default_history_lookback_hours();
        }
        self.history_lookback_hours = self.history_lookback_hours.min(MAX_HISTORY_LOOKBACK_HOURS);
        self.bounds.temperature = self.bounds.temperature.sanitized();
        self.bounds.humidity = self.bounds.humidity.sanitized();
        self.bounds.pressure = self.bounds.pressure.sanitized();
        self
    }

    pub fn policy(&self) -> Policy {
        Policy {
            completeness_ratio: self.completeness_ratio,
            cadence: self.cadence(),
            bounds: self.bounds,
            history_lookback: Duration::hours(self.history_lookback_hours.clamp(0, MAX_HISTORY_LOOKBACK_HOURS)),
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::seconds(self.cadence_secs.min(MAX_CADENCE_SECS) as i64)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn store_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.store_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolate::Range;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
window_capacity = 6
cadence_secs = 600

[bounds.temperature]
min = -10.0
max = 60.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.window_capacity, 6);
        assert_eq!(cfg.cadence_secs, 600);
        assert_eq!(cfg.completeness_ratio, 0.70);
        assert_eq!(cfg.bounds.temperature, Range::new(-10.0, 60.0));
        assert_eq!(cfg.bounds.pressure, Range::new(900.0, 1100.0));
        assert!(cfg.metrics_listen.is_none());
    }

    #[test]
    fn sanitize_repairs_bad_values() {
        let mut cfg = EngineConfig {
            window_capacity: 0,
            completeness_ratio: 1.7,
            cadence_secs: 0,
            ..EngineConfig::default()
        };
        cfg.bounds.humidity = Range::new(100.0, 0.0);
        let cfg = cfg.sanitized();
        assert_eq!(cfg.window_capacity, 12);
        assert_eq!(cfg.completeness_ratio, 0.70);
        assert_eq!(cfg.cadence_secs, 300);
        assert_eq!(cfg.bounds.humidity, Range::new(0.0, 100.0));
    }

    #[test]
    fn sanitize_caps_values_that_would_overflow_time_math() {
        let cfg = EngineConfig {
            cadence_secs: u64::MAX,
            history_lookback_hours: 10_000_000_000,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.cadence_secs, 300);
        assert_eq!(cfg.history_lookback_hours, MAX_HISTORY_LOOKBACK_HOURS);
        let p = cfg.policy();
        assert_eq!(p.history_lookback, Duration::days(31));

        let raw = EngineConfig {
            cadence_secs: u64::MAX,
            ..EngineConfig::default()
        };
        assert_eq!(raw.cadence(), Duration::hours(1));
    }

    #[test]
    fn policy_reflects_config() {
        let cfg = EngineConfig {
            cadence_secs: 600,
            history_lookback_hours: 6,
            ..EngineConfig::default()
        };
        let p = cfg.policy();
        assert_eq!(p.cadence, Duration::minutes(10));
        assert_eq!(p.history_lookback, Duration::hours(6));
    }
}
