//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Block durations and the long-break cadence
//! - Tick and persistence tuning for the background timer
//! - Backend API location and credentials
//!
//! Configuration is stored at `~/.config/pomociclo/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::api::RemoteSettings;
use crate::error::ConfigError;
use crate::phase::PhaseDurations;

/// Timer and cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_study_duration")]
    pub study_duration: u32,
    #[serde(default = "default_break_duration")]
    pub break_duration: u32,
    #[serde(default = "default_long_break_duration")]
    pub long_break_duration: u32,
    /// Study blocks per long break. Zero or negative falls back to 4.
    #[serde(default = "default_long_break_interval")]
    pub long_break_interval: i64,
    /// Forget a running countdown when the foreground loop exits.
    #[serde(default = "default_true")]
    pub clear_on_exit: bool,
    /// Credit a block whose countdown ran out while nothing was ticking.
    #[serde(default)]
    pub credit_expired_on_restore: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_progress_debounce_ms")]
    pub progress_debounce_ms: u64,
}

/// Backend API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// e.g. `https://pomociclo.example.com/api/`. Unset runs fully offline.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pomociclo/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_study_duration() -> u32 {
    50
}
fn default_break_duration() -> u32 {
    10
}
fn default_long_break_duration() -> u32 {
    30
}
fn default_long_break_interval() -> i64 {
    4
}
fn default_true() -> bool {
    true
}
fn default_tick_interval_ms() -> u64 {
    100
}
fn default_progress_debounce_ms() -> u64 {
    300
}
fn default_timeout_secs() -> u64 {
    15
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            study_duration: default_study_duration(),
            break_duration: default_break_duration(),
            long_break_duration: default_long_break_duration(),
            long_break_interval: default_long_break_interval(),
            clear_on_exit: true,
            credit_expired_on_restore: false,
            tick_interval_ms: default_tick_interval_ms(),
            progress_debounce_ms: default_progress_debounce_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TimerConfig {
    /// Take block lengths and the long-break cadence from the backend.
    /// Each missing or non-positive value resets that field to its default.
    pub fn apply_remote(&mut self, remote: &RemoteSettings) {
        fn minutes(value: Option<i64>, default: u32) -> u32 {
            value
                .filter(|v| *v > 0)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        }

        self.study_duration = minutes(remote.study_duration, default_study_duration());
        self.break_duration = minutes(remote.break_duration, default_break_duration());
        self.long_break_duration = minutes(remote.long_break_duration, default_long_break_duration());
        self.long_break_interval = i64::from(PhaseDurations::sanitize_interval(
            remote.long_break_interval.unwrap_or_default(),
        ));
    }

    pub fn durations(&self) -> PhaseDurations {
        PhaseDurations {
            study_min: self.study_duration,
            short_break_min: self.break_duration,
            long_break_min: self.long_break_duration,
            long_break_interval: PhaseDurations::sanitize_interval(self.long_break_interval),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<i64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as integer")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ if value.is_empty() => serde_json::Value::Null,
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the default location, writing defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without persisting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
