//! TOML-based engine configuration.
//!
//! Controls the cadence of the engine's background work:
//! - how often buffered writes are flushed and how many per batch
//! - how often the background reconciliation pass runs
//! - how far ahead live timers are armed
//! - how long completed reminders stay in the in-memory view
//!
//! Configuration is stored at `~/.config/deremind/config.toml`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

// Upper bounds; they keep every derived duration and deadline representable.
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;
const MAX_BATCH_SIZE: u64 = 10_000;
const MAX_HORIZON_HOURS: u64 = 366 * 24;
const MAX_COMPLETED_RETENTION_DAYS: u64 = 3650;
const MAX_EVENT_CAPACITY: u64 = 65_536;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between batch flushes.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Maximum buffered operations applied per flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between background reconciliation passes.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Reminders further out than this are left to a later reconciliation.
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u64,
    /// Completed reminders younger than this are loaded into the view.
    #[serde(default = "default_completed_retention_days")]
    pub completed_retention_days: u64,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_flush_interval_secs() -> u64 {
    10
}
fn default_batch_size() -> usize {
    100
}
fn default_reconcile_interval_secs() -> u64 {
    3600
}
fn default_horizon_hours() -> u64 {
    24
}
fn default_completed_retention_days() -> u64 {
    7
}
fn default_event_capacity() -> usize {
    256
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be between {min} and {max} (got {value})"),
    })
}

fn bounded(value: u64, max: u64, unit: fn(i64) -> Option<Duration>) -> Duration {
    i64::try_from(value.min(max))
        .ok()
        .and_then(unit)
        .unwrap_or_else(Duration::zero)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            batch_size: default_batch_size(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            horizon_hours: default_horizon_hours(),
            completed_retention_days: default_completed_retention_days(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.flush_interval_secs.min(MAX_INTERVAL_SECS))
    }

    pub fn reconcile_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconcile_interval_secs.min(MAX_INTERVAL_SECS))
    }

    pub fn horizon(&self) -> Duration {
        bounded(self.horizon_hours, MAX_HORIZON_HOURS, Duration::try_hours)
    }

    pub fn completed_retention(&self) -> Duration {
        bounded(
            self.completed_retention_days,
            MAX_COMPLETED_RETENTION_DAYS,
            Duration::try_days,
        )
    }

    /// # Errors
    /// Returns an error naming the first field that is zero where that
    /// would stall the engine, or above its upper bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("flush_interval_secs", self.flush_interval_secs, 1, MAX_INTERVAL_SECS)?;
        check_range("batch_size", self.batch_size as u64, 1, MAX_BATCH_SIZE)?;
        check_range(
            "reconcile_interval_secs",
            self.reconcile_interval_secs,
            1,
            MAX_INTERVAL_SECS,
        )?;
        check_range("horizon_hours", self.horizon_hours, 1, MAX_HORIZON_HOURS)?;
        check_range(
            "completed_retention_days",
            self.completed_retention_days,
            0,
            MAX_COMPLETED_RETENTION_DAYS,
        )?;
        check_range("event_capacity", self.event_capacity as u64, 1, MAX_EVENT_CAPACITY)?;
        Ok(())
    }

    /// Default location of the config file.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn path() -> Result<PathBuf, ConfigError> {
        data_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| ConfigError::LoadFailed {
                path: PathBuf::from("~/.config/deremind"),
                message: e.to_string(),
            })
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// default config cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            Ok(cfg)
        }
    }

    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: EngineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// # Errors
    /// Same as [`EngineConfig::save_to`] on the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Get a config value as string by key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        json.get(key).map(|v| v.to_string())
    }

    /// Set a numeric config value by key. Does not persist.
    ///
    /// # Errors
    /// Returns an error if the key is unknown or the value is not a valid
    /// positive integer.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        let obj = json
            .as_object_mut()
            .ok_or_else(|| invalid("config is not an object".into()))?;
        if !obj.contains_key(key) {
            return Err(invalid("unknown config key".into()));
        }
        let parsed: u64 = value
            .parse()
            .map_err(|_| invalid(format!("cannot parse '{value}' as a number")))?;
        obj.insert(key.to_string(), serde_json::Value::Number(parsed.into()));

        let updated: EngineConfig =
            serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.flush_interval_secs, 10);
        assert_eq!(parsed.horizon(), Duration::hours(24));
    }

    #[test]
    fn missing_keys_use_defaults() {
        let parsed: EngineConfig = toml::from_str("batch_size = 5").unwrap();
        assert_eq!(parsed.batch_size, 5);
        assert_eq!(parsed.reconcile_interval_secs, 3600);
        assert_eq!(parsed.completed_retention(), Duration::days(7));
    }

    #[test]
    fn save_and_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = EngineConfig::default();
        cfg.horizon_hours = 6;
        cfg.save_to(&path).unwrap();

        assert_eq!(EngineConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn load_rejects_zero_batch_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "batch_size = 0").unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "batch_size"));
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "batch_size = \"many\"").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn get_and_set_by_key() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.get("batch_size").as_deref(), Some("100"));
        assert!(cfg.get("missing").is_none());

        cfg.set("batch_size", "25").unwrap();
        assert_eq!(cfg.batch_size, 25);

        assert!(cfg.set("nonexistent", "1").is_err());
        assert!(cfg.set("batch_size", "lots").is_err());
        assert!(cfg.set("flush_interval_secs", "0").is_err());
        assert_eq!(cfg.flush_interval_secs, 10);
    }

    #[test]
    fn set_rejects_values_above_the_bound() {
        let mut cfg = EngineConfig::default();
        let err = cfg.set("horizon_hours", "9999999999999999").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "horizon_hours"));
        assert_eq!(cfg.horizon_hours, 24);

        assert!(cfg.set("completed_retention_days", "18446744073709551615").is_err());
        assert!(cfg.set("event_capacity", "10000000").is_err());
        assert!(cfg.set("reconcile_interval_secs", "99999999999").is_err());
        cfg.set("completed_retention_days", "0").unwrap();
        assert_eq!(cfg.completed_retention(), Duration::zero());
    }

    #[test]
    fn oversized_fields_never_overflow_durations() {
        let cfg = EngineConfig {
            horizon_hours: u64::MAX,
            completed_retention_days: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert_eq!(cfg.horizon(), Duration::hours(366 * 24));
        assert_eq!(cfg.completed_retention(), Duration::days(3650));
    }
}
