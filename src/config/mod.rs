use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::core::utils::{ensure_dir, write_atomically, PathResolver};
use crate::errors::{LedgerError, Result};

/// Tunables for the ledger writer, the recurring processor and reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// A template generated less than this long ago is skipped by the processor.
    pub idempotency_window_minutes: i64,
    /// Largest difference reconciliation accepts as equal.
    pub reconciliation_tolerance: Decimal,
    /// Attempts per unit of work before a conflict is surfaced to the caller.
    pub max_commit_attempts: u32,
    /// Consecutive failed materializations after which a template is paused.
    pub max_consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idempotency_window_minutes: 60,
            reconciliation_tolerance: Decimal::new(1, 3),
            max_commit_attempts: 3,
            max_consecutive_failures: 5,
            data_file: None,
        }
    }
}

impl EngineConfig {
    /// Saturates for windows too large to represent; [`EngineConfig::validate`] rejects those.
    pub fn idempotency_window(&self) -> Duration {
        Duration::try_minutes(self.idempotency_window_minutes).unwrap_or_else(Duration::max_value)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_commit_attempts == 0 {
            return Err(LedgerError::invalid("max_commit_attempts must be at least 1"));
        }
        if self.reconciliation_tolerance.is_sign_negative() {
            return Err(LedgerError::invalid(
                "reconciliation_tolerance must not be negative",
            ));
        }
        if self.idempotency_window_minutes < 0 {
            return Err(LedgerError::invalid(
                "idempotency_window_minutes must not be negative",
            ));
        }
        if Duration::try_minutes(self.idempotency_window_minutes).is_none() {
            return Err(LedgerError::invalid(
                "idempotency_window_minutes is out of range",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(LedgerError::invalid(
                "max_consecutive_failures must be at least 1",
            ));
        }
        Ok(())
    }

    /// Ledger file to open, defaulting to `ledger.json` under `base`.
    pub fn ledger_path(&self, base: &Path) -> PathBuf {
        self.data_file
            .clone()
            .unwrap_or_else(|| PathResolver::ledger_file_in(base))
    }
}

/// Loads and saves [`EngineConfig`] under the application directory.
pub struct ConfigManager {
    base: PathBuf,
    path: PathBuf,
}

impl ConfigManager {
    pub fn with_base_dir(base: PathBuf) -> Result<Self> {
        ensure_dir(&base)?;
        ensure_dir(&PathResolver::config_dir_in(&base))?;
        Ok(Self {
            path: PathResolver::config_file_in(&base),
            base,
        })
    }

    /// Returns the stored configuration, or defaults when none was saved yet.
    pub fn load(&self) -> Result<EngineConfig> {
        let config = if self.path.exists() {
            let data = fs::read_to_string(&self.path)?;
            serde_json::from_str(&data)?
        } else {
            EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &EngineConfig) -> Result<()> {
        config.validate()?;
        let json = serde_json::to_string_pretty(config)?;
        write_atomically(&self.path, &json)?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        let config = manager.load().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.idempotency_window(), Duration::hours(1));
        assert_eq!(config.reconciliation_tolerance.to_string(), "0.001");
    }

    #[test]
    fn save_and_reload() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        let mut config = EngineConfig::default();
        config.max_consecutive_failures = 2;
        manager.save(&config).unwrap();
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_base_dir(temp.path().to_path_buf()).unwrap();
        fs::write(manager.path(), r#"{ "max_commit_attempts": 5 }"#).unwrap();
        let config = manager.load().unwrap();
        assert_eq!(config.max_commit_attempts, 5);
        assert_eq!(config.idempotency_window_minutes, 60);
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = EngineConfig {
            max_commit_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LedgerError::ValidationFailed(_))
        ));
    }

    #[test]
    fn unrepresentable_window_rejected() {
        let config = EngineConfig {
            idempotency_window_minutes: i64::MAX / 2,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LedgerError::ValidationFailed(_))
        ));
        assert_eq!(config.idempotency_window(), Duration::max_value());
    }
}
