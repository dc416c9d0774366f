//! Process-level owner of the store, configuration and clock.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::{ConfigManager, EngineConfig};
use crate::core::services::{
    BatchReport, ReconciliationReport, ReconciliationService, RecurringProcessor, Session,
};
use crate::core::time::{Clock, SystemClock};
use crate::core::utils::PathResolver;
use crate::errors::Result;
use crate::storage::{JsonStore, MemoryStore, StorageBackend};

/// Owns the storage handle for the lifetime of the process and hands out
/// [`Session`]s to the services.
pub struct LedgerEngine {
    store: Box<dyn StorageBackend>,
    config: EngineConfig,
    clock: Box<dyn Clock>,
    data_path: Option<PathBuf>,
}

impl LedgerEngine {
    /// Opens the JSON ledger under `base_dir` (or `config.data_file`).
    pub fn open(config: EngineConfig, base_dir: &Path) -> Result<Self> {
        config.validate()?;
        let path = config.ledger_path(base_dir);
        let store = JsonStore::open(&path)?;
        info!(path = %path.display(), "ledger engine started");
        Ok(Self {
            store: Box::new(store),
            config,
            clock: Box::new(SystemClock),
            data_path: Some(path),
        })
    }

    /// Loads the configuration from the application directory and opens its ledger.
    pub fn open_default(base_dir: Option<PathBuf>) -> Result<Self> {
        let manager = ConfigManager::with_base_dir(PathResolver::resolve_base(base_dir))?;
        let config = manager.load()?;
        Self::open(config, manager.base_dir())
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_store(Box::new(MemoryStore::new()), config)
    }

    pub fn with_store(store: Box<dyn StorageBackend>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            clock: Box::new(SystemClock),
            data_path: None,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> Session<'_> {
        Session::new(self.store.as_ref(), &self.config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs the recurring processor at the engine clock's current instant.
    pub fn run_recurring(&self) -> Result<BatchReport> {
        RecurringProcessor::run_with_clock(self.session(), self.clock.as_ref())
    }

    pub fn reconcile(&self, account_id: Uuid) -> Result<ReconciliationReport> {
        ReconciliationService::replay(self.session(), account_id)
    }

    pub fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>> {
        ReconciliationService::replay_all(self.session())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::core::time::FixedClock;

    #[test]
    fn open_creates_ledger_under_base_dir() {
        let temp = TempDir::new().unwrap();
        let engine = LedgerEngine::open(EngineConfig::default(), temp.path()).unwrap();
        assert_eq!(engine.data_path(), Some(temp.path().join("ledger.json").as_path()));
        assert!(engine.reconcile_all().unwrap().is_empty());
    }

    #[test]
    fn clock_drives_recurring_runs() {
        let instant = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let engine = LedgerEngine::in_memory(EngineConfig::default())
            .with_clock(Box::new(FixedClock(instant)));
        assert_eq!(engine.now(), instant);
        assert_eq!(engine.run_recurring().unwrap(), BatchReport::default());
    }
}
