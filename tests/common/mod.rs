#![allow(dead_code)]

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use fintrack_core::{
    config::EngineConfig,
    core::services::{AccountService, CategoryService, NewAccount, ReconciliationService, Session},
    ledger::{AccountKind, CategoryKind},
    storage::{JsonStore, MemoryStore, StorageBackend},
};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

/// Holds TempDir guards so temporary folders live for the duration of the test run.
static TEST_DIRS: Lazy<Mutex<Vec<TempDir>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Creates a unique directory that outlives the calling test.
pub fn temp_base_dir() -> std::path::PathBuf {
    let temp = TempDir::new().expect("create temp dir");
    let base = temp.path().to_path_buf();
    TEST_DIRS.lock().expect("lock temp dir registry").push(temp);
    base
}

pub fn json_store() -> JsonStore {
    JsonStore::open(temp_base_dir().join("ledger.json")).expect("open json store")
}

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// In-memory ledger with a single owner, ready for service calls.
pub struct TestLedger {
    pub store: Box<dyn StorageBackend>,
    pub config: EngineConfig,
    pub owner: Uuid,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::with_store(Box::new(MemoryStore::new()))
    }

    pub fn with_store(store: Box<dyn StorageBackend>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            owner: Uuid::new_v4(),
        }
    }

    pub fn session(&self) -> Session<'_> {
        Session::new(self.store.as_ref(), &self.config)
    }

    pub fn account(&self, name: &str, opening: i64) -> Uuid {
        AccountService::open(
            self.session(),
            self.owner,
            NewAccount::new(name, AccountKind::Checking, dec(opening)),
        )
        .expect("open account")
        .id
    }

    pub fn expense_category(&self, name: &str) -> Uuid {
        CategoryService::add(self.session(), self.owner, name, CategoryKind::Expense)
            .expect("add category")
            .id
    }

    pub fn income_category(&self, name: &str) -> Uuid {
        CategoryService::add(self.session(), self.owner, name, CategoryKind::Income)
            .expect("add category")
            .id
    }

    pub fn balance(&self, account_id: Uuid) -> Decimal {
        self.store
            .account(account_id)
            .expect("read account")
            .expect("account exists")
            .balance()
    }

    /// Asserts that every account replays cleanly against its stored balance.
    pub fn assert_reconciled(&self) {
        for report in ReconciliationService::replay_all(self.session()).expect("replay") {
            assert!(
                report.valid,
                "account {} failed reconciliation: {:?}",
                report.account_id, report.discrepancies
            );
        }
    }
}
