use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use tracing::{info, warn};
use uuid::Uuid;

use super::{ChangeSet, LedgerState, MemoryStore, StorageBackend, CURRENT_SCHEMA_VERSION};
use crate::core::utils::write_atomically;
use crate::errors::{LedgerError, Result};
use crate::ledger::{Account, Category, LedgerEntry, RecurringTemplate};

/// File-backed store: every commit rewrites the JSON document atomically.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonStore {
    /// Opens the ledger file at `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            load_state_from_path(&path)?
        } else {
            LedgerState::default()
        };
        for warning in state_warnings(&state) {
            warn!(path = %path.display(), "{warning}");
        }
        info!(
            path = %path.display(),
            accounts = state.accounts.len(),
            entries = state.entries.len(),
            templates = state.templates.len(),
            "opened ledger store"
        );
        Ok(Self {
            path,
            inner: MemoryStore::from_state(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Result<LedgerState> {
        self.inner.snapshot()
    }
}

impl StorageBackend for JsonStore {
    fn account(&self, id: Uuid) -> Result<Option<Account>> {
        self.inner.account(id)
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        self.inner.accounts()
    }

    fn category(&self, id: Uuid) -> Result<Option<Category>> {
        self.inner.category(id)
    }

    fn categories(&self) -> Result<Vec<Category>> {
        self.inner.categories()
    }

    fn entry(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        self.inner.entry(id)
    }

    fn entries_for_account(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.inner.entries_for_account(account_id)
    }

    fn template(&self, id: Uuid) -> Result<Option<RecurringTemplate>> {
        self.inner.template(id)
    }

    fn templates(&self) -> Result<Vec<RecurringTemplate>> {
        self.inner.templates()
    }

    fn allocate_sequence(&self) -> u64 {
        self.inner.allocate_sequence()
    }

    fn commit(&self, changes: ChangeSet) -> Result<()> {
        let path = self.path.clone();
        self.inner
            .commit_with(changes, |state| save_state_to_path(state, &path))
    }
}

/// Writes the state to disk atomically by staging to a temporary file.
pub fn save_state_to_path(state: &LedgerState, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    write_atomically(path, &json)?;
    Ok(())
}

/// Loads a state snapshot, refusing files written by a newer schema.
pub fn load_state_from_path(path: &Path) -> Result<LedgerState> {
    let data = fs::read_to_string(path)?;
    let state: LedgerState = serde_json::from_str(&data)?;
    if state.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(LedgerError::Storage(format!(
            "ledger file `{}` uses schema version {} (supported: {})",
            path.display(),
            state.schema_version,
            CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(state)
}

/// Detects dangling references and other anomalies within a state snapshot.
pub fn state_warnings(state: &LedgerState) -> Vec<String> {
    let account_ids: HashSet<_> = state.accounts.keys().copied().collect();
    let category_ids: HashSet<_> = state.categories.keys().copied().collect();
    let mut warnings = Vec::new();

    for entry in state.entries.values() {
        if !account_ids.contains(&entry.account_id) {
            warnings.push(format!(
                "entry {} references unknown account {}",
                entry.id, entry.account_id
            ));
        }
        if let Some(category) = entry.category_id {
            if !category_ids.contains(&category) {
                warnings.push(format!(
                    "entry {} references missing category {}",
                    entry.id, category
                ));
            }
        }
        if entry.kind.is_transfer() {
            let paired = entry
                .linked_entry_id
                .and_then(|id| state.entries.get(&id))
                .map_or(false, |other| entry.mirrors(other));
            if !paired {
                warnings.push(format!("transfer leg {} has no matching pair", entry.id));
            }
        }
    }
    for template in state.templates.values() {
        if !account_ids.contains(&template.account_id) {
            warnings.push(format!(
                "recurring template {} references unknown account {}",
                template.id, template.account_id
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::*;
    use crate::currency::CurrencyCode;
    use crate::ledger::AccountKind;
    use crate::storage::Mutation;

    fn store_in_temp_dir() -> (JsonStore, TempDir) {
        let temp = TempDir::new().expect("create temp dir");
        let store = JsonStore::open(temp.path().join("ledger.json")).expect("open store");
        (store, temp)
    }

    #[test]
    fn commits_survive_reopen() {
        let (store, temp) = store_in_temp_dir();
        let account = Account::new(
            Uuid::new_v4(),
            "Checking",
            AccountKind::Checking,
            CurrencyCode::default(),
            Decimal::from(250),
        );
        let mut changes = ChangeSet::new();
        changes.push(Mutation::PutAccount(account.clone()));
        store.commit(changes).expect("commit");

        let reopened = JsonStore::open(temp.path().join("ledger.json")).expect("reopen");
        let loaded = reopened.account(account.id).unwrap().expect("account persisted");
        assert_eq!(loaded.balance(), Decimal::from(250));
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.json");
        let mut state = LedgerState::default();
        state.schema_version = CURRENT_SCHEMA_VERSION + 1;
        save_state_to_path(&state, &path).unwrap();

        let err = JsonStore::open(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(ref msg) if msg.contains("schema")));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let (store, temp) = store_in_temp_dir();
        let mut changes = ChangeSet::new();
        changes.push(Mutation::PutCategory(Category::new(
            Uuid::new_v4(),
            "Groceries",
            crate::ledger::CategoryKind::Expense,
        )));
        store.commit(changes).unwrap();
        assert!(store.path().exists());
        assert!(!temp.path().join("ledger.json.tmp").exists());
    }
}
