use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use uuid::Uuid;

use super::{ChangeSet, LedgerState, StorageBackend};
use crate::errors::{LedgerError, Result};
use crate::ledger::{Account, Category, LedgerEntry, RecurringTemplate};

/// In-process store; commits are validated and applied under one write lock.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<LedgerState>,
    sequence: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_state(LedgerState::default())
    }

    pub fn from_state(state: LedgerState) -> Self {
        let next = state.next_sequence.max(1);
        Self {
            state: RwLock::new(state),
            sequence: AtomicU64::new(next),
        }
    }

    /// Clone of the current state, e.g. for export.
    pub fn snapshot(&self) -> Result<LedgerState> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("ledger state lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("ledger state lock poisoned".into()))
    }

    /// Commits `changes`, first handing the would-be state to `persist`.
    ///
    /// The published state is only replaced once `persist` succeeds, so a
    /// failed write leaves both the durable copy and memory untouched.
    pub(crate) fn commit_with<F>(&self, changes: ChangeSet, persist: F) -> Result<()>
    where
        F: FnOnce(&LedgerState) -> Result<()>,
    {
        let mut guard = self.write()?;
        guard.check(&changes)?;
        let mutations = changes.mutations.len();
        let mut staged = guard.clone();
        staged.apply(changes);
        persist(&staged)?;
        *guard = staged;
        debug!(mutations, "committed change set");
        Ok(())
    }
}

impl StorageBackend for MemoryStore {
    fn account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.read()?.accounts.values().cloned().collect())
    }

    fn category(&self, id: Uuid) -> Result<Option<Category>> {
        Ok(self.read()?.categories.get(&id).cloned())
    }

    fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.read()?.categories.values().cloned().collect())
    }

    fn entry(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        Ok(self.read()?.entries.get(&id).cloned())
    }

    fn entries_for_account(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>> {
        Ok(self.read()?.entries_for_account(account_id))
    }

    fn template(&self, id: Uuid) -> Result<Option<RecurringTemplate>> {
        Ok(self.read()?.templates.get(&id).cloned())
    }

    fn templates(&self) -> Result<Vec<RecurringTemplate>> {
        Ok(self.read()?.templates.values().cloned().collect())
    }

    fn allocate_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut guard = self.write()?;
        guard.check(&changes)?;
        let mutations = changes.mutations.len();
        guard.apply(changes);
        debug!(mutations, "committed change set");
        Ok(())
    }
}
