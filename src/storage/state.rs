use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{conflict, ChangeSet, Mutation, RecordKey};
use crate::errors::{LedgerError, RecordKind, Result};
use crate::ledger::{Account, Category, LedgerEntry, RecurringTemplate};

pub const CURRENT_SCHEMA_VERSION: u8 = 1;

/// Complete persisted state of the ledger store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default = "LedgerState::schema_version_default")]
    pub schema_version: u8,
    #[serde(default)]
    pub accounts: BTreeMap<Uuid, Account>,
    #[serde(default)]
    pub categories: BTreeMap<Uuid, Category>,
    #[serde(default)]
    pub entries: BTreeMap<Uuid, LedgerEntry>,
    #[serde(default)]
    pub templates: BTreeMap<Uuid, RecurringTemplate>,
    #[serde(default)]
    pub next_sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            accounts: BTreeMap::new(),
            categories: BTreeMap::new(),
            entries: BTreeMap::new(),
            templates: BTreeMap::new(),
            next_sequence: 1,
            updated_at: Utc::now(),
        }
    }
}

impl LedgerState {
    pub fn schema_version_default() -> u8 {
        CURRENT_SCHEMA_VERSION
    }

    pub fn version_of(&self, key: RecordKey) -> Option<u64> {
        match key.kind {
            RecordKind::Account => self.accounts.get(&key.id).map(|a| a.version),
            RecordKind::Category => self.categories.get(&key.id).map(|c| c.version),
            RecordKind::Entry => self.entries.get(&key.id).map(|e| e.version),
            RecordKind::Template => self.templates.get(&key.id).map(|t| t.version),
        }
    }

    pub fn entries_for_account(&self, account_id: Uuid) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .values()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by_key(LedgerEntry::order_key);
        entries
    }

    /// Verifies every expectation and that each mutation has a target.
    pub fn check(&self, changes: &ChangeSet) -> Result<()> {
        for expectation in &changes.expectations {
            let found = self.version_of(expectation.key);
            if found != expectation.version {
                return Err(conflict(expectation.key, expectation.version, found));
            }
        }
        for mutation in &changes.mutations {
            match mutation {
                Mutation::ApplyBalanceDelta { account_id, .. }
                    if !self.accounts.contains_key(account_id) =>
                {
                    return Err(LedgerError::WriteConflict(format!(
                        "account {account_id} disappeared before commit"
                    )));
                }
                Mutation::RemoveEntry(id) if !self.entries.contains_key(id) => {
                    return Err(LedgerError::WriteConflict(format!(
                        "ledger entry {id} disappeared before commit"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Applies a change set that already passed [`LedgerState::check`].
    pub fn apply(&mut self, changes: ChangeSet) {
        for mutation in changes.mutations {
            match mutation {
                Mutation::PutAccount(mut account) => {
                    match self.accounts.get(&account.id) {
                        Some(existing) => {
                            account.keep_balance_of(existing);
                            account.version = existing.version + 1;
                        }
                        None => account.version = 1,
                    }
                    self.accounts.insert(account.id, account);
                }
                Mutation::ApplyBalanceDelta { account_id, delta } => {
                    if let Some(account) = self.accounts.get_mut(&account_id) {
                        account.apply_delta(delta);
                        account.version += 1;
                    }
                }
                Mutation::PutCategory(mut category) => {
                    category.version = self
                        .categories
                        .get(&category.id)
                        .map_or(1, |existing| existing.version + 1);
                    self.categories.insert(category.id, category);
                }
                Mutation::PutEntry(mut entry) => {
                    entry.version = self
                        .entries
                        .get(&entry.id)
                        .map_or(1, |existing| existing.version + 1);
                    self.next_sequence = self.next_sequence.max(entry.sequence + 1);
                    self.entries.insert(entry.id, entry);
                }
                Mutation::RemoveEntry(id) => {
                    self.entries.remove(&id);
                }
                Mutation::PutTemplate(mut template) => {
                    template.version = self
                        .templates
                        .get(&template.id)
                        .map_or(1, |existing| existing.version + 1);
                    self.templates.insert(template.id, template);
                }
                Mutation::RemoveTemplate(id) => {
                    self.templates.remove(&id);
                }
            }
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::currency::CurrencyCode;
    use crate::ledger::AccountKind;

    fn account() -> Account {
        Account::new(
            Uuid::new_v4(),
            "Checking",
            AccountKind::Checking,
            CurrencyCode::default(),
            Decimal::from(100),
        )
    }

    #[test]
    fn put_account_never_overwrites_balance() {
        let mut state = LedgerState::default();
        let original = account();
        let mut changes = ChangeSet::new();
        changes.push(Mutation::PutAccount(original.clone()));
        state.apply(changes);

        let mut delta = ChangeSet::new();
        delta.push(Mutation::ApplyBalanceDelta {
            account_id: original.id,
            delta: Decimal::from(-40),
        });
        state.apply(delta);

        let mut renamed = original.clone();
        renamed.name = "Everyday".into();
        let mut changes = ChangeSet::new();
        changes.push(Mutation::PutAccount(renamed));
        state.apply(changes);

        let stored = &state.accounts[&original.id];
        assert_eq!(stored.name, "Everyday");
        assert_eq!(stored.balance(), Decimal::from(60));
        assert_eq!(stored.version, 3);
    }

    #[test]
    fn stale_expectation_is_a_conflict() {
        let mut state = LedgerState::default();
        let original = account();
        let mut changes = ChangeSet::new();
        changes.push(Mutation::PutAccount(original.clone()));
        state.apply(changes);

        let mut stale = ChangeSet::new();
        stale.expect(RecordKey::account(original.id), Some(0));
        let err = state.check(&stale).unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");

        let mut fresh = ChangeSet::new();
        fresh.expect(RecordKey::account(original.id), Some(1));
        assert!(state.check(&fresh).is_ok());
    }

    #[test]
    fn delta_against_missing_account_is_rejected() {
        let state = LedgerState::default();
        let mut changes = ChangeSet::new();
        changes.push(Mutation::ApplyBalanceDelta {
            account_id: Uuid::new_v4(),
            delta: Decimal::ONE,
        });
        assert!(state.check(&changes).is_err());
    }
}
