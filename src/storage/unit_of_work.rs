//! Begin / commit / abort over any [`StorageBackend`].
//!
//! A unit of work reads through to the store, remembering the version of every
//! record it sees, and stages writes in memory. Nothing reaches the store until
//! [`UnitOfWork::commit`], which submits a single [`ChangeSet`]; dropping the
//! unit of work (or calling [`UnitOfWork::abort`]) discards everything.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChangeSet, Mutation, RecordKey, StorageBackend};
use crate::errors::{LedgerError, RecordKind, Result};
use crate::ledger::{Account, Category, LedgerEntry, RecurringTemplate};

type OrderKey = (DateTime<Utc>, u64);

pub struct UnitOfWork<'a> {
    store: &'a dyn StorageBackend,
    observed: HashMap<RecordKey, Option<u64>>,
    accounts: HashMap<Uuid, Option<Account>>,
    account_puts: BTreeSet<Uuid>,
    balance_deltas: BTreeMap<Uuid, Decimal>,
    categories: HashMap<Uuid, Option<Category>>,
    category_puts: BTreeSet<Uuid>,
    entries: HashMap<Uuid, Option<LedgerEntry>>,
    entry_writes: BTreeSet<Uuid>,
    templates: HashMap<Uuid, Option<RecurringTemplate>>,
    template_writes: BTreeSet<Uuid>,
    /// Earliest timeline position touched on each account.
    reordered: BTreeMap<Uuid, OrderKey>,
}

impl<'a> UnitOfWork<'a> {
    pub fn begin(store: &'a dyn StorageBackend) -> Self {
        Self {
            store,
            observed: HashMap::new(),
            accounts: HashMap::new(),
            account_puts: BTreeSet::new(),
            balance_deltas: BTreeMap::new(),
            categories: HashMap::new(),
            category_puts: BTreeSet::new(),
            entries: HashMap::new(),
            entry_writes: BTreeSet::new(),
            templates: HashMap::new(),
            template_writes: BTreeSet::new(),
            reordered: BTreeMap::new(),
        }
    }

    fn observe(&mut self, key: RecordKey, version: Option<u64>) {
        self.observed.entry(key).or_insert(version);
    }

    pub fn allocate_sequence(&self) -> u64 {
        self.store.allocate_sequence()
    }

    // ----- accounts -------------------------------------------------------

    pub fn account(&mut self, id: Uuid) -> Result<Option<&Account>> {
        if !self.accounts.contains_key(&id) {
            let loaded = self.store.account(id)?;
            self.observe(RecordKey::account(id), loaded.as_ref().map(|a| a.version));
            self.accounts.insert(id, loaded);
        }
        Ok(self.accounts.get(&id).and_then(Option::as_ref))
    }

    pub fn require_account(&mut self, id: Uuid) -> Result<&Account> {
        self.account(id)?
            .ok_or_else(|| LedgerError::not_found(RecordKind::Account, id))
    }

    /// Stages account metadata. The working balance is kept as-is.
    pub fn put_account(&mut self, mut account: Account) -> Result<()> {
        let id = account.id;
        if let Some(existing) = self.account(id)? {
            account.keep_balance_of(existing);
        }
        self.accounts.insert(id, Some(account));
        self.account_puts.insert(id);
        Ok(())
    }

    /// Every account of `owner_id`, staged ones included. Each committed account
    /// read here becomes an expectation of the unit of work.
    pub fn owned_accounts(&mut self, owner_id: Uuid) -> Result<Vec<Account>> {
        for account in self.store.accounts()? {
            if account.is_owned_by(owner_id) {
                self.account(account.id)?;
            }
        }
        Ok(self
            .accounts
            .values()
            .flatten()
            .filter(|account| account.is_owned_by(owner_id))
            .cloned()
            .collect())
    }

    /// Applies a signed delta to an account's balance and returns the new balance.
    ///
    /// This is the account balance store: no other code path changes a balance.
    /// At commit the delta is submitted as an increment, never as an absolute value.
    pub fn apply_balance_delta(&mut self, account_id: Uuid, delta: Decimal) -> Result<Decimal> {
        self.require_account(account_id)?;
        let account = self
            .accounts
            .get_mut(&account_id)
            .and_then(Option::as_mut)
            .ok_or_else(|| LedgerError::not_found(RecordKind::Account, account_id))?;
        let balance = account.apply_delta(delta);
        *self.balance_deltas.entry(account_id).or_insert(Decimal::ZERO) += delta;
        debug!(%account_id, %delta, %balance, "staged balance delta");
        Ok(balance)
    }

    // ----- categories -----------------------------------------------------

    pub fn category(&mut self, id: Uuid) -> Result<Option<&Category>> {
        if !self.categories.contains_key(&id) {
            let loaded = self.store.category(id)?;
            self.observe(RecordKey::category(id), loaded.as_ref().map(|c| c.version));
            self.categories.insert(id, loaded);
        }
        Ok(self.categories.get(&id).and_then(Option::as_ref))
    }

    pub fn put_category(&mut self, category: Category) -> Result<()> {
        let id = category.id;
        self.category(id)?;
        self.categories.insert(id, Some(category));
        self.category_puts.insert(id);
        Ok(())
    }

    /// Every category of `owner_id`, tracked like [`UnitOfWork::owned_accounts`].
    pub fn owned_categories(&mut self, owner_id: Uuid) -> Result<Vec<Category>> {
        for category in self.store.categories()? {
            if category.is_owned_by(owner_id) {
                self.category(category.id)?;
            }
        }
        Ok(self
            .categories
            .values()
            .flatten()
            .filter(|category| category.is_owned_by(owner_id))
            .cloned()
            .collect())
    }

    // ----- entries --------------------------------------------------------

    pub fn entry(&mut self, id: Uuid) -> Result<Option<&LedgerEntry>> {
        if !self.entries.contains_key(&id) {
            let loaded = self.store.entry(id)?;
            self.observe(RecordKey::entry(id), loaded.as_ref().map(|e| e.version));
            self.entries.insert(id, loaded);
        }
        Ok(self.entries.get(&id).and_then(Option::as_ref))
    }

    /// Committed entries on `account_id`. Read straight from the store and not
    /// tracked; load a candidate through [`UnitOfWork::entry`] before relying on it.
    pub fn stored_entries_for_account(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_account(account_id)
    }

    pub fn insert_entry(&mut self, entry: LedgerEntry) -> Result<()> {
        if self.entry(entry.id)?.is_some() {
            return Err(LedgerError::DataIntegrity(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
        self.mark_reordered(entry.account_id, entry.order_key());
        self.entry_writes.insert(entry.id);
        self.entries.insert(entry.id, Some(entry));
        Ok(())
    }

    pub fn replace_entry(&mut self, entry: LedgerEntry) -> Result<()> {
        let previous = self
            .entry(entry.id)?
            .map(|old| (old.account_id, old.order_key()))
            .ok_or_else(|| LedgerError::not_found(RecordKind::Entry, entry.id))?;
        self.mark_reordered(previous.0, previous.1);
        self.mark_reordered(entry.account_id, entry.order_key());
        self.entry_writes.insert(entry.id);
        self.entries.insert(entry.id, Some(entry));
        Ok(())
    }

    pub fn remove_entry(&mut self, id: Uuid) -> Result<LedgerEntry> {
        let removed = self
            .entry(id)?
            .cloned()
            .ok_or_else(|| LedgerError::not_found(RecordKind::Entry, id))?;
        self.mark_reordered(removed.account_id, removed.order_key());
        self.entry_writes.insert(id);
        self.entries.insert(id, None);
        Ok(removed)
    }

    fn mark_reordered(&mut self, account_id: Uuid, key: OrderKey) {
        self.reordered
            .entry(account_id)
            .and_modify(|earliest| *earliest = (*earliest).min(key))
            .or_insert(key);
    }

    // ----- templates ------------------------------------------------------

    pub fn template(&mut self, id: Uuid) -> Result<Option<&RecurringTemplate>> {
        if !self.templates.contains_key(&id) {
            let loaded = self.store.template(id)?;
            self.observe(RecordKey::template(id), loaded.as_ref().map(|t| t.version));
            self.templates.insert(id, loaded);
        }
        Ok(self.templates.get(&id).and_then(Option::as_ref))
    }

    pub fn put_template(&mut self, template: RecurringTemplate) -> Result<()> {
        let id = template.id;
        self.template(id)?;
        self.templates.insert(id, Some(template));
        self.template_writes.insert(id);
        Ok(())
    }

    pub fn remove_template(&mut self, id: Uuid) -> Result<RecurringTemplate> {
        let removed = self
            .template(id)?
            .cloned()
            .ok_or_else(|| LedgerError::not_found(RecordKind::Template, id))?;
        self.templates.insert(id, None);
        self.template_writes.insert(id);
        Ok(removed)
    }

    // ----- commit ---------------------------------------------------------

    /// Restamps `balance_after` on every entry at or after the earliest touched
    /// position, walking backwards from the account's post-delta balance.
    fn restamp(&mut self, account_id: Uuid, from: OrderKey) -> Result<()> {
        let balance = match self.account(account_id)? {
            Some(account) => account.balance(),
            None => return Ok(()),
        };

        let stored = self.store.entries_for_account(account_id)?;
        let mut seen = HashSet::new();
        let mut timeline = Vec::with_capacity(stored.len() + 2);
        for entry in stored {
            seen.insert(entry.id);
            match self.entries.get(&entry.id) {
                Some(Some(working)) if working.account_id == account_id => {
                    timeline.push(working.clone())
                }
                Some(_) => {}
                None => timeline.push(entry),
            }
        }
        timeline.extend(
            self.entries
                .values()
                .flatten()
                .filter(|entry| entry.account_id == account_id && !seen.contains(&entry.id))
                .cloned(),
        );
        timeline.sort_by_key(LedgerEntry::order_key);

        let mut running = balance;
        let mut restamped = 0usize;
        for entry in timeline.iter().rev() {
            if entry.order_key() < from {
                break;
            }
            if entry.balance_after != running {
                let mut updated = entry.clone();
                updated.balance_after = running;
                self.observe(RecordKey::entry(entry.id), Some(entry.version));
                self.entries.insert(entry.id, Some(updated));
                self.entry_writes.insert(entry.id);
                restamped += 1;
            }
            running -= entry.effect();
        }
        if restamped > 1 {
            debug!(%account_id, restamped, "restamped balance snapshots");
        }
        Ok(())
    }

    fn into_change_set(mut self) -> Result<ChangeSet> {
        let reordered: Vec<(Uuid, OrderKey)> =
            self.reordered.iter().map(|(id, key)| (*id, *key)).collect();
        for (account_id, from) in reordered {
            self.restamp(account_id, from)?;
            if !self.balance_deltas.contains_key(&account_id)
                && self.accounts.get(&account_id).map_or(false, Option::is_some)
            {
                // Zero increment still bumps the version so concurrent writers conflict.
                self.balance_deltas.insert(account_id, Decimal::ZERO);
            }
        }

        let mut changes = ChangeSet::new();
        for (key, version) in &self.observed {
            changes.expect(*key, *version);
        }
        for id in &self.account_puts {
            if let Some(Some(account)) = self.accounts.get(id) {
                changes.push(Mutation::PutAccount(account.clone()));
            }
        }
        for (account_id, delta) in &self.balance_deltas {
            changes.push(Mutation::ApplyBalanceDelta {
                account_id: *account_id,
                delta: *delta,
            });
        }
        for id in &self.category_puts {
            if let Some(Some(category)) = self.categories.get(id) {
                changes.push(Mutation::PutCategory(category.clone()));
            }
        }
        for id in &self.entry_writes {
            match self.entries.get(id) {
                Some(Some(entry)) => changes.push(Mutation::PutEntry(entry.clone())),
                _ => changes.push(Mutation::RemoveEntry(*id)),
            };
        }
        for id in &self.template_writes {
            match self.templates.get(id) {
                Some(Some(template)) => changes.push(Mutation::PutTemplate(template.clone())),
                _ => changes.push(Mutation::RemoveTemplate(*id)),
            };
        }
        Ok(changes)
    }

    /// Submits every staged write as one change set.
    pub fn commit(self) -> Result<()> {
        let store = self.store;
        let changes = self.into_change_set()?;
        if changes.is_empty() {
            return Ok(());
        }
        store.commit(changes)
    }

    /// Discards every staged write.
    pub fn abort(self) {
        debug!(
            staged_entries = self.entry_writes.len(),
            "aborted unit of work"
        );
    }
}

/// Runs `work` in a fresh unit of work and commits it, retrying the whole
/// closure on [`LedgerError::WriteConflict`] up to `attempts` times.
pub fn atomically<T, F>(store: &dyn StorageBackend, attempts: u32, mut work: F) -> Result<T>
where
    F: FnMut(&mut UnitOfWork<'_>) -> Result<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut uow = UnitOfWork::begin(store);
        let outcome = match work(&mut uow) {
            Ok(value) => uow.commit().map(|_| value),
            Err(err) => {
                uow.abort();
                Err(err)
            }
        };
        match outcome {
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %err, "unit of work conflicted; retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}
