//! Persistence backends and the atomic unit-of-work abstraction.
//!
//! Every record carries a `version`. A [`ChangeSet`] pairs the versions a unit
//! of work observed with the mutations it wants to make; backends apply it
//! all-or-nothing and reject it with [`LedgerError::WriteConflict`] when any
//! observed version is stale.

pub mod json_backend;
pub mod memory;
pub mod state;
pub mod unit_of_work;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::{LedgerError, RecordKind, Result};
use crate::ledger::{Account, Category, LedgerEntry, RecurringTemplate};

pub use json_backend::JsonStore;
pub use memory::MemoryStore;
pub use state::{LedgerState, CURRENT_SCHEMA_VERSION};
pub use unit_of_work::{atomically, UnitOfWork};

/// Abstraction over persistence backends holding accounts, entries and templates.
pub trait StorageBackend: Send + Sync {
    fn account(&self, id: Uuid) -> Result<Option<Account>>;
    fn accounts(&self) -> Result<Vec<Account>>;
    fn category(&self, id: Uuid) -> Result<Option<Category>>;
    fn categories(&self) -> Result<Vec<Category>>;
    fn entry(&self, id: Uuid) -> Result<Option<LedgerEntry>>;
    /// Entries booked on `account_id`, ordered by `(occurred_at, sequence)`.
    fn entries_for_account(&self, account_id: Uuid) -> Result<Vec<LedgerEntry>>;
    fn template(&self, id: Uuid) -> Result<Option<RecurringTemplate>>;
    fn templates(&self) -> Result<Vec<RecurringTemplate>>;
    /// Hands out the next insertion-order number. Gaps are allowed.
    fn allocate_sequence(&self) -> u64;
    /// Applies every mutation in `changes` or none of them.
    fn commit(&self, changes: ChangeSet) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub id: Uuid,
}

impl RecordKey {
    pub fn account(id: Uuid) -> Self {
        Self {
            kind: RecordKind::Account,
            id,
        }
    }

    pub fn category(id: Uuid) -> Self {
        Self {
            kind: RecordKind::Category,
            id,
        }
    }

    pub fn entry(id: Uuid) -> Self {
        Self {
            kind: RecordKind::Entry,
            id,
        }
    }

    pub fn template(id: Uuid) -> Self {
        Self {
            kind: RecordKind::Template,
            id,
        }
    }
}

/// Version observed for a record; `None` means the record must not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub key: RecordKey,
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Inserts or replaces account metadata. Never changes a stored balance.
    PutAccount(Account),
    /// Increments the stored balance; the only way a balance changes.
    ApplyBalanceDelta { account_id: Uuid, delta: Decimal },
    PutCategory(Category),
    PutEntry(LedgerEntry),
    RemoveEntry(Uuid),
    PutTemplate(RecurringTemplate),
    RemoveTemplate(Uuid),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub expectations: Vec<Expectation>,
    pub mutations: Vec<Mutation>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, key: RecordKey, version: Option<u64>) -> &mut Self {
        self.expectations.push(Expectation { key, version });
        self
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

pub(crate) fn conflict(key: RecordKey, expected: Option<u64>, found: Option<u64>) -> LedgerError {
    let describe = |version: Option<u64>| match version {
        Some(v) => format!("version {v}"),
        None => "absent".to_string(),
    };
    LedgerError::WriteConflict(format!(
        "{} {} expected {}, found {}",
        key.kind,
        key.id,
        describe(expected),
        describe(found)
    ))
}
