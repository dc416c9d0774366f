use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of money movement recorded by a ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Expense,
    Income,
    TransferOut,
    TransferIn,
}

impl EntryKind {
    pub fn is_transfer(self) -> bool {
        matches!(self, EntryKind::TransferOut | EntryKind::TransferIn)
    }

    /// The only direction an entry of this kind may carry.
    pub fn direction(self) -> Direction {
        match self {
            EntryKind::Expense | EntryKind::TransferOut => Direction::Debit,
            EntryKind::Income | EntryKind::TransferIn => Direction::Credit,
        }
    }
}

/// Whether an entry takes money out of (`Debit`) or puts money into (`Credit`)
/// its account. Stored explicitly on every entry and never inferred.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    /// Signed balance effect of moving `amount` in this direction.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Direction::Debit => -amount,
            Direction::Credit => amount,
        }
    }
}

/// Write path that produced an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EntrySource {
    #[default]
    Manual,
    Recurring,
    Import,
    Assistant,
}

/// One record of a money movement affecting a single account's balance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: EntryKind,
    pub direction: Direction,
    pub amount: Decimal,
    pub account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_account_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    /// Insertion order, used to break ties between equal `occurred_at` values.
    pub sequence: u64,
    pub balance_after: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_entry_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub source: EntrySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl LedgerEntry {
    /// Signed effect of this entry on its own account, read from `direction`.
    pub fn effect(&self) -> Decimal {
        self.direction.signed(self.amount)
    }

    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.occurred_at, self.sequence)
    }

    pub fn is_owned_by(&self, owner_id: Uuid) -> bool {
        self.owner_id == owner_id
    }

    /// Whether `other` looks like the opposite leg of the same transfer.
    pub fn mirrors(&self, other: &LedgerEntry) -> bool {
        self.kind.is_transfer()
            && other.kind.is_transfer()
            && self.kind != other.kind
            && self.owner_id == other.owner_id
            && self.amount == other.amount
            && self.occurred_at == other.occurred_at
            && Some(self.account_id) == other.counter_account_id
            && self.counter_account_id == Some(other.account_id)
    }
}

/// Normalizes free-form tags: trimmed, non-empty, sorted and unique.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.as_ref().trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}
