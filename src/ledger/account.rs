use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::CurrencyCode;

/// Represents a financial account with a cached running balance.
///
/// `balance` is readable by everyone but only changes through
/// [`Account::apply_delta`], which the storage layer invokes while committing a
/// unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub kind: AccountKind,
    pub currency: CurrencyCode,
    pub opening_balance: Decimal,
    balance: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl Account {
    /// Creates an active account whose balance starts at `opening_balance`.
    pub fn new(
        owner_id: Uuid,
        name: impl Into<String>,
        kind: AccountKind,
        currency: CurrencyCode,
        opening_balance: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            kind,
            currency,
            opening_balance,
            balance: opening_balance,
            active: true,
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_owned_by(&self, owner_id: Uuid) -> bool {
        self.owner_id == owner_id
    }

    /// Adds a signed delta to the cached balance and returns the new balance.
    pub(crate) fn apply_delta(&mut self, delta: Decimal) -> Decimal {
        self.balance += delta;
        self.balance
    }

    /// Copies the stored balance from `other`, keeping every other field.
    pub(crate) fn keep_balance_of(&mut self, other: &Account) {
        self.balance = other.balance;
    }
}

/// Enumerates the supported account classifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountKind {
    Checking,
    Savings,
    /// Credit lines routinely carry negative balances.
    Credit,
    Cash,
    Investment,
}
