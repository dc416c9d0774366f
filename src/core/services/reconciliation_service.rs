//! Read-only replay of an account's history against its stored balance.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{LedgerError, RecordKind};
use crate::ledger::{Account, LedgerEntry};

use super::{ServiceResult, Session};

/// One mismatch found during replay. `entry_id` is `None` for the final
/// comparison against the account's stored balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub entry_id: Option<Uuid>,
    /// Value obtained by replaying the history.
    pub expected: Decimal,
    /// Value stored on the entry or the account.
    pub actual: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub account_id: Uuid,
    pub valid: bool,
    pub entries_checked: usize,
    pub computed_balance: Decimal,
    pub stored_balance: Decimal,
    pub discrepancies: Vec<Discrepancy>,
}

pub struct ReconciliationService;

impl ReconciliationService {
    /// Replays one account, reporting every drift without correcting it.
    pub fn replay(session: Session<'_>, account_id: Uuid) -> ServiceResult<ReconciliationReport> {
        let account = session
            .store
            .account(account_id)?
            .ok_or_else(|| LedgerError::not_found(RecordKind::Account, account_id))?;
        let entries = session.store.entries_for_account(account_id)?;
        let report = replay_entries(&account, &entries, session.config.reconciliation_tolerance);
        if report.valid {
            info!(%account_id, entries = report.entries_checked, "account reconciled");
        } else {
            warn!(
                %account_id,
                discrepancies = report.discrepancies.len(),
                computed = %report.computed_balance,
                stored = %report.stored_balance,
                "account failed reconciliation"
            );
        }
        Ok(report)
    }

    /// Replays every account in the store.
    pub fn replay_all(session: Session<'_>) -> ServiceResult<Vec<ReconciliationReport>> {
        let mut accounts = session.store.accounts()?;
        accounts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        accounts
            .iter()
            .map(|account| Self::replay(session, account.id))
            .collect()
    }

    /// Like [`ReconciliationService::replay`], restricted to accounts of `owner_id`.
    pub fn replay_owned(
        session: Session<'_>,
        owner_id: Uuid,
        account_id: Uuid,
    ) -> ServiceResult<ReconciliationReport> {
        let owned = session
            .store
            .account(account_id)?
            .map_or(false, |account| account.is_owned_by(owner_id));
        if !owned {
            return Err(LedgerError::not_found(RecordKind::Account, account_id));
        }
        Self::replay(session, account_id)
    }
}

/// Pure replay over entries already sorted by `(occurred_at, sequence)`.
pub fn replay_entries(
    account: &Account,
    entries: &[LedgerEntry],
    tolerance: Decimal,
) -> ReconciliationReport {
    let mut running = account.opening_balance;
    let mut discrepancies = Vec::new();

    for entry in entries {
        if entry.direction != entry.kind.direction() {
            discrepancies.push(Discrepancy {
                entry_id: Some(entry.id),
                expected: entry.kind.direction().signed(entry.amount),
                actual: entry.effect(),
                reason: format!("{:?} entry stored as {:?}", entry.kind, entry.direction),
            });
        }
        running += entry.effect();
        if (running - entry.balance_after).abs() > tolerance {
            discrepancies.push(Discrepancy {
                entry_id: Some(entry.id),
                expected: running,
                actual: entry.balance_after,
                reason: "balance snapshot drift".into(),
            });
        }
    }

    let stored = account.balance();
    if (running - stored).abs() > tolerance {
        discrepancies.push(Discrepancy {
            entry_id: None,
            expected: running,
            actual: stored,
            reason: "stored balance drift".into(),
        });
    }

    ReconciliationReport {
        account_id: account.id,
        valid: discrepancies.is_empty(),
        entries_checked: entries.len(),
        computed_balance: running,
        stored_balance: stored,
        discrepancies,
    }
}
