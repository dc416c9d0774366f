mod common;

use chrono::Datelike;
use common::{at, dec, TestLedger};
use fintrack_core::{
    core::services::{NewEntry, ReconciliationService, TransactionService},
    errors::LedgerError,
    ledger::Direction,
    storage::{ChangeSet, Mutation, StorageBackend},
};
use uuid::Uuid;

fn seeded() -> (TestLedger, Uuid, Vec<Uuid>) {
    let ledger = TestLedger::new();
    let account = ledger.account("Checking", 1000);
    let groceries = ledger.expense_category("Groceries");
    let salary = ledger.income_category("Salary");
    let mut ids = Vec::new();
    for (day, request) in [
        (1, NewEntry::expense(account, groceries, dec(150), at(2025, 2, 1, 9, 0))),
        (2, NewEntry::income(account, salary, dec(900), at(2025, 2, 2, 9, 0))),
        (3, NewEntry::expense(account, groceries, dec(40), at(2025, 2, 3, 9, 0))),
    ] {
        let created = TransactionService::create(ledger.session(), ledger.owner, request).unwrap();
        assert_eq!(created[0].occurred_at.day(), day);
        ids.push(created[0].id);
    }
    (ledger, account, ids)
}

#[test]
fn clean_history_replays_to_stored_balance() {
    let (ledger, account, _) = seeded();
    let report = ReconciliationService::replay(ledger.session(), account).unwrap();
    assert!(report.valid);
    assert_eq!(report.entries_checked, 3);
    assert_eq!(report.computed_balance, dec(1710));
    assert_eq!(report.stored_balance, dec(1710));
}

#[test]
fn out_of_band_balance_change_is_reported_not_healed() {
    let (ledger, account, _) = seeded();
    let mut tamper = ChangeSet::new();
    tamper.push(Mutation::ApplyBalanceDelta {
        account_id: account,
        delta: dec(5),
    });
    ledger.store.commit(tamper).unwrap();

    let report = ReconciliationService::replay(ledger.session(), account).unwrap();
    assert!(!report.valid);
    assert_eq!(report.discrepancies.len(), 1);
    let final_check = &report.discrepancies[0];
    assert_eq!(final_check.entry_id, None);
    assert_eq!(final_check.expected, dec(1710));
    assert_eq!(final_check.actual, dec(1715));

    // Replay is diagnostic only.
    assert_eq!(ledger.balance(account), dec(1715));
}

#[test]
fn snapshot_drift_names_the_entry() {
    let (ledger, account, ids) = seeded();
    let mut entry = ledger.store.entry(ids[1]).unwrap().unwrap();
    entry.balance_after = dec(1);
    let mut tamper = ChangeSet::new();
    tamper.push(Mutation::PutEntry(entry));
    ledger.store.commit(tamper).unwrap();

    let report = ReconciliationService::replay(ledger.session(), account).unwrap();
    assert!(!report.valid);
    assert_eq!(report.discrepancies.len(), 1);
    assert_eq!(report.discrepancies[0].entry_id, Some(ids[1]));
    assert_eq!(report.discrepancies[0].expected, dec(1750));
    assert_eq!(report.discrepancies[0].actual, dec(1));
}

#[test]
fn direction_contradicting_kind_is_flagged() {
    let (ledger, account, ids) = seeded();
    let mut entry = ledger.store.entry(ids[0]).unwrap().unwrap();
    entry.direction = Direction::Credit;
    let mut tamper = ChangeSet::new();
    tamper.push(Mutation::PutEntry(entry));
    ledger.store.commit(tamper).unwrap();

    let report = ReconciliationService::replay(ledger.session(), account).unwrap();
    assert!(!report.valid);
    assert!(report
        .discrepancies
        .iter()
        .any(|d| d.entry_id == Some(ids[0]) && d.reason.contains("Expense")));
    // The stored direction drives the replay: +150 instead of -150.
    assert_eq!(report.computed_balance, dec(2010));
}

#[test]
fn replay_all_covers_every_account() {
    let (ledger, _, _) = seeded();
    let savings = ledger.account("Savings", 10);
    let reports = ReconciliationService::replay_all(ledger.session()).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().any(|report| report.account_id == savings));
    assert!(reports.iter().all(|report| report.valid));
}

#[test]
fn replay_of_unknown_account_is_not_found() {
    let ledger = TestLedger::new();
    let err = ReconciliationService::replay(ledger.session(), Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));

    let account = ledger.account("Checking", 0);
    let err =
        ReconciliationService::replay_owned(ledger.session(), Uuid::new_v4(), account).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
}
