mod common;

use std::thread;

use common::{at, dec, TestLedger};
use fintrack_core::{
    core::services::{EntryChanges, NewEntry, TransactionService},
    errors::LedgerError,
    ledger::{Direction, EntryKind},
    storage::StorageBackend,
};
use uuid::Uuid;

#[test]
fn groceries_expense_leaves_850() {
    let ledger = TestLedger::new();
    let account = ledger.account("A", 1000);
    let groceries = ledger.expense_category("Groceries");

    let entries = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::expense(account, groceries, dec(150), at(2025, 3, 1, 10, 0)),
    )
    .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].balance_after, dec(850));
    assert_eq!(entries[0].direction, Direction::Debit);
    assert_eq!(ledger.balance(account), dec(850));
    ledger.assert_reconciled();
}

#[test]
fn transfer_moves_money_between_two_linked_legs() {
    let ledger = TestLedger::new();
    let source = ledger.account("Source", 100);
    let destination = ledger.account("Destination", 50);

    let legs = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::transfer(source, destination, dec(30), at(2025, 3, 1, 10, 0)),
    )
    .unwrap();

    assert_eq!(ledger.balance(source), dec(70));
    assert_eq!(ledger.balance(destination), dec(80));
    assert_eq!(legs.len(), 2);
    let (out, incoming) = (&legs[0], &legs[1]);
    assert_eq!(out.kind, EntryKind::TransferOut);
    assert_eq!(incoming.kind, EntryKind::TransferIn);
    assert_eq!(out.linked_entry_id, Some(incoming.id));
    assert_eq!(incoming.linked_entry_id, Some(out.id));
    assert_eq!(out.balance_after, dec(70));
    assert_eq!(incoming.balance_after, dec(80));
    assert!(out.mirrors(incoming));
    ledger.assert_reconciled();
}

#[test]
fn create_then_delete_round_trips_balance() {
    let ledger = TestLedger::new();
    let account = ledger.account("Checking", 1000);
    let groceries = ledger.expense_category("Groceries");

    let created = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::expense(account, groceries, dec(150), at(2025, 3, 1, 10, 0)),
    )
    .unwrap();
    assert_eq!(ledger.balance(account), dec(850));

    let removed = TransactionService::delete(ledger.session(), ledger.owner, created[0].id).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(ledger.balance(account), dec(1000));
    assert!(ledger.store.entry(created[0].id).unwrap().is_none());
    ledger.assert_reconciled();
}

#[test]
fn transfer_to_missing_account_changes_nothing() {
    let ledger = TestLedger::new();
    let source = ledger.account("Source", 100);
    let missing = Uuid::new_v4();

    let err = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::transfer(source, missing, dec(30), at(2025, 3, 1, 10, 0)),
    )
    .unwrap_err();

    assert!(matches!(err, LedgerError::NotFound { .. }), "unexpected error: {err:?}");
    assert_eq!(ledger.balance(source), dec(100));
    assert!(ledger.store.entries_for_account(source).unwrap().is_empty());
}

#[test]
fn foreign_account_is_not_found() {
    let ledger = TestLedger::new();
    let mine = ledger.account("Mine", 100);
    let groceries = ledger.expense_category("Groceries");
    let stranger = Uuid::new_v4();

    let err = TransactionService::create(
        ledger.session(),
        stranger,
        NewEntry::expense(mine, groceries, dec(10), at(2025, 3, 1, 10, 0)),
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
    assert_eq!(ledger.balance(mine), dec(100));
}

#[test]
fn deleting_either_leg_removes_the_transfer() {
    let ledger = TestLedger::new();
    let source = ledger.account("Source", 100);
    let destination = ledger.account("Destination", 50);
    let legs = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::transfer(source, destination, dec(30), at(2025, 3, 1, 10, 0)),
    )
    .unwrap();

    let removed = TransactionService::delete(ledger.session(), ledger.owner, legs[1].id).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(ledger.balance(source), dec(100));
    assert_eq!(ledger.balance(destination), dec(50));
    ledger.assert_reconciled();
}

#[test]
fn redirecting_a_transfer_rewrites_both_accounts() {
    let ledger = TestLedger::new();
    let source = ledger.account("Source", 100);
    let savings = ledger.account("Savings", 50);
    let brokerage = ledger.account("Brokerage", 0);
    let legs = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::transfer(source, savings, dec(30), at(2025, 3, 1, 10, 0)),
    )
    .unwrap();

    let changes = EntryChanges {
        amount: Some(dec(40)),
        counter_account_id: Some(brokerage),
        ..EntryChanges::default()
    };
    let rewritten =
        TransactionService::update(ledger.session(), ledger.owner, legs[0].id, changes).unwrap();

    assert_eq!(rewritten.len(), 2);
    assert_eq!(ledger.balance(source), dec(60));
    assert_eq!(ledger.balance(savings), dec(50));
    assert_eq!(ledger.balance(brokerage), dec(40));
    ledger.assert_reconciled();
}

#[test]
fn backdated_edits_keep_snapshots_consistent() {
    let ledger = TestLedger::new();
    let account = ledger.account("Checking", 1000);
    let groceries = ledger.expense_category("Groceries");
    let salary = ledger.income_category("Salary");

    let session = ledger.session();
    let rent = TransactionService::create(
        session,
        ledger.owner,
        NewEntry::expense(account, groceries, dec(300), at(2025, 3, 10, 9, 0)),
    )
    .unwrap();
    TransactionService::create(
        session,
        ledger.owner,
        NewEntry::income(account, salary, dec(2000), at(2025, 3, 20, 9, 0)),
    )
    .unwrap();
    TransactionService::create(
        session,
        ledger.owner,
        NewEntry::expense(account, groceries, dec(45), at(2025, 3, 5, 9, 0)),
    )
    .unwrap();

    let changes = EntryChanges {
        occurred_at: Some(at(2025, 3, 25, 9, 0)),
        ..EntryChanges::default()
    };
    TransactionService::update(session, ledger.owner, rent[0].id, changes).unwrap();

    let timeline = TransactionService::list_for_account(session, ledger.owner, account).unwrap();
    let snapshots: Vec<_> = timeline.iter().map(|entry| entry.balance_after).collect();
    assert_eq!(snapshots, vec![dec(955), dec(2955), dec(2655)]);
    assert_eq!(ledger.balance(account), dec(2655));
    ledger.assert_reconciled();
}

#[test]
fn concurrent_writers_serialize_their_deltas() {
    let mut ledger = TestLedger::new();
    ledger.config.max_commit_attempts = 1_000;
    let account = ledger.account("Shared", 1000);
    let groceries = ledger.expense_category("Groceries");
    let session = ledger.session();
    let owner = ledger.owner;

    thread::scope(|scope| {
        for worker in 0..4u32 {
            scope.spawn(move || {
                for i in 0..10u32 {
                    let request = NewEntry::expense(
                        account,
                        groceries,
                        dec(1),
                        at(2025, 4, 1 + worker, 8, i),
                    );
                    TransactionService::create(session, owner, request).unwrap();
                }
            });
        }
    });

    assert_eq!(ledger.balance(account), dec(960));
    assert_eq!(ledger.store.entries_for_account(account).unwrap().len(), 40);
    ledger.assert_reconciled();
}

#[test]
fn cross_currency_transfer_is_rejected() {
    use fintrack_core::{
        core::services::{AccountService, NewAccount},
        currency::CurrencyCode,
        ledger::AccountKind,
    };

    let ledger = TestLedger::new();
    let dollars = ledger.account("Dollars", 100);
    let euros = AccountService::open(
        ledger.session(),
        ledger.owner,
        NewAccount::new("Euros", AccountKind::Savings, dec(100)).in_currency(CurrencyCode::new("eur")),
    )
    .unwrap()
    .id;

    let err = TransactionService::create(
        ledger.session(),
        ledger.owner,
        NewEntry::transfer(dollars, euros, dec(30), at(2025, 3, 1, 10, 0)),
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::ValidationFailed(_)));
    assert_eq!(ledger.balance(dollars), dec(100));
    assert_eq!(ledger.balance(euros), dec(100));
}
