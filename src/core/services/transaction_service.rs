//! Ledger writer.
//!
//! Every create, update and delete runs as a single unit of work: the balance
//! deltas and the entry writes commit together or not at all. Balances only
//! move through [`UnitOfWork::apply_balance_delta`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{LedgerError, RecordKind};
use crate::ledger::{normalize_tags, Account, CategoryKind, EntryKind, EntrySource, LedgerEntry};
use crate::storage::{atomically, UnitOfWork};

use super::{AccountService, CategoryService, ServiceResult, Session};

/// Request to record a money movement.
///
/// For transfers `account_id` is the source and `counter_account_id` the
/// destination when `kind` is `TransferOut`; a `TransferIn` request names the
/// destination first.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub amount: Decimal,
    pub account_id: Uuid,
    pub counter_account_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
    pub source: EntrySource,
    pub(crate) recurring_template_id: Option<Uuid>,
}

impl NewEntry {
    fn base(kind: EntryKind, account_id: Uuid, amount: Decimal, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            amount,
            account_id,
            counter_account_id: None,
            category_id: None,
            occurred_at,
            description: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            source: EntrySource::Manual,
            recurring_template_id: None,
        }
    }

    pub fn expense(
        account_id: Uuid,
        category_id: Uuid,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut request = Self::base(EntryKind::Expense, account_id, amount, occurred_at);
        request.category_id = Some(category_id);
        request
    }

    pub fn income(
        account_id: Uuid,
        category_id: Uuid,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut request = Self::base(EntryKind::Income, account_id, amount, occurred_at);
        request.category_id = Some(category_id);
        request
    }

    pub fn transfer(
        source_id: Uuid,
        destination_id: Uuid,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut request = Self::base(EntryKind::TransferOut, source_id, amount, occurred_at);
        request.counter_account_id = Some(destination_id);
        request
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn from_source(mut self, source: EntrySource) -> Self {
        self.source = source;
        self
    }

    pub(crate) fn generated_by(mut self, template_id: Uuid) -> Self {
        self.recurring_template_id = Some(template_id);
        self
    }

    /// `(source, destination)` of a transfer request.
    fn transfer_ends(&self) -> ServiceResult<(Uuid, Uuid)> {
        let counter = self
            .counter_account_id
            .ok_or_else(|| LedgerError::invalid("transfers require a counter account"))?;
        Ok(match self.kind {
            EntryKind::TransferIn => (counter, self.account_id),
            _ => (self.account_id, counter),
        })
    }

    fn validate(&self) -> ServiceResult<()> {
        validate_amount(self.amount)?;
        if self.kind.is_transfer() {
            let (source, destination) = self.transfer_ends()?;
            if source == destination {
                return Err(LedgerError::invalid(
                    "transfer source and destination must differ",
                ));
            }
        } else {
            if self.category_id.is_none() {
                return Err(LedgerError::invalid(format!(
                    "{:?} entries require a category",
                    self.kind
                )));
            }
            if self.counter_account_id.is_some() {
                return Err(LedgerError::invalid(
                    "only transfers may name a counter account",
                ));
            }
        }
        Ok(())
    }
}

/// Field changes for [`TransactionService::update`]. `None` keeps the current value.
///
/// For a transfer leg, `account_id` and `counter_account_id` are read as the
/// new source and destination, whichever leg is being edited.
#[derive(Debug, Clone, Default)]
pub struct EntryChanges {
    pub kind: Option<EntryKind>,
    pub amount: Option<Decimal>,
    pub account_id: Option<Uuid>,
    pub counter_account_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl EntryChanges {
    pub fn amount(amount: Decimal) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }
}

pub struct TransactionService;

impl TransactionService {
    /// Records a new entry, or both legs of a transfer, and applies the balance effects.
    pub fn create(
        session: Session<'_>,
        owner_id: Uuid,
        request: NewEntry,
    ) -> ServiceResult<Vec<LedgerEntry>> {
        request.validate()?;
        let now = Utc::now();
        let ids = atomically(session.store, session.attempts(), |uow| {
            let staged = Self::stage_create(uow, owner_id, &request, now)?;
            Ok(staged.iter().map(|entry| entry.id).collect::<Vec<_>>())
        })?;
        info!(
            owner_id = %owner_id,
            kind = ?request.kind,
            amount = %request.amount,
            entries = ids.len(),
            "recorded ledger entry"
        );
        Self::load(session, &ids)
    }

    /// Reverses the entry's original effect and applies the effect of the edited entry.
    ///
    /// Transfers are rewritten as a whole: both old legs are removed and two
    /// fresh legs are booked in the same unit of work.
    pub fn update(
        session: Session<'_>,
        owner_id: Uuid,
        id: Uuid,
        changes: EntryChanges,
    ) -> ServiceResult<Vec<LedgerEntry>> {
        let now = Utc::now();
        let ids = atomically(session.store, session.attempts(), |uow| {
            Self::stage_update(uow, owner_id, id, &changes, now)
        })?;
        info!(entry_id = %id, entries = ids.len(), "updated ledger entry");
        Self::load(session, &ids)
    }

    /// Removes the entry (both legs for a transfer) and reverses its effect.
    pub fn delete(
        session: Session<'_>,
        owner_id: Uuid,
        id: Uuid,
    ) -> ServiceResult<Vec<LedgerEntry>> {
        let removed = atomically(session.store, session.attempts(), |uow| {
            Self::stage_delete(uow, owner_id, id)
        })?;
        info!(entry_id = %id, entries = removed.len(), "deleted ledger entry");
        Ok(removed)
    }

    pub fn get(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<LedgerEntry> {
        session
            .store
            .entry(id)?
            .filter(|entry| entry.is_owned_by(owner_id))
            .ok_or_else(|| LedgerError::not_found(RecordKind::Entry, id))
    }

    /// Entries of an owned account in timeline order.
    pub fn list_for_account(
        session: Session<'_>,
        owner_id: Uuid,
        account_id: Uuid,
    ) -> ServiceResult<Vec<LedgerEntry>> {
        AccountService::get(session, owner_id, account_id)?;
        session.store.entries_for_account(account_id)
    }

    /// Stages a create inside an existing unit of work.
    pub(crate) fn stage_create(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        request: &NewEntry,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<LedgerEntry>> {
        request.validate()?;
        if request.kind.is_transfer() {
            return Self::stage_transfer(uow, owner_id, request, now, now, &[]);
        }

        let account = Self::writable_account(uow, owner_id, request.account_id, &[])?;
        let category_id = request
            .category_id
            .ok_or_else(|| LedgerError::invalid("category is required"))?;
        CategoryService::require(uow, owner_id, category_id, category_kind(request.kind)?)?;

        let entry = build_entry(
            owner_id,
            request,
            request.kind,
            account.id,
            None,
            uow.allocate_sequence(),
            now,
            now,
        );
        Ok(vec![Self::book(uow, entry)?])
    }

    /// Books both legs of a transfer. Accounts listed in `existing` may be inactive.
    fn stage_transfer(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        request: &NewEntry,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
        existing: &[Uuid],
    ) -> ServiceResult<Vec<LedgerEntry>> {
        let (source_id, destination_id) = request.transfer_ends()?;
        let source = Self::writable_account(uow, owner_id, source_id, existing)?;
        let destination = Self::writable_account(uow, owner_id, destination_id, existing)?;
        if source.currency != destination.currency {
            return Err(LedgerError::invalid(format!(
                "cannot transfer between {} and {} accounts",
                source.currency, destination.currency
            )));
        }

        let mut outgoing = build_entry(
            owner_id,
            request,
            EntryKind::TransferOut,
            source_id,
            Some(destination_id),
            uow.allocate_sequence(),
            created_at,
            now,
        );
        let mut incoming = build_entry(
            owner_id,
            request,
            EntryKind::TransferIn,
            destination_id,
            Some(source_id),
            uow.allocate_sequence(),
            created_at,
            now,
        );
        outgoing.linked_entry_id = Some(incoming.id);
        incoming.linked_entry_id = Some(outgoing.id);

        let outgoing = Self::book(uow, outgoing)?;
        let incoming = Self::book(uow, incoming)?;
        Ok(vec![outgoing, incoming])
    }

    fn stage_update(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        id: Uuid,
        changes: &EntryChanges,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Uuid>> {
        let original = Self::owned_entry(uow, owner_id, id)?;
        if original.kind.is_transfer() {
            return Self::stage_transfer_update(uow, owner_id, original, changes, now);
        }

        let kind = changes.kind.unwrap_or(original.kind);
        if kind.is_transfer() {
            return Err(LedgerError::invalid(
                "an expense or income entry cannot become a transfer",
            ));
        }
        if changes.counter_account_id.is_some() {
            return Err(LedgerError::invalid(
                "only transfers may name a counter account",
            ));
        }
        let amount = changes.amount.unwrap_or(original.amount);
        validate_amount(amount)?;
        let account_id = changes.account_id.unwrap_or(original.account_id);
        Self::writable_account(uow, owner_id, account_id, &[original.account_id])?;
        let category_id = changes
            .category_id
            .or(original.category_id)
            .ok_or_else(|| LedgerError::invalid("category is required"))?;
        CategoryService::require(uow, owner_id, category_id, category_kind(kind)?)?;

        uow.apply_balance_delta(original.account_id, -original.effect())?;

        let mut updated = original;
        updated.kind = kind;
        updated.direction = kind.direction();
        updated.amount = amount;
        updated.account_id = account_id;
        updated.category_id = Some(category_id);
        if let Some(occurred_at) = changes.occurred_at {
            updated.occurred_at = occurred_at;
        }
        if let Some(description) = &changes.description {
            updated.description = clean_description(Some(description));
        }
        if let Some(tags) = &changes.tags {
            updated.tags = normalize_tags(tags);
        }
        if let Some(metadata) = &changes.metadata {
            updated.metadata = metadata.clone();
        }
        updated.updated_at = now;
        updated.balance_after = uow.apply_balance_delta(account_id, updated.effect())?;
        uow.replace_entry(updated)?;
        Ok(vec![id])
    }

    fn stage_transfer_update(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        original: LedgerEntry,
        changes: &EntryChanges,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Uuid>> {
        if changes.kind.map_or(false, |kind| !kind.is_transfer()) {
            return Err(LedgerError::invalid(
                "a transfer cannot become an expense or income entry",
            ));
        }
        if changes.category_id.is_some() {
            return Err(LedgerError::invalid("transfers do not carry a category"));
        }

        let partner = Self::partner_leg(uow, &original)?;
        let (outgoing, incoming) = if original.kind == EntryKind::TransferOut {
            (original, partner)
        } else {
            (partner, original)
        };

        let request = NewEntry {
            kind: EntryKind::TransferOut,
            amount: changes.amount.unwrap_or(outgoing.amount),
            account_id: changes.account_id.unwrap_or(outgoing.account_id),
            counter_account_id: Some(changes.counter_account_id.unwrap_or(incoming.account_id)),
            category_id: None,
            occurred_at: changes.occurred_at.unwrap_or(outgoing.occurred_at),
            description: changes
                .description
                .clone()
                .or_else(|| outgoing.description.clone()),
            tags: changes.tags.clone().unwrap_or_else(|| outgoing.tags.clone()),
            metadata: changes
                .metadata
                .clone()
                .unwrap_or_else(|| outgoing.metadata.clone()),
            source: outgoing.source,
            recurring_template_id: outgoing.recurring_template_id,
        };
        request.validate()?;

        for leg in [&outgoing, &incoming] {
            uow.apply_balance_delta(leg.account_id, -leg.effect())?;
            uow.remove_entry(leg.id)?;
        }
        let existing = [outgoing.account_id, incoming.account_id];
        let legs = Self::stage_transfer(uow, owner_id, &request, outgoing.created_at, now, &existing)?;
        debug!(
            replaced_out = %outgoing.id,
            replaced_in = %incoming.id,
            "rewrote transfer legs"
        );
        Ok(legs.iter().map(|leg| leg.id).collect())
    }

    fn stage_delete(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        id: Uuid,
    ) -> ServiceResult<Vec<LedgerEntry>> {
        let entry = Self::owned_entry(uow, owner_id, id)?;
        let mut legs = Vec::with_capacity(2);
        if entry.kind.is_transfer() {
            let partner = Self::partner_leg(uow, &entry)?;
            legs.push(entry);
            legs.push(partner);
        } else {
            legs.push(entry);
        }
        for leg in &legs {
            uow.apply_balance_delta(leg.account_id, -leg.effect())?;
            uow.remove_entry(leg.id)?;
        }
        Ok(legs)
    }

    /// Locates the opposite leg of a transfer: the linked id first, then a
    /// mirrored entry on the counter account.
    fn partner_leg(uow: &mut UnitOfWork<'_>, entry: &LedgerEntry) -> ServiceResult<LedgerEntry> {
        if let Some(linked) = entry.linked_entry_id {
            if let Some(other) = uow.entry(linked)?.cloned() {
                if entry.mirrors(&other) {
                    return Ok(other);
                }
            }
        }
        if let Some(counter) = entry.counter_account_id {
            let candidate = uow
                .stored_entries_for_account(counter)?
                .into_iter()
                .find(|other| entry.mirrors(other));
            if let Some(candidate) = candidate {
                if let Some(other) = uow.entry(candidate.id)?.cloned() {
                    return Ok(other);
                }
            }
        }
        Err(LedgerError::DataIntegrity(format!(
            "transfer leg {} has no matching paired leg",
            entry.id
        )))
    }

    fn owned_entry(uow: &mut UnitOfWork<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<LedgerEntry> {
        uow.entry(id)?
            .filter(|entry| entry.is_owned_by(owner_id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found(RecordKind::Entry, id))
    }

    /// Owned account that may receive new bookings.
    fn writable_account(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        id: Uuid,
        existing: &[Uuid],
    ) -> ServiceResult<Account> {
        let account = AccountService::owned(uow, owner_id, id)?;
        if !account.active && !existing.contains(&id) {
            return Err(LedgerError::invalid(format!(
                "account `{}` is inactive",
                account.name
            )));
        }
        Ok(account)
    }

    /// Applies the entry's effect to its account, stamps the snapshot and stages the insert.
    fn book(uow: &mut UnitOfWork<'_>, mut entry: LedgerEntry) -> ServiceResult<LedgerEntry> {
        entry.balance_after = uow.apply_balance_delta(entry.account_id, entry.effect())?;
        uow.insert_entry(entry.clone())?;
        Ok(entry)
    }

    fn load(session: Session<'_>, ids: &[Uuid]) -> ServiceResult<Vec<LedgerEntry>> {
        ids.iter()
            .map(|id| {
                session
                    .store
                    .entry(*id)?
                    .ok_or_else(|| LedgerError::not_found(RecordKind::Entry, *id))
            })
            .collect()
    }
}

fn validate_amount(amount: Decimal) -> ServiceResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid("amount must be greater than zero"));
    }
    Ok(())
}

fn category_kind(kind: EntryKind) -> ServiceResult<CategoryKind> {
    match kind {
        EntryKind::Expense => Ok(CategoryKind::Expense),
        EntryKind::Income => Ok(CategoryKind::Income),
        EntryKind::TransferOut | EntryKind::TransferIn => {
            Err(LedgerError::invalid("transfers do not carry a category"))
        }
    }
}

fn clean_description(description: Option<&String>) -> Option<String> {
    description
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

#[allow(clippy::too_many_arguments)]
fn build_entry(
    owner_id: Uuid,
    request: &NewEntry,
    kind: EntryKind,
    account_id: Uuid,
    counter_account_id: Option<Uuid>,
    sequence: u64,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        owner_id,
        kind,
        direction: kind.direction(),
        amount: request.amount,
        account_id,
        counter_account_id,
        category_id: if kind.is_transfer() {
            None
        } else {
            request.category_id
        },
        occurred_at: request.occurred_at,
        sequence,
        balance_after: Decimal::ZERO,
        linked_entry_id: None,
        description: clean_description(request.description.as_ref()),
        tags: normalize_tags(&request.tags),
        metadata: request.metadata.clone(),
        source: request.source,
        recurring_template_id: request.recurring_template_id,
        created_at,
        updated_at: now,
        version: 0,
    }
}
