use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::currency::CurrencyCode;
use crate::errors::{LedgerError, RecordKind};
use crate::ledger::{Account, AccountKind};
use crate::storage::{atomically, UnitOfWork};

use super::{ServiceResult, Session};

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub kind: AccountKind,
    pub currency: CurrencyCode,
    pub opening_balance: Decimal,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, kind: AccountKind, opening_balance: Decimal) -> Self {
        Self {
            name: name.into(),
            kind,
            currency: CurrencyCode::default(),
            opening_balance,
        }
    }

    pub fn in_currency(mut self, currency: CurrencyCode) -> Self {
        self.currency = currency;
        self
    }
}

/// Account directory: opening, listing and soft-deactivating accounts.
pub struct AccountService;

impl AccountService {
    pub fn open(session: Session<'_>, owner_id: Uuid, request: NewAccount) -> ServiceResult<Account> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::invalid("account name must not be empty"));
        }
        if !request.currency.is_well_formed() {
            return Err(LedgerError::invalid(format!(
                "`{}` is not an ISO 4217 currency code",
                request.currency
            )));
        }
        let account = Account::new(
            owner_id,
            name,
            request.kind,
            request.currency,
            request.opening_balance,
        );
        atomically(session.store, session.attempts(), |uow| {
            Self::validate_name(uow, owner_id, &account.name)?;
            uow.put_account(account.clone())
        })?;
        info!(account_id = %account.id, owner_id = %owner_id, "opened account");
        Self::get(session, owner_id, account.id)
    }

    pub fn get(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<Account> {
        session
            .store
            .account(id)?
            .filter(|account| account.is_owned_by(owner_id))
            .ok_or_else(|| LedgerError::not_found(RecordKind::Account, id))
    }

    pub fn list(session: Session<'_>, owner_id: Uuid) -> ServiceResult<Vec<Account>> {
        let mut accounts: Vec<Account> = session
            .store
            .accounts()?
            .into_iter()
            .filter(|account| account.is_owned_by(owner_id))
            .collect();
        accounts.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(accounts)
    }

    /// Soft-deletes the account; its history stays in place.
    pub fn deactivate(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<Account> {
        Self::set_active(session, owner_id, id, false)
    }

    pub fn reactivate(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<Account> {
        Self::set_active(session, owner_id, id, true)
    }

    fn set_active(
        session: Session<'_>,
        owner_id: Uuid,
        id: Uuid,
        active: bool,
    ) -> ServiceResult<Account> {
        atomically(session.store, session.attempts(), |uow| {
            let mut account = Self::owned(uow, owner_id, id)?;
            if account.active != active {
                account.active = active;
                uow.put_account(account)?;
            }
            Ok(())
        })?;
        info!(account_id = %id, active, "changed account status");
        Self::get(session, owner_id, id)
    }

    /// Loads an account inside a unit of work, hiding accounts of other owners.
    pub(crate) fn owned(uow: &mut UnitOfWork<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<Account> {
        uow.account(id)?
            .filter(|account| account.is_owned_by(owner_id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found(RecordKind::Account, id))
    }

    /// Case-insensitive uniqueness among the owner's accounts. Existing accounts
    /// are tracked by the unit of work; a concurrent insert of the same name is not.
    fn validate_name(uow: &mut UnitOfWork<'_>, owner_id: Uuid, candidate: &str) -> ServiceResult<()> {
        let normalized = candidate.trim().to_ascii_lowercase();
        let duplicate = uow
            .owned_accounts(owner_id)?
            .iter()
            .any(|account| account.name.trim().to_ascii_lowercase() == normalized);
        if duplicate {
            Err(LedgerError::invalid(format!(
                "Account `{}` already exists",
                candidate
            )))
        } else {
            Ok(())
        }
    }
}
