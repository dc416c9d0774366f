pub mod account_service;
pub mod category_service;
pub mod reconciliation_service;
pub mod recurring_processor;
pub mod recurring_service;
pub mod transaction_service;

pub use account_service::{AccountService, NewAccount};
pub use category_service::CategoryService;
pub use reconciliation_service::{Discrepancy, ReconciliationReport, ReconciliationService};
pub use recurring_processor::{BatchReport, RecurringProcessor, TemplateFailure};
pub use recurring_service::{NewTemplate, RecurringService, TemplateChanges};
pub use transaction_service::{EntryChanges, NewEntry, TransactionService};

use crate::config::EngineConfig;
use crate::errors::LedgerError;
use crate::storage::StorageBackend;

pub type ServiceResult<T> = Result<T, LedgerError>;

/// Explicit handle every ledger operation runs against.
///
/// Owned by the caller (see [`crate::core::engine::LedgerEngine`]); services
/// never reach for ambient or global state.
#[derive(Clone, Copy)]
pub struct Session<'a> {
    pub store: &'a dyn StorageBackend,
    pub config: &'a EngineConfig,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a dyn StorageBackend, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.config.max_commit_attempts
    }
}
