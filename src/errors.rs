use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Record families addressable by the ledger store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Account,
    Category,
    Entry,
    Template,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordKind::Account => "account",
            RecordKind::Category => "category",
            RecordKind::Entry => "ledger entry",
            RecordKind::Template => "recurring template",
        };
        f.write_str(label)
    }
}

/// Error type that captures ledger and recurrence failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed or missing input, rejected before any mutation.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
    /// Record absent or not owned by the caller.
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: Uuid },
    /// Stored history is inconsistent (missing transfer leg, reconciliation drift).
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    /// The unit of work could not commit; nothing was applied and the call may be retried.
    #[error("Write conflict: {0}")]
    WriteConflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(kind: RecordKind, id: Uuid) -> Self {
        LedgerError::NotFound { kind, id }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        LedgerError::ValidationFailed(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::WriteConflict(_))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
