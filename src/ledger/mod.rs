//! Ledger domain models and the pure occurrence calculator.

pub mod account;
pub mod category;
pub mod entry;
pub mod occurrence;
pub mod recurring;

pub use account::{Account, AccountKind};
pub use category::{Category, CategoryKind};
pub use entry::{normalize_tags, Direction, EntryKind, EntrySource, LedgerEntry};
pub use occurrence::{compute_next, first_occurrence, Anchor, Frequency, Schedule};
pub use recurring::{RecurringTemplate, TemplateKind, TemplateStatus};
