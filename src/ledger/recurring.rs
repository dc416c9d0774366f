use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::EntryKind;
use super::occurrence::Schedule;

/// Kinds a recurring template may materialize; transfers are not templated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TemplateKind {
    Expense,
    Income,
}

impl From<TemplateKind> for EntryKind {
    fn from(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Expense => EntryKind::Expense,
            TemplateKind::Income => EntryKind::Income,
        }
    }
}

/// `Active ⇄ Paused` by user toggle, `Active → Retired` once the schedule
/// passes the end date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TemplateStatus {
    #[default]
    Active,
    Paused,
    Retired,
}

/// User-defined recurrence rule together with its schedule state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringTemplate {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: TemplateKind,
    pub amount: Decimal,
    pub account_id: Uuid,
    pub category_id: Uuid,
    pub schedule: Schedule,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub next_occurrence: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TemplateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl RecurringTemplate {
    pub fn is_active(&self) -> bool {
        self.status == TemplateStatus::Active
    }

    pub fn is_owned_by(&self, owner_id: Uuid) -> bool {
        self.owner_id == owner_id
    }

    /// Eligible for materialization at `now`: active, due, and not past its end date.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        self.is_active()
            && self.next_occurrence <= today
            && self.end_date.map_or(true, |end| end >= today)
    }

    /// Still active although its end date has passed, so no occurrence can become due again.
    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.end_date.map_or(false, |end| end < now.date_naive())
    }

    /// Whether the last materialization happened less than `window` before `now`.
    pub fn generated_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_generated_at
            .map_or(false, |last| (now - last).abs() < window)
    }
}
