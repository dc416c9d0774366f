//! Turns due recurring templates into ledger entries.
//!
//! Each template is materialized in its own unit of work: the new entry, its
//! balance delta and the schedule advance commit together. A failure is
//! contained to its template and reported in the [`BatchReport`].

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::time::Clock;
use crate::errors::LedgerError;
use crate::ledger::{EntryKind, EntrySource, RecurringTemplate, TemplateStatus};
use crate::storage::atomically;

use super::{NewEntry, ServiceResult, Session, TransactionService};

pub const RECURRING_TAG: &str = "recurring";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateFailure {
    pub template_id: Uuid,
    pub error: String,
}

/// Outcome of one processor run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<TemplateFailure>,
    /// Ids of the entries written during the run.
    pub materialized: Vec<Uuid>,
    /// Templates whose schedule passed their end date.
    pub retired: Vec<Uuid>,
    /// Templates paused after too many consecutive failures.
    pub suspended: Vec<Uuid>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0
    }
}

enum Outcome {
    Materialized { entry_id: Uuid, retired: bool },
    Skipped(&'static str),
}

pub struct RecurringProcessor;

impl RecurringProcessor {
    /// Processes every template due at the clock's current instant.
    pub fn run_with_clock(session: Session<'_>, clock: &dyn Clock) -> ServiceResult<BatchReport> {
        Self::run(session, clock.now())
    }

    /// Processes every template due at `now`.
    ///
    /// Active templates whose end date already passed are retired without
    /// writing an entry.
    pub fn run(session: Session<'_>, now: DateTime<Utc>) -> ServiceResult<BatchReport> {
        let (mut due, lapsed): (Vec<RecurringTemplate>, Vec<RecurringTemplate>) = session
            .store
            .templates()?
            .into_iter()
            .filter(|template| template.is_due(now) || template.has_lapsed(now))
            .partition(|template| template.is_due(now));
        due.sort_by_key(|template| (template.next_occurrence, template.id));
        debug!(due = due.len(), lapsed = lapsed.len(), %now, "starting recurring run");

        let mut report = BatchReport::default();
        for template in &lapsed {
            match Self::retire_lapsed(session, template.id, now) {
                Ok(true) => {
                    info!(template_id = %template.id, end_date = ?template.end_date, "retired lapsed recurring template");
                    report.retired.push(template.id);
                }
                Ok(false) => report.skipped_count += 1,
                Err(err) => {
                    warn!(template_id = %template.id, error = %err, "could not retire lapsed template");
                    report.failed_count += 1;
                    report.errors.push(TemplateFailure {
                        template_id: template.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        for template in &due {
            match Self::materialize(session, template.id, now) {
                Ok(Outcome::Materialized { entry_id, retired }) => {
                    info!(template_id = %template.id, %entry_id, retired, "materialized recurring template");
                    report.processed_count += 1;
                    report.materialized.push(entry_id);
                    if retired {
                        report.retired.push(template.id);
                    }
                }
                Ok(Outcome::Skipped(reason)) => {
                    debug!(template_id = %template.id, reason, "skipped recurring template");
                    report.skipped_count += 1;
                }
                Err(err) => {
                    warn!(template_id = %template.id, error = %err, "recurring materialization failed");
                    report.failed_count += 1;
                    if Self::record_failure(session, template.id, &err) {
                        report.suspended.push(template.id);
                    }
                    report.errors.push(TemplateFailure {
                        template_id: template.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            processed = report.processed_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            retired = report.retired.len(),
            suspended = report.suspended.len(),
            "recurring run finished"
        );
        Ok(report)
    }

    fn materialize(session: Session<'_>, template_id: Uuid, now: DateTime<Utc>) -> ServiceResult<Outcome> {
        let window = session.config.idempotency_window();
        atomically(session.store, session.attempts(), |uow| {
            let template = match uow.template(template_id)?.cloned() {
                Some(template) => template,
                None => return Ok(Outcome::Skipped("template removed")),
            };
            if !template.is_due(now) {
                return Ok(Outcome::Skipped("no longer due"));
            }
            if template.generated_within(now, window) {
                return Ok(Outcome::Skipped("generated within idempotency window"));
            }

            let request = entry_request(&template);
            let entries = TransactionService::stage_create(uow, template.owner_id, &request, now)?;
            let entry_id = entries
                .first()
                .map(|entry| entry.id)
                .ok_or_else(|| LedgerError::DataIntegrity("materialization wrote no entry".into()))?;

            let mut advanced = template.clone();
            advanced.last_generated_at = Some(now);
            advanced.consecutive_failures = 0;
            advanced.last_error = None;
            match template.schedule.next_after(template.next_occurrence) {
                Some(next) => {
                    advanced.next_occurrence = next;
                    if template.end_date.map_or(false, |end| next > end) {
                        advanced.status = TemplateStatus::Retired;
                    }
                }
                None => advanced.status = TemplateStatus::Retired,
            }
            let retired = advanced.status == TemplateStatus::Retired;
            debug!(
                template_id = %template.id,
                %entry_id,
                occurrence = %template.next_occurrence,
                next_occurrence = %advanced.next_occurrence,
                retired,
                "staged recurring materialization"
            );
            uow.put_template(advanced)?;
            Ok(Outcome::Materialized { entry_id, retired })
        })
    }

    fn retire_lapsed(session: Session<'_>, template_id: Uuid, now: DateTime<Utc>) -> ServiceResult<bool> {
        atomically(session.store, session.attempts(), |uow| {
            let mut template = match uow.template(template_id)?.cloned() {
                Some(template) if template.has_lapsed(now) => template,
                _ => return Ok(false),
            };
            template.status = TemplateStatus::Retired;
            uow.put_template(template)?;
            Ok(true)
        })
    }

    /// Bumps the failure streak and pauses the template once it reaches the
    /// configured limit. Returns whether the template was suspended.
    ///
    /// Exhausted write conflicts are contention, not a fault of the template,
    /// and leave the streak untouched.
    fn record_failure(session: Session<'_>, template_id: Uuid, failure: &LedgerError) -> bool {
        if failure.is_retryable() {
            return false;
        }
        let limit = session.config.max_consecutive_failures;
        let message = failure.to_string();
        let outcome = atomically(session.store, session.attempts(), |uow| {
            let mut template = match uow.template(template_id)?.cloned() {
                Some(template) => template,
                None => return Ok(false),
            };
            template.consecutive_failures = template.consecutive_failures.saturating_add(1);
            template.last_error = Some(message.clone());
            let suspend =
                template.status == TemplateStatus::Active && template.consecutive_failures >= limit;
            if suspend {
                template.status = TemplateStatus::Paused;
                warn!(
                    %template_id,
                    failures = template.consecutive_failures,
                    "suspended recurring template after repeated failures"
                );
            }
            uow.put_template(template)?;
            Ok(suspend)
        });
        match outcome {
            Ok(suspended) => suspended,
            Err(err) => {
                error!(%template_id, error = %err, "could not record recurring failure");
                false
            }
        }
    }
}

/// Entry written for the template's current occurrence, stamped at midnight UTC.
fn entry_request(template: &RecurringTemplate) -> NewEntry {
    let occurred_at = template.next_occurrence.and_time(NaiveTime::MIN).and_utc();
    let kind = EntryKind::from(template.kind);
    let request = match kind {
        EntryKind::Income => NewEntry::income(
            template.account_id,
            template.category_id,
            template.amount,
            occurred_at,
        ),
        _ => NewEntry::expense(
            template.account_id,
            template.category_id,
            template.amount,
            occurred_at,
        ),
    };
    let request = request
        .with_tags([RECURRING_TAG])
        .with_metadata("system_generated", json!(true))
        .from_source(EntrySource::Recurring)
        .generated_by(template.id);
    match &template.description {
        Some(description) => request.with_description(description.clone()),
        None => request,
    }
}
