use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::errors::{LedgerError, RecordKind};
use crate::ledger::{CategoryKind, RecurringTemplate, Schedule, TemplateKind, TemplateStatus};
use crate::storage::{atomically, UnitOfWork};

use super::{AccountService, CategoryService, ServiceResult, Session};

/// Request to register a recurring template.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub kind: TemplateKind,
    pub amount: Decimal,
    pub account_id: Uuid,
    pub category_id: Uuid,
    pub schedule: Schedule,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub description: Option<String>,
}

impl NewTemplate {
    pub fn new(
        kind: TemplateKind,
        amount: Decimal,
        account_id: Uuid,
        category_id: Uuid,
        schedule: Schedule,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            kind,
            amount,
            account_id,
            category_id,
            schedule,
            start_date,
            end_date: None,
            description: None,
        }
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Editable template fields. Schedule dates are owned by the processor.
#[derive(Debug, Clone, Default)]
pub struct TemplateChanges {
    pub amount: Option<Decimal>,
    pub account_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub description: Option<String>,
    /// `Some(None)` removes the end date.
    pub end_date: Option<Option<NaiveDate>>,
}

/// Store of recurring templates and their user-driven state changes.
pub struct RecurringService;

impl RecurringService {
    pub fn create(
        session: Session<'_>,
        owner_id: Uuid,
        request: NewTemplate,
    ) -> ServiceResult<RecurringTemplate> {
        validate_amount(request.amount)?;
        validate_schedule(&request.schedule)?;
        if let Some(end) = request.end_date {
            if end < request.start_date {
                return Err(LedgerError::invalid("end date must not precede start date"));
            }
        }
        let next_occurrence = request
            .schedule
            .first_on_or_after(request.start_date)
            .ok_or_else(|| LedgerError::invalid("schedule has no occurrence in range"))?;
        if request.end_date.map_or(false, |end| next_occurrence > end) {
            return Err(LedgerError::invalid(
                "schedule has no occurrence before the end date",
            ));
        }

        let template = RecurringTemplate {
            id: Uuid::new_v4(),
            owner_id,
            kind: request.kind,
            amount: request.amount,
            account_id: request.account_id,
            category_id: request.category_id,
            schedule: request.schedule,
            start_date: request.start_date,
            end_date: request.end_date,
            next_occurrence,
            last_generated_at: None,
            status: TemplateStatus::Active,
            description: request
                .description
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty()),
            consecutive_failures: 0,
            last_error: None,
            created_at: Utc::now(),
            version: 0,
        };

        atomically(session.store, session.attempts(), |uow| {
            Self::check_targets(uow, owner_id, &template)?;
            uow.put_template(template.clone())
        })?;
        info!(
            template_id = %template.id,
            schedule = %template.schedule.label(),
            next_occurrence = %template.next_occurrence,
            "created recurring template"
        );
        Self::get(session, owner_id, template.id)
    }

    /// Active → Paused. Pausing a paused template changes nothing.
    pub fn pause(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<RecurringTemplate> {
        Self::transition(session, owner_id, id, |template| match template.status {
            TemplateStatus::Retired => Err(retired(template)),
            TemplateStatus::Paused => Ok(false),
            TemplateStatus::Active => {
                template.status = TemplateStatus::Paused;
                Ok(true)
            }
        })
    }

    /// Paused → Active, clearing the failure streak.
    pub fn resume(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<RecurringTemplate> {
        Self::transition(session, owner_id, id, |template| match template.status {
            TemplateStatus::Retired => Err(retired(template)),
            TemplateStatus::Active => Ok(false),
            TemplateStatus::Paused => {
                template.status = TemplateStatus::Active;
                template.consecutive_failures = 0;
                template.last_error = None;
                Ok(true)
            }
        })
    }

    pub fn update(
        session: Session<'_>,
        owner_id: Uuid,
        id: Uuid,
        changes: TemplateChanges,
    ) -> ServiceResult<RecurringTemplate> {
        if let Some(amount) = changes.amount {
            validate_amount(amount)?;
        }
        atomically(session.store, session.attempts(), |uow| {
            let mut template = Self::owned(uow, owner_id, id)?;
            if template.status == TemplateStatus::Retired {
                return Err(retired(&template));
            }
            if let Some(amount) = changes.amount {
                template.amount = amount;
            }
            if let Some(account_id) = changes.account_id {
                template.account_id = account_id;
            }
            if let Some(category_id) = changes.category_id {
                template.category_id = category_id;
            }
            if let Some(description) = &changes.description {
                let trimmed = description.trim();
                template.description = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
            if let Some(end_date) = changes.end_date {
                if end_date.map_or(false, |end| end < template.start_date) {
                    return Err(LedgerError::invalid("end date must not precede start date"));
                }
                template.end_date = end_date;
                if end_date.map_or(false, |end| template.next_occurrence > end) {
                    template.status = TemplateStatus::Retired;
                }
            }
            Self::check_targets(uow, owner_id, &template)?;
            uow.put_template(template)
        })?;
        info!(template_id = %id, "updated recurring template");
        Self::get(session, owner_id, id)
    }

    pub fn delete(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<RecurringTemplate> {
        let removed = atomically(session.store, session.attempts(), |uow| {
            Self::owned(uow, owner_id, id)?;
            uow.remove_template(id)
        })?;
        info!(template_id = %id, "deleted recurring template");
        Ok(removed)
    }

    pub fn get(session: Session<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<RecurringTemplate> {
        session
            .store
            .template(id)?
            .filter(|template| template.is_owned_by(owner_id))
            .ok_or_else(|| LedgerError::not_found(RecordKind::Template, id))
    }

    /// Templates of `owner_id`, soonest occurrence first.
    pub fn list(session: Session<'_>, owner_id: Uuid) -> ServiceResult<Vec<RecurringTemplate>> {
        let mut templates: Vec<RecurringTemplate> = session
            .store
            .templates()?
            .into_iter()
            .filter(|template| template.is_owned_by(owner_id))
            .collect();
        templates.sort_by_key(|template| (template.next_occurrence, template.created_at));
        Ok(templates)
    }

    fn transition<F>(
        session: Session<'_>,
        owner_id: Uuid,
        id: Uuid,
        mut apply: F,
    ) -> ServiceResult<RecurringTemplate>
    where
        F: FnMut(&mut RecurringTemplate) -> ServiceResult<bool>,
    {
        atomically(session.store, session.attempts(), |uow| {
            let mut template = Self::owned(uow, owner_id, id)?;
            if apply(&mut template)? {
                info!(template_id = %id, status = ?template.status, "changed template status");
                uow.put_template(template)?;
            }
            Ok(())
        })?;
        Self::get(session, owner_id, id)
    }

    fn owned(uow: &mut UnitOfWork<'_>, owner_id: Uuid, id: Uuid) -> ServiceResult<RecurringTemplate> {
        uow.template(id)?
            .filter(|template| template.is_owned_by(owner_id))
            .cloned()
            .ok_or_else(|| LedgerError::not_found(RecordKind::Template, id))
    }

    /// The template's account and category must be owned, and the category must match its kind.
    fn check_targets(
        uow: &mut UnitOfWork<'_>,
        owner_id: Uuid,
        template: &RecurringTemplate,
    ) -> ServiceResult<()> {
        let account = AccountService::owned(uow, owner_id, template.account_id)?;
        if !account.active {
            return Err(LedgerError::invalid(format!(
                "account `{}` is inactive",
                account.name
            )));
        }
        let kind = match template.kind {
            TemplateKind::Expense => CategoryKind::Expense,
            TemplateKind::Income => CategoryKind::Income,
        };
        CategoryService::require(uow, owner_id, template.category_id, kind)?;
        Ok(())
    }
}

fn validate_amount(amount: Decimal) -> ServiceResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid("amount must be greater than zero"));
    }
    Ok(())
}

fn validate_schedule(schedule: &Schedule) -> ServiceResult<()> {
    if schedule.interval == 0 {
        return Err(LedgerError::invalid("interval must be at least 1"));
    }
    if let Some(day) = schedule.anchor.day_of_month {
        if !(1..=31).contains(&day) {
            return Err(LedgerError::invalid("day of month must be between 1 and 31"));
        }
    }
    Ok(())
}

fn retired(template: &RecurringTemplate) -> LedgerError {
    LedgerError::invalid(format!("recurring template {} is retired", template.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::core::services::NewAccount;
    use crate::ledger::{AccountKind, Anchor, Frequency};
    use crate::storage::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        config: EngineConfig,
        owner: Uuid,
        account: Uuid,
        category: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = MemoryStore::new();
            let config = EngineConfig::default();
            let owner = Uuid::new_v4();
            let session = Session::new(&store, &config);
            let account = AccountService::open(
                session,
                owner,
                NewAccount::new("Checking", AccountKind::Checking, Decimal::from(1000)),
            )
            .unwrap()
            .id;
            let category = CategoryService::add(session, owner, "Rent", CategoryKind::Expense)
                .unwrap()
                .id;
            Self {
                store,
                config,
                owner,
                account,
                category,
            }
        }

        fn session(&self) -> Session<'_> {
            Session::new(&self.store, &self.config)
        }

        fn monthly_on(&self, day: u32, start: NaiveDate) -> NewTemplate {
            NewTemplate::new(
                TemplateKind::Expense,
                Decimal::from(500),
                self.account,
                self.category,
                Schedule::new(Frequency::Monthly, 1, Anchor::month_day(day)),
                start,
            )
        }
    }

    #[test]
    fn first_occurrence_rolls_into_next_month() {
        let fx = Fixture::new();
        let template =
            RecurringService::create(fx.session(), fx.owner, fx.monthly_on(5, date(2025, 3, 10)))
                .unwrap();
        assert_eq!(template.next_occurrence, date(2025, 4, 5));
        assert_eq!(template.status, TemplateStatus::Active);
    }

    #[test]
    fn invalid_schedules_are_rejected() {
        let fx = Fixture::new();
        let mut zero_interval = fx.monthly_on(1, date(2025, 1, 1));
        zero_interval.schedule.interval = 0;
        assert!(matches!(
            RecurringService::create(fx.session(), fx.owner, zero_interval),
            Err(LedgerError::ValidationFailed(_))
        ));

        let bad_day = fx.monthly_on(32, date(2025, 1, 1));
        assert!(matches!(
            RecurringService::create(fx.session(), fx.owner, bad_day),
            Err(LedgerError::ValidationFailed(_))
        ));

        let reversed = fx.monthly_on(1, date(2025, 5, 1)).until(date(2025, 4, 1));
        assert!(matches!(
            RecurringService::create(fx.session(), fx.owner, reversed),
            Err(LedgerError::ValidationFailed(_))
        ));
    }

    #[test]
    fn income_template_needs_income_category() {
        let fx = Fixture::new();
        let mut request = fx.monthly_on(1, date(2025, 1, 1));
        request.kind = TemplateKind::Income;
        assert!(matches!(
            RecurringService::create(fx.session(), fx.owner, request),
            Err(LedgerError::ValidationFailed(_))
        ));
    }

    #[test]
    fn pause_and_resume_leave_dates_alone() {
        let fx = Fixture::new();
        let template =
            RecurringService::create(fx.session(), fx.owner, fx.monthly_on(1, date(2025, 1, 1)))
                .unwrap();

        let paused = RecurringService::pause(fx.session(), fx.owner, template.id).unwrap();
        assert_eq!(paused.status, TemplateStatus::Paused);
        assert_eq!(paused.next_occurrence, template.next_occurrence);

        let again = RecurringService::pause(fx.session(), fx.owner, template.id).unwrap();
        assert_eq!(again.version, paused.version);

        let resumed = RecurringService::resume(fx.session(), fx.owner, template.id).unwrap();
        assert_eq!(resumed.status, TemplateStatus::Active);
        assert_eq!(resumed.next_occurrence, template.next_occurrence);
    }

    #[test]
    fn update_never_moves_the_schedule() {
        let fx = Fixture::new();
        let template =
            RecurringService::create(fx.session(), fx.owner, fx.monthly_on(1, date(2025, 1, 1)))
                .unwrap();
        let changes = TemplateChanges {
            amount: Some(Decimal::from(650)),
            end_date: Some(Some(date(2025, 12, 31))),
            ..TemplateChanges::default()
        };
        let updated = RecurringService::update(fx.session(), fx.owner, template.id, changes).unwrap();
        assert_eq!(updated.amount, Decimal::from(650));
        assert_eq!(updated.end_date, Some(date(2025, 12, 31)));
        assert_eq!(updated.next_occurrence, template.next_occurrence);
    }

    #[test]
    fn end_date_before_next_occurrence_retires_template() {
        let fx = Fixture::new();
        let template =
            RecurringService::create(fx.session(), fx.owner, fx.monthly_on(15, date(2025, 1, 5)))
                .unwrap();
        assert_eq!(template.next_occurrence, date(2025, 1, 15));

        let changes = TemplateChanges {
            end_date: Some(Some(date(2025, 1, 10))),
            ..TemplateChanges::default()
        };
        let updated = RecurringService::update(fx.session(), fx.owner, template.id, changes).unwrap();
        assert_eq!(updated.status, TemplateStatus::Retired);
        assert_eq!(updated.next_occurrence, date(2025, 1, 15));

        let again = TemplateChanges {
            amount: Some(Decimal::from(1)),
            ..TemplateChanges::default()
        };
        assert!(matches!(
            RecurringService::update(fx.session(), fx.owner, template.id, again),
            Err(LedgerError::ValidationFailed(_))
        ));
    }

    #[test]
    fn other_owners_cannot_touch_template() {
        let fx = Fixture::new();
        let template =
            RecurringService::create(fx.session(), fx.owner, fx.monthly_on(1, date(2025, 1, 1)))
                .unwrap();
        assert!(matches!(
            RecurringService::delete(fx.session(), Uuid::new_v4(), template.id),
            Err(LedgerError::NotFound { .. })
        ));
        RecurringService::delete(fx.session(), fx.owner, template.id).unwrap();
        assert!(RecurringService::list(fx.session(), fx.owner).unwrap().is_empty());
    }
}
