//! Pure date arithmetic for recurring schedules.
//!
//! Nothing in this module performs I/O or reads the clock: identical inputs
//! always produce identical dates.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Calendar constraint pinning occurrences to a weekday or a day of the month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Anchor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<Weekday>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
}

impl Anchor {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn weekday(day: Weekday) -> Self {
        Self {
            day_of_week: Some(day),
            day_of_month: None,
        }
    }

    pub fn month_day(day: u32) -> Self {
        Self {
            day_of_week: None,
            day_of_month: Some(day),
        }
    }
}

/// Frequency, interval and anchor of a recurring template.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub frequency: Frequency,
    pub interval: u32,
    #[serde(default)]
    pub anchor: Anchor,
}

impl Schedule {
    pub fn new(frequency: Frequency, interval: u32, anchor: Anchor) -> Self {
        Self {
            frequency,
            interval,
            anchor,
        }
    }

    pub fn next_after(&self, from: NaiveDate) -> Option<NaiveDate> {
        compute_next(from, self.frequency, self.interval, self.anchor)
    }

    pub fn first_on_or_after(&self, start: NaiveDate) -> Option<NaiveDate> {
        first_occurrence(start, self.frequency, self.anchor)
    }

    pub fn label(&self) -> String {
        let unit = match self.frequency {
            Frequency::Daily => "Day",
            Frequency::Weekly => "Week",
            Frequency::Monthly => "Month",
            Frequency::Yearly => "Year",
        };
        match self.interval {
            1 => format!("{:?}", self.frequency),
            n => format!("Every {} {}s", n, unit),
        }
    }
}

/// Computes the date of the occurrence following `from`.
///
/// Returns `None` only when the result would fall outside the supported
/// calendar range.
pub fn compute_next(
    from: NaiveDate,
    frequency: Frequency,
    interval: u32,
    anchor: Anchor,
) -> Option<NaiveDate> {
    let every = interval.max(1);
    match frequency {
        Frequency::Daily => from.checked_add_signed(Duration::days(i64::from(every))),
        Frequency::Weekly => {
            let stepped = from.checked_add_signed(Duration::weeks(i64::from(every)))?;
            match anchor.day_of_week {
                Some(day) => align_to_weekday(stepped, day),
                None => Some(stepped),
            }
        }
        Frequency::Monthly => {
            let stepped = shift_months(from, every)?;
            match anchor.day_of_month {
                Some(day) => clamp_to_month_day(stepped.year(), stepped.month(), day),
                None => Some(stepped),
            }
        }
        Frequency::Yearly => {
            let year = from.year().checked_add(i32::try_from(every).ok()?)?;
            clamp_to_month_day(year, from.month(), from.day())
        }
    }
}

/// First date on or after `start` that satisfies the anchor.
pub fn first_occurrence(start: NaiveDate, frequency: Frequency, anchor: Anchor) -> Option<NaiveDate> {
    match frequency {
        Frequency::Daily | Frequency::Yearly => Some(start),
        Frequency::Weekly => match anchor.day_of_week {
            Some(day) => align_to_weekday(start, day),
            None => Some(start),
        },
        Frequency::Monthly => match anchor.day_of_month {
            Some(day) => {
                let candidate = clamp_to_month_day(start.year(), start.month(), day)?;
                if candidate >= start {
                    Some(candidate)
                } else {
                    let next = shift_months(start.with_day(1)?, 1)?;
                    clamp_to_month_day(next.year(), next.month(), day)
                }
            }
            None => Some(start),
        },
    }
}

/// Moves forward the minimal number of days (0-6) to land on `day`.
fn align_to_weekday(date: NaiveDate, day: Weekday) -> Option<NaiveDate> {
    let current = date.weekday().num_days_from_monday();
    let target = day.num_days_from_monday();
    let delta = (7 + target - current) % 7;
    date.checked_add_signed(Duration::days(i64::from(delta)))
}

fn shift_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    // chrono clamps the day to the end of the target month.
    date.checked_add_months(Months::new(months))
}

fn clamp_to_month_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let day = day.clamp(1, days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    let first_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some(first_next.pred_opt()?.day())
}
