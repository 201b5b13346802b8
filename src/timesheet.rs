//! Time aggregation.
//!
//! Turns a set of time entries into regular and overtime hours.  Hours
//! are grouped by the calendar day on which each entry starts, in the
//! timezone supplied by the caller; within a day everything up to the
//! employee's standard daily hours is regular and the rest is overtime.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PayPeriod, TimeEntry};

/// Hours worked on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHours {
    pub date: NaiveDate,
    pub total_hours: Decimal,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
}

/// Period totals plus a record of what was left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoursSummary {
    /// Per-day split, ordered by date.
    pub days: Vec<DailyHours>,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
    /// Entries ignored because they have not been approved yet.
    pub excluded_unapproved: usize,
    /// Entries ignored because they have no end time.
    pub excluded_open: usize,
    /// Entries whose hours were counted.
    pub entry_ids: Vec<Uuid>,
}

impl HoursSummary {
    pub fn total_hours(&self) -> Decimal {
        self.regular_hours + self.overtime_hours
    }

    /// True when no entry contributed hours.
    pub fn is_empty(&self) -> bool {
        self.entry_ids.is_empty()
    }
}

/// Calendar day an instant falls on in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// UTC bounds `[from, to)` covering every local day of `period` in `tz`.
pub fn period_bounds(period: &PayPeriod, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = local_midnight(period.start, tz);
    let to = local_midnight(period.end + Duration::days(1), tz);
    (from, to)
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    // Midnight can fall into a DST gap; treat the wall-clock time as UTC then.
    tz.from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| Utc.from_utc_datetime(&naive), |local| local.with_timezone(&Utc))
}

/// Splits approved, closed entries into regular and overtime hours.
pub fn split_regular_overtime(
    entries: &[TimeEntry],
    standard_hours_per_day: Decimal,
    tz: Tz,
) -> HoursSummary {
    let mut summary = HoursSummary::default();
    let mut per_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

    for entry in entries {
        if !entry.approved {
            summary.excluded_unapproved += 1;
            continue;
        }
        if entry.is_open() {
            summary.excluded_open += 1;
            continue;
        }
        *per_day.entry(local_date(entry.start, tz)).or_default() += entry.hours_worked();
        summary.entry_ids.push(entry.id);
    }

    for (date, total_hours) in per_day {
        let regular_hours = total_hours.min(standard_hours_per_day);
        let overtime_hours = total_hours - regular_hours;
        summary.regular_hours += regular_hours;
        summary.overtime_hours += overtime_hours;
        summary.days.push(DailyHours {
            date,
            total_hours,
            regular_hours,
            overtime_hours,
        });
    }

    if summary.excluded_unapproved > 0 {
        tracing::debug!(
            excluded = summary.excluded_unapproved,
            "Unapproved time entries left out of aggregation"
        );
    }
    summary
}
