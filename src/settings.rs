//! Organisation-wide payroll settings.
//!
//! Settings are an explicit value loaded once (see [`crate::config`])
//! and handed to the generator.  They provide the pay cadence, default
//! employee terms and the timezone used to decide which calendar day a
//! time entry belongs to.

use chrono::{Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{PayrollError, Result};
use crate::models::PayPeriod;

/// How often employees are paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFrequency {
    Weekly,
    BiWeekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollSettings {
    #[serde(default = "default_pay_frequency")]
    pub pay_frequency: PayFrequency,
    /// First day of any one pay period; weekly and bi-weekly windows
    /// repeat from here in both directions.
    #[serde(default = "default_period_anchor")]
    pub period_anchor: NaiveDate,
    /// Days between the end of a period and its pay date.
    #[serde(default = "default_pay_date_offset_days")]
    pub pay_date_offset_days: u32,
    #[serde(default = "default_standard_hours_per_day")]
    pub standard_hours_per_day: Decimal,
    #[serde(default = "default_standard_hours_per_week")]
    pub standard_hours_per_week: Decimal,
    #[serde(default = "default_overtime_rate_multiplier")]
    pub overtime_rate_multiplier: Decimal,
    #[serde(default = "default_hourly_rate")]
    pub default_hourly_rate: Decimal,
    /// Timezone in which time entries are grouped into calendar days.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default = "default_payslip_prefix")]
    pub payslip_prefix: String,
}

impl Default for PayrollSettings {
    fn default() -> Self {
        Self {
            pay_frequency: default_pay_frequency(),
            period_anchor: default_period_anchor(),
            pay_date_offset_days: default_pay_date_offset_days(),
            standard_hours_per_day: default_standard_hours_per_day(),
            standard_hours_per_week: default_standard_hours_per_week(),
            overtime_rate_multiplier: default_overtime_rate_multiplier(),
            default_hourly_rate: default_hourly_rate(),
            timezone: default_timezone(),
            payslip_prefix: default_payslip_prefix(),
        }
    }
}

fn default_pay_frequency() -> PayFrequency {
    PayFrequency::BiWeekly
}

fn default_period_anchor() -> NaiveDate {
    // A Monday.
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default()
}

fn default_pay_date_offset_days() -> u32 {
    5
}

fn default_standard_hours_per_day() -> Decimal {
    dec!(8)
}

fn default_standard_hours_per_week() -> Decimal {
    dec!(40)
}

fn default_overtime_rate_multiplier() -> Decimal {
    dec!(1.5)
}

fn default_hourly_rate() -> Decimal {
    dec!(15)
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_payslip_prefix() -> String {
    "PS".to_string()
}

impl PayrollSettings {
    pub fn validate(&self) -> Result<()> {
        if self.standard_hours_per_day <= Decimal::ZERO
            || self.standard_hours_per_week <= Decimal::ZERO
        {
            return Err(PayrollError::InvalidConfiguration(
                "standard hours must be positive".into(),
            ));
        }
        if self.overtime_rate_multiplier < Decimal::ONE {
            return Err(PayrollError::InvalidConfiguration(
                "overtime multiplier must be at least 1".into(),
            ));
        }
        if self.default_hourly_rate.is_sign_negative() {
            return Err(PayrollError::InvalidConfiguration(
                "default hourly rate cannot be negative".into(),
            ));
        }
        if self.payslip_prefix.trim().is_empty() {
            return Err(PayrollError::InvalidConfiguration(
                "payslip prefix cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Returns the pay period that contains `date` for the configured
    /// cadence.
    pub fn period_containing(&self, date: NaiveDate) -> PayPeriod {
        match self.pay_frequency {
            PayFrequency::Weekly => self.rolling_period(date, 7),
            PayFrequency::BiWeekly => self.rolling_period(date, 14),
            PayFrequency::Monthly => {
                let start = date.with_day(1).unwrap_or(date);
                let next_month = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                };
                let end = next_month.map_or(date, |next| next - Duration::days(1));
                PayPeriod { start, end }
            }
        }
    }

    /// The period immediately before the one containing `date`.
    pub fn previous_period(&self, date: NaiveDate) -> PayPeriod {
        let current = self.period_containing(date);
        self.period_containing(current.start - Duration::days(1))
    }

    pub fn pay_date_for(&self, period: &PayPeriod) -> NaiveDate {
        period.end + Duration::days(i64::from(self.pay_date_offset_days))
    }

    fn rolling_period(&self, date: NaiveDate, length: i64) -> PayPeriod {
        let offset = (date - self.period_anchor).num_days().div_euclid(length);
        let start = self.period_anchor + Duration::days(offset * length);
        PayPeriod {
            start,
            end: start + Duration::days(length - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn bi_weekly_periods_repeat_from_anchor() {
        let settings = PayrollSettings::default();
        let period = settings.period_containing(date(2024, 1, 20));
        assert_eq!(period.start, date(2024, 1, 15));
        assert_eq!(period.end, date(2024, 1, 28));
        assert_eq!(settings.pay_date_for(&period), date(2024, 2, 2));
    }

    #[test]
    fn rolling_periods_work_before_anchor() {
        let settings = PayrollSettings {
            pay_frequency: PayFrequency::Weekly,
            ..PayrollSettings::default()
        };
        let period = settings.period_containing(date(2023, 12, 31));
        assert_eq!(period.start, date(2023, 12, 25));
        assert_eq!(period.end, date(2023, 12, 31));
    }

    #[test]
    fn monthly_period_is_calendar_month() {
        let settings = PayrollSettings {
            pay_frequency: PayFrequency::Monthly,
            ..PayrollSettings::default()
        };
        let period = settings.period_containing(date(2024, 2, 10));
        assert_eq!(period.start, date(2024, 2, 1));
        assert_eq!(period.end, date(2024, 2, 29));

        let december = settings.period_containing(date(2024, 12, 31));
        assert_eq!(december.end, date(2024, 12, 31));

        let previous = settings.previous_period(date(2024, 3, 5));
        assert_eq!(previous.start, date(2024, 2, 1));
    }

    #[test]
    fn validation_rejects_zero_hours() {
        let settings = PayrollSettings {
            standard_hours_per_day: Decimal::ZERO,
            ..PayrollSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(PayrollError::InvalidConfiguration(_))
        ));
        assert!(PayrollSettings::default().validate().is_ok());
    }
}
