//! Data models for the Payroll Engine.
//!
//! The `models` module defines the serialisable records the engine
//! works with: employee payroll profiles, time entries, pay periods and
//! payslips together with their typed breakdown lines.  Monetary values,
//! rates and hours are [`Decimal`]s; timestamps are UTC and calendar
//! dates are naive, interpreted through the configured timezone.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PayrollError, Result};
use crate::money::round_money;
use crate::settings::PayrollSettings;
use crate::tax::TaxType;

/// Distinguishes staff from contractors for tax applicability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    Employee,
    Contractor,
}

/// How net pay reaches the employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Check,
    Cash,
}

/// Payroll-relevant attributes of a user.  There is exactly one profile
/// per employee, keyed by `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    /// Identifier of the user this profile belongs to.
    pub user_id: Uuid,
    /// Display name, used in logs and payslip listings.
    pub name: String,
    pub employment_type: EmploymentType,
    /// Rate paid for regular hours.
    pub base_hourly_rate: Decimal,
    /// Factor applied to the base rate for overtime hours, e.g. `1.5`.
    pub overtime_rate_multiplier: Decimal,
    /// Hours per calendar day above which work counts as overtime.
    pub standard_hours_per_day: Decimal,
    pub standard_hours_per_week: Decimal,
    pub payment_method: PaymentMethod,
    pub hire_date: NaiveDate,
    /// Last day of employment is the day before this date.
    #[serde(default)]
    pub termination_date: Option<NaiveDate>,
    pub is_active: bool,
}

impl EmployeeProfile {
    /// Builds a profile using the organisation-wide defaults.
    pub fn from_settings(
        user_id: Uuid,
        name: impl Into<String>,
        hire_date: NaiveDate,
        settings: &PayrollSettings,
    ) -> Self {
        Self {
            user_id,
            name: name.into(),
            employment_type: EmploymentType::Employee,
            base_hourly_rate: settings.default_hourly_rate,
            overtime_rate_multiplier: settings.overtime_rate_multiplier,
            standard_hours_per_day: settings.standard_hours_per_day,
            standard_hours_per_week: settings.standard_hours_per_week,
            payment_method: PaymentMethod::BankTransfer,
            hire_date,
            termination_date: None,
            is_active: true,
        }
    }

    /// An employee is active when the flag is set, they have been hired
    /// on or before `today` and they have not been terminated yet.
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.is_active
            && self.hire_date <= today
            && self.termination_date.map_or(true, |end| end > today)
    }

    /// Rejects profiles that would produce meaningless pay.
    pub fn validate(&self) -> Result<()> {
        if self.base_hourly_rate.is_sign_negative() {
            return Err(PayrollError::Validation(format!(
                "base hourly rate for {} cannot be negative",
                self.user_id
            )));
        }
        if self.overtime_rate_multiplier < Decimal::ONE {
            return Err(PayrollError::Validation(format!(
                "overtime multiplier for {} must be at least 1",
                self.user_id
            )));
        }
        if self.standard_hours_per_day <= Decimal::ZERO
            || self.standard_hours_per_week <= Decimal::ZERO
        {
            return Err(PayrollError::Validation(format!(
                "standard hours for {} must be positive",
                self.user_id
            )));
        }
        if let Some(end) = self.termination_date {
            if end < self.hire_date {
                return Err(PayrollError::Validation(format!(
                    "termination date for {} precedes hire date",
                    self.user_id
                )));
            }
        }
        Ok(())
    }
}

/// One recorded work interval for one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: Uuid,
    pub employee_id: Uuid,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    /// `None` while the timer is still running.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Hourly rate captured when the entry was recorded.
    pub hourly_rate: Decimal,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approved_by: Option<Uuid>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
}

impl TimeEntry {
    /// Creates an unapproved entry, rejecting intervals that end before
    /// they start.
    pub fn new(
        employee_id: Uuid,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        hourly_rate: Decimal,
    ) -> Result<Self> {
        let entry = Self {
            id: Uuid::new_v4(),
            employee_id,
            project_id: None,
            task_id: None,
            description: None,
            start,
            end,
            hourly_rate,
            approved: false,
            approved_by: None,
            approved_at: None,
        };
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(end) = self.end {
            if end <= self.start {
                return Err(PayrollError::Validation(format!(
                    "time entry {} must end after it starts",
                    self.id
                )));
            }
        }
        if self.hourly_rate.is_sign_negative() {
            return Err(PayrollError::Validation(format!(
                "time entry {} has a negative hourly rate",
                self.id
            )));
        }
        Ok(())
    }

    /// Hours between start and end, rounded to two decimals.  Open
    /// entries have worked zero hours so far.
    pub fn hours_worked(&self) -> Decimal {
        match self.end {
            Some(end) => {
                let minutes = (end - self.start).num_minutes().max(0);
                round_money(Decimal::from(minutes) / Decimal::from(60))
            }
            None => Decimal::ZERO,
        }
    }

    pub fn gross_amount(&self) -> Decimal {
        round_money(self.hours_worked() * self.hourly_rate)
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn approve(&mut self, approver: Uuid, at: DateTime<Utc>) {
        self.approved = true;
        self.approved_by = Some(approver);
        self.approved_at = Some(at);
    }
}

/// Inclusive range of calendar dates covered by a payslip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PayPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(PayrollError::Validation(format!(
                "pay period ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for PayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Kind of a breakdown line on a payslip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Flat,
    Percentage,
    Progressive,
    Bonus,
    Deduction,
}

impl From<TaxType> for LineKind {
    fn from(tax_type: TaxType) -> Self {
        match tax_type {
            TaxType::Flat => LineKind::Flat,
            TaxType::Percentage => LineKind::Percentage,
            TaxType::Progressive => LineKind::Progressive,
        }
    }
}

/// A single named amount in a tax, bonus or deduction breakdown.  The
/// breakdown is a snapshot; it does not reference the rule it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownLine {
    pub name: String,
    pub kind: LineKind,
    /// Configured rate, when the line came from a flat or percentage rule.
    #[serde(default)]
    pub rate: Option<Decimal>,
    pub amount: Decimal,
}

impl BreakdownLine {
    pub fn bonus(name: impl Into<String>, amount: Decimal) -> Self {
        Self {
            name: name.into(),
            kind: LineKind::Bonus,
            rate: None,
            amount: round_money(amount),
        }
    }

    pub fn deduction(name: impl Into<String>, amount: Decimal) -> Self {
        Self {
            name: name.into(),
            kind: LineKind::Deduction,
            rate: None,
            amount: round_money(amount),
        }
    }
}

/// Sums breakdown amounts, rounded to two decimals.
pub fn total_of(lines: &[BreakdownLine]) -> Decimal {
    round_money(lines.iter().map(|line| line.amount).sum())
}

/// Payslip workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayslipStatus {
    Draft,
    Approved,
    Paid,
}

impl PayslipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayslipStatus::Draft => "draft",
            PayslipStatus::Approved => "approved",
            PayslipStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for PayslipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payslip contents computed by the generator, before the store assigns
/// an identifier and a payslip number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayslip {
    pub employee_id: Uuid,
    pub period: PayPeriod,
    pub pay_date: NaiveDate,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
    pub regular_rate: Decimal,
    pub overtime_rate: Decimal,
    pub gross_regular_pay: Decimal,
    pub gross_overtime_pay: Decimal,
    pub gross_total_pay: Decimal,
    pub tax_deductions: Vec<BreakdownLine>,
    pub generated_by: Uuid,
    pub generated_at: DateTime<Utc>,
    pub time_entry_ids: Vec<Uuid>,
}

/// One pay calculation for one employee over one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payslip {
    pub id: Uuid,
    /// Human-readable number, unique across all payslips.
    pub payslip_number: String,
    pub employee_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub pay_date: NaiveDate,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
    pub regular_rate: Decimal,
    pub overtime_rate: Decimal,
    pub gross_regular_pay: Decimal,
    pub gross_overtime_pay: Decimal,
    pub gross_total_pay: Decimal,
    pub tax_deductions: Vec<BreakdownLine>,
    pub tax_total: Decimal,
    pub other_deductions: Vec<BreakdownLine>,
    pub other_deductions_total: Decimal,
    pub bonuses: Vec<BreakdownLine>,
    pub bonuses_total: Decimal,
    /// `gross_total_pay + bonuses_total - tax_total - other_deductions_total`.
    pub net_pay: Decimal,
    pub status: PayslipStatus,
    pub generated_by: Uuid,
    #[serde(default)]
    pub approved_by: Option<Uuid>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    /// Time entries whose hours were counted on this payslip.
    #[serde(default)]
    pub time_entry_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Payslip {
    /// Materialises a draft payslip from generator output.
    pub fn from_new(new: NewPayslip, payslip_number: String) -> Self {
        let mut payslip = Self {
            id: Uuid::new_v4(),
            payslip_number,
            employee_id: new.employee_id,
            period_start: new.period.start,
            period_end: new.period.end,
            pay_date: new.pay_date,
            regular_hours: new.regular_hours,
            overtime_hours: new.overtime_hours,
            regular_rate: new.regular_rate,
            overtime_rate: new.overtime_rate,
            gross_regular_pay: new.gross_regular_pay,
            gross_overtime_pay: new.gross_overtime_pay,
            gross_total_pay: new.gross_total_pay,
            tax_deductions: new.tax_deductions,
            tax_total: Decimal::ZERO,
            other_deductions: Vec::new(),
            other_deductions_total: Decimal::ZERO,
            bonuses: Vec::new(),
            bonuses_total: Decimal::ZERO,
            net_pay: Decimal::ZERO,
            status: PayslipStatus::Draft,
            generated_by: new.generated_by,
            approved_by: None,
            approved_at: None,
            paid_at: None,
            time_entry_ids: new.time_entry_ids,
            created_at: new.generated_at,
        };
        payslip.recalculate();
        payslip
    }

    pub fn period(&self) -> PayPeriod {
        PayPeriod {
            start: self.period_start,
            end: self.period_end,
        }
    }

    /// Re-derives breakdown totals and net pay.  Called on every save.
    pub fn recalculate(&mut self) {
        self.tax_total = total_of(&self.tax_deductions);
        self.other_deductions_total = total_of(&self.other_deductions);
        self.bonuses_total = total_of(&self.bonuses);
        self.net_pay = round_money(
            self.gross_total_pay + self.bonuses_total
                - self.tax_total
                - self.other_deductions_total,
        );
    }

    /// Deductions may exceed earnings; the model permits it but callers
    /// usually want to flag it.
    pub fn has_negative_net_pay(&self) -> bool {
        self.net_pay.is_sign_negative() && !self.net_pay.is_zero()
    }
}
