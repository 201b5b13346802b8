//! Payslip generation engine.
//!
//! The `engine` module turns an employee's approved time entries for a
//! pay period into a draft [`Payslip`].  It combines time aggregation
//! ([`crate::timesheet`]), the employee's rates and the [`TaxSchedule`],
//! and relies on the [`PayrollStore`] for the one-payslip-per-period
//! guarantee.  Batch runs use [`rayon`] to process employees in
//! parallel; each employee succeeds or fails on its own.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PayrollError, Result};
use crate::models::{EmployeeProfile, NewPayslip, PayPeriod, Payslip, TimeEntry};
use crate::money::round_money;
use crate::settings::PayrollSettings;
use crate::store::PayrollStore;
use crate::tax::{TaxBreakdown, TaxSchedule};
use crate::timesheet::{local_date, period_bounds, split_regular_overtime, HoursSummary};

/// Pay computed for one employee and period, before anything is saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayCalculation {
    pub employee_id: Uuid,
    pub period: PayPeriod,
    pub hours: HoursSummary,
    pub regular_rate: Decimal,
    pub overtime_rate: Decimal,
    pub gross_regular_pay: Decimal,
    pub gross_overtime_pay: Decimal,
    pub gross_total_pay: Decimal,
    pub taxes: TaxBreakdown,
    /// Gross pay minus taxes; bonuses and other deductions are only
    /// added to a saved payslip.
    pub net_pay: Decimal,
}

/// Computes pay from a profile and the period's time entries.
pub fn calculate_pay(
    profile: &EmployeeProfile,
    period: PayPeriod,
    entries: &[TimeEntry],
    taxes: &TaxSchedule,
    settings: &PayrollSettings,
) -> PayCalculation {
    let hours = split_regular_overtime(entries, profile.standard_hours_per_day, settings.timezone);

    let regular_rate = profile.base_hourly_rate;
    let overtime_rate = regular_rate * profile.overtime_rate_multiplier;
    let gross_regular_pay = round_money(hours.regular_hours * regular_rate);
    let gross_overtime_pay = round_money(hours.overtime_hours * overtime_rate);
    let gross_total_pay = gross_regular_pay + gross_overtime_pay;

    let taxes = taxes.calculate_total_taxes(gross_total_pay, profile.employment_type);
    let net_pay = round_money(gross_total_pay - taxes.total);

    PayCalculation {
        employee_id: profile.user_id,
        period,
        hours,
        regular_rate,
        overtime_rate,
        gross_regular_pay,
        gross_overtime_pay,
        gross_total_pay,
        taxes,
        net_pay,
    }
}

/// Parameters for generating one payslip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub employee_id: Uuid,
    pub period: PayPeriod,
    /// Defaults to the configured offset after the period end.
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
    pub generated_by: Uuid,
}

/// What happened when generating a payslip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Created(Payslip),
    /// No approved, closed time entries fell in the period.
    SkippedNoData { excluded_unapproved: usize },
    /// The employee already has a payslip for exactly this period.
    SkippedDuplicate,
}

impl GenerationOutcome {
    pub fn payslip(&self) -> Option<&Payslip> {
        match self {
            GenerationOutcome::Created(payslip) => Some(payslip),
            _ => None,
        }
    }
}

/// Parameters for a batch run over one shared period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Employees to process; every known profile when absent.
    #[serde(default)]
    pub employee_ids: Option<Vec<Uuid>>,
    pub period: PayPeriod,
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
    pub generated_by: Uuid,
    /// Date against which employment status is checked.
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Inactive,
    NoData,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEmployee {
    pub employee_id: Uuid,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEmployee {
    pub employee_id: Uuid,
    pub error: String,
}

/// Per-employee results of a batch run, in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub created: Vec<Payslip>,
    pub skipped: Vec<SkippedEmployee>,
    pub failed: Vec<FailedEmployee>,
}

enum BatchItem {
    Created(Payslip),
    Skipped(SkipReason),
    Failed(PayrollError),
}

/// Generates payslips against a store and a tax schedule.
pub struct PayslipGenerator {
    store: Arc<dyn PayrollStore>,
    taxes: Arc<TaxSchedule>,
    settings: PayrollSettings,
}

impl PayslipGenerator {
    pub fn new(
        store: Arc<dyn PayrollStore>,
        taxes: Arc<TaxSchedule>,
        settings: PayrollSettings,
    ) -> Self {
        Self {
            store,
            taxes,
            settings,
        }
    }

    pub fn settings(&self) -> &PayrollSettings {
        &self.settings
    }

    /// Time entries whose start falls on a local day of `period`.
    fn entries_for(&self, employee_id: Uuid, period: &PayPeriod) -> Result<Vec<TimeEntry>> {
        let (from, to) = period_bounds(period, self.settings.timezone);
        let entries = self.store.time_entries_between(employee_id, from, to)?;
        Ok(entries
            .into_iter()
            .filter(|entry| period.contains(local_date(entry.start, self.settings.timezone)))
            .collect())
    }

    /// Computes what a payslip would contain without saving anything.
    pub fn preview(&self, employee_id: Uuid, period: PayPeriod) -> Result<PayCalculation> {
        let profile = self.store.employee(employee_id)?;
        let entries = self.entries_for(employee_id, &period)?;
        Ok(calculate_pay(&profile, period, &entries, &self.taxes, &self.settings))
    }

    /// Generates a draft payslip unless there is nothing to pay or the
    /// period has already been paid out.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome> {
        let profile = self.store.employee(request.employee_id)?;
        self.generate_for(&profile, request)
    }

    fn generate_for(
        &self,
        profile: &EmployeeProfile,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome> {
        let period = request.period;
        let entries = self.entries_for(profile.user_id, &period)?;
        let calculation = calculate_pay(profile, period, &entries, &self.taxes, &self.settings);

        if calculation.hours.is_empty() {
            tracing::debug!(
                employee_id = %profile.user_id,
                %period,
                excluded_unapproved = calculation.hours.excluded_unapproved,
                "No approved time entries, payslip skipped"
            );
            return Ok(GenerationOutcome::SkippedNoData {
                excluded_unapproved: calculation.hours.excluded_unapproved,
            });
        }

        if self.store.find_payslip(profile.user_id, &period)?.is_some() {
            tracing::debug!(employee_id = %profile.user_id, %period, "Payslip already exists");
            return Ok(GenerationOutcome::SkippedDuplicate);
        }

        let new = NewPayslip {
            employee_id: profile.user_id,
            period,
            pay_date: request
                .pay_date
                .unwrap_or_else(|| self.settings.pay_date_for(&period)),
            regular_hours: calculation.hours.regular_hours,
            overtime_hours: calculation.hours.overtime_hours,
            regular_rate: calculation.regular_rate,
            overtime_rate: calculation.overtime_rate,
            gross_regular_pay: calculation.gross_regular_pay,
            gross_overtime_pay: calculation.gross_overtime_pay,
            gross_total_pay: calculation.gross_total_pay,
            tax_deductions: calculation.taxes.lines,
            generated_by: request.generated_by,
            generated_at: Utc::now(),
            time_entry_ids: calculation.hours.entry_ids,
        };

        let payslip = match self.store.insert_payslip(new) {
            Ok(payslip) => payslip,
            // Lost a race with a concurrent generation for the same period.
            Err(PayrollError::DuplicatePayslip { .. }) => {
                tracing::debug!(
                    employee_id = %profile.user_id,
                    %period,
                    "Payslip created concurrently"
                );
                return Ok(GenerationOutcome::SkippedDuplicate);
            }
            Err(err) => return Err(err),
        };

        if payslip.has_negative_net_pay() {
            tracing::warn!(
                payslip_number = %payslip.payslip_number,
                employee_id = %payslip.employee_id,
                net_pay = %payslip.net_pay,
                "Payslip has negative net pay"
            );
        }
        tracing::info!(
            payslip_number = %payslip.payslip_number,
            employee_id = %payslip.employee_id,
            %period,
            gross = %payslip.gross_total_pay,
            net = %payslip.net_pay,
            "Payslip generated"
        );
        Ok(GenerationOutcome::Created(payslip))
    }

    /// Generates payslips for several employees over one period.
    ///
    /// Inactive employees are skipped.  A failure for one employee is
    /// recorded in the report and does not affect the others.
    pub fn generate_batch(&self, request: &BatchRequest) -> Result<BatchReport> {
        let employee_ids: Vec<Uuid> = match &request.employee_ids {
            Some(ids) => ids.clone(),
            None => self
                .store
                .employees()?
                .into_iter()
                .map(|profile| profile.user_id)
                .collect(),
        };

        let items: Vec<(Uuid, BatchItem)> = employee_ids
            .into_par_iter()
            .map(|employee_id| (employee_id, self.batch_item(employee_id, request)))
            .collect();

        let mut report = BatchReport::default();
        for (employee_id, item) in items {
            match item {
                BatchItem::Created(payslip) => report.created.push(payslip),
                BatchItem::Skipped(reason) => {
                    report.skipped.push(SkippedEmployee {
                        employee_id,
                        reason,
                    })
                }
                BatchItem::Failed(err) => {
                    tracing::warn!(%employee_id, error = %err, "Payslip generation failed");
                    report.failed.push(FailedEmployee {
                        employee_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            period = %request.period,
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Batch generation finished"
        );
        Ok(report)
    }

    fn batch_item(&self, employee_id: Uuid, request: &BatchRequest) -> BatchItem {
        let profile = match self.store.employee(employee_id) {
            Ok(profile) => profile,
            Err(err) => return BatchItem::Failed(err),
        };
        if !profile.is_active_on(request.as_of) {
            return BatchItem::Skipped(SkipReason::Inactive);
        }
        let single = GenerationRequest {
            employee_id,
            period: request.period,
            pay_date: request.pay_date,
            generated_by: request.generated_by,
        };
        match self.generate_for(&profile, &single) {
            Ok(GenerationOutcome::Created(payslip)) => BatchItem::Created(payslip),
            Ok(GenerationOutcome::SkippedNoData { .. }) => BatchItem::Skipped(SkipReason::NoData),
            Ok(GenerationOutcome::SkippedDuplicate) => BatchItem::Skipped(SkipReason::Duplicate),
            Err(err) => BatchItem::Failed(err),
        }
    }
}
