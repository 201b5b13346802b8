//! Error taxonomy for the payroll engine.
//!
//! Validation and configuration errors are raised before any computation
//! starts.  State conflicts (illegal payslip transitions, duplicates,
//! locked time entries) are explicit so callers can present a clear
//! message.  Conditions that are expected during normal operation, such
//! as "no approved hours in the period", are not errors; see
//! [`crate::engine::GenerationOutcome`].

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PayslipStatus;

#[derive(Error, Debug)]
pub enum PayrollError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Employee not found: {0}")]
    EmployeeNotFound(Uuid),

    #[error("Time entry not found: {0}")]
    TimeEntryNotFound(Uuid),

    #[error("Payslip not found: {0}")]
    PayslipNotFound(Uuid),

    #[error("Payslip already exists for employee {employee_id} ({period_start} to {period_end})")]
    DuplicatePayslip {
        employee_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },

    #[error("Cannot {action} payslip {payslip_number}: status is {status}")]
    InvalidTransition {
        payslip_number: String,
        status: PayslipStatus,
        action: &'static str,
    },

    #[error("Time entry {0} is included in a payslip")]
    TimeEntryLocked(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PayrollError {
    /// True for errors caused by a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PayrollError::EmployeeNotFound(_)
                | PayrollError::TimeEntryNotFound(_)
                | PayrollError::PayslipNotFound(_)
        )
    }

    /// True for errors caused by the current state of a record rather
    /// than by the request itself.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PayrollError::DuplicatePayslip { .. }
                | PayrollError::InvalidTransition { .. }
                | PayrollError::TimeEntryLocked(_)
        )
    }
}

/// Result type alias using PayrollError.
pub type Result<T> = std::result::Result<T, PayrollError>;
