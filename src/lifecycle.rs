//! Payslip lifecycle.
//!
//! Payslips move `draft -> approved -> paid` and never back.  Drafts can
//! still be adjusted (bonuses, other deductions) and deleted; approved
//! payslips can only be paid or deleted; paid payslips are final.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PayrollError, Result};
use crate::models::{BreakdownLine, Payslip, PayslipStatus};
use crate::store::PayrollStore;

impl Payslip {
    fn reject(&self, action: &'static str) -> PayrollError {
        PayrollError::InvalidTransition {
            payslip_number: self.payslip_number.clone(),
            status: self.status,
            action,
        }
    }

    /// `draft -> approved`.
    pub fn approve(&mut self, approver: Uuid, at: DateTime<Utc>) -> Result<()> {
        if self.status != PayslipStatus::Draft {
            return Err(self.reject("approve"));
        }
        self.status = PayslipStatus::Approved;
        self.approved_by = Some(approver);
        self.approved_at = Some(at);
        Ok(())
    }

    /// `approved -> paid`.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != PayslipStatus::Approved {
            return Err(self.reject("pay"));
        }
        self.status = PayslipStatus::Paid;
        self.paid_at = Some(at);
        Ok(())
    }

    pub fn ensure_deletable(&self) -> Result<()> {
        match self.status {
            PayslipStatus::Draft | PayslipStatus::Approved => Ok(()),
            PayslipStatus::Paid => Err(self.reject("delete")),
        }
    }

    pub fn ensure_adjustable(&self) -> Result<()> {
        match self.status {
            PayslipStatus::Draft => Ok(()),
            _ => Err(self.reject("adjust")),
        }
    }
}

/// Outcome of a bulk approval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkApproveReport {
    pub approved: Vec<Payslip>,
    /// Ids that were not drafts (or do not exist) and were left alone.
    pub skipped: Vec<Uuid>,
}

/// Applies lifecycle transitions to stored payslips.  Every transition
/// is checked and saved in one store operation.
#[derive(Clone)]
pub struct PayslipLifecycle {
    store: Arc<dyn PayrollStore>,
}

impl PayslipLifecycle {
    pub fn new(store: Arc<dyn PayrollStore>) -> Self {
        Self { store }
    }

    pub fn approve(&self, id: Uuid, approver: Uuid) -> Result<Payslip> {
        let now = Utc::now();
        let payslip = self
            .store
            .update_payslip(id, &mut |payslip| payslip.approve(approver, now))?;
        tracing::info!(
            payslip_number = %payslip.payslip_number,
            approver = %approver,
            "Payslip approved"
        );
        Ok(payslip)
    }

    pub fn mark_paid(&self, id: Uuid) -> Result<Payslip> {
        let now = Utc::now();
        let payslip = self
            .store
            .update_payslip(id, &mut |payslip| payslip.mark_paid(now))?;
        tracing::info!(payslip_number = %payslip.payslip_number, "Payslip paid");
        Ok(payslip)
    }

    /// Deletes a draft or approved payslip; paid payslips are kept.
    pub fn delete(&self, id: Uuid) -> Result<Payslip> {
        let payslip = self.store.remove_payslip(id, &Payslip::ensure_deletable)?;
        tracing::info!(payslip_number = %payslip.payslip_number, "Payslip deleted");
        Ok(payslip)
    }

    /// Approves every draft among `ids`.  Anything else is skipped.
    pub fn bulk_approve(&self, ids: &[Uuid], approver: Uuid) -> Result<BulkApproveReport> {
        let mut report = BulkApproveReport::default();
        for &id in ids {
            match self.approve(id, approver) {
                Ok(payslip) => report.approved.push(payslip),
                Err(PayrollError::InvalidTransition { .. } | PayrollError::PayslipNotFound(_)) => {
                    report.skipped.push(id)
                }
                Err(err) => return Err(err),
            }
        }
        tracing::info!(
            approved = report.approved.len(),
            skipped = report.skipped.len(),
            "Bulk approval finished"
        );
        Ok(report)
    }

    pub fn add_bonus(&self, id: Uuid, name: &str, amount: Decimal) -> Result<Payslip> {
        let line = adjustment_line(name, amount, |name, amount| {
            BreakdownLine::bonus(name, amount)
        })?;
        self.store.update_payslip(id, &mut |payslip| {
            payslip.ensure_adjustable()?;
            payslip.bonuses.push(line.clone());
            Ok(())
        })
    }

    pub fn add_deduction(&self, id: Uuid, name: &str, amount: Decimal) -> Result<Payslip> {
        let line = adjustment_line(name, amount, |name, amount| {
            BreakdownLine::deduction(name, amount)
        })?;
        self.store.update_payslip(id, &mut |payslip| {
            payslip.ensure_adjustable()?;
            payslip.other_deductions.push(line.clone());
            Ok(())
        })
    }
}

fn adjustment_line(
    name: &str,
    amount: Decimal,
    build: fn(String, Decimal) -> BreakdownLine,
) -> Result<BreakdownLine> {
    if name.trim().is_empty() {
        return Err(PayrollError::Validation("adjustment needs a name".into()));
    }
    if amount <= Decimal::ZERO {
        return Err(PayrollError::Validation(format!(
            "adjustment '{name}' must be a positive amount"
        )));
    }
    Ok(build(name.trim().to_string(), amount))
}
