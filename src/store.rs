//! Payroll storage.
//!
//! [`PayrollStore`] is the seam between the engine and whatever keeps
//! employee profiles, time entries and payslips.  Implementations must
//! make payslip insertion atomic: the (employee, period) uniqueness
//! check, payslip number allocation and the insert itself happen as
//! one step, and a conflict is reported as
//! [`PayrollError::DuplicatePayslip`].  [`MemoryStore`] does this under a
//! single mutex.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::error::{PayrollError, Result};
use crate::models::{EmployeeProfile, NewPayslip, PayPeriod, Payslip, TimeEntry};
use crate::settings::PayrollSettings;

/// Storage operations required by the generator and lifecycle.
///
/// Stores are shared between threads (batch generation runs employees
/// in parallel), so implementations must be `Send + Sync`.
pub trait PayrollStore: Send + Sync {
    fn upsert_employee(&self, profile: EmployeeProfile) -> Result<EmployeeProfile>;
    fn employee(&self, user_id: Uuid) -> Result<EmployeeProfile>;
    fn employees(&self) -> Result<Vec<EmployeeProfile>>;

    fn insert_time_entry(&self, entry: TimeEntry) -> Result<TimeEntry>;
    fn approve_time_entry(
        &self,
        id: Uuid,
        approver: Uuid,
        at: DateTime<Utc>,
    ) -> Result<TimeEntry>;
    /// Fails with [`PayrollError::TimeEntryLocked`] when a payslip
    /// counted the entry.
    fn remove_time_entry(&self, id: Uuid) -> Result<TimeEntry>;
    /// All entries (approved or not) of one employee whose start lies in
    /// `[from, to)`, ordered by start.
    fn time_entries_between(
        &self,
        employee_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>>;

    fn payslip(&self, id: Uuid) -> Result<Payslip>;
    fn find_payslip(&self, employee_id: Uuid, period: &PayPeriod) -> Result<Option<Payslip>>;
    fn payslips_for_employee(&self, employee_id: Uuid) -> Result<Vec<Payslip>>;
    /// Atomically checks uniqueness, allocates a payslip number and
    /// persists a draft payslip.
    fn insert_payslip(&self, new: NewPayslip) -> Result<Payslip>;
    /// Applies `apply` to the stored payslip and saves the result with
    /// recalculated totals.  Nothing is saved when `apply` fails.
    fn update_payslip(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Payslip) -> Result<()>,
    ) -> Result<Payslip>;
    /// Removes the payslip if `guard` accepts it.
    fn remove_payslip(&self, id: Uuid, guard: &dyn Fn(&Payslip) -> Result<()>) -> Result<Payslip>;
}

type PeriodKey = (Uuid, NaiveDate, NaiveDate);

fn period_key(employee_id: Uuid, period: &PayPeriod) -> PeriodKey {
    (employee_id, period.start, period.end)
}

#[derive(Debug, Default)]
struct Tables {
    employees: HashMap<Uuid, EmployeeProfile>,
    time_entries: HashMap<Uuid, TimeEntry>,
    payslips: HashMap<Uuid, Payslip>,
    by_period: HashMap<PeriodKey, Uuid>,
    issued_numbers: HashSet<String>,
    sequences: HashMap<String, u32>,
    /// Time entry id to the payslip that counted it.
    locked_entries: HashMap<Uuid, Uuid>,
}

/// In-process store.  Payslip numbers take the form
/// `{prefix}-{YYYYMM}-{sequence}` where the month is the generation
/// month in the configured timezone.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    prefix: String,
    timezone: Tz,
}

impl MemoryStore {
    pub fn new(prefix: impl Into<String>, timezone: Tz) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            prefix: prefix.into(),
            timezone,
        }
    }

    pub fn from_settings(settings: &PayrollSettings) -> Self {
        Self::new(settings.payslip_prefix.clone(), settings.timezone)
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_number(&self, tables: &mut Tables, generated_at: DateTime<Utc>) -> String {
        let month = generated_at.with_timezone(&self.timezone).format("%Y%m").to_string();
        let sequence = tables.sequences.entry(month.clone()).or_insert(0);
        loop {
            *sequence += 1;
            let number = format!("{}-{}-{:04}", self.prefix, month, sequence);
            if !tables.issued_numbers.contains(&number) {
                return number;
            }
        }
    }
}

impl PayrollStore for MemoryStore {
    fn upsert_employee(&self, profile: EmployeeProfile) -> Result<EmployeeProfile> {
        profile.validate()?;
        self.tables()
            .employees
            .insert(profile.user_id, profile.clone());
        Ok(profile)
    }

    fn employee(&self, user_id: Uuid) -> Result<EmployeeProfile> {
        self.tables()
            .employees
            .get(&user_id)
            .cloned()
            .ok_or(PayrollError::EmployeeNotFound(user_id))
    }

    fn employees(&self) -> Result<Vec<EmployeeProfile>> {
        let mut employees: Vec<EmployeeProfile> =
            self.tables().employees.values().cloned().collect();
        employees.sort_by(|a, b| a.name.cmp(&b.name).then(a.user_id.cmp(&b.user_id)));
        Ok(employees)
    }

    fn insert_time_entry(&self, entry: TimeEntry) -> Result<TimeEntry> {
        entry.validate()?;
        let mut tables = self.tables();
        if !tables.employees.contains_key(&entry.employee_id) {
            return Err(PayrollError::EmployeeNotFound(entry.employee_id));
        }
        if tables.locked_entries.contains_key(&entry.id) {
            return Err(PayrollError::TimeEntryLocked(entry.id));
        }
        tables.time_entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn approve_time_entry(
        &self,
        id: Uuid,
        approver: Uuid,
        at: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        let mut tables = self.tables();
        if tables.locked_entries.contains_key(&id) {
            return Err(PayrollError::TimeEntryLocked(id));
        }
        let entry = tables
            .time_entries
            .get_mut(&id)
            .ok_or(PayrollError::TimeEntryNotFound(id))?;
        entry.approve(approver, at);
        Ok(entry.clone())
    }

    fn remove_time_entry(&self, id: Uuid) -> Result<TimeEntry> {
        let mut tables = self.tables();
        if tables.locked_entries.contains_key(&id) {
            return Err(PayrollError::TimeEntryLocked(id));
        }
        tables
            .time_entries
            .remove(&id)
            .ok_or(PayrollError::TimeEntryNotFound(id))
    }

    fn time_entries_between(
        &self,
        employee_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>> {
        let mut entries: Vec<TimeEntry> = self
            .tables()
            .time_entries
            .values()
            .filter(|e| e.employee_id == employee_id && e.start >= from && e.start < to)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.start);
        Ok(entries)
    }

    fn payslip(&self, id: Uuid) -> Result<Payslip> {
        self.tables()
            .payslips
            .get(&id)
            .cloned()
            .ok_or(PayrollError::PayslipNotFound(id))
    }

    fn find_payslip(&self, employee_id: Uuid, period: &PayPeriod) -> Result<Option<Payslip>> {
        let tables = self.tables();
        Ok(tables
            .by_period
            .get(&period_key(employee_id, period))
            .and_then(|id| tables.payslips.get(id))
            .cloned())
    }

    fn payslips_for_employee(&self, employee_id: Uuid) -> Result<Vec<Payslip>> {
        let mut payslips: Vec<Payslip> = self
            .tables()
            .payslips
            .values()
            .filter(|p| p.employee_id == employee_id)
            .cloned()
            .collect();
        payslips.sort_by_key(|p| p.period_start);
        Ok(payslips)
    }

    fn insert_payslip(&self, new: NewPayslip) -> Result<Payslip> {
        let mut tables = self.tables();
        let key = period_key(new.employee_id, &new.period);
        if tables.by_period.contains_key(&key) {
            return Err(PayrollError::DuplicatePayslip {
                employee_id: new.employee_id,
                period_start: new.period.start,
                period_end: new.period.end,
            });
        }

        let number = self.next_number(&mut tables, new.generated_at);
        let payslip = Payslip::from_new(new, number);

        tables.issued_numbers.insert(payslip.payslip_number.clone());
        tables.by_period.insert(key, payslip.id);
        for entry_id in &payslip.time_entry_ids {
            tables.locked_entries.insert(*entry_id, payslip.id);
        }
        tables.payslips.insert(payslip.id, payslip.clone());
        Ok(payslip)
    }

    fn update_payslip(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Payslip) -> Result<()>,
    ) -> Result<Payslip> {
        let mut tables = self.tables();
        let stored = tables
            .payslips
            .get_mut(&id)
            .ok_or(PayrollError::PayslipNotFound(id))?;

        let mut updated = stored.clone();
        apply(&mut updated)?;
        if updated.id != stored.id
            || updated.payslip_number != stored.payslip_number
            || updated.employee_id != stored.employee_id
            || updated.period() != stored.period()
        {
            return Err(PayrollError::Validation(format!(
                "payslip {} identity fields cannot change",
                stored.payslip_number
            )));
        }
        updated.recalculate();
        *stored = updated.clone();
        Ok(updated)
    }

    fn remove_payslip(&self, id: Uuid, guard: &dyn Fn(&Payslip) -> Result<()>) -> Result<Payslip> {
        let mut tables = self.tables();
        let payslip = tables
            .payslips
            .get(&id)
            .ok_or(PayrollError::PayslipNotFound(id))?;
        guard(payslip)?;

        let payslip = tables
            .payslips
            .remove(&id)
            .ok_or(PayrollError::PayslipNotFound(id))?;
        tables
            .by_period
            .remove(&period_key(payslip.employee_id, &payslip.period()));
        tables.locked_entries.retain(|_, owner| *owner != payslip.id);
        Ok(payslip)
    }
}
