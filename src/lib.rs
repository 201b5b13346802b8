//! Payroll Engine library crate.
//!
//! This crate turns approved time entries into payslips: it splits
//! hours into regular and overtime per calendar day, computes gross
//! pay, runs a prioritised tax pipeline (flat, percentage and
//! progressive rules) and manages the payslip lifecycle.  External
//! applications may call [`engine::PayslipGenerator`] directly or embed
//! the HTTP API via [`api::build_router`].

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod money;
pub mod settings;
pub mod store;
pub mod tax;
pub mod timesheet;

pub use error::{PayrollError, Result};
