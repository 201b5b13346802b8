//! HTTP API for the Payroll Engine.
//!
//! This module exposes the payroll core over a small REST API using the
//! [`axum`](https://crates.io/crates/axum) framework: maintaining
//! employee profiles and time entries, previewing taxes and pay,
//! generating payslips (singly or in batches) and moving them through
//! their lifecycle.  Errors are returned as `{"error": "..."}` with a
//! status code derived from the [`PayrollError`] variant.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::{
    BatchReport, BatchRequest, GenerationOutcome, GenerationRequest, PayCalculation,
    PayslipGenerator,
};
use crate::error::{PayrollError, Result};
use crate::lifecycle::{BulkApproveReport, PayslipLifecycle};
use crate::models::{EmployeeProfile, EmploymentType, PayPeriod, Payslip, TimeEntry};
use crate::settings::PayrollSettings;
use crate::store::{MemoryStore, PayrollStore};
use crate::tax::{load_tax_configurations_from_dir, TaxBreakdown, TaxSchedule};

/// Application state shared across requests.
pub struct AppState {
    pub store: Arc<dyn PayrollStore>,
    pub taxes: Arc<TaxSchedule>,
    pub generator: PayslipGenerator,
    pub lifecycle: PayslipLifecycle,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PayrollStore>,
        taxes: Arc<TaxSchedule>,
        settings: PayrollSettings,
    ) -> Self {
        Self {
            generator: PayslipGenerator::new(store.clone(), taxes.clone(), settings),
            lifecycle: PayslipLifecycle::new(store.clone()),
            store,
            taxes,
        }
    }

    /// Builds state backed by an in-memory store, loading tax rules from
    /// the configured directory.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let rules = load_tax_configurations_from_dir(&config.tax.rules_dir)?;
        let taxes = Arc::new(TaxSchedule::new(rules)?);
        tracing::info!(rules = taxes.rules().len(), "Tax schedule loaded");
        let store: Arc<dyn PayrollStore> = Arc::new(MemoryStore::from_settings(&config.payroll));
        Ok(Self::new(store, taxes, config.payroll.clone()))
    }

    fn settings(&self) -> &PayrollSettings {
        self.generator.settings()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings().timezone).date_naive()
    }
}

impl IntoResponse for PayrollError {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_conflict() {
            StatusCode::CONFLICT
        } else {
            match &self {
                PayrollError::Validation(_) | PayrollError::InvalidConfiguration(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({"error": self.to_string()}));
        (status, body).into_response()
    }
}

/// Build the API router over the given state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/employees", put(upsert_employee_handler))
        .route("/api/time-entries", post(create_time_entry_handler))
        .route(
            "/api/time-entries/:id",
            axum::routing::delete(delete_time_entry_handler),
        )
        .route(
            "/api/time-entries/:id/approve",
            post(approve_time_entry_handler),
        )
        .route("/api/taxes/preview", post(tax_preview_handler))
        .route("/api/payslips", post(generate_handler))
        .route("/api/payslips/preview", post(pay_preview_handler))
        .route("/api/payslips/batch", post(batch_handler))
        .route("/api/payslips/bulk-approve", post(bulk_approve_handler))
        .route(
            "/api/payslips/:id",
            get(get_payslip_handler).delete(delete_payslip_handler),
        )
        .route("/api/payslips/:id/approve", post(approve_payslip_handler))
        .route("/api/payslips/:id/pay", post(pay_payslip_handler))
        .route("/api/payslips/:id/bonuses", post(add_bonus_handler))
        .route("/api/payslips/:id/deductions", post(add_deduction_handler))
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn upsert_employee_handler(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<EmployeeProfile>,
) -> Result<Json<EmployeeProfile>> {
    let profile = state.store.upsert_employee(profile)?;
    tracing::info!(employee_id = %profile.user_id, "Employee profile saved");
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
struct CreateTimeEntry {
    employee_id: Uuid,
    #[serde(default)]
    project_id: Option<Uuid>,
    #[serde(default)]
    task_id: Option<Uuid>,
    #[serde(default)]
    description: Option<String>,
    start: DateTime<Utc>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
    /// Defaults to the employee's current base rate.
    #[serde(default)]
    hourly_rate: Option<Decimal>,
}

async fn create_time_entry_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTimeEntry>,
) -> Result<(StatusCode, Json<TimeEntry>)> {
    let hourly_rate = match body.hourly_rate {
        Some(rate) => rate,
        None => state.store.employee(body.employee_id)?.base_hourly_rate,
    };
    let mut entry = TimeEntry::new(body.employee_id, body.start, body.end, hourly_rate)?;
    entry.project_id = body.project_id;
    entry.task_id = body.task_id;
    entry.description = body.description;
    let entry = state.store.insert_time_entry(entry)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
struct ApproveBody {
    approver: Uuid,
}

async fn approve_time_entry_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<TimeEntry>> {
    let entry = state.store.approve_time_entry(id, body.approver, Utc::now())?;
    Ok(Json(entry))
}

async fn delete_time_entry_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.store.remove_time_entry(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TaxPreviewBody {
    gross: Decimal,
    #[serde(default = "default_employment_type")]
    employment_type: EmploymentType,
}

fn default_employment_type() -> EmploymentType {
    EmploymentType::Employee
}

async fn tax_preview_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TaxPreviewBody>,
) -> Result<Json<TaxBreakdown>> {
    if body.gross.is_sign_negative() {
        return Err(PayrollError::Validation("gross income cannot be negative".into()));
    }
    Ok(Json(
        state
            .taxes
            .calculate_total_taxes(body.gross, body.employment_type),
    ))
}

#[derive(Debug, Deserialize)]
struct PeriodBody {
    employee_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
}

async fn pay_preview_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PeriodBody>,
) -> Result<Json<PayCalculation>> {
    let period = PayPeriod::new(body.period_start, body.period_end)?;
    Ok(Json(state.generator.preview(body.employee_id, period)?))
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    employee_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    #[serde(default)]
    pay_date: Option<NaiveDate>,
    generated_by: Uuid,
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> Result<(StatusCode, Json<GenerationOutcome>)> {
    let request = GenerationRequest {
        employee_id: body.employee_id,
        period: PayPeriod::new(body.period_start, body.period_end)?,
        pay_date: body.pay_date,
        generated_by: body.generated_by,
    };
    let outcome = state.generator.generate(&request)?;
    let status = match &outcome {
        GenerationOutcome::Created(_) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    #[serde(default)]
    employee_ids: Option<Vec<Uuid>>,
    /// Both bounds default to the most recently completed pay period.
    #[serde(default)]
    period_start: Option<NaiveDate>,
    #[serde(default)]
    period_end: Option<NaiveDate>,
    #[serde(default)]
    pay_date: Option<NaiveDate>,
    generated_by: Uuid,
}

async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchBody>,
) -> Response {
    let today = state.today();
    let period = match (body.period_start, body.period_end) {
        (Some(start), Some(end)) => match PayPeriod::new(start, end) {
            Ok(period) => period,
            Err(err) => return err.into_response(),
        },
        (None, None) => state.settings().previous_period(today),
        _ => {
            return PayrollError::Validation(
                "period_start and period_end must be given together".into(),
            )
            .into_response()
        }
    };
    let request = BatchRequest {
        employee_ids: body.employee_ids,
        period,
        pay_date: body.pay_date,
        generated_by: body.generated_by,
        as_of: today,
    };

    let worker_state = state.clone();
    let joined = tokio::task::spawn_blocking(move || {
        worker_state.generator.generate_batch(&request)
    })
    .await;
    match joined {
        Ok(Ok(report)) => Json::<BatchReport>(report).into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Batch generation task failed");
            let body = Json(serde_json::json!({"error": "batch generation failed"}));
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

async fn get_payslip_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payslip>> {
    Ok(Json(state.store.payslip(id)?))
}

async fn approve_payslip_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<Payslip>> {
    Ok(Json(state.lifecycle.approve(id, body.approver)?))
}

async fn pay_payslip_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payslip>> {
    Ok(Json(state.lifecycle.mark_paid(id)?))
}

async fn delete_payslip_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.lifecycle.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BulkApproveBody {
    ids: Vec<Uuid>,
    approver: Uuid,
}

async fn bulk_approve_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkApproveBody>,
) -> Result<Json<BulkApproveReport>> {
    Ok(Json(state.lifecycle.bulk_approve(&body.ids, body.approver)?))
}

#[derive(Debug, Deserialize)]
struct AdjustmentBody {
    name: String,
    amount: Decimal,
}

async fn add_bonus_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AdjustmentBody>,
) -> Result<Json<Payslip>> {
    Ok(Json(state.lifecycle.add_bonus(id, &body.name, body.amount)?))
}

async fn add_deduction_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AdjustmentBody>,
) -> Result<Json<Payslip>> {
    Ok(Json(state.lifecycle.add_deduction(id, &body.name, body.amount)?))
}

/// Launch the API server.  This function loads tax rules, builds the
/// router and binds to the configured address.  It runs until the
/// process receives Ctrl-C.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let state =
        AppState::from_config(&config).context("failed to initialise payroll state")?;
    let router = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(addr = %config.server.bind_addr, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::tax::{AppliesTo, TaxConfiguration, TaxType};

    fn state() -> Arc<AppState> {
        let settings = PayrollSettings::default();
        let taxes = TaxSchedule::new(vec![TaxConfiguration {
            name: "Levy".into(),
            tax_type: TaxType::Flat,
            rate: Some(dec!(50)),
            brackets: Vec::new(),
            minimum_income: Decimal::ZERO,
            maximum_income: None,
            is_active: true,
            applies_to: AppliesTo::All,
            priority: 0,
        }])
        .unwrap();
        let store: Arc<dyn PayrollStore> = Arc::new(MemoryStore::from_settings(&settings));
        Arc::new(AppState::new(store, Arc::new(taxes), settings))
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn decimal(value: &Value) -> Decimal {
        match value {
            Value::String(s) => s.parse().unwrap(),
            other => other.to_string().parse().unwrap(),
        }
    }

    async fn employee_with_ten_hours(router: &Router) -> Uuid {
        let employee_id = Uuid::new_v4();
        let (status, _) = send(
            router,
            "PUT",
            "/api/employees",
            Some(json!({
                "user_id": employee_id,
                "name": "Ada",
                "employment_type": "employee",
                "base_hourly_rate": "20",
                "overtime_rate_multiplier": "1.5",
                "standard_hours_per_day": "8",
                "standard_hours_per_week": "40",
                "payment_method": "bank_transfer",
                "hire_date": "2023-01-01",
                "is_active": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, entry) = send(
            router,
            "POST",
            "/api/time-entries",
            Some(json!({
                "employee_id": employee_id,
                "start": "2024-03-04T08:00:00Z",
                "end": "2024-03-04T18:00:00Z"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(decimal(&entry["hourly_rate"]), dec!(20));

        let uri = format!("/api/time-entries/{}/approve", entry["id"].as_str().unwrap());
        let (status, _) = send(router, "POST", &uri, Some(json!({"approver": Uuid::new_v4()}))).await;
        assert_eq!(status, StatusCode::OK);
        employee_id
    }

    #[tokio::test]
    async fn generate_approve_pay_flow() {
        let router = build_router(state());
        let employee_id = employee_with_ten_hours(&router).await;
        let generate = json!({
            "employee_id": employee_id,
            "period_start": "2024-03-01",
            "period_end": "2024-03-14",
            "generated_by": Uuid::new_v4()
        });

        let (status, payslip) = send(&router, "POST", "/api/payslips", Some(generate.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payslip["outcome"], "created");
        assert_eq!(payslip["status"], "draft");
        assert_eq!(decimal(&payslip["gross_total_pay"]), dec!(220));
        assert_eq!(decimal(&payslip["net_pay"]), dec!(170));

        let (status, again) = send(&router, "POST", "/api/payslips", Some(generate)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["outcome"], "skipped_duplicate");

        let id = payslip["id"].as_str().unwrap();
        let (status, _) = send(
            &router,
            "POST",
            &format!("/api/payslips/{id}/pay"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, approved) = send(
            &router,
            "POST",
            &format!("/api/payslips/{id}/approve"),
            Some(json!({"approver": Uuid::new_v4()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["status"], "approved");

        let (status, paid) = send(&router, "POST", &format!("/api/payslips/{id}/pay"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paid["status"], "paid");

        let (status, error) = send(&router, "DELETE", &format!("/api/payslips/{id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(error["error"].as_str().unwrap().contains("delete"));
    }

    #[tokio::test]
    async fn generate_without_hours_is_skipped() {
        let router = build_router(state());
        let employee_id = employee_with_ten_hours(&router).await;
        let (status, outcome) = send(
            &router,
            "POST",
            "/api/payslips",
            Some(json!({
                "employee_id": employee_id,
                "period_start": "2024-04-01",
                "period_end": "2024-04-14",
                "generated_by": Uuid::new_v4()
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["outcome"], "skipped_no_data");
        assert_eq!(outcome["excluded_unapproved"], 0);
    }

    #[tokio::test]
    async fn batch_and_bulk_approve() {
        let router = build_router(state());
        let employee_id = employee_with_ten_hours(&router).await;

        let (status, report) = send(
            &router,
            "POST",
            "/api/payslips/batch",
            Some(json!({
                "period_start": "2024-03-01",
                "period_end": "2024-03-14",
                "generated_by": Uuid::new_v4()
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let created = report["created"].as_array().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["employee_id"], employee_id.to_string());

        let id = created[0]["id"].as_str().unwrap();
        let (status, bulk) = send(
            &router,
            "POST",
            "/api/payslips/bulk-approve",
            Some(json!({"ids": [id, Uuid::new_v4()], "approver": Uuid::new_v4()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bulk["approved"].as_array().unwrap().len(), 1);
        assert_eq!(bulk["skipped"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tax_preview_and_errors() {
        let router = build_router(state());
        let (status, breakdown) = send(
            &router,
            "POST",
            "/api/taxes/preview",
            Some(json!({"gross": "190"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decimal(&breakdown["total"]), dec!(50));
        assert_eq!(breakdown["lines"][0]["kind"], "flat");

        let (status, _) = send(
            &router,
            "GET",
            &format!("/api/payslips/{}", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &router,
            "POST",
            "/api/payslips/preview",
            Some(json!({
                "employee_id": Uuid::new_v4(),
                "period_start": "2024-03-14",
                "period_end": "2024-03-01"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn counted_time_entry_cannot_be_deleted() {
        let router = build_router(state());
        let employee_id = employee_with_ten_hours(&router).await;
        let (_, outcome) = send(
            &router,
            "POST",
            "/api/payslips",
            Some(json!({
                "employee_id": employee_id,
                "period_start": "2024-03-01",
                "period_end": "2024-03-14",
                "generated_by": Uuid::new_v4()
            })),
        )
        .await;
        let entry_id = outcome["time_entry_ids"][0].as_str().unwrap();
        let (status, _) = send(
            &router,
            "DELETE",
            &format!("/api/time-entries/{entry_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
