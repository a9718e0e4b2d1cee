use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{AuditStatus, PageType, Report};
use crate::error::AppError;
use crate::jobs::audit::{run_audit_sweep, submit_audit, SweepResult};
use crate::AppState;
use sea_orm::EntityTrait;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartAuditRequest {
    /// Page URL to audit
    pub url: String,
    /// One of "product", "home", "cart", "other"
    pub page_type: String,
    /// Accepted for compatibility; the worker decides live vs mock from its own configuration
    #[serde(default)]
    pub use_live_audit: Option<bool>,
    /// Skip the dedup cache and queue a fresh job
    #[serde(default)]
    pub force_refresh: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartAuditResponse {
    /// Identifier to poll on /api/audit/{reportId}
    pub report_id: Uuid,
    pub status: AuditStatus,
    /// Present and true when an existing recent job was reused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatusResponse {
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full report once done; scores only until a lead is captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
    pub lead_captured: bool,
    pub used_mock: bool,
    pub url: String,
    pub page_type: PageType,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub ok: bool,
    /// Stuck jobs re-queued during this pass
    pub recovered: u64,
    /// Jobs run to a terminal state during this pass
    pub processed: u64,
    pub results: Vec<SweepResult>,
}

/// First forwarded address wins; the raw peer address is not available
/// behind the expected proxy setup.
fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    "unknown".to_string()
}

/// Queue an audit job (or reuse a recent identical one)
#[utoipa::path(
    post,
    path = "/api/audit/start",
    request_body = StartAuditRequest,
    responses(
        (status = 200, description = "Job queued or served from cache", body = StartAuditResponse),
        (status = 400, description = "Invalid URL or page type"),
        (status = 429, description = "Daily audit limit reached"),
        (status = 500, description = "Storage unavailable")
    )
)]
pub async fn start_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StartAuditRequest>,
) -> Result<Json<StartAuditResponse>, AppError> {
    let ip = client_ip(&headers);
    let outcome = submit_audit(
        &state,
        &payload.url,
        &payload.page_type,
        payload.force_refresh.unwrap_or(false),
        &ip,
    )
    .await?;
    Ok(Json(StartAuditResponse {
        report_id: outcome.report_id,
        status: outcome.status,
        cached: outcome.cached.then_some(true),
    }))
}

fn redact_report(report: &Value) -> Value {
    json!({
        "overall_score": report.get("overall_score").cloned().unwrap_or(Value::Null),
        "category_scores": report.get("category_scores").cloned().unwrap_or(Value::Null),
        "top_fixes": [],
        "findings": [],
    })
}

/// Poll an audit job's status and report
#[utoipa::path(
    get,
    path = "/api/audit/{report_id}",
    params(("report_id" = String, Path, description = "Job identifier from /api/audit/start")),
    responses(
        (status = 200, description = "Current job state", body = AuditStatusResponse),
        (status = 400, description = "Malformed report id"),
        (status = 404, description = "No such report")
    )
)]
pub async fn get_audit(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<AuditStatusResponse>, AppError> {
    let id = Uuid::parse_str(&report_id)
        .map_err(|_| AppError::Validation("Invalid report id.".to_string()))?;
    let job = Report::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Report not found.".to_string()))?;

    let report = match (&job.status, &job.result_json) {
        (AuditStatus::Done, Some(result)) if !job.lead_captured => Some(redact_report(result)),
        (AuditStatus::Done, Some(result)) => Some(result.clone()),
        _ => None,
    };

    Ok(Json(AuditStatusResponse {
        status: job.status,
        error: job.error,
        report,
        lead_captured: job.lead_captured,
        used_mock: job.used_mock,
        url: job.url,
        page_type: job.page_type,
    }))
}

/// Run one queue sweep: recovery plus a batch of claims. Registered for
/// both GET (cron-friendly) and POST.
#[utoipa::path(
    method(get, post),
    path = "/api/audit/process",
    responses(
        (status = 200, description = "Sweep summary", body = ProcessResponse),
        (status = 401, description = "Missing or wrong worker secret")
    )
)]
pub async fn process_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProcessResponse>, AppError> {
    if let Some(secret) = &state.config.worker_secret {
        let authorized = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| token == secret)
            .unwrap_or(false);
        if !authorized {
            return Err(AppError::Unauthorized);
        }
    }

    let summary = run_audit_sweep(&state).await?;
    Ok(Json(ProcessResponse {
        ok: true,
        recovered: summary.recovered,
        processed: summary.processed,
        results: summary.results,
    }))
}
