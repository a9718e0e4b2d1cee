use axum::{extract::State, Json};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, NotSet, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{lead, report, Report};
use crate::error::AppError;
use crate::rate_limit::check_rate_limit;
use crate::validators::validate_email;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadRequest {
    /// Job the lead is unlocking
    pub report_id: String,
    pub email: String,
    /// Explicit consent is required
    #[serde(default)]
    pub consent: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LeadResponse {
    pub ok: bool,
}

/// Capture a lead and unlock the full report
#[utoipa::path(
    post,
    path = "/api/lead",
    request_body = LeadRequest,
    responses(
        (status = 200, description = "Lead stored and report unlocked", body = LeadResponse),
        (status = 400, description = "Missing consent, bad email, or bad report id"),
        (status = 404, description = "No such report"),
        (status = 429, description = "Daily limit reached for this email")
    )
)]
pub async fn capture_lead(
    State(state): State<AppState>,
    Json(payload): Json<LeadRequest>,
) -> Result<Json<LeadResponse>, AppError> {
    if !payload.consent {
        return Err(AppError::Validation("Consent is required.".to_string()));
    }
    let email = validate_email(&payload.email)
        .ok_or_else(|| AppError::Validation("Please enter a valid email address.".to_string()))?;
    let id = Uuid::parse_str(&payload.report_id)
        .map_err(|_| AppError::Validation("Invalid report id.".to_string()))?;

    let rate = check_rate_limit(
        &state.db,
        &format!("email:{email}"),
        state.config.rate_limit_max_per_day,
        state.config.rate_limit_window_hours,
    )
    .await?;
    if !rate.allowed {
        return Err(AppError::RateLimited {
            remaining: rate.remaining,
            reset_at: rate.reset_at,
        });
    }

    let job = Report::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Report not found.".to_string()))?;

    lead::ActiveModel {
        id: NotSet,
        created_at: Set(Utc::now()),
        report_id: Set(job.id),
        email: Set(email.clone()),
        consent: Set(true),
    }
    .insert(&state.db)
    .await?;

    report::ActiveModel {
        id: Set(job.id),
        lead_captured: Set(true),
        ..Default::default()
    }
    .update(&state.db)
    .await?;
    tracing::info!(report_id = %job.id, "lead captured, report unlocked");

    Ok(Json(LeadResponse { ok: true }))
}
