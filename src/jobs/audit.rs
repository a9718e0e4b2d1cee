//! Audit job lifecycle on top of the reports table: submission with
//! cache dedup, compare-and-swap claiming, processing, and recovery of
//! jobs orphaned by a crashed worker.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{report, AuditStatus, PageType, Report};
use crate::error::AppError;
use crate::rate_limit::{check_rate_limit, hash_key};
use crate::report::generate_report;
use crate::scraper::{scrape_page, ScrapeError};
use crate::AppState;

const TIMEOUT_MESSAGE: &str =
    "The page took too long to load. Please try again or use a different URL.";
const UNREACHABLE_MESSAGE: &str = "We couldn't reach that URL. Please check it and try again.";
const GENERATION_MESSAGE: &str =
    "Something went wrong while generating the report. Please try again.";

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref"];

/// Outcome of a submission: either a freshly queued job or a recent
/// matching one served from the dedup window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub report_id: Uuid,
    pub status: AuditStatus,
    pub cached: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepResult {
    pub report_id: Uuid,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub recovered: u64,
    pub processed: u64,
    pub results: Vec<SweepResult>,
}

/// Canonical form of a URL used for cache matching and stored in the
/// reports table: tracking params (utm_*, fbclid, gclid, ref) dropped,
/// fragment dropped, single trailing slash trimmed. The host is already
/// lowercased by the parser.
pub fn cache_key(raw: &str) -> String {
    let mut parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => return raw.trim_end_matches('/').to_string(),
    };

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !name.starts_with("utm_") && !TRACKING_PARAMS.contains(&name.as_str())
        })
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    parsed.set_fragment(None);
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (name, value) in &kept {
            pairs.append_pair(name, value);
        }
    }

    let serialized = parsed.to_string();
    match serialized.strip_suffix('/') {
        Some(trimmed) => trimmed.to_string(),
        None => serialized,
    }
}

/// Look up a recent non-failed job for the same canonical URL and page
/// type. Failed jobs never count as cache hits.
pub async fn find_cached_job(
    db: &DatabaseConnection,
    url: &str,
    page_type: PageType,
    window_hours: i64,
) -> Result<Option<report::Model>, DbErr> {
    let cutoff = Utc::now() - Duration::hours(window_hours);
    Report::find()
        .filter(report::Column::Url.eq(cache_key(url)))
        .filter(report::Column::PageType.eq(page_type))
        .filter(report::Column::Status.is_in([
            AuditStatus::Queued,
            AuditStatus::Running,
            AuditStatus::Done,
        ]))
        .filter(report::Column::CreatedAt.gte(cutoff))
        .order_by_desc(report::Column::CreatedAt)
        .one(db)
        .await
}

/// Validate, rate limit, dedup, and enqueue an audit. On success the job
/// row is durable before this returns; a background sweep is signalled
/// but progress is guaranteed by the scheduled sweep, not the signal.
pub async fn submit_audit(
    state: &AppState,
    url: &str,
    page_type_raw: &str,
    force_refresh: bool,
    client_ip: &str,
) -> Result<SubmitOutcome, AppError> {
    let normalized = crate::validators::validate_url(url)
        .await
        .map_err(AppError::Validation)?;
    let page_type = PageType::parse(page_type_raw)
        .ok_or_else(|| AppError::Validation("Invalid page type.".to_string()))?;

    let ip_hash = hash_key(client_ip, &state.config.ip_hash_salt);
    let rate = check_rate_limit(
        &state.db,
        &format!("ip:{ip_hash}"),
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

    let canonical = cache_key(&normalized);
    if !force_refresh {
        if let Some(existing) =
            find_cached_job(&state.db, &canonical, page_type, state.config.cache_window_hours)
                .await?
        {
            tracing::info!(report_id = %existing.id, url = %canonical, "serving cached audit");
            return Ok(SubmitOutcome {
                report_id: existing.id,
                status: existing.status,
                cached: true,
            });
        }
    }

    let id = Uuid::new_v4();
    report::ActiveModel {
        id: Set(id),
        created_at: Set(Utc::now()),
        url: Set(canonical.clone()),
        page_type: Set(page_type),
        status: Set(AuditStatus::Queued),
        error: Set(None),
        detected_platform: Set(None),
        scraped_json: Set(None),
        result_json: Set(None),
        lead_captured: Set(false),
        used_mock: Set(false),
        ip_hash: Set(Some(ip_hash)),
    }
    .insert(&state.db)
    .await?;
    tracing::info!(report_id = %id, url = %canonical, "queued audit job");

    let sweep_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = run_audit_sweep(&sweep_state).await {
            tracing::warn!(error = %err, "background audit sweep failed");
        }
    });

    Ok(SubmitOutcome {
        report_id: id,
        status: AuditStatus::Queued,
        cached: false,
    })
}

/// Re-queue running jobs whose creation time is older than the stuck
/// threshold. Returns the number of rows touched.
pub async fn recover_stuck_jobs(
    db: &DatabaseConnection,
    threshold_secs: i64,
) -> Result<u64, DbErr> {
    let cutoff = Utc::now() - Duration::seconds(threshold_secs);
    let recovered = Report::update_many()
        .col_expr(report::Column::Status, Expr::value(AuditStatus::Queued))
        .col_expr(report::Column::Error, Expr::value(Option::<String>::None))
        .filter(report::Column::Status.eq(AuditStatus::Running))
        .filter(report::Column::CreatedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(recovered.rows_affected)
}

/// Claim the oldest queued job by flipping queued → running with a
/// guarded update. A lost race (zero rows affected) yields `None` rather
/// than an error, so concurrent sweepers never double-claim.
pub async fn claim_next(db: &DatabaseConnection) -> Result<Option<report::Model>, DbErr> {
    let candidate = Report::find()
        .filter(report::Column::Status.eq(AuditStatus::Queued))
        .order_by_asc(report::Column::CreatedAt)
        .one(db)
        .await?;
    let Some(candidate) = candidate else {
        return Ok(None);
    };

    let claimed = Report::update_many()
        .col_expr(report::Column::Status, Expr::value(AuditStatus::Running))
        .filter(report::Column::Id.eq(candidate.id))
        .filter(report::Column::Status.eq(AuditStatus::Queued))
        .exec(db)
        .await?;
    if claimed.rows_affected == 0 {
        return Ok(None);
    }
    Ok(Some(candidate))
}

/// Terminal writes are guarded by `status = running`: if recovery re-queued
/// the job in the meantime, the original worker's result is discarded and
/// the fresh claim owns the row. Returns whether the write landed.
async fn finish_failed(db: &DatabaseConnection, id: Uuid, message: &str) -> Result<bool, DbErr> {
    let updated = Report::update_many()
        .col_expr(report::Column::Status, Expr::value(AuditStatus::Failed))
        .col_expr(
            report::Column::Error,
            Expr::value(Some(message.to_string())),
        )
        .filter(report::Column::Id.eq(id))
        .filter(report::Column::Status.eq(AuditStatus::Running))
        .exec(db)
        .await?;
    Ok(updated.rows_affected > 0)
}

async fn finish_done(
    db: &DatabaseConnection,
    id: Uuid,
    result: serde_json::Value,
    used_mock: bool,
) -> Result<bool, DbErr> {
    let updated = Report::update_many()
        .col_expr(report::Column::Status, Expr::value(AuditStatus::Done))
        .col_expr(report::Column::ResultJson, Expr::value(result))
        .col_expr(report::Column::UsedMock, Expr::value(used_mock))
        .col_expr(report::Column::Error, Expr::value(Option::<String>::None))
        .filter(report::Column::Id.eq(id))
        .filter(report::Column::Status.eq(AuditStatus::Running))
        .exec(db)
        .await?;
    Ok(updated.rows_affected > 0)
}

/// Run a claimed job to a terminal state. Scraped signals are persisted
/// before report generation so they survive a generation failure. Only
/// database errors propagate; scrape and generation failures land in the
/// job row as user-facing messages.
pub async fn process_claimed(
    state: &AppState,
    job: report::Model,
) -> Result<SweepResult, DbErr> {
    let report_id = job.id;
    tracing::info!(%report_id, url = %job.url, "processing audit job");

    let scraped = match scrape_page(&job.url, &state.config, &state.http).await {
        Ok(page) => page,
        Err(err) => {
            let message = match &err {
                ScrapeError::Timeout(_) => TIMEOUT_MESSAGE,
                ScrapeError::Fetch(_) => UNREACHABLE_MESSAGE,
            };
            tracing::warn!(%report_id, error = %err, "scrape failed");
            if !finish_failed(&state.db, report_id, message).await? {
                tracing::warn!(%report_id, "job was re-queued during processing; failure discarded");
            }
            return Ok(SweepResult {
                report_id,
                error: Some(message.to_string()),
            });
        }
    };

    let scraped_value =
        serde_json::to_value(&scraped).map_err(|e| DbErr::Custom(e.to_string()))?;
    report::ActiveModel {
        id: Set(report_id),
        scraped_json: Set(Some(scraped_value)),
        detected_platform: Set(Some(scraped.detected_platform)),
        ..Default::default()
    }
    .update(&state.db)
    .await?;

    match generate_report(&scraped, job.page_type, true, &state.config, &state.http).await {
        Ok(generated) => {
            let result_value = serde_json::to_value(&generated.report)
                .map_err(|e| DbErr::Custom(e.to_string()))?;
            if finish_done(&state.db, report_id, result_value, generated.used_mock).await? {
                tracing::info!(%report_id, used_mock = generated.used_mock, "audit job done");
            } else {
                tracing::warn!(%report_id, "job was re-queued during processing; result discarded");
            }
            Ok(SweepResult {
                report_id,
                error: None,
            })
        }
        Err(err) => {
            tracing::error!(%report_id, error = %err, "report generation failed");
            if !finish_failed(&state.db, report_id, GENERATION_MESSAGE).await? {
                tracing::warn!(%report_id, "job was re-queued during processing; failure discarded");
            }
            Ok(SweepResult {
                report_id,
                error: Some(GENERATION_MESSAGE.to_string()),
            })
        }
    }
}

/// One coordinator pass: recovery first, then up to the configured batch
/// of claims processed to completion.
pub async fn run_audit_sweep(state: &AppState) -> Result<SweepSummary, DbErr> {
    let recovered = recover_stuck_jobs(&state.db, state.config.stuck_threshold_secs).await?;
    if recovered > 0 {
        tracing::info!(recovered, "re-queued stuck audit jobs");
    }

    let mut results = Vec::new();
    for _ in 0..state.config.sweep_batch_size {
        match claim_next(&state.db).await? {
            Some(job) => results.push(process_claimed(state, job).await?),
            None => break,
        }
    }

    Ok(SweepSummary {
        recovered,
        processed: results.len() as u64,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::cache_key;

    #[test]
    fn cache_key_strips_tracking_params_and_fragment() {
        assert_eq!(
            cache_key("https://Shop.Example.com/product/?utm_source=x&utm_medium=y&id=7#reviews"),
            "https://shop.example.com/product/?id=7"
        );
        assert_eq!(
            cache_key("https://example.com/?fbclid=abc&gclid=def&ref=tw"),
            "https://example.com"
        );
    }

    #[test]
    fn cache_key_trims_trailing_slash() {
        assert_eq!(cache_key("https://example.com/"), "https://example.com");
        assert_eq!(
            cache_key("https://example.com/products/"),
            "https://example.com/products"
        );
    }

    #[test]
    fn cache_key_is_idempotent() {
        let once = cache_key("https://example.com/p/?utm_campaign=a&size=m");
        assert_eq!(cache_key(&once), once);
    }
}
