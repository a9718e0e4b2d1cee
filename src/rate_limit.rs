use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use sha2::{Digest, Sha256};

use crate::entities::rate_limit;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub remaining: i32,
    pub reset_at: DateTime<Utc>,
}

/// Salted SHA-256 of a submitter identifier, hex-encoded. Raw IPs are
/// never persisted.
pub fn hash_key(value: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", value, salt).as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Fixed-window admission check for `key`.
///
/// The increment is a conditional single-row update (`count < max` and the
/// window still open), so concurrent callers cannot push the counter past
/// the ceiling. A fresh or expired key is reset to 1 via an upsert; that
/// call counts as the window's first use. Storage errors propagate.
#[tracing::instrument(skip(db))]
pub async fn check_rate_limit(
    db: &DatabaseConnection,
    key: &str,
    max_per_window: i32,
    window_hours: i64,
) -> Result<RateLimitStatus, DbErr> {
    let now = Utc::now();

    // Fast path: atomically take a slot in an open, non-full window.
    let incremented = rate_limit::Entity::update_many()
        .col_expr(
            rate_limit::Column::Count,
            Expr::col(rate_limit::Column::Count).add(1),
        )
        .filter(rate_limit::Column::Key.eq(key))
        .filter(rate_limit::Column::ResetAt.gt(now))
        .filter(rate_limit::Column::Count.lt(max_per_window))
        .exec(db)
        .await?;

    if incremented.rows_affected > 0 {
        let row = rate_limit::Entity::find_by_id(key.to_string())
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("rate limit row {key}")))?;
        return Ok(RateLimitStatus {
            allowed: true,
            remaining: (max_per_window - row.count).max(0),
            reset_at: row.reset_at,
        });
    }

    // Either no row yet, the window expired, or the ceiling is reached.
    let existing = rate_limit::Entity::find_by_id(key.to_string()).one(db).await?;
    match existing {
        Some(row) if row.reset_at > now => Ok(RateLimitStatus {
            allowed: false,
            remaining: 0,
            reset_at: row.reset_at,
        }),
        _ => {
            let reset_at = now + Duration::hours(window_hours);
            rate_limit::Entity::insert(rate_limit::ActiveModel {
                key: Set(key.to_string()),
                count: Set(1),
                reset_at: Set(reset_at),
            })
            .on_conflict(
                OnConflict::column(rate_limit::Column::Key)
                    .update_columns([rate_limit::Column::Count, rate_limit::Column::ResetAt])
                    .to_owned(),
            )
            .exec(db)
            .await?;
            Ok(RateLimitStatus {
                allowed: true,
                remaining: (max_per_window - 1).max(0),
                reset_at,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_salted() {
        let a = hash_key("203.0.113.9", "salt-a");
        let b = hash_key("203.0.113.9", "salt-a");
        let c = hash_key("203.0.113.9", "salt-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
