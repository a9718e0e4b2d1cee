#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use crosignal::config::AppConfig;
use crosignal::entities::{report, AuditStatus, PageType};
use crosignal::AppState;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

/// Fresh in-memory SQLite database with the full schema applied. Capped
/// at a single connection so every query sees the same :memory: store.
pub async fn test_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub fn test_config() -> AppConfig {
    AppConfig {
        browser_enabled: false,
        ..AppConfig::default()
    }
}

pub async fn test_state() -> AppState {
    AppState::new(test_db().await, test_config())
}

/// Insert a report row directly, bypassing submission checks.
pub async fn insert_job(
    db: &DatabaseConnection,
    url: &str,
    page_type: PageType,
    status: AuditStatus,
    created_at: DateTime<Utc>,
) -> report::Model {
    report::ActiveModel {
        id: Set(Uuid::new_v4()),
        created_at: Set(created_at),
        url: Set(url.to_string()),
        page_type: Set(page_type),
        status: Set(status),
        error: Set(None),
        detected_platform: Set(None),
        scraped_json: Set(None),
        result_json: Set(None),
        lead_captured: Set(false),
        used_mock: Set(false),
        ip_hash: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}
