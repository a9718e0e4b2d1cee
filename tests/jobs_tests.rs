mod common;

use crosignal::entities::{AuditStatus, PageType, Platform, Report};
use crosignal::jobs::audit::{claim_next, find_cached_job, process_claimed, recover_stuck_jobs};
use crosignal::AppState;
use sea_orm::EntityTrait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SHOP_PAGE: &str = r#"<html>
<head>
  <title>Steel Bottle</title>
  <meta name="description" content="A vacuum insulated bottle.">
  <script src="https://cdn.shopify.com/assets/theme.js"></script>
</head>
<body>
  <main>
    <h1>Steel Bottle</h1>
    <p>Keeps drinks cold for 24 hours. $24.99. Free shipping and easy returns.</p>
    <p>Rated 4.8 from 320 reviews.</p>
    <button>Add to cart</button>
  </main>
</body>
</html>"#;

/// Serve a fixed HTML body over a local listener and return its base URL.
async fn serve_page(html: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                html.len(),
                html
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    format!("http://{addr}/")
}

/// A local address nothing is listening on.
async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}

#[tokio::test]
async fn claim_on_empty_queue_is_none() {
    let db = common::test_db().await;
    assert!(claim_next(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn exactly_one_claimer_wins() {
    let db = common::test_db().await;
    let job = common::insert_job(
        &db,
        "https://example.com/p",
        PageType::Product,
        AuditStatus::Queued,
        common::minutes_ago(0),
    )
    .await;

    let (a, b, c, d) = tokio::join!(
        claim_next(&db),
        claim_next(&db),
        claim_next(&db),
        claim_next(&db)
    );
    let claims: Vec<_> = [a, b, c, d]
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].id, job.id);

    let row = Report::find_by_id(job.id).one(&db).await.unwrap().unwrap();
    assert_eq!(row.status, AuditStatus::Running);
    assert!(claim_next(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn oldest_queued_job_is_claimed_first() {
    let db = common::test_db().await;
    let older = common::insert_job(
        &db,
        "https://example.com/a",
        PageType::Home,
        AuditStatus::Queued,
        common::minutes_ago(10),
    )
    .await;
    common::insert_job(
        &db,
        "https://example.com/b",
        PageType::Home,
        AuditStatus::Queued,
        common::minutes_ago(1),
    )
    .await;

    let claimed = claim_next(&db).await.unwrap().unwrap();
    assert_eq!(claimed.id, older.id);
}

#[tokio::test]
async fn recovery_requeues_only_stale_running_jobs() {
    let db = common::test_db().await;
    let stale = common::insert_job(
        &db,
        "https://example.com/stale",
        PageType::Product,
        AuditStatus::Running,
        common::minutes_ago(10),
    )
    .await;
    let fresh = common::insert_job(
        &db,
        "https://example.com/fresh",
        PageType::Product,
        AuditStatus::Running,
        common::minutes_ago(1),
    )
    .await;
    let done = common::insert_job(
        &db,
        "https://example.com/done",
        PageType::Product,
        AuditStatus::Done,
        common::minutes_ago(60),
    )
    .await;

    let recovered = recover_stuck_jobs(&db, 300).await.unwrap();
    assert_eq!(recovered, 1);

    let stale_row = Report::find_by_id(stale.id).one(&db).await.unwrap().unwrap();
    assert_eq!(stale_row.status, AuditStatus::Queued);
    let fresh_row = Report::find_by_id(fresh.id).one(&db).await.unwrap().unwrap();
    assert_eq!(fresh_row.status, AuditStatus::Running);
    let done_row = Report::find_by_id(done.id).one(&db).await.unwrap().unwrap();
    assert_eq!(done_row.status, AuditStatus::Done);

    // The recovered job is claimable again.
    let reclaimed = claim_next(&db).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, stale.id);
}

#[tokio::test]
async fn processed_job_persists_signals_then_completes() {
    let state = common::test_state().await;
    let base = serve_page(SHOP_PAGE).await;
    let job = common::insert_job(
        &state.db,
        &base,
        PageType::Product,
        AuditStatus::Queued,
        common::minutes_ago(0),
    )
    .await;

    let claimed = claim_next(&state.db).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    let result = process_claimed(&state, claimed).await.unwrap();
    assert!(result.error.is_none());

    let row = Report::find_by_id(job.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AuditStatus::Done);
    assert!(row.error.is_none());
    assert_eq!(row.detected_platform, Some(Platform::Shopify));

    let scraped = row.scraped_json.unwrap();
    assert_eq!(scraped["title"], "Steel Bottle");
    assert_eq!(scraped["h1"][0], "Steel Bottle");
    assert_eq!(scraped["reviewsCountHint"], 320);

    // No API key configured, so the deterministic report is used.
    assert!(row.used_mock);
    let report = row.result_json.unwrap();
    assert_eq!(report["overall_score"], 78.0);
    assert_eq!(report["top_fixes"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn unreachable_url_fails_with_user_facing_message() {
    let state = common::test_state().await;
    let url = dead_url().await;
    let job = common::insert_job(
        &state.db,
        &url,
        PageType::Product,
        AuditStatus::Queued,
        common::minutes_ago(0),
    )
    .await;

    let claimed = claim_next(&state.db).await.unwrap().unwrap();
    let result = process_claimed(&state, claimed).await.unwrap();
    assert_eq!(
        result.error.as_deref(),
        Some("We couldn't reach that URL. Please check it and try again.")
    );

    let row = Report::find_by_id(job.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AuditStatus::Failed);
    assert_eq!(
        row.error.as_deref(),
        Some("We couldn't reach that URL. Please check it and try again.")
    );
    assert!(row.scraped_json.is_none());
    assert!(row.result_json.is_none());
}

#[tokio::test]
async fn snapshot_survives_a_generation_failure() {
    let db = common::test_db().await;
    let mut config = common::test_config();
    // A configured key forces a live call, aimed at a dead endpoint.
    config.openai_api_key = Some("sk-test".to_string());
    config.openai_api_base = dead_url().await;
    let state = AppState::new(db, config);

    let base = serve_page(SHOP_PAGE).await;
    let job = common::insert_job(
        &state.db,
        &base,
        PageType::Product,
        AuditStatus::Queued,
        common::minutes_ago(0),
    )
    .await;

    let claimed = claim_next(&state.db).await.unwrap().unwrap();
    let result = process_claimed(&state, claimed).await.unwrap();
    assert_eq!(
        result.error.as_deref(),
        Some("Something went wrong while generating the report. Please try again.")
    );

    let row = Report::find_by_id(job.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AuditStatus::Failed);
    // The scrape snapshot was written before generation ran.
    assert!(row.scraped_json.is_some());
    assert_eq!(row.detected_platform, Some(Platform::Shopify));
    assert!(row.result_json.is_none());
}

#[tokio::test]
async fn recovered_job_discards_its_original_workers_late_result() {
    let state = common::test_state().await;
    let base = serve_page(SHOP_PAGE).await;
    let stale = common::insert_job(
        &state.db,
        &base,
        PageType::Product,
        AuditStatus::Running,
        common::minutes_ago(10),
    )
    .await;

    // Recovery wins the race and re-queues the job.
    assert_eq!(recover_stuck_jobs(&state.db, 300).await.unwrap(), 1);

    // The original worker, unaware it lost the row, runs to completion.
    process_claimed(&state, stale.clone()).await.unwrap();

    let row = Report::find_by_id(stale.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AuditStatus::Queued);
    assert!(row.result_json.is_none());

    // Exactly one fresh claim finishes it.
    let reclaimed = claim_next(&state.db).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, stale.id);
    process_claimed(&state, reclaimed).await.unwrap();
    let row = Report::find_by_id(stale.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AuditStatus::Done);
    assert!(row.result_json.is_some());
}

#[tokio::test]
async fn independently_completed_job_is_not_requeued() {
    let state = common::test_state().await;
    let base = serve_page(SHOP_PAGE).await;
    let stale = common::insert_job(
        &state.db,
        &base,
        PageType::Product,
        AuditStatus::Running,
        common::minutes_ago(10),
    )
    .await;

    // The original worker finishes just before the sweep runs.
    process_claimed(&state, stale.clone()).await.unwrap();
    assert_eq!(recover_stuck_jobs(&state.db, 300).await.unwrap(), 0);

    let row = Report::find_by_id(stale.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AuditStatus::Done);
    assert!(row.result_json.is_some());
}

#[tokio::test]
async fn cache_lookup_matches_recent_same_url_and_page_type() {
    let db = common::test_db().await;
    let done = common::insert_job(
        &db,
        "https://example.com/p",
        PageType::Product,
        AuditStatus::Done,
        common::minutes_ago(30),
    )
    .await;

    let hit = find_cached_job(&db, "https://example.com/p", PageType::Product, 24)
        .await
        .unwrap();
    assert_eq!(hit.map(|j| j.id), Some(done.id));

    // Tracking params on the lookup URL do not break the match.
    let hit = find_cached_job(
        &db,
        "https://example.com/p?utm_source=mail&fbclid=x",
        PageType::Product,
        24,
    )
    .await
    .unwrap();
    assert_eq!(hit.map(|j| j.id), Some(done.id));

    let miss = find_cached_job(&db, "https://example.com/p", PageType::Home, 24)
        .await
        .unwrap();
    assert!(miss.is_none());
}

#[tokio::test]
async fn failed_and_expired_jobs_are_never_cache_hits() {
    let db = common::test_db().await;
    common::insert_job(
        &db,
        "https://example.com/failed",
        PageType::Product,
        AuditStatus::Failed,
        common::minutes_ago(5),
    )
    .await;
    common::insert_job(
        &db,
        "https://example.com/old",
        PageType::Product,
        AuditStatus::Done,
        common::minutes_ago(25 * 60),
    )
    .await;

    assert!(
        find_cached_job(&db, "https://example.com/failed", PageType::Product, 24)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        find_cached_job(&db, "https://example.com/old", PageType::Product, 24)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn newest_matching_job_wins() {
    let db = common::test_db().await;
    common::insert_job(
        &db,
        "https://example.com/p",
        PageType::Product,
        AuditStatus::Done,
        common::minutes_ago(120),
    )
    .await;
    let newer = common::insert_job(
        &db,
        "https://example.com/p",
        PageType::Product,
        AuditStatus::Queued,
        common::minutes_ago(2),
    )
    .await;

    let hit = find_cached_job(&db, "https://example.com/p", PageType::Product, 24)
        .await
        .unwrap();
    assert_eq!(hit.map(|j| j.id), Some(newer.id));
}
