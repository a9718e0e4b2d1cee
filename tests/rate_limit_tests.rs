mod common;

use chrono::{Duration, Utc};
use crosignal::entities::rate_limit;
use crosignal::rate_limit::check_rate_limit;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};

#[tokio::test]
async fn allows_exactly_the_window_ceiling() {
    let db = common::test_db().await;

    for used in 1..=3 {
        let status = check_rate_limit(&db, "ip:abc", 3, 24).await.unwrap();
        assert!(status.allowed, "call {used} should be allowed");
        assert_eq!(status.remaining, 3 - used);
    }

    let status = check_rate_limit(&db, "ip:abc", 3, 24).await.unwrap();
    assert!(!status.allowed);
    assert_eq!(status.remaining, 0);
}

#[tokio::test]
async fn keys_are_independent() {
    let db = common::test_db().await;

    let first = check_rate_limit(&db, "ip:one", 1, 24).await.unwrap();
    assert!(first.allowed);
    let exhausted = check_rate_limit(&db, "ip:one", 1, 24).await.unwrap();
    assert!(!exhausted.allowed);

    let other = check_rate_limit(&db, "email:someone@example.com", 1, 24)
        .await
        .unwrap();
    assert!(other.allowed);
}

#[tokio::test]
async fn expired_window_resets_the_count() {
    let db = common::test_db().await;

    let full = check_rate_limit(&db, "ip:stale", 1, 24).await.unwrap();
    assert!(full.allowed);
    assert!(!check_rate_limit(&db, "ip:stale", 1, 24).await.unwrap().allowed);

    // Age the window past its deadline.
    let row = rate_limit::Entity::find()
        .filter(rate_limit::Column::Key.eq("ip:stale"))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    let mut stale: rate_limit::ActiveModel = row.into();
    stale.reset_at = Set(Utc::now() - Duration::hours(1));
    stale.update(&db).await.unwrap();

    let fresh = check_rate_limit(&db, "ip:stale", 1, 24).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 0);
    assert!(fresh.reset_at > Utc::now());
}
