use conmon_core::AppError;
use conmon_core::mapper::Statement;
use conmon_core::models::Source;
use conmon_db::Dao;

use crate::integration::common::{make_record, make_source, setup_test_db};

#[tokio::test]
async fn source_round_trip_keeps_null_watermark() {
    let (db, _container) = setup_test_db().await;
    let repo = db.sources();

    let source = make_source("jobs");
    repo.insert(&source).await.unwrap();

    let loaded = repo.get("jobs").await.unwrap().expect("source exists");
    assert_eq!(loaded, source);
    assert!(loaded.watermark_url.is_none());
    assert!(repo.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn enable_disable_and_watermark_updates() {
    let (db, _container) = setup_test_db().await;
    let repo = db.sources();
    repo.insert(&make_source("news")).await.unwrap();
    repo.insert(&make_source("jobs")).await.unwrap();

    assert!(repo.set_enabled("news", false).await.unwrap());
    assert!(!repo.set_enabled("missing", false).await.unwrap());

    let enabled: Vec<String> = repo
        .list_enabled()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(enabled, vec!["jobs"]);

    let all: Vec<String> = repo.list().await.unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(all, vec!["jobs", "news"]);

    assert!(repo.set_watermark("jobs", Some("http://example.org/c")).await.unwrap());
    let jobs = repo.get("jobs").await.unwrap().unwrap();
    assert_eq!(jobs.watermark_url.as_deref(), Some("http://example.org/c"));

    assert!(repo.set_watermark("jobs", None).await.unwrap());
    let jobs = repo.get("jobs").await.unwrap().unwrap();
    assert!(jobs.watermark_url.is_none());
}

#[tokio::test]
async fn removing_a_source_removes_its_records() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();
    db.records()
        .insert(&make_record("jobs", "http://example.org/a", "A"))
        .await
        .unwrap();

    assert!(db.sources().remove("jobs").await.unwrap());
    assert!(!db.sources().remove("jobs").await.unwrap());
    assert_eq!(db.records().count("jobs").await.unwrap(), 0);
}

#[tokio::test]
async fn records_are_unique_per_source_url() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();
    db.sources().insert(&make_source("news")).await.unwrap();
    let records = db.records();

    records
        .insert(&make_record("jobs", "http://example.org/a", "A"))
        .await
        .unwrap();
    let err = records
        .insert(&make_record("jobs", "http://example.org/a", "A again"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));

    // Same url under another source is fine.
    records
        .insert(&make_record("news", "http://example.org/a", "A"))
        .await
        .unwrap();
}

#[tokio::test]
async fn recent_records_newest_first() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();
    let records = db.records();

    for (i, slug) in ["a", "b", "c"].iter().enumerate() {
        let mut record = make_record("jobs", &format!("http://example.org/{slug}"), slug);
        record.created_at += chrono::Duration::seconds(i as i64);
        records.insert(&record).await.unwrap();
    }

    let recent = records.recent("jobs", 2).await.unwrap();
    let urls: Vec<&str> = recent.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["http://example.org/c", "http://example.org/b"]);
    assert_eq!(recent[0].title, "c");
    assert_eq!(recent[0].pub_time, make_record("jobs", "x", "x").pub_time);
    assert_eq!(records.count("jobs").await.unwrap(), 3);
}

#[tokio::test]
async fn undeclared_columns_are_ignored_on_read() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();

    let statement = Statement {
        sql: "SELECT *, 'extra' AS unexpected FROM sources".to_string(),
        params: Vec::new(),
    };
    let sources: Vec<Source> = Dao::fetch_all(db.pool(), &statement).await.unwrap();

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].id, "jobs");
}

#[tokio::test]
async fn null_columns_leave_defaults() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();
    sqlx::query(
        "INSERT INTO records (id, source_id, url) VALUES (gen_random_uuid(), 'jobs', 'http://example.org/bare')",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let recent = db.records().recent("jobs", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].url, "http://example.org/bare");
    assert!(recent[0].pub_time.is_none());
    assert_eq!(recent[0].title, "");
}
