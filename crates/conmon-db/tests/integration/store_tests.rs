use std::collections::HashMap;

use conmon_core::AppError;
use conmon_core::models::ExtractionConfig;
use conmon_core::orchestrator::{CrawlOrchestrator, TracingBatchReporter};
use conmon_core::traits::{EngineLauncher, RecordStore, TracingNotifier};
use tokio_util::sync::CancellationToken;

use crate::integration::common::{make_record, make_source, setup_test_db};

/// Answers with fixed lines per start page.
#[derive(Clone, Default)]
struct StaticLauncher {
    lines: HashMap<String, Vec<String>>,
}

impl StaticLauncher {
    fn with_lines(mut self, source_id: &str, urls: &[&str]) -> Self {
        let lines = urls
            .iter()
            .map(|url| serde_json::json!({ "url": url, "title": url, "pubTime": "[2024-03-01]" }).to_string())
            .collect();
        self.lines
            .insert(format!("http://example.org/{source_id}/list"), lines);
        self
    }
}

impl EngineLauncher for StaticLauncher {
    async fn launch(&self, config: &ExtractionConfig) -> Result<Vec<String>, AppError> {
        self.lines
            .get(&config.start_page)
            .cloned()
            .ok_or_else(|| AppError::EngineError("engine exited with status 1".into()))
    }
}

#[tokio::test]
async fn commit_batch_inserts_and_advances_watermark() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();

    let records = vec![
        make_record("jobs", "http://example.org/a", "A"),
        make_record("jobs", "http://example.org/b", "B"),
    ];
    let inserted = db
        .commit_batch("jobs", &records, "http://example.org/b")
        .await
        .unwrap();

    assert_eq!(inserted.len(), 2);
    assert_eq!(db.records().count("jobs").await.unwrap(), 2);
    let source = db.sources().get("jobs").await.unwrap().unwrap();
    assert_eq!(source.watermark_url.as_deref(), Some("http://example.org/b"));
}

#[tokio::test]
async fn commit_batch_skips_already_stored_urls() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();
    db.records()
        .insert(&make_record("jobs", "http://example.org/b", "B"))
        .await
        .unwrap();

    let records = vec![
        make_record("jobs", "http://example.org/b", "B again"),
        make_record("jobs", "http://example.org/c", "C"),
    ];
    let inserted = db
        .commit_batch("jobs", &records, "http://example.org/c")
        .await
        .unwrap();

    let urls: Vec<&str> = inserted.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["http://example.org/c"]);
    assert_eq!(db.records().count("jobs").await.unwrap(), 2);
    let titles: Vec<String> = db
        .records()
        .recent("jobs", 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.title)
        .collect();
    assert!(titles.contains(&"B".to_string()));
    assert!(!titles.contains(&"B again".to_string()));
    let source = db.sources().get("jobs").await.unwrap().unwrap();
    assert_eq!(source.watermark_url.as_deref(), Some("http://example.org/c"));
}

#[tokio::test]
async fn failed_commit_rolls_back_records() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();

    // The records insert fine; the watermark update finds no source.
    let records = vec![make_record("jobs", "http://example.org/a", "A")];
    let err = db
        .commit_batch("missing", &records, "http://example.org/a")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::DatabaseError(_)));
    assert_eq!(db.records().count("jobs").await.unwrap(), 0);
}

#[tokio::test]
async fn enabled_sources_skip_disabled() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("jobs")).await.unwrap();
    db.sources().insert(&make_source("news")).await.unwrap();
    db.sources().set_enabled("jobs", false).await.unwrap();

    let enabled = db.enabled_sources().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, "news");
}

#[tokio::test]
async fn batch_persists_and_isolates_failing_sources() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("broken")).await.unwrap();
    db.sources().insert(&make_source("jobs")).await.unwrap();

    let launcher = StaticLauncher::default().with_lines(
        "jobs",
        &[
            "http://example.org/a",
            "http://example.org/b",
            "http://example.org/c",
        ],
    );
    let orchestrator = CrawlOrchestrator::new(launcher, db.clone(), TracingNotifier);

    let report = orchestrator
        .run_batch(&CancellationToken::new(), &TracingBatchReporter)
        .await
        .unwrap();

    assert_eq!(report.failed_sources, vec!["broken".to_string()]);
    assert_eq!(report.records_persisted, 3);
    assert!(report.digest_sent);

    let jobs = db.sources().get("jobs").await.unwrap().unwrap();
    assert_eq!(jobs.watermark_url.as_deref(), Some("http://example.org/c"));
    let broken = db.sources().get("broken").await.unwrap().unwrap();
    assert!(broken.watermark_url.is_none());

    let recent = db.records().recent("jobs", 10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|r| r.pub_time.is_some()));
}

#[tokio::test]
async fn batch_survives_repeated_and_already_stored_urls() {
    let (db, _container) = setup_test_db().await;
    db.sources().insert(&make_source("alpha")).await.unwrap();
    db.sources().insert(&make_source("beta")).await.unwrap();
    db.records()
        .insert(&make_record("beta", "http://example.org/old", "Old"))
        .await
        .unwrap();

    let launcher = StaticLauncher::default()
        .with_lines(
            "alpha",
            &[
                "http://example.org/pinned",
                "http://example.org/a",
                "http://example.org/pinned",
            ],
        )
        .with_lines("beta", &["http://example.org/old", "http://example.org/new"]);
    let orchestrator = CrawlOrchestrator::new(launcher, db.clone(), TracingNotifier);

    let report = orchestrator
        .run_batch(&CancellationToken::new(), &TracingBatchReporter)
        .await
        .unwrap();

    assert!(report.failed_sources.is_empty());
    assert_eq!(report.records_persisted, 3);
    assert_eq!(db.records().count("alpha").await.unwrap(), 2);
    assert_eq!(db.records().count("beta").await.unwrap(), 2);

    let alpha = db.sources().get("alpha").await.unwrap().unwrap();
    assert_eq!(alpha.watermark_url.as_deref(), Some("http://example.org/pinned"));
    let beta = db.sources().get("beta").await.unwrap().unwrap();
    assert_eq!(beta.watermark_url.as_deref(), Some("http://example.org/new"));
}
