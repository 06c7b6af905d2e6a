//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::digest::Digest;
use crate::error::AppError;
use crate::models::{ExtractionConfig, ParserSpec, PropertyDef, PropertySource, Record, Source};
use crate::orchestrator::{BatchEvent, BatchReporter};
use crate::traits::{EngineLauncher, Notifier, PageDriver, RecordStore};

// ---------------------------------------------------------------------------
// MockPageDriver
// ---------------------------------------------------------------------------

/// Mock driver serving pages from a url → HTML map.
///
/// Unknown urls fail with an HTTP 404 error. Every load is recorded.
#[derive(Debug, Clone, Default)]
pub struct MockPageDriver {
    pages: Arc<Mutex<HashMap<String, String>>>,
    loads: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockPageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: impl Into<String>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.into());
        self
    }

    /// Delay every load by `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Urls loaded so far, in order.
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

impl PageDriver for MockPageDriver {
    async fn load(&self, url: &str) -> Result<String, AppError> {
        self.loads.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockLauncher
// ---------------------------------------------------------------------------

/// Mock launcher answering per source, keyed by the start page of
/// [`make_source`]'s config.
#[derive(Clone, Default)]
pub struct MockLauncher {
    outputs: Arc<Mutex<HashMap<String, Result<Vec<String>, String>>>>,
    launched: Arc<Mutex<Vec<ExtractionConfig>>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(self, source_id: &str, lines: Vec<String>) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .insert(start_page_for(source_id), Ok(lines));
        self
    }

    pub fn with_error(self, source_id: &str, error: AppError) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .insert(start_page_for(source_id), Err(error.to_string()));
        self
    }

    /// Configs passed to `launch`, in order.
    pub fn launched(&self) -> Vec<ExtractionConfig> {
        self.launched.lock().unwrap().clone()
    }
}

impl EngineLauncher for MockLauncher {
    async fn launch(&self, config: &ExtractionConfig) -> Result<Vec<String>, AppError> {
        self.launched.lock().unwrap().push(config.clone());
        match self.outputs.lock().unwrap().get(&config.start_page) {
            Some(Ok(lines)) => Ok(lines.clone()),
            Some(Err(error)) => Err(AppError::EngineError(error.clone())),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// A recorded `commit_batch` call: source id, inserted records, watermark.
pub type Commit = (String, Vec<Record>, String);

/// Mock store holding sources in memory and recording commits. Like the
/// `records` table, it stores each url at most once per source.
#[derive(Clone, Default)]
pub struct MockStore {
    sources: Arc<Mutex<Vec<Source>>>,
    stored: Arc<Mutex<HashSet<(String, String)>>>,
    commits: Arc<Mutex<Vec<Commit>>>,
    commit_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn with_sources(sources: Vec<Source>) -> Self {
        Self {
            sources: Arc::new(Mutex::new(sources)),
            ..Self::default()
        }
    }

    /// Mark `url` as already stored for `source_id`.
    pub fn with_stored(self, source_id: &str, url: &str) -> Self {
        self.stored
            .lock()
            .unwrap()
            .insert((source_id.to_string(), url.to_string()));
        self
    }

    /// The next `commit_batch` fails with `error`.
    pub fn with_commit_error(self, error: AppError) -> Self {
        *self.commit_error.lock().unwrap() = Some(error);
        self
    }

    pub fn commits(&self) -> Vec<Commit> {
        self.commits.lock().unwrap().clone()
    }

    pub fn watermark(&self, source_id: &str) -> Option<String> {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == source_id)
            .and_then(|s| s.watermark_url.clone())
    }
}

impl RecordStore for MockStore {
    async fn enabled_sources(&self) -> Result<Vec<Source>, AppError> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn commit_batch(
        &self,
        source_id: &str,
        records: &[Record],
        watermark: &str,
    ) -> Result<Vec<Record>, AppError> {
        if let Some(e) = self.commit_error.lock().unwrap().take() {
            return Err(e);
        }
        let inserted: Vec<Record> = {
            let mut stored = self.stored.lock().unwrap();
            records
                .iter()
                .filter(|r| stored.insert((source_id.to_string(), r.url.clone())))
                .cloned()
                .collect()
        };
        self.commits.lock().unwrap().push((
            source_id.to_string(),
            inserted.clone(),
            watermark.to_string(),
        ));
        if let Some(source) = self
            .sources
            .lock()
            .unwrap()
            .iter_mut()
            .find(|s| s.id == source_id)
        {
            source.watermark_url = Some(watermark.to_string());
        }
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Mock notifier recording every digest it is asked to send.
#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<Digest>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Digest> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn send(&self, digest: &Digest) -> Result<(), AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        self.sent.lock().unwrap().push(digest.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records events as short strings.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BatchReporter for MockReporter {
    fn report(&self, event: BatchEvent<'_>) {
        let entry = match event {
            BatchEvent::Started { sources } => format!("started:{sources}"),
            BatchEvent::SourceStarted { source_id, .. } => format!("source:{source_id}"),
            BatchEvent::SourceCompleted {
                source_id, records, ..
            } => format!("completed:{source_id}:{records}"),
            BatchEvent::SourceFailed { source_id, error } => format!("failed:{source_id}:{error}"),
            BatchEvent::Cancelled { skipped } => format!("cancelled:{skipped}"),
            BatchEvent::DigestSent { records } => format!("digest:{records}"),
            BatchEvent::Finished { .. } => "finished".to_string(),
        };
        self.events.lock().unwrap().push(entry);
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const LIST_PAGE: &str = "http://example.org/list";

fn property(source: PropertySource, selector: Option<&str>, parser: &str) -> PropertyDef {
    PropertyDef {
        source,
        selector: selector.map(str::to_string),
        parser: Some(ParserSpec::Shorthand(parser.to_string())),
    }
}

/// Config for pages built by [`listing_html`] and [`detail_html`].
///
/// Item properties: `url`, `title`, `pubTime`. Detail properties:
/// `content`, `contentText`.
pub fn sample_config(watermark: Option<&str>) -> ExtractionConfig {
    let properties = BTreeMap::from([
        (
            "url".to_string(),
            property(PropertySource::Item, Some("a"), "[0].href"),
        ),
        (
            "title".to_string(),
            property(PropertySource::Item, Some("a"), ".text()"),
        ),
        (
            "pubTime".to_string(),
            property(PropertySource::Item, None, "child_text:3"),
        ),
        (
            "content".to_string(),
            property(PropertySource::Detail, Some("#body"), ".html()"),
        ),
        (
            "contentText".to_string(),
            property(PropertySource::Detail, Some("#body"), ".text()"),
        ),
    ]);

    ExtractionConfig {
        start_page: LIST_PAGE.to_string(),
        item_selector: "ul.list > li".to_string(),
        title_pattern: None,
        content_pattern: None,
        properties,
        watermark: watermark.map(str::to_string),
    }
}

/// A listing page, newest item first. Items are `(slug, title)`; the item at
/// position `i` of `n` is dated `2024-01-{n - i}`.
pub fn listing_html(items: &[(&str, &str)]) -> String {
    let rows: String = items
        .iter()
        .enumerate()
        .map(|(i, (slug, title))| {
            format!(
                "<li><a href='/{slug}'>{title}</a> <span>posted</span>2024-01-{:02}</li>",
                items.len() - i
            )
        })
        .collect();
    format!("<html><body><ul class='list'>{rows}</ul></body></html>")
}

pub fn detail_html(text: &str) -> String {
    format!("<html><body><h1>Detail</h1><div id='body'><p>{text}</p></div></body></html>")
}

/// A driver serving [`listing_html`] at the list page and a
/// [`detail_html`] page ("Details of <title>") for every item.
pub fn sample_site(items: &[(&str, &str)]) -> MockPageDriver {
    let mut driver = MockPageDriver::new().with_page(LIST_PAGE, listing_html(items));
    for (slug, title) in items {
        driver = driver.with_page(
            &format!("http://example.org/{slug}"),
            detail_html(&format!("Details of {title}")),
        );
    }
    driver
}

fn start_page_for(source_id: &str) -> String {
    format!("http://example.org/{source_id}/list")
}

/// An enabled source whose config lists `http://example.org/<id>/list`.
pub fn make_source(id: &str, watermark: Option<&str>) -> Source {
    let mut config = sample_config(None);
    config.start_page = start_page_for(id);
    Source {
        id: id.to_string(),
        config: serde_json::to_string(&config).unwrap_or_default(),
        watermark_url: watermark.map(str::to_string),
        enabled: true,
    }
}
