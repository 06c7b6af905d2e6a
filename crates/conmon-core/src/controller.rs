//! Incremental crawl controller: one engine run over one source.
//!
//! Builds the navigation program (start page, list scan, then a labelled
//! loop over candidates) and streams accepted records to a [`RecordSink`]
//! oldest-first, so the last line written is always the next watermark.

use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::AppError;
use crate::extract::{PageExtractor, ParserRegistry};
use crate::models::{ExtractionConfig, PropertyMap};
use crate::steps::StepMachine;
use crate::traits::{EngineLauncher, PageDriver};

const LIST_START: &str = "LIST_START";

/// Timing and diagnostics for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Delay between ticks of the step machine.
    pub poll_interval: Duration,
    /// Upper bound for a single page load.
    pub wait_timeout: Duration,
    /// Dump the step program and page sizes at debug level.
    pub debug: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            wait_timeout: Duration::from_secs(90),
            debug: false,
        }
    }
}

impl EngineSettings {
    /// Read settings from environment variables.
    ///
    /// - `CONMON_POLL_INTERVAL_MS` (optional, defaults to 50)
    /// - `CONMON_WAIT_TIMEOUT_SECS` (optional, defaults to 90)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let poll_interval = match lookup("CONMON_POLL_INTERVAL_MS") {
            None => defaults.poll_interval,
            Some(raw) => Duration::from_millis(positive("CONMON_POLL_INTERVAL_MS", &raw)?),
        };
        let wait_timeout = match lookup("CONMON_WAIT_TIMEOUT_SECS") {
            None => defaults.wait_timeout,
            Some(raw) => Duration::from_secs(positive("CONMON_WAIT_TIMEOUT_SECS", &raw)?),
        };
        Ok(Self {
            poll_interval,
            wait_timeout,
            debug: false,
        })
    }
}

fn positive(key: &str, raw: &str) -> Result<u64, AppError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))),
    }
}

/// Destination for accepted records.
pub trait RecordSink: Send {
    fn emit(&mut self, record: &PropertyMap) -> Result<(), AppError>;
}

/// Writes one JSON object per line and flushes after each.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &PropertyMap) -> Result<(), AppError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| AppError::EngineError(format!("cannot write record: {e}")))
    }
}

/// Sends each record, serialized as one JSON line, into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RecordSink for ChannelSink {
    fn emit(&mut self, record: &PropertyMap) -> Result<(), AppError> {
        let line = serde_json::to_string(record)?;
        self.tx
            .send(line)
            .map_err(|_| AppError::EngineError("record receiver dropped".into()))
    }
}

/// Counters for one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Listing elements evaluated.
    pub scanned: usize,
    pub title_filtered: usize,
    /// Candidates left after the list scan.
    pub candidates: usize,
    pub details_loaded: usize,
    pub content_filtered: usize,
    pub emitted: usize,
    pub reached_watermark: bool,
}

struct CrawlContext {
    extractor: PageExtractor,
    sink: Box<dyn RecordSink>,
    /// Oldest-first.
    candidates: Vec<PropertyMap>,
    cursor: usize,
    summary: CrawlSummary,
}

/// Drives one crawl of one source.
#[derive(Debug, Clone)]
pub struct CrawlController<D> {
    driver: D,
    registry: ParserRegistry,
    settings: EngineSettings,
}

impl<D: PageDriver> CrawlController<D> {
    pub fn new(driver: D, registry: ParserRegistry, settings: EngineSettings) -> Self {
        Self {
            driver,
            registry,
            settings,
        }
    }

    /// Crawl `config.start_page` and stream accepted records into `sink`.
    pub async fn crawl<S>(&self, config: &ExtractionConfig, sink: S) -> Result<CrawlSummary, AppError>
    where
        S: RecordSink + 'static,
    {
        let extractor = PageExtractor::compile(config, &self.registry)?;
        let mut ctx = CrawlContext {
            extractor,
            sink: Box::new(sink),
            candidates: Vec::new(),
            cursor: 0,
            summary: CrawlSummary::default(),
        };

        let mut machine = StepMachine::new();
        machine.then_open(config.start_page.clone());
        machine.then(scan_list);
        machine.label(LIST_START);
        machine.then(open_candidate);
        machine.then(read_detail);
        machine.then(advance);

        tracing::info!(start_page = %config.start_page, watermark = ?config.watermark, "Crawl started");
        let result = machine.run(&self.driver, &mut ctx, &self.settings).await;
        if self.settings.debug {
            tracing::debug!(steps = %machine.dump(), "Step program");
        }
        result?;

        let summary = ctx.summary;
        tracing::info!(
            scanned = summary.scanned,
            title_filtered = summary.title_filtered,
            details_loaded = summary.details_loaded,
            content_filtered = summary.content_filtered,
            emitted = summary.emitted,
            reached_watermark = summary.reached_watermark,
            "Crawl finished"
        );
        Ok(summary)
    }
}

fn scan_list(machine: &mut StepMachine<CrawlContext>, ctx: &mut CrawlContext) -> Result<(), AppError> {
    let page = machine
        .page()
        .ok_or_else(|| AppError::StepError("list page was not loaded".into()))?;
    let scan = ctx.extractor.extract_list(&page.html, &page.url)?;

    ctx.summary.scanned = scan.scanned;
    ctx.summary.title_filtered = scan.title_filtered;
    ctx.summary.reached_watermark = scan.reached_watermark;
    ctx.summary.candidates = scan.candidates.len();
    ctx.candidates = scan.candidates;
    ctx.candidates.reverse();
    tracing::debug!(candidates = ctx.candidates.len(), "List scanned");
    Ok(())
}

fn open_candidate(machine: &mut StepMachine<CrawlContext>, ctx: &mut CrawlContext) -> Result<(), AppError> {
    if let Some(candidate) = ctx.candidates.get(ctx.cursor) {
        let url = candidate
            .get("url")
            .ok_or_else(|| AppError::ExtractionError("candidate has no url".into()))?;
        machine.open(url.clone());
    }
    Ok(())
}

fn read_detail(machine: &mut StepMachine<CrawlContext>, ctx: &mut CrawlContext) -> Result<(), AppError> {
    if ctx.cursor >= ctx.candidates.len() {
        return Ok(());
    }
    let page = machine
        .page()
        .ok_or_else(|| AppError::StepError("detail page was not loaded".into()))?;
    ctx.summary.details_loaded += 1;

    let candidate = &mut ctx.candidates[ctx.cursor];
    if ctx.extractor.extract_detail(&page.html, &page.url, candidate)? {
        ctx.sink.emit(candidate)?;
        ctx.summary.emitted += 1;
    } else {
        tracing::debug!(url = %page.url, "Dropped by content filter");
        ctx.summary.content_filtered += 1;
    }
    Ok(())
}

fn advance(machine: &mut StepMachine<CrawlContext>, ctx: &mut CrawlContext) -> Result<(), AppError> {
    ctx.cursor += 1;
    if ctx.cursor < ctx.candidates.len() {
        machine.goto_label(LIST_START)?;
    }
    Ok(())
}

/// Runs the controller inside the current process.
#[derive(Debug, Clone)]
pub struct InProcessLauncher<D> {
    controller: CrawlController<D>,
}

impl<D: PageDriver> InProcessLauncher<D> {
    pub fn new(controller: CrawlController<D>) -> Self {
        Self { controller }
    }
}

impl<D: PageDriver> EngineLauncher for InProcessLauncher<D> {
    async fn launch(&self, config: &ExtractionConfig) -> Result<Vec<String>, AppError> {
        let (sink, mut rx) = ChannelSink::new();
        self.controller.crawl(config, sink).await?;

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        Ok(lines)
    }
}
