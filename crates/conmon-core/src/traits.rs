use std::future::Future;

use crate::digest::Digest;
use crate::error::AppError;
use crate::models::{ExtractionConfig, Record, Source};

/// Loads a page and returns its HTML once the page has settled.
pub trait PageDriver: Send + Sync + Clone {
    fn load(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Runs one isolated crawl-engine execution for a merged config.
///
/// Returns every line the engine wrote, in order. Implementations read the
/// stream to completion; any abnormal termination is an error.
pub trait EngineLauncher: Send + Sync + Clone {
    fn launch(
        &self,
        config: &ExtractionConfig,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// Persists records and source watermarks.
pub trait RecordStore: Send + Sync + Clone {
    /// All sources with `enabled = true`.
    fn enabled_sources(&self) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    /// Insert the records whose url is not yet stored for the source, then
    /// set the source's watermark. Returns the records actually inserted.
    fn commit_batch(
        &self,
        source_id: &str,
        records: &[Record],
        watermark: &str,
    ) -> impl Future<Output = Result<Vec<Record>, AppError>> + Send;
}

/// Delivers one digest per batch.
pub trait Notifier: Send + Sync + Clone {
    fn send(&self, digest: &Digest) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A notifier that only logs the digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn send(&self, digest: &Digest) -> Result<(), AppError> {
        tracing::info!(subject = %digest.subject(), "Digest (not sent)");
        for section in digest.sections() {
            for record in &section.records {
                tracing::info!(source_id = %section.source_id, url = %record.url, title = %record.title, "New record");
            }
        }
        Ok(())
    }
}
