use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use crate::digest::Digest;
use crate::error::AppError;
use crate::models::{Record, Source};
use crate::traits::{EngineLauncher, Notifier, RecordStore};

/// Events emitted during a batch for monitoring/logging.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    Started {
        sources: usize,
    },
    SourceStarted {
        source_id: &'a str,
        watermark: Option<&'a str>,
    },
    SourceCompleted {
        source_id: &'a str,
        records: usize,
        watermark: Option<&'a str>,
    },
    SourceFailed {
        source_id: &'a str,
        error: &'a str,
    },
    Cancelled {
        skipped: usize,
    },
    DigestSent {
        records: usize,
    },
    Finished {
        report: &'a BatchReport,
    },
}

/// Trait for receiving batch events (decoupled logging).
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::Started { sources } => {
                tracing::info!(%sources, "Batch started");
            }
            BatchEvent::SourceStarted {
                source_id,
                watermark,
            } => {
                tracing::info!(%source_id, ?watermark, "Crawling source");
            }
            BatchEvent::SourceCompleted {
                source_id,
                records,
                watermark,
            } => {
                tracing::info!(%source_id, %records, ?watermark, "Source completed");
            }
            BatchEvent::SourceFailed { source_id, error } => {
                tracing::warn!(%source_id, %error, "Source failed, skipping");
            }
            BatchEvent::Cancelled { skipped } => {
                tracing::info!(%skipped, "Batch cancelled");
            }
            BatchEvent::DigestSent { records } => {
                tracing::info!(%records, "Digest sent");
            }
            BatchEvent::Finished { report } => {
                tracing::info!(
                    sources = report.sources_processed,
                    failed = report.failed_sources.len(),
                    records = report.records_persisted,
                    digest_sent = report.digest_sent,
                    "Batch finished"
                );
            }
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Sources attempted, failed ones included.
    pub sources_processed: usize,
    pub failed_sources: Vec<String>,
    pub records_persisted: usize,
    pub digest_sent: bool,
    pub cancelled: bool,
}

/// Runs every enabled source once, persists new records and advances
/// watermarks, then sends a single digest.
pub struct CrawlOrchestrator<L, S, N>
where
    L: EngineLauncher,
    S: RecordStore,
    N: Notifier,
{
    launcher: L,
    store: S,
    notifier: N,
}

impl<L, S, N> CrawlOrchestrator<L, S, N>
where
    L: EngineLauncher,
    S: RecordStore,
    N: Notifier,
{
    pub fn new(launcher: L, store: S, notifier: N) -> Self {
        Self {
            launcher,
            store,
            notifier,
        }
    }

    /// Process all enabled sources sequentially.
    ///
    /// A failing source is reported and contributes no records. Urls already
    /// stored for a source are skipped; storage and notification errors
    /// propagate.
    pub async fn run_batch(
        &self,
        cancel: &CancellationToken,
        reporter: &impl BatchReporter,
    ) -> Result<BatchReport, AppError> {
        let sources = self.store.enabled_sources().await?;
        reporter.report(BatchEvent::Started {
            sources: sources.len(),
        });

        let mut report = BatchReport::default();
        let mut digest = Digest::new();

        for (position, source) in sources.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                reporter.report(BatchEvent::Cancelled {
                    skipped: sources.len() - position,
                });
                break;
            }

            reporter.report(BatchEvent::SourceStarted {
                source_id: &source.id,
                watermark: source.watermark_url.as_deref(),
            });
            report.sources_processed += 1;

            let (records, watermark) = match self.collect(source).await {
                Ok(collected) => collected,
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(BatchEvent::SourceFailed {
                        source_id: &source.id,
                        error: &error,
                    });
                    report.failed_sources.push(source.id.clone());
                    continue;
                }
            };

            let inserted = match &watermark {
                Some(watermark) => {
                    self.store
                        .commit_batch(&source.id, &records, watermark)
                        .await?
                }
                None => Vec::new(),
            };
            report.records_persisted += inserted.len();
            reporter.report(BatchEvent::SourceCompleted {
                source_id: &source.id,
                records: inserted.len(),
                watermark: watermark.as_deref(),
            });
            digest.push(source.id.clone(), inserted);
        }

        if !digest.is_empty() {
            self.notifier.send(&digest).await?;
            report.digest_sent = true;
            reporter.report(BatchEvent::DigestSent {
                records: digest.total(),
            });
        }

        reporter.report(BatchEvent::Finished { report: &report });
        Ok(report)
    }

    /// Launch one engine run and convert its output lines.
    ///
    /// Returns the records with repeated urls dropped (first occurrence
    /// kept) and the url of the last line, which is the next watermark.
    async fn collect(&self, source: &Source) -> Result<(Vec<Record>, Option<String>), AppError> {
        let config = source.launch_config()?;
        let lines = self.launcher.launch(&config).await?;
        let parsed = lines
            .iter()
            .map(|line| Record::from_line(&source.id, line))
            .collect::<Result<Vec<_>, _>>()?;

        // Lines arrive oldest-first; the last url is the newest item.
        let watermark = parsed.last().map(|r| r.url.clone());
        let mut seen = HashSet::new();
        let records = parsed
            .into_iter()
            .filter(|record| seen.insert(record.url.clone()))
            .collect();
        Ok((records, watermark))
    }
}
