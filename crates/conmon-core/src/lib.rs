pub mod controller;
pub mod digest;
pub mod error;
pub mod extract;
pub mod mapper;
pub mod models;
pub mod orchestrator;
pub mod steps;
#[cfg(test)]
pub mod testutil;
pub mod traits;

pub use controller::{
    ChannelSink, CrawlController, CrawlSummary, EngineSettings, InProcessLauncher, JsonLinesSink,
    RecordSink,
};
pub use digest::{Digest, DigestSection};
pub use error::AppError;
pub use extract::{ListScan, PageExtractor, ParserRegistry};
pub use mapper::{Entity, FieldKind, FieldSet, FieldValue, Statement, StatementKind};
pub use models::{ExtractionConfig, Parser, PropertyMap, PropertySource, Record, Source};
pub use orchestrator::{
    BatchEvent, BatchReport, BatchReporter, CrawlOrchestrator, TracingBatchReporter,
};
pub use steps::{Page, StepMachine, Tick};
pub use traits::{EngineLauncher, Notifier, PageDriver, RecordStore, TracingNotifier};
