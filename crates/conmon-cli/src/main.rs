use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use conmon_client::{HttpMailer, MailConfig, ProcessLauncher, ReqwestDriver};
use conmon_core::controller::{CrawlController, EngineSettings, InProcessLauncher, JsonLinesSink};
use conmon_core::extract::{PageExtractor, ParserRegistry};
use conmon_core::models::{ExtractionConfig, Source};
use conmon_core::orchestrator::{CrawlOrchestrator, TracingBatchReporter};
use conmon_core::traits::{EngineLauncher, Notifier, PageDriver, TracingNotifier};
use conmon_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "conmon", version, about = "Incremental web content monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every enabled source once, store new records and mail a digest
    Run {
        /// Log the digest instead of mailing it
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Run crawls inside this process instead of one engine process per source
        #[arg(long, default_value_t = false)]
        in_process: bool,

        /// Render pages with headless Chromium
        #[arg(long, default_value_t = false)]
        browser: bool,

        /// Seconds before an engine process is killed
        #[arg(long, env = "CONMON_ENGINE_TIMEOUT_SECS", default_value_t = 600)]
        engine_timeout: u64,
    },

    /// Crawl one source and write accepted records to stdout as JSON lines
    Engine {
        /// Extraction config as JSON (with `latestUrl` as the watermark)
        #[arg(long)]
        config: String,

        /// Render pages with headless Chromium
        #[arg(long, default_value_t = false)]
        browser: bool,

        /// Dump the step program and page sizes
        #[arg(long, default_value_t = false)]
        debug: bool,
    },

    /// Manage monitored sources
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Show stored records of a source, newest first
    Records {
        /// Source id
        #[arg(short, long)]
        source: String,

        /// Number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Register a source from an extraction config file
    Add {
        #[arg(long)]
        id: String,

        /// Path to the extraction config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Register without enabling
        #[arg(long, default_value_t = false)]
        disabled: bool,
    },
    /// List all sources
    List,
    /// Include a source in batches
    Enable {
        #[arg(long)]
        id: String,
    },
    /// Exclude a source from batches
    Disable {
        #[arg(long)]
        id: String,
    },
    /// Clear the watermark so the next run starts from scratch
    Reset {
        #[arg(long)]
        id: String,
    },
    /// Delete a source and its records
    Remove {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logs go to stderr; stdout carries engine records.
    let filter = EnvFilter::from_default_env().add_directive(log_directive(&cli.command).parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            dry_run,
            in_process,
            browser,
            engine_timeout,
        } => {
            cmd_run(
                dry_run,
                in_process,
                browser,
                Duration::from_secs(engine_timeout),
            )
            .await?;
        }
        Commands::Engine {
            config,
            browser,
            debug,
        } => {
            cmd_engine(&config, browser, debug).await?;
        }
        Commands::Source { command } => {
            let db = connect_db().await?;
            cmd_source(command, &db).await?;
        }
        Commands::Records { source, limit } => {
            let db = connect_db().await?;
            cmd_records(&source, limit, &db).await?;
        }
    }

    Ok(())
}

/// `engine --debug` lowers the level so the step dump and page sizes show.
fn log_directive(command: &Commands) -> &'static str {
    match command {
        Commands::Engine { debug: true, .. } => "conmon=debug",
        _ => "conmon=info",
    }
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_run(dry_run: bool, in_process: bool, browser: bool, engine_timeout: Duration) -> Result<()> {
    let db = connect_db().await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current source");
            on_signal.cancel();
        }
    });

    if !in_process {
        let mut launcher = ProcessLauncher::current_exe()?.with_timeout(engine_timeout);
        if browser {
            launcher = launcher.with_arg("--browser");
        }
        return run_with_launcher(launcher, db, dry_run, &cancel).await;
    }

    let settings = EngineSettings::from_env()?;
    if browser {
        #[cfg(feature = "browser")]
        {
            let driver = conmon_client::BrowserDriver::with_timeout(settings.wait_timeout).await?;
            let controller = CrawlController::new(driver, ParserRegistry::with_builtins(), settings);
            return run_with_launcher(InProcessLauncher::new(controller), db, dry_run, &cancel).await;
        }
        #[cfg(not(feature = "browser"))]
        bail!("--browser requires conmon to be built with the `browser` feature");
    }

    let driver = ReqwestDriver::new()?;
    let controller = CrawlController::new(driver, ParserRegistry::with_builtins(), settings);
    run_with_launcher(InProcessLauncher::new(controller), db, dry_run, &cancel).await
}

async fn run_with_launcher<L: EngineLauncher>(
    launcher: L,
    db: Database,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    if dry_run {
        return run_batch(launcher, db, TracingNotifier, cancel).await;
    }
    let mailer = HttpMailer::new(MailConfig::from_env()?)?;
    run_batch(launcher, db, mailer, cancel).await
}

async fn run_batch<L: EngineLauncher, N: Notifier>(
    launcher: L,
    db: Database,
    notifier: N,
    cancel: &CancellationToken,
) -> Result<()> {
    let orchestrator = CrawlOrchestrator::new(launcher, db, notifier);
    let report = orchestrator
        .run_batch(cancel, &TracingBatchReporter)
        .await
        .context("Batch aborted")?;

    println!(
        "Processed {} sources, {} new records, digest {}",
        report.sources_processed,
        report.records_persisted,
        if report.digest_sent { "sent" } else { "not sent" }
    );
    if !report.failed_sources.is_empty() {
        println!("Failed sources: {}", report.failed_sources.join(", "));
    }
    Ok(())
}

async fn cmd_engine(config: &str, browser: bool, debug: bool) -> Result<()> {
    let config: ExtractionConfig =
        serde_json::from_str(config).context("Invalid JSON in --config")?;
    let settings = EngineSettings {
        debug,
        ..EngineSettings::from_env()?
    };

    if browser {
        #[cfg(feature = "browser")]
        {
            let driver = conmon_client::BrowserDriver::with_timeout(settings.wait_timeout).await?;
            return crawl_to_stdout(driver, &config, settings).await;
        }
        #[cfg(not(feature = "browser"))]
        bail!("--browser requires conmon to be built with the `browser` feature");
    }

    crawl_to_stdout(ReqwestDriver::new()?, &config, settings).await
}

async fn crawl_to_stdout<D: PageDriver>(
    driver: D,
    config: &ExtractionConfig,
    settings: EngineSettings,
) -> Result<()> {
    let controller = CrawlController::new(driver, ParserRegistry::with_builtins(), settings);
    match controller
        .crawl(config, JsonLinesSink::new(std::io::stdout()))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_extraction() => {
            tracing::error!(start_page = %config.start_page, error = %e, "Extraction failed");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_source(command: SourceCommands, db: &Database) -> Result<()> {
    let repo = db.sources();
    match command {
        SourceCommands::Add {
            id,
            config,
            disabled,
        } => {
            let extraction = load_config(&config)?;
            let mut source = Source::new(&id, &extraction)?;
            source.enabled = !disabled;
            repo.insert(&source)
                .await
                .with_context(|| format!("Failed to add source '{id}'"))?;
            println!("Added source {id}");
        }
        SourceCommands::List => {
            let sources = repo.list().await?;
            if sources.is_empty() {
                println!("No sources configured");
                return Ok(());
            }
            for source in &sources {
                println!(
                    "  {} [{}] watermark: {}",
                    source.id,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.watermark_url.as_deref().unwrap_or("-")
                );
            }
            println!("\nTotal: {} sources", sources.len());
        }
        SourceCommands::Enable { id } => {
            ensure_found(repo.set_enabled(&id, true).await?, &id)?;
            println!("Enabled {id}");
        }
        SourceCommands::Disable { id } => {
            ensure_found(repo.set_enabled(&id, false).await?, &id)?;
            println!("Disabled {id}");
        }
        SourceCommands::Reset { id } => {
            ensure_found(repo.set_watermark(&id, None).await?, &id)?;
            println!("Cleared watermark of {id}");
        }
        SourceCommands::Remove { id } => {
            ensure_found(repo.remove(&id).await?, &id)?;
            println!("Removed {id}");
        }
    }
    Ok(())
}

/// Read and validate an extraction config file.
fn load_config(path: &Path) -> Result<ExtractionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ExtractionConfig =
        serde_json::from_str(&text).context("Invalid extraction config")?;
    PageExtractor::compile(&config, &ParserRegistry::with_builtins())?;
    Ok(config)
}

fn ensure_found(found: bool, id: &str) -> Result<()> {
    if !found {
        bail!("No source with id '{id}'");
    }
    Ok(())
}

async fn cmd_records(source_id: &str, limit: usize, db: &Database) -> Result<()> {
    let records = db.records().recent(source_id, limit).await?;
    if records.is_empty() {
        println!("No records for source {source_id}");
        return Ok(());
    }

    println!("Records of {source_id}:\n");
    for record in &records {
        println!(
            "  {}  [{}] {} ({})",
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record
                .pub_time
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "----------".to_string()),
            record.title,
            record.url
        );
    }
    println!("\nShowing {} of {} records", records.len(), db.records().count(source_id).await?);
    Ok(())
}
