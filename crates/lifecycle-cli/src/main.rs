use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[cfg(feature = "browser")]
use lifecycle_client::BrowserProductFetcher;
use lifecycle_client::{HttpProductFetcher, MailjetConfig, MailjetNotifier};
use lifecycle_core::models::{CrawlJob, ProductData};
use lifecycle_core::traits::{LogNotifier, Notifier, NullCatalog, ProductCatalog, ProductFetcher};
use lifecycle_core::{
    AppError, CronTrigger, MonitorConfig, Notification, PoolError, ProgressEvent, RunOutcome,
    Scheduler, WorkerPool, track_batch,
};
use lifecycle_db::{Database, DatabaseConfig, ProductRepository};

const PROGRESS_CAPACITY: usize = 32;

#[derive(Parser)]
#[command(
    name = "lifecycle-monitor",
    version,
    about = "Tracks product lifecycle status and mails a digest of changes"
)]
struct Cli {
    /// Page fetcher used by the worker pool
    #[arg(
        long,
        global = true,
        env = "FETCHER",
        value_enum,
        default_value_t = FetcherKind::Http
    )]
    fetcher: FetcherKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FetcherKind {
    /// Plain HTTP GET of the product page
    Http,
    /// Headless Chromium (requires the `browser` feature)
    Browser,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collection on its cron schedule until Ctrl-C
    Serve {
        /// Also start one collection immediately
        #[arg(long, default_value_t = false)]
        run_on_start: bool,
    },

    /// Run one collection pass and print its summary
    Collect,

    /// Fetch product codes ad hoc and print what was extracted
    Check {
        /// Product code to check (repeatable)
        #[arg(short, long = "code", required = true)]
        codes: Vec<String>,

        /// Register unknown codes and persist observations (requires a database)
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /// Show stored snapshots for a product code
    History {
        /// Product code
        #[arg(short, long)]
        code: String,

        /// Number of snapshots to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lifecycle=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { run_on_start } => {
            let config = MonitorConfig::from_env().context("Invalid monitor configuration")?;
            cmd_serve(&config, cli.fetcher, run_on_start).await?;
        }
        Commands::Collect => {
            let config = MonitorConfig::from_env().context("Invalid monitor configuration")?;
            cmd_collect(&config, cli.fetcher).await?;
        }
        Commands::Check { codes, save } => {
            let config = MonitorConfig::from_env().context("Invalid monitor configuration")?;
            if save {
                let db = connect_db().await?;
                cmd_check_and_save(&config, cli.fetcher, &codes, &db.product_repo()).await?;
            } else {
                cmd_check(&config, cli.fetcher, &codes).await?;
            }
        }
        Commands::History { code, limit } => {
            let db = connect_db().await?;
            cmd_history(&code, limit, &db.product_repo()).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("Invalid database configuration")?;
    Database::open(&config)
        .await
        .context("Failed to open database")
}

/// The fetcher selected on the command line.
#[derive(Clone)]
enum Fetcher {
    Http(HttpProductFetcher),
    #[cfg(feature = "browser")]
    Browser(BrowserProductFetcher),
}

impl Fetcher {
    fn build(kind: FetcherKind, base_url: &str) -> Result<Self> {
        match kind {
            FetcherKind::Http => Ok(Self::Http(
                HttpProductFetcher::new(base_url).context("Failed to create HTTP fetcher")?,
            )),
            #[cfg(feature = "browser")]
            FetcherKind::Browser => Ok(Self::Browser(
                BrowserProductFetcher::new(base_url).context("Failed to create browser fetcher")?,
            )),
            #[cfg(not(feature = "browser"))]
            FetcherKind::Browser => {
                anyhow::bail!("The browser fetcher requires building with `--features browser`")
            }
        }
    }
}

impl ProductFetcher for Fetcher {
    async fn open(&self) -> Result<(), AppError> {
        match self {
            Self::Http(f) => f.open().await,
            #[cfg(feature = "browser")]
            Self::Browser(f) => f.open().await,
        }
    }

    async fn close(&self) -> Result<(), AppError> {
        match self {
            Self::Http(f) => f.close().await,
            #[cfg(feature = "browser")]
            Self::Browser(f) => f.close().await,
        }
    }

    async fn fetch(&self, product_code: &str) -> Result<ProductData, AppError> {
        match self {
            Self::Http(f) => f.fetch(product_code).await,
            #[cfg(feature = "browser")]
            Self::Browser(f) => f.fetch(product_code).await,
        }
    }
}

/// Mailjet when credentials are configured, otherwise log only.
#[derive(Clone)]
enum Mailer {
    Mailjet(MailjetNotifier),
    Log(LogNotifier),
}

impl Mailer {
    fn from_env() -> Result<Self> {
        match MailjetConfig::from_env().context("Invalid Mailjet configuration")? {
            Some(config) => {
                tracing::info!(from = %config.from_email, "Mail delivery via Mailjet");
                Ok(Self::Mailjet(
                    MailjetNotifier::new(config).context("Failed to create Mailjet client")?,
                ))
            }
            None => {
                tracing::warn!("MAILJET_API_KEY not set, notifications will only be logged");
                Ok(Self::Log(LogNotifier))
            }
        }
    }
}

impl Notifier for Mailer {
    async fn send(&self, notification: &Notification) -> Result<(), AppError> {
        match self {
            Self::Mailjet(n) => n.send(notification).await,
            Self::Log(n) => n.send(notification).await,
        }
    }
}

/// A token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn product_url(config: &MonitorConfig, code: &str) -> String {
    format!("{}/{}", config.product_base_url, code)
}

async fn start_pool<C: ProductCatalog>(
    config: &MonitorConfig,
    kind: FetcherKind,
    catalog: C,
) -> Result<WorkerPool<Fetcher, C>> {
    let fetcher = Fetcher::build(kind, &config.product_base_url)?;
    let pool = WorkerPool::new(fetcher, catalog, config.pool.clone());
    pool.start().await.context("Failed to start worker pool")?;
    Ok(pool)
}

async fn cmd_serve(config: &MonitorConfig, kind: FetcherKind, run_on_start: bool) -> Result<()> {
    let db = connect_db().await?;
    let repo = db.product_repo();
    repo.health_check()
        .await
        .context("Database health check failed")?;

    let notifier = Mailer::from_env()?;
    let pool = start_pool(config, kind, repo.clone()).await?;
    let scheduler = Scheduler::new(
        pool.clone(),
        repo,
        notifier,
        CronTrigger::new(),
        config.scheduler.clone(),
    );

    if let Err(e) = scheduler.start(&config.cron_expression).await {
        if let Err(stop_err) = pool.stop().await {
            tracing::error!(error = %stop_err, "Failed to stop worker pool");
        }
        return Err(e).context("Failed to start scheduler");
    }

    if run_on_start {
        scheduler.run_now();
    }

    tracing::info!(cron = %config.cron_expression, "Monitor running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    scheduler.stop().await.context("Failed to stop scheduler")?;
    pool.stop().await.context("Failed to stop worker pool")?;

    Ok(())
}

async fn cmd_collect(config: &MonitorConfig, kind: FetcherKind) -> Result<()> {
    let db = connect_db().await?;
    let repo = db.product_repo();

    let pool = start_pool(config, kind, repo.clone()).await?;
    let scheduler = Scheduler::new(
        pool.clone(),
        repo,
        Mailer::from_env()?,
        CronTrigger::new(),
        config.scheduler.clone(),
    );

    let outcome = scheduler.run_once().await;
    pool.stop().await.context("Failed to stop worker pool")?;

    match outcome {
        RunOutcome::Completed(summary) => {
            let report = json!({
                "total": summary.total,
                "success": summary.success,
                "errors": summary.errors,
                "status_changes": summary.status_changes,
                "timed_out": summary.timed_out,
                "notification_sent": summary.notification_sent,
                "duration_ms": summary.duration.as_millis() as u64,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        RunOutcome::NoTargets => println!("No products to collect"),
        RunOutcome::Skipped => println!("A collection is already in progress"),
        RunOutcome::Aborted { context } => anyhow::bail!("Collection aborted: {context}"),
    }

    Ok(())
}

/// Fetch the codes without touching the database and print the results.
async fn cmd_check(config: &MonitorConfig, kind: FetcherKind, codes: &[String]) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let jobs: Vec<CrawlJob> = codes
        .iter()
        .map(|code| CrawlJob::new(Uuid::nil(), code.as_str(), product_url(config, code)))
        .collect();

    let pool = start_pool(config, kind, NullCatalog).await?;
    let outcome = match jobs.len() {
        1 => check_one(&pool, &cancel, jobs).await,
        _ => check_many(&pool, &cancel, jobs).await,
    };
    pool.stop().await.context("Failed to stop worker pool")?;

    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}

async fn check_one(
    pool: &WorkerPool<Fetcher, NullCatalog>,
    cancel: &CancellationToken,
    jobs: Vec<CrawlJob>,
) -> Result<serde_json::Value> {
    let Some(job) = jobs.into_iter().next() else {
        return Ok(json!({}));
    };
    let code = job.product_code.clone();

    tracing::info!(%code, "Checking product");
    let data = pool
        .submit_and_wait(cancel, job)
        .await
        .with_context(|| format!("Failed to check {code}"))?;

    Ok(serde_json::to_value(&data)?)
}

async fn check_many(
    pool: &WorkerPool<Fetcher, NullCatalog>,
    cancel: &CancellationToken,
    jobs: Vec<CrawlJob>,
) -> Result<serde_json::Value> {
    let progress = match track_batch(pool, cancel.clone(), jobs, PROGRESS_CAPACITY) {
        Ok(progress) => progress,
        Err(e) if e.pool_error() == Some(PoolError::QueueFull) => {
            return Err(e).context("Too many codes for the job queue, raise POOL_QUEUE_SIZE");
        }
        Err(e) => return Err(e).context("Failed to submit batch"),
    };

    let mut events = progress.events;
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Started { total } => eprintln!("Checking {total} products"),
            ProgressEvent::Succeeded {
                product_code,
                completed,
                total,
            } => eprintln!("  [{completed}/{total}] {product_code} ok"),
            ProgressEvent::Failed {
                product_code,
                error,
                completed,
                total,
            } => eprintln!("  [{completed}/{total}] {product_code} failed: {error}"),
            ProgressEvent::Finished {
                succeeded,
                failed,
                total,
            } => eprintln!("Done: {succeeded} ok, {failed} failed, {total} total"),
        }
    }

    let results = progress
        .results
        .await
        .context("Batch collector stopped unexpectedly")?;

    let mut report = BTreeMap::new();
    for result in results {
        let value = match result.outcome {
            Ok(data) => serde_json::to_value(&data)?,
            Err(e) => json!({
                "error": e.to_string(),
                "retryable": e.is_retryable(),
            }),
        };
        report.insert(result.job.product_code, value);
    }

    Ok(serde_json::to_value(report)?)
}

/// Register the codes, let the pool persist each observation, then print
/// the newest stored snapshot per code.
async fn cmd_check_and_save(
    config: &MonitorConfig,
    kind: FetcherKind,
    codes: &[String],
    repo: &ProductRepository,
) -> Result<()> {
    let mut jobs = Vec::with_capacity(codes.len());
    for code in codes {
        let target = repo
            .ensure_target(code, &product_url(config, code))
            .await
            .with_context(|| format!("Failed to register {code}"))?;
        jobs.push(CrawlJob::from(&target));
    }

    let pool = start_pool(config, kind, repo.clone()).await?;
    for job in jobs {
        let code = job.product_code.clone();
        if let Err(e) = pool.submit(job) {
            tracing::error!(%code, error = %e, "Failed to queue product");
        }
    }
    // Stopping drains the queue, so every accepted job is persisted first.
    pool.stop().await.context("Failed to stop worker pool")?;

    let mut latest = BTreeMap::new();
    for code in codes {
        let snapshot = repo
            .snapshot_history(code, 1)
            .await
            .with_context(|| format!("Failed to load snapshot for {code}"))?
            .into_iter()
            .next();
        latest.insert(code.clone(), snapshot);
    }

    println!("{}", serde_json::to_string_pretty(&latest)?);
    Ok(())
}

async fn cmd_history(code: &str, limit: usize, repo: &ProductRepository) -> Result<()> {
    let history = repo
        .snapshot_history(code, limit)
        .await
        .context("Failed to load snapshot history")?;

    if history.is_empty() {
        println!("No snapshots found for {code}");
        return Ok(());
    }

    println!("Snapshot history for {code}:\n");

    for (i, snapshot) in history.iter().enumerate() {
        let changed = match history.get(i + 1) {
            Some(previous) => previous.status != snapshot.status,
            None => true,
        };
        let marker = if changed { "CHANGED" } else { "unchanged" };
        let hash = snapshot
            .content_hash
            .get(..8)
            .unwrap_or(&snapshot.content_hash);

        println!(
            "  [{}] {} status: {}, successor: {} (hash: {}...)",
            marker,
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            snapshot.status.as_deref().unwrap_or("-"),
            snapshot.replacement_code.as_deref().unwrap_or("-"),
            hash,
        );
    }

    println!("\nTotal: {} snapshots", history.len());

    Ok(())
}
