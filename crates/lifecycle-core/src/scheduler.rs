//! Periodic lifecycle collection: list targets, crawl them as one batch,
//! persist observations, and email a digest of status changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::models::{CrawlJob, CrawlResult, StatusChange};
use crate::notify::{alert_notification, status_change_notification};
use crate::traits::{BatchSubmitter, Notifier, ProductCatalog, Trigger, TriggerCallback};

const LIST_FAILED: &str = "failed to list products";
const SUBMIT_FAILED: &str = "failed to submit batch";

/// Counters for one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    /// In the order results completed.
    pub status_changes: Vec<StatusChange>,
    pub duration: Duration,
    /// The run deadline passed before every result arrived.
    pub timed_out: bool,
    pub notification_sent: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    NoTargets,
    /// Listing or submission failed; nothing was crawled.
    Aborted {
        context: String,
    },
    /// Another run was already in flight.
    Skipped,
}

struct SchedulerInner<B, C, N> {
    submitter: B,
    catalog: C,
    notifier: N,
    config: SchedulerConfig,
    running: AtomicBool,
    /// Background runs started by ticks or `run_now`.
    runs: TaskTracker,
}

/// Drives collection runs from a [`Trigger`] or on demand.
pub struct Scheduler<B, C, N, T> {
    inner: Arc<SchedulerInner<B, C, N>>,
    trigger: T,
}

impl<B, C, N, T> Scheduler<B, C, N, T>
where
    B: BatchSubmitter,
    C: ProductCatalog,
    N: Notifier,
    T: Trigger,
{
    pub fn new(submitter: B, catalog: C, notifier: N, trigger: T, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                submitter,
                catalog,
                notifier,
                config,
                running: AtomicBool::new(false),
                runs: TaskTracker::new(),
            }),
            trigger,
        }
    }

    /// Register a run on every tick of `cron_expression`.
    pub async fn start(&self, cron_expression: &str) -> Result<(), AppError> {
        self.inner.runs.reopen();
        let inner = Arc::clone(&self.inner);
        let callback: TriggerCallback = Arc::new(move || {
            let inner = Arc::clone(&inner);
            let runs = inner.runs.clone();
            runs.track_future(async move {
                inner.run().await;
            })
            .boxed()
        });
        self.trigger.start(cron_expression, callback).await?;
        tracing::info!(%cron_expression, "Scheduler started");
        Ok(())
    }

    /// Stop the trigger and wait for background runs to finish.
    ///
    /// Runs driven by `run_once` belong to their caller and are not awaited.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.trigger.stop().await?;
        self.inner.runs.close();
        if !self.inner.runs.is_empty() {
            tracing::info!("Waiting for the collection in progress to finish");
        }
        self.inner.runs.wait().await;
        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Start a run in the background.
    pub fn run_now(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner.runs.spawn(async move {
            inner.run().await;
        });
    }

    /// Execute one run on the current task.
    pub async fn run_once(&self) -> RunOutcome {
        self.inner.run().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

/// Clears the in-flight flag when the run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Step {
    Completed,
    NoTargets,
    Aborted(&'static str),
}

impl<B, C, N> SchedulerInner<B, C, N>
where
    B: BatchSubmitter,
    C: ProductCatalog,
    N: Notifier,
{
    async fn run(&self) -> RunOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            tracing::warn!("Lifecycle collection already in progress, skipping");
            return RunOutcome::Skipped;
        };

        tracing::info!("Starting lifecycle collection");
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let step = self.execute(&mut summary).await;
        summary.duration = started.elapsed();

        tracing::info!(
            total = summary.total,
            success = summary.success,
            errors = summary.errors,
            status_changes = summary.status_changes.len(),
            timed_out = summary.timed_out,
            duration_ms = summary.duration.as_millis() as u64,
            "Lifecycle collection finished"
        );

        match step {
            Step::Completed => RunOutcome::Completed(summary),
            Step::NoTargets => RunOutcome::NoTargets,
            Step::Aborted(context) => RunOutcome::Aborted {
                context: context.to_string(),
            },
        }
    }

    async fn execute(&self, summary: &mut RunSummary) -> Step {
        let deadline = tokio::time::Instant::now() + self.config.run_timeout;
        let cancel = CancellationToken::new();
        // Releases the batch relay on every exit path.
        let _cancel_on_exit = cancel.clone().drop_guard();

        let listed = tokio::time::timeout_at(deadline, self.catalog.list_targets()).await;
        let targets = match listed {
            Ok(Ok(targets)) => targets,
            Ok(Err(e)) => {
                self.alert(LIST_FAILED, &e).await;
                return Step::Aborted(LIST_FAILED);
            }
            Err(_) => {
                let e = AppError::Timeout(self.config.run_timeout.as_secs());
                self.alert(LIST_FAILED, &e).await;
                return Step::Aborted(LIST_FAILED);
            }
        };

        if targets.is_empty() {
            tracing::info!("No products to collect");
            return Step::NoTargets;
        }
        summary.total = targets.len();
        tracing::info!(count = targets.len(), "Collecting products");

        let jobs: Vec<CrawlJob> = targets.iter().map(CrawlJob::from).collect();
        let mut results = match self.submitter.submit_batch(cancel.clone(), jobs) {
            Ok(rx) => rx,
            Err(e) => {
                self.alert(SUBMIT_FAILED, &e).await;
                return Step::Aborted(SUBMIT_FAILED);
            }
        };

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);
        loop {
            let next = tokio::select! {
                next = results.recv() => next,
                () = &mut expiry => {
                    summary.timed_out = true;
                    cancel.cancel();
                    tracing::warn!(
                        received = summary.success + summary.errors,
                        total = summary.total,
                        "Collection timed out, abandoning remaining results"
                    );
                    break;
                }
            };
            let Some(result) = next else { break };
            self.record(result, summary).await;
        }

        if !summary.status_changes.is_empty() {
            summary.notification_sent = self.send_status_changes(&summary.status_changes).await;
        }
        Step::Completed
    }

    async fn record(&self, result: CrawlResult, summary: &mut RunSummary) {
        let CrawlResult { job, outcome } = result;
        let data = match outcome {
            Ok(data) => data,
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(product_code = %job.product_code, error = %e, "Crawl failed");
                return;
            }
        };

        match self.catalog.save_observation(&job, &data).await {
            Ok(change) => {
                summary.success += 1;
                if let Some(change) = change {
                    tracing::info!(
                        product_code = %change.product_code,
                        old_status = ?change.old_status,
                        new_status = %change.new_status,
                        "Lifecycle status changed"
                    );
                    summary.status_changes.push(change);
                }
            }
            Err(e) => {
                summary.errors += 1;
                tracing::error!(product_code = %job.product_code, error = %e, "Failed to save snapshot");
            }
        }
    }

    async fn send_status_changes(&self, changes: &[StatusChange]) -> bool {
        let recipients = &self.config.change_recipients;
        if recipients.is_empty() {
            tracing::warn!(changes = changes.len(), "No recipients for status change digest");
            return false;
        }

        let notification = status_change_notification(changes, recipients);
        match self.notifier.send(&notification).await {
            Ok(()) => {
                tracing::info!(
                    changes = changes.len(),
                    recipients = recipients.len(),
                    "Status change digest sent"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send status change digest");
                false
            }
        }
    }

    async fn alert(&self, context: &str, error: &AppError) {
        tracing::error!(%context, error = %error, "Lifecycle collection aborted");

        let recipients = &self.config.alert_recipients;
        if recipients.is_empty() {
            return;
        }
        let notification = alert_notification(context, error, Utc::now(), recipients);
        if let Err(e) = self.notifier.send(&notification).await {
            tracing::error!(error = %e, "Failed to send alert");
        }
    }
}
