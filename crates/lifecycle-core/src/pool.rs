//! Bounded worker pool that fetches product pages concurrently.
//!
//! Jobs enter through a bounded intake queue. Results either go to the
//! pool's own processor (fire-and-forget jobs) or are routed back to the
//! caller that is waiting on them through the correlation table.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::correlation::{CorrelationTable, Delivery};
use crate::error::{AppError, PoolError};
use crate::models::{CorrelationKey, CrawlJob, CrawlResult, ProductData};
use crate::traits::{BatchSubmitter, ProductCatalog, ProductFetcher};

/// Lifecycle phase of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

/// Events emitted by the pool for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PoolEvent<'a> {
    Started {
        workers: usize,
    },
    WorkerStarted {
        worker_id: usize,
    },
    JobStarted {
        worker_id: usize,
        product_code: &'a str,
    },
    JobCompleted {
        worker_id: usize,
        product_code: &'a str,
    },
    JobFailed {
        worker_id: usize,
        product_code: &'a str,
        error: &'a str,
    },
    /// A result had nowhere to go and was discarded.
    ResultDropped {
        product_code: &'a str,
        reason: &'a str,
    },
    WorkerStopped {
        worker_id: usize,
    },
    Stopping {
        queued: usize,
    },
    Stopped,
}

/// Trait for receiving pool events (decoupled logging).
pub trait PoolReporter: Send + Sync + 'static {
    fn report(&self, event: PoolEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPoolReporter;

impl PoolReporter for TracingPoolReporter {
    fn report(&self, event: PoolEvent<'_>) {
        match event {
            PoolEvent::Started { workers } => {
                tracing::info!(%workers, "Worker pool started");
            }
            PoolEvent::WorkerStarted { worker_id } => {
                tracing::debug!(%worker_id, "Worker started");
            }
            PoolEvent::JobStarted {
                worker_id,
                product_code,
            } => {
                tracing::debug!(%worker_id, %product_code, "Fetching product");
            }
            PoolEvent::JobCompleted {
                worker_id,
                product_code,
            } => {
                tracing::debug!(%worker_id, %product_code, "Product fetched");
            }
            PoolEvent::JobFailed {
                worker_id,
                product_code,
                error,
            } => {
                tracing::warn!(%worker_id, %product_code, %error, "Product fetch failed");
            }
            PoolEvent::ResultDropped {
                product_code,
                reason,
            } => {
                tracing::debug!(%product_code, %reason, "Result dropped");
            }
            PoolEvent::WorkerStopped { worker_id } => {
                tracing::debug!(%worker_id, "Worker stopped");
            }
            PoolEvent::Stopping { queued } => {
                tracing::info!(%queued, "Worker pool stopping, draining queue");
            }
            PoolEvent::Stopped => {
                tracing::info!("Worker pool stopped");
            }
        }
    }
}

struct Lifecycle {
    state: PoolState,
    intake: Option<mpsc::Sender<CrawlJob>>,
}

#[derive(Default)]
struct Tasks {
    workers: Vec<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

struct PoolInner<F, C, R> {
    fetcher: F,
    catalog: C,
    reporter: R,
    config: PoolConfig,
    correlations: CorrelationTable,
    lifecycle: Mutex<Lifecycle>,
    /// Held for the whole of start and stop so they never interleave.
    tasks: AsyncMutex<Tasks>,
}

/// Fixed set of workers sharing one fetcher session.
///
/// Cloning is cheap; clones share the same workers and queue.
pub struct WorkerPool<F, C, R = TracingPoolReporter> {
    inner: Arc<PoolInner<F, C, R>>,
}

impl<F, C, R> Clone for WorkerPool<F, C, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, C> WorkerPool<F, C>
where
    F: ProductFetcher,
    C: ProductCatalog,
{
    pub fn new(fetcher: F, catalog: C, config: PoolConfig) -> Self {
        Self::with_reporter(fetcher, catalog, config, TracingPoolReporter)
    }
}

impl<F, C, R> WorkerPool<F, C, R>
where
    F: ProductFetcher,
    C: ProductCatalog,
    R: PoolReporter,
{
    pub fn with_reporter(fetcher: F, catalog: C, config: PoolConfig, reporter: R) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                fetcher,
                catalog,
                reporter,
                config,
                correlations: CorrelationTable::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: PoolState::NotStarted,
                    intake: None,
                }),
                tasks: AsyncMutex::new(Tasks::default()),
            }),
        }
    }

    pub fn state(&self) -> PoolState {
        self.inner.lifecycle().state
    }

    /// Number of callers' keys still registered for routing.
    pub fn pending_correlations(&self) -> usize {
        self.inner.correlations.len()
    }

    /// Open the fetcher session and spawn the workers and result processor.
    ///
    /// Calling `start` on a running pool is a no-op. If the session cannot
    /// be opened the pool stays not-running.
    pub async fn start(&self) -> Result<(), AppError> {
        let mut tasks = self.inner.tasks.lock().await;
        if self.state() == PoolState::Running {
            return Ok(());
        }

        self.inner.fetcher.open().await?;

        let queue_size = self.inner.config.queue_size.max(1);
        let (intake_tx, intake_rx) = mpsc::channel::<CrawlJob>(queue_size);
        let (results_tx, results_rx) = mpsc::channel::<CrawlResult>(queue_size);
        let intake_rx = Arc::new(AsyncMutex::new(intake_rx));

        let workers = self.inner.config.workers.max(1);
        for worker_id in 0..workers {
            tasks.workers.push(tokio::spawn(run_worker(
                Arc::clone(&self.inner),
                worker_id,
                Arc::clone(&intake_rx),
                results_tx.clone(),
            )));
        }
        // Processor sees end-of-stream once every worker has exited.
        drop(results_tx);
        tasks.processor = Some(tokio::spawn(process_results(
            Arc::clone(&self.inner),
            results_rx,
        )));

        {
            let mut lifecycle = self.inner.lifecycle();
            lifecycle.state = PoolState::Running;
            lifecycle.intake = Some(intake_tx);
        }
        self.inner.reporter.report(PoolEvent::Started { workers });
        Ok(())
    }

    /// Close intake, drain queued jobs, wait for every task, close the session.
    ///
    /// Calling `stop` on a pool that is not running is a no-op.
    pub async fn stop(&self) -> Result<(), AppError> {
        let mut tasks = self.inner.tasks.lock().await;

        let intake = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state != PoolState::Running {
                return Ok(());
            }
            lifecycle.state = PoolState::Stopping;
            lifecycle.intake.take()
        };

        if let Some(intake) = intake {
            let queued = intake.max_capacity() - intake.capacity();
            self.inner.reporter.report(PoolEvent::Stopping { queued });
        }

        for handle in tasks.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        if let Some(processor) = tasks.processor.take()
            && let Err(e) = processor.await
        {
            tracing::error!(error = %e, "Result processor task failed");
        }

        let closed = self.inner.fetcher.close().await;
        self.inner.lifecycle().state = PoolState::Stopped;
        self.inner.reporter.report(PoolEvent::Stopped);
        closed
    }

    /// Enqueue a fire-and-forget job. Its result goes to the catalog.
    ///
    /// Never blocks: a full queue is reported as [`PoolError::QueueFull`].
    pub fn submit(&self, mut job: CrawlJob) -> Result<(), PoolError> {
        job.correlation = None;
        self.enqueue(job)
    }

    /// Enqueue one job and wait for its result or for cancellation.
    pub async fn submit_and_wait(
        &self,
        cancel: &CancellationToken,
        job: CrawlJob,
    ) -> Result<ProductData, AppError> {
        let key = CorrelationKey::generate();
        let (tx, mut rx) = mpsc::channel(1);
        let _registration = self.inner.correlations.register(vec![key], &tx);
        drop(tx);

        self.enqueue(job.with_correlation(key))?;

        tokio::select! {
            biased;
            result = rx.recv() => match result {
                Some(result) => result.outcome,
                None => Err(PoolError::ShuttingDown.into()),
            },
            () = cancel.cancelled() => Err(AppError::Cancelled),
        }
    }

    /// Enqueue every job and stream their results in completion order.
    ///
    /// The returned receiver closes after the last result, or early when
    /// `cancel` fires. If any job cannot be enqueued the whole call fails
    /// and every key it registered is withdrawn.
    pub fn submit_batch(
        &self,
        cancel: CancellationToken,
        jobs: Vec<CrawlJob>,
    ) -> Result<mpsc::Receiver<CrawlResult>, AppError> {
        if jobs.is_empty() {
            let (_, rx) = mpsc::channel(1);
            return Ok(rx);
        }

        let total = jobs.len();
        let jobs: Vec<CrawlJob> = jobs
            .into_iter()
            .map(|job| job.with_correlation(CorrelationKey::generate()))
            .collect();
        let keys = jobs.iter().filter_map(|job| job.correlation).collect();

        // Sized to hold every result so workers never wait on the relay.
        let (collected_tx, mut collected_rx) = mpsc::channel(total);
        let registration = self.inner.correlations.register(keys, &collected_tx);
        drop(collected_tx);

        for job in jobs {
            let code = job.product_code.clone();
            if let Err(source) = self.enqueue(job) {
                drop(registration);
                return Err(AppError::BatchSubmit { code, source });
            }
        }

        let (out_tx, out_rx) = mpsc::channel(total);
        tokio::spawn(async move {
            let _registration = registration;
            for _ in 0..total {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = collected_rx.recv() => next,
                };
                let Some(result) = next else { break };
                if out_tx.send(result).await.is_err() {
                    break;
                }
            }
        });

        Ok(out_rx)
    }

    fn enqueue(&self, job: CrawlJob) -> Result<(), PoolError> {
        let lifecycle = self.inner.lifecycle();
        match lifecycle.state {
            PoolState::NotStarted | PoolState::Stopped => Err(PoolError::NotRunning),
            PoolState::Stopping => Err(PoolError::ShuttingDown),
            PoolState::Running => {
                let intake = lifecycle.intake.as_ref().ok_or(PoolError::ShuttingDown)?;
                intake.try_send(job).map_err(|e| match e {
                    TrySendError::Full(_) => PoolError::QueueFull,
                    TrySendError::Closed(_) => PoolError::ShuttingDown,
                })
            }
        }
    }
}

impl<F, C, R> BatchSubmitter for WorkerPool<F, C, R>
where
    F: ProductFetcher,
    C: ProductCatalog,
    R: PoolReporter,
{
    fn submit_batch(
        &self,
        cancel: CancellationToken,
        jobs: Vec<CrawlJob>,
    ) -> Result<mpsc::Receiver<CrawlResult>, AppError> {
        WorkerPool::submit_batch(self, cancel, jobs)
    }
}

impl<F, C, R> PoolInner<F, C, R>
where
    F: ProductFetcher,
    C: ProductCatalog,
    R: PoolReporter,
{
    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch(&self, worker_id: usize, job: &CrawlJob) -> Result<ProductData, AppError> {
        self.reporter.report(PoolEvent::JobStarted {
            worker_id,
            product_code: &job.product_code,
        });

        let outcome = match AssertUnwindSafe(self.fetcher.fetch(&job.product_code))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(AppError::FetchError(format!(
                "fetcher panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match &outcome {
            Ok(_) => self.reporter.report(PoolEvent::JobCompleted {
                worker_id,
                product_code: &job.product_code,
            }),
            Err(e) => {
                let error = e.to_string();
                self.reporter.report(PoolEvent::JobFailed {
                    worker_id,
                    product_code: &job.product_code,
                    error: &error,
                });
            }
        }
        outcome
    }

    async fn dispatch(&self, result: CrawlResult, results: &mpsc::Sender<CrawlResult>) {
        let Some(key) = result.job.correlation else {
            if let Err(rejected) = results.send(result).await {
                self.reporter.report(PoolEvent::ResultDropped {
                    product_code: &rejected.0.job.product_code,
                    reason: "result processor stopped",
                });
            }
            return;
        };

        let code = result.job.product_code.clone();
        let reason = match self.correlations.deliver(key, result) {
            Delivery::Delivered => return,
            Delivery::Unregistered => "caller no longer waiting",
            Delivery::Rejected => "caller channel closed",
        };
        self.reporter.report(PoolEvent::ResultDropped {
            product_code: &code,
            reason,
        });
    }
}

async fn run_worker<F, C, R>(
    inner: Arc<PoolInner<F, C, R>>,
    worker_id: usize,
    intake: Arc<AsyncMutex<mpsc::Receiver<CrawlJob>>>,
    results: mpsc::Sender<CrawlResult>,
) where
    F: ProductFetcher,
    C: ProductCatalog,
    R: PoolReporter,
{
    inner.reporter.report(PoolEvent::WorkerStarted { worker_id });

    loop {
        let next = intake.lock().await.recv().await;
        let Some(job) = next else { break };

        let pause = inner.config.jitter();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let outcome = inner.fetch(worker_id, &job).await;
        inner.dispatch(CrawlResult { job, outcome }, &results).await;
    }

    inner.reporter.report(PoolEvent::WorkerStopped { worker_id });
}

async fn process_results<F, C, R>(
    inner: Arc<PoolInner<F, C, R>>,
    mut results: mpsc::Receiver<CrawlResult>,
) where
    F: ProductFetcher,
    C: ProductCatalog,
    R: PoolReporter,
{
    while let Some(CrawlResult { job, outcome }) = results.recv().await {
        let data = match outcome {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(product_code = %job.product_code, error = %e, "Crawl failed");
                continue;
            }
        };

        match inner.catalog.save_observation(&job, &data).await {
            Ok(Some(change)) => tracing::info!(
                product_code = %job.product_code,
                old_status = ?change.old_status,
                new_status = %change.new_status,
                "Lifecycle status changed"
            ),
            Ok(None) => tracing::info!(
                product_code = %job.product_code,
                status = ?data.status,
                "Snapshot saved"
            ),
            Err(e) => tracing::error!(
                product_code = %job.product_code,
                error = %e,
                "Failed to save snapshot"
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
