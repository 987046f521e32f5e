use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{CrawlJob, CrawlResult, ProductData, StatusChange, Target};
use crate::notify::Notification;

/// Fetches and extracts one product page.
///
/// The session is opened once by the pool on start and closed on stop;
/// `fetch` is called concurrently from several workers.
pub trait ProductFetcher: Send + Sync + Clone + 'static {
    fn open(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn fetch(&self, product_code: &str)
    -> impl Future<Output = Result<ProductData, AppError>> + Send;
}

/// The two persistence operations the monitor consumes.
pub trait ProductCatalog: Send + Sync + Clone + 'static {
    /// One target per unique product code.
    fn list_targets(&self) -> impl Future<Output = Result<Vec<Target>, AppError>> + Send;

    /// Record a snapshot and return the status change, if any.
    ///
    /// Implementations read the stored status before overwriting it and
    /// report a change only when old != new and new is non-empty.
    fn save_observation(
        &self,
        job: &CrawlJob,
        data: &ProductData,
    ) -> impl Future<Output = Result<Option<StatusChange>, AppError>> + Send;
}

/// Outbound email capability.
pub trait Notifier: Send + Sync + Clone + 'static {
    fn send(&self, notification: &Notification)
    -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Anything that accepts a batch of jobs and streams back their results.
pub trait BatchSubmitter: Send + Sync + Clone + 'static {
    /// Returns a receiver yielding one result per job in completion order.
    ///
    /// The receiver closes early if `cancel` fires.
    fn submit_batch(
        &self,
        cancel: CancellationToken,
        jobs: Vec<CrawlJob>,
    ) -> Result<mpsc::Receiver<CrawlResult>, AppError>;
}

/// Callback invoked by a [`Trigger`] on every tick.
pub type TriggerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A periodic trigger source: schedule expression in, callback invocations out.
pub trait Trigger: Send + Sync + 'static {
    fn start(
        &self,
        schedule: &str,
        callback: TriggerCallback,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Stop firing and wait for the trigger to wind down.
    fn stop(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A catalog with nothing to list that discards observations.
#[derive(Debug, Clone)]
pub struct NullCatalog;

impl ProductCatalog for NullCatalog {
    async fn list_targets(&self) -> Result<Vec<Target>, AppError> {
        Ok(vec![])
    }

    async fn save_observation(
        &self,
        _job: &CrawlJob,
        _data: &ProductData,
    ) -> Result<Option<StatusChange>, AppError> {
        Ok(None)
    }
}

/// A notifier that only logs; used when no mail provider is configured.
#[derive(Debug, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AppError> {
        tracing::info!(
            subject = %notification.subject,
            recipients = notification.recipients.len(),
            "Mail delivery not configured, notification logged only"
        );
        tracing::debug!(body = %notification.text, "Notification body");
        Ok(())
    }
}
