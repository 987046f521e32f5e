//! Test utilities: mock implementations of the collaborator traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, PoolError};
use crate::models::{CrawlJob, CrawlResult, ProductData, StatusChange, Target};
use crate::notify::Notification;
use crate::pool::{PoolEvent, PoolReporter};
use crate::traits::{
    BatchSubmitter, Notifier, ProductCatalog, ProductFetcher, Trigger, TriggerCallback,
};

/// Scripted outcome for one product code.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Data(ProductData),
    Error(String),
    Panic,
}

impl MockResponse {
    fn produce(&self, code: &str) -> Result<ProductData, AppError> {
        match self {
            MockResponse::Data(data) => Ok(data.clone()),
            MockResponse::Error(msg) => Err(AppError::FetchError(msg.clone())),
            MockResponse::Panic => panic!("scripted panic for {code}"),
        }
    }
}

/// Default data returned for codes without a scripted response.
pub fn product_data(code: &str, status: &str) -> ProductData {
    ProductData {
        description: format!("Product {code}"),
        status: Some(status.to_string()),
        replacement_code: None,
        raw_html: format!("<html><body>{code}</body></html>"),
    }
}

pub fn make_target(code: &str) -> Target {
    Target {
        id: Uuid::new_v4(),
        code: code.to_string(),
        url: format!("https://example.com/products/{code}"),
    }
}

pub fn make_job(code: &str) -> CrawlJob {
    CrawlJob::from(&make_target(code))
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with per-code responses and delays.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    default_delay: Duration,
    open_error: Option<String>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher whose session cannot be opened.
    pub fn failing_open(message: &str) -> Self {
        Self {
            open_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_response(self, code: &str, response: MockResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(code.to_string(), response);
        self
    }

    pub fn with_delay(self, code: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(code.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ProductFetcher for MockFetcher {
    async fn open(&self) -> Result<(), AppError> {
        if let Some(msg) = &self.open_error {
            return Err(AppError::FetchError(msg.clone()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, product_code: &str) -> Result<ProductData, AppError> {
        self.calls.lock().unwrap().push(product_code.to_string());

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(product_code)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(product_code).cloned();
        match response {
            Some(response) => response.produce(product_code),
            None => Ok(product_data(product_code, "Active Product")),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCatalog
// ---------------------------------------------------------------------------

/// Mock catalog that lists fixed targets and records saves.
#[derive(Clone, Default)]
pub struct MockCatalog {
    targets: Arc<Mutex<Vec<Target>>>,
    list_error: Option<String>,
    save_errors: Arc<Mutex<Vec<String>>>,
    changes: Arc<Mutex<HashMap<String, StatusChange>>>,
    pub saved: Arc<Mutex<Vec<(CrawlJob, ProductData)>>>,
    pub list_calls: Arc<AtomicUsize>,
}

impl MockCatalog {
    pub fn with_targets(codes: &[&str]) -> Self {
        Self {
            targets: Arc::new(Mutex::new(codes.iter().map(|c| make_target(c)).collect())),
            ..Self::default()
        }
    }

    pub fn with_list_error(message: &str) -> Self {
        Self {
            list_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Report a status change when `code` is saved.
    pub fn with_change(self, code: &str, old: Option<&str>, new: &str) -> Self {
        self.changes.lock().unwrap().insert(
            code.to_string(),
            StatusChange {
                product_code: code.to_string(),
                old_status: old.map(str::to_string),
                new_status: new.to_string(),
            },
        );
        self
    }

    /// Fail every save for `code`.
    pub fn with_save_error(self, code: &str) -> Self {
        self.save_errors.lock().unwrap().push(code.to_string());
        self
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn saved_codes(&self) -> Vec<String> {
        self.saved
            .lock()
            .unwrap()
            .iter()
            .map(|(job, _)| job.product_code.clone())
            .collect()
    }
}

impl ProductCatalog for MockCatalog {
    async fn list_targets(&self) -> Result<Vec<Target>, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.list_error {
            return Err(AppError::DatabaseError(msg.clone()));
        }
        Ok(self.targets.lock().unwrap().clone())
    }

    async fn save_observation(
        &self,
        job: &CrawlJob,
        data: &ProductData,
    ) -> Result<Option<StatusChange>, AppError> {
        if self
            .save_errors
            .lock()
            .unwrap()
            .contains(&job.product_code)
        {
            return Err(AppError::DatabaseError("disk full".into()));
        }
        self.saved.lock().unwrap().push((job.clone(), data.clone()));
        Ok(self.changes.lock().unwrap().get(&job.product_code).cloned())
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Mock notifier that records every send attempt.
#[derive(Clone, Default)]
pub struct MockNotifier {
    pub sent: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the attempt, then fails it.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(AppError::NotificationError("smtp unavailable".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSubmitter
// ---------------------------------------------------------------------------

/// Mock batch submitter that resolves jobs from scripted responses.
#[derive(Clone, Default)]
pub struct MockSubmitter {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    submit_error: Option<PoolError>,
    pub batches: Arc<Mutex<Vec<Vec<CrawlJob>>>>,
}

impl MockSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submit_error(error: PoolError) -> Self {
        Self {
            submit_error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_response(self, code: &str, response: MockResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(code.to_string(), response);
        self
    }

    pub fn with_delay(self, code: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(code.to_string(), delay);
        self
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl BatchSubmitter for MockSubmitter {
    fn submit_batch(
        &self,
        cancel: CancellationToken,
        jobs: Vec<CrawlJob>,
    ) -> Result<mpsc::Receiver<CrawlResult>, AppError> {
        if let Some(source) = self.submit_error {
            let code = jobs
                .first()
                .map(|j| j.product_code.clone())
                .unwrap_or_default();
            return Err(AppError::BatchSubmit { code, source });
        }
        self.batches.lock().unwrap().push(jobs.clone());

        let (tx, rx) = mpsc::channel(jobs.len().max(1));
        for job in jobs {
            let code = job.product_code.clone();
            let delay = self.delays.lock().unwrap().get(&code).copied();
            let response = self.responses.lock().unwrap().get(&code).cloned();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Some(delay) = delay {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return,
                    }
                }
                let outcome = match response {
                    Some(response) => response.produce(&code),
                    None => Ok(product_data(&code, "Active Product")),
                };
                let _ = tx.send(CrawlResult { job, outcome }).await;
            });
        }
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// ManualTrigger
// ---------------------------------------------------------------------------

/// Trigger that fires only when the test says so.
#[derive(Clone, Default)]
pub struct ManualTrigger {
    pub schedule: Arc<Mutex<Option<String>>>,
    callback: Arc<Mutex<Option<TriggerCallback>>>,
    pub stops: Arc<AtomicUsize>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the registered callback once and wait for it.
    pub async fn fire(&self) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }

    pub fn is_started(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }
}

impl Trigger for ManualTrigger {
    async fn start(&self, schedule: &str, callback: TriggerCallback) -> Result<(), AppError> {
        if schedule.trim().is_empty() {
            return Err(AppError::SchedulerError("empty schedule".into()));
        }
        *self.schedule.lock().unwrap() = Some(schedule.to_string());
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AppError> {
        self.callback.lock().unwrap().take();
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock pool reporter that records event labels.
#[derive(Default, Clone)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl PoolReporter for MockReporter {
    fn report(&self, event: PoolEvent<'_>) {
        let label = match &event {
            PoolEvent::Started { .. } => "Started",
            PoolEvent::WorkerStarted { .. } => "WorkerStarted",
            PoolEvent::JobStarted { .. } => "JobStarted",
            PoolEvent::JobCompleted { .. } => "JobCompleted",
            PoolEvent::JobFailed { .. } => "JobFailed",
            PoolEvent::ResultDropped { .. } => "ResultDropped",
            PoolEvent::WorkerStopped { .. } => "WorkerStopped",
            PoolEvent::Stopping { .. } => "Stopping",
            PoolEvent::Stopped => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
