pub mod config;
mod correlation;
pub mod error;
pub mod models;
pub mod notify;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod traits;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{MonitorConfig, PoolConfig, SchedulerConfig};
pub use error::{AppError, PoolError};
pub use models::{CrawlJob, CrawlResult, ProductData, StatusChange, Target, compute_hash};
pub use notify::Notification;
pub use pool::{PoolEvent, PoolReporter, PoolState, TracingPoolReporter, WorkerPool};
pub use progress::{BatchProgress, ProgressEvent, track_batch};
pub use scheduler::{RunOutcome, RunSummary, Scheduler};
pub use traits::{
    BatchSubmitter, LogNotifier, Notifier, NullCatalog, ProductCatalog, ProductFetcher, Trigger,
    TriggerCallback,
};
pub use trigger::CronTrigger;
