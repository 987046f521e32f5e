use std::time::Duration;

use crate::error::AppError;

const DEFAULT_WORKERS: usize = 3;
const DEFAULT_QUEUE_SIZE: usize = 100;
const DEFAULT_CRON_EXPRESSION: &str = "0 0 3 * * *";
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Recipients of the lifecycle-change digest.
pub const DEFAULT_CHANGE_RECIPIENTS: &[&str] = &[
    "bruno.rc@outlook.com.br",
    "freitasmatheusrn@gmail.com",
];

/// Sizing and pacing of the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Capacity of the job intake queue and the fire-and-forget result queue.
    pub queue_size: usize,
    /// Lower bound of the random pause a worker takes before each fetch.
    pub jitter_min: Duration,
    /// Upper bound of that pause. Equal bounds give a fixed delay.
    pub jitter_max: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(2500),
        }
    }
}

impl PoolConfig {
    /// Zero values fall back to the defaults.
    pub fn new(workers: usize, queue_size: usize) -> Self {
        Self {
            workers: if workers == 0 { DEFAULT_WORKERS } else { workers },
            queue_size: if queue_size == 0 {
                DEFAULT_QUEUE_SIZE
            } else {
                queue_size
            },
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter_min = min.min(max);
        self.jitter_max = max.max(min);
        self
    }

    pub fn without_jitter(self) -> Self {
        self.with_jitter(Duration::ZERO, Duration::ZERO)
    }

    /// Draw one pause from the configured range, whichever way round it is set.
    pub(crate) fn jitter(&self) -> Duration {
        let a = self.jitter_min.as_millis() as u64;
        let b = self.jitter_max.as_millis() as u64;
        let (min, max) = (a.min(b), a.max(b));
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

/// Settings for the periodic collection run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Receive operational alerts; empty disables alerting.
    pub alert_recipients: Vec<String>,
    /// Receive the lifecycle-change digest.
    pub change_recipients: Vec<String>,
    /// Upper bound on one run; remaining results are abandoned after it.
    pub run_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alert_recipients: Vec::new(),
            change_recipients: DEFAULT_CHANGE_RECIPIENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    pub fn with_alert_recipients(mut self, recipients: Vec<String>) -> Self {
        self.alert_recipients = recipients;
        self
    }

    pub fn with_change_recipients(mut self, recipients: Vec<String>) -> Self {
        self.change_recipients = recipients;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }
}

/// Process-level monitor settings read from the environment.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cron_expression: String,
    pub product_base_url: String,
    pub pool: PoolConfig,
    pub scheduler: SchedulerConfig,
}

impl MonitorConfig {
    /// Read configuration from environment variables.
    ///
    /// - `PRODUCT_BASE_URL` (required)
    /// - `CRON_EXPRESSION` (optional, six fields with seconds, defaults to 03:00 daily)
    /// - `ALERT_RECIPIENTS` (optional, comma-separated)
    /// - `POOL_WORKERS`, `POOL_QUEUE_SIZE` (optional positive integers)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let product_base_url = get("PRODUCT_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::ConfigError("PRODUCT_BASE_URL not set".into()))?;

        let cron_expression = get("CRON_EXPRESSION")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CRON_EXPRESSION.to_string());

        let alert_recipients = get("ALERT_RECIPIENTS")
            .map(|raw| parse_recipients(&raw))
            .unwrap_or_default();

        let workers = parse_positive(&get, "POOL_WORKERS", DEFAULT_WORKERS)?;
        let queue_size = parse_positive(&get, "POOL_QUEUE_SIZE", DEFAULT_QUEUE_SIZE)?;

        Ok(Self {
            cron_expression,
            product_base_url: product_base_url.trim_end_matches('/').to_string(),
            pool: PoolConfig::new(workers, queue_size),
            scheduler: SchedulerConfig::default().with_alert_recipients(alert_recipients),
        })
    }
}

/// Split a comma-separated recipient list, dropping blanks.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
) -> Result<usize, AppError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => {
            let parsed: usize = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid {key} '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(format!("{key} must be at least 1")));
            }
            Ok(parsed)
        }
    }
}
