use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

/// A product row due for a refresh, as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub code: String,
    pub url: String,
}

/// Internal identifier linking a job to the channel waiting for its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CorrelationKey(Uuid);

impl CorrelationKey {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of crawl work for one product code.
///
/// The correlation key is assigned by the pool at submission time and is
/// not visible outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub product_id: Uuid,
    pub product_code: String,
    pub product_url: String,
    pub(crate) correlation: Option<CorrelationKey>,
}

impl CrawlJob {
    pub fn new(
        product_id: Uuid,
        product_code: impl Into<String>,
        product_url: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            product_code: product_code.into(),
            product_url: product_url.into(),
            correlation: None,
        }
    }

    pub(crate) fn with_correlation(mut self, key: CorrelationKey) -> Self {
        self.correlation = Some(key);
        self
    }

    /// Two jobs refer to the same unit of work, ignoring pool bookkeeping.
    pub fn same_target(&self, other: &CrawlJob) -> bool {
        self.product_id == other.product_id
            && self.product_code == other.product_code
            && self.product_url == other.product_url
    }
}

impl From<&Target> for CrawlJob {
    fn from(target: &Target) -> Self {
        CrawlJob::new(target.id, target.code.clone(), target.url.clone())
    }
}

/// Data extracted from one product page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductData {
    pub description: String,
    /// Lifecycle status label, e.g. "Active Product".
    pub status: Option<String>,
    /// Successor product code, present for discontinued products.
    pub replacement_code: Option<String>,
    #[serde(skip_serializing)]
    pub raw_html: String,
}

/// Terminal outcome of one job: the job it came from plus data or error.
#[derive(Debug)]
pub struct CrawlResult {
    pub job: CrawlJob,
    pub outcome: Result<ProductData, AppError>,
}

impl CrawlResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A detected difference between the stored and observed lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub product_code: String,
    /// `None` when the product had no recorded status yet.
    pub old_status: Option<String>,
    pub new_status: String,
}

/// Compare the stored status with a fresh observation.
///
/// A change is reported only when the observed status is non-empty and
/// differs from what was stored.
pub fn detect_status_change(
    product_code: &str,
    old_status: Option<&str>,
    new_status: Option<&str>,
) -> Option<StatusChange> {
    let new_status = new_status.map(str::trim).filter(|s| !s.is_empty())?;
    let old_status = old_status.map(str::trim).filter(|s| !s.is_empty());

    if old_status == Some(new_status) {
        return None;
    }

    Some(StatusChange {
        product_code: product_code.to_string(),
        old_status: old_status.map(str::to_string),
        new_status: new_status.to_string(),
    })
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
