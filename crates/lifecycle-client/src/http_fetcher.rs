use std::time::Duration;

use lifecycle_core::error::AppError;
use lifecycle_core::models::ProductData;
use lifecycle_core::traits::ProductFetcher;
use reqwest::Client;
use url::Url;

use crate::extract::parse_product_page;

/// Plain HTTP product fetcher using reqwest.
///
/// Suitable for pages that are rendered server-side. Product pages built
/// client-side need the browser fetcher instead.
#[derive(Clone)]
pub struct HttpProductFetcher {
    client: Client,
    base_url: Url,
    timeout_secs: u64,
}

impl HttpProductFetcher {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid product base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::ConfigError(format!(
                "Product base URL '{base_url}' cannot hold a path"
            )));
        }

        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; lifecycle-monitor/0.1)")
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::FetchError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// `{base_url}/{code}` with the code percent-encoded as one segment.
    pub fn product_url(&self, product_code: &str) -> Result<Url, AppError> {
        product_url(&self.base_url, product_code)
    }
}

pub(crate) fn product_url(base: &Url, product_code: &str) -> Result<Url, AppError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AppError::ConfigError(format!("Product base URL '{base}' cannot hold a path")))?
        .pop_if_empty()
        .push(product_code);
    Ok(url)
}

impl ProductFetcher for HttpProductFetcher {
    async fn open(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn fetch(&self, product_code: &str) -> Result<ProductData, AppError> {
        let url = self.product_url(product_code)?;

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::FetchError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::FetchError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::FetchError(format!("Failed to read response body: {e}")))?;

        parse_product_page(&html, product_code)
    }
}
