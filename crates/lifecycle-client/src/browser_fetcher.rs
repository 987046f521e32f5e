use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use lifecycle_core::error::AppError;
use lifecycle_core::models::ProductData;
use lifecycle_core::traits::ProductFetcher;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use url::Url;

use crate::extract::parse_product_page;
use crate::http_fetcher::product_url;

const DEFAULT_TABS: u32 = 3;

/// Headless-browser product fetcher using Chromium via the Chrome DevTools Protocol.
///
/// One Chromium process serves every clone. Each fetch checks out a tab
/// slot, opens its page in a fresh browser context so cookies and storage
/// never leak between jobs, and disposes the context afterwards.
///
/// # Example
///
/// ```rust,no_run
/// use lifecycle_client::BrowserProductFetcher;
/// use lifecycle_core::traits::ProductFetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserProductFetcher::new("https://example.com/pd")?;
/// fetcher.open().await?;
/// let data = fetcher.fetch("6ES7511-1AK02-0AB0").await?;
/// println!("{:?}", data.status);
/// fetcher.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserProductFetcher {
    inner: Arc<BrowserInner>,
}

struct BrowserInner {
    base_url: Url,
    timeout: Duration,
    tabs: Semaphore,
    max_tabs: u32,
    session: RwLock<Option<Session>>,
}

struct Session {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserProductFetcher {
    /// Three concurrent tabs and a **30 s** page timeout.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_options(base_url, DEFAULT_TABS, Duration::from_secs(30))
    }

    pub fn with_options(base_url: &str, max_tabs: u32, timeout: Duration) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid product base URL: {e}")))?;
        let max_tabs = max_tabs.max(1);
        Ok(Self {
            inner: Arc::new(BrowserInner {
                base_url,
                timeout,
                tabs: Semaphore::new(max_tabs as usize),
                max_tabs,
                session: RwLock::new(None),
            }),
        })
    }

    async fn launch() -> Result<Session, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::FetchError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::FetchError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Session {
            browser: Arc::new(browser),
            handler,
        })
    }

    async fn render(&self, browser: &Browser, url: &Url) -> Result<String, AppError> {
        let context = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| AppError::FetchError(format!("Failed to create browser context: {e}")))?
            .result
            .browser_context_id;

        let html = self.render_in(browser, &context, url).await;

        if let Err(e) = browser
            .execute(DisposeBrowserContextParams::new(context))
            .await
        {
            tracing::warn!(error = %e, "Failed to dispose browser context");
        }
        html
    }

    async fn render_in(
        &self,
        browser: &Browser,
        context: &BrowserContextId,
        url: &Url,
    ) -> Result<String, AppError> {
        let target = CreateTargetParams::builder()
            .url(url.as_str())
            .browser_context_id(context.clone())
            .build()
            .map_err(AppError::FetchError)?;

        let page = browser
            .new_page(target)
            .await
            .map_err(|e| AppError::FetchError(format!("Failed to navigate to {url}: {e}")))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| AppError::FetchError(format!("Navigation to {url} failed: {e}")))?;
        page.find_element("body")
            .await
            .map_err(|e| AppError::FetchError(format!("Page did not render body: {e}")))?;

        let html = page
            .content()
            .await
            .map_err(|e| AppError::FetchError(format!("Failed to read page content: {e}")));

        let _ = page.close().await;
        html
    }
}

impl ProductFetcher for BrowserProductFetcher {
    async fn open(&self) -> Result<(), AppError> {
        let mut session = self.inner.session.write().await;
        if session.is_some() {
            return Ok(());
        }
        *session = Some(Self::launch().await?);
        tracing::info!(tabs = self.inner.max_tabs, "Browser session opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        let Some(session) = self.inner.session.write().await.take() else {
            return Ok(());
        };

        // Wait for in-flight fetches to hand back their tab slots.
        let _all_tabs = self
            .inner
            .tabs
            .acquire_many(self.inner.max_tabs)
            .await
            .map_err(|e| AppError::FetchError(e.to_string()))?;

        let result = match Arc::try_unwrap(session.browser) {
            Ok(mut browser) => {
                let closed = browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|e| AppError::FetchError(format!("Failed to close browser: {e}")));
                let _ = browser.wait().await;
                closed
            }
            // A fetch still holds the handle; dropping ours lets it finish.
            Err(_) => Ok(()),
        };
        session.handler.abort();
        tracing::info!("Browser session closed");
        result
    }

    async fn fetch(&self, product_code: &str) -> Result<ProductData, AppError> {
        let url = product_url(&self.inner.base_url, product_code)?;

        let _tab = self
            .inner
            .tabs
            .acquire()
            .await
            .map_err(|e| AppError::FetchError(e.to_string()))?;

        let browser = self
            .inner
            .session
            .read()
            .await
            .as_ref()
            .map(|s| Arc::clone(&s.browser))
            .ok_or_else(|| AppError::FetchError("browser session is not open".into()))?;

        let html = tokio::time::timeout(self.inner.timeout, self.render(&browser, &url))
            .await
            .map_err(|_| AppError::Timeout(self.inner.timeout.as_secs()))??;

        parse_product_page(&html, product_code)
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via **snap**, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
/// `CHROME_BIN` wins when set; otherwise well-known paths are probed and
/// `None` leaves the lookup to `chromiumoxide`.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}
