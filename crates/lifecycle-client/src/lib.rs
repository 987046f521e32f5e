#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod extract;
pub mod http_fetcher;
pub mod mailer;

#[cfg(test)]
mod test_server;

#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserProductFetcher;
pub use extract::{clean_lifecycle_status, parse_product_page};
pub use http_fetcher::HttpProductFetcher;
pub use mailer::{MailjetConfig, MailjetNotifier};
