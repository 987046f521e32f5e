/// Smoke-test for `BrowserProductFetcher`.
///
/// Opens a headless Chromium session, fetches one product page from
/// `PRODUCT_BASE_URL`, and prints what was extracted.
///
/// Run with:
///   PRODUCT_BASE_URL=https://... cargo run --example browser_smoke --features browser -- 6ES7511-1AK02-0AB0
use lifecycle_client::BrowserProductFetcher;
use lifecycle_core::traits::ProductFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let base_url = std::env::var("PRODUCT_BASE_URL")?;
    let code = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "6ES7511-1AK02-0AB0".to_string());

    println!("Launching headless browser…");
    let fetcher = BrowserProductFetcher::new(&base_url)?;
    fetcher.open().await?;

    println!("Fetching {code} …");
    let result = fetcher.fetch(&code).await;
    fetcher.close().await?;
    let data = result?;

    assert!(!data.description.is_empty(), "description is empty");

    println!("Description: {}", data.description);
    println!("Status:      {}", data.status.as_deref().unwrap_or("-"));
    println!(
        "Successor:   {}",
        data.replacement_code.as_deref().unwrap_or("-")
    );
    println!("HTML:        {} bytes", data.raw_html.len());
    Ok(())
}
