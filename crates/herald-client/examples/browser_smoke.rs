/// Smoke-test for `BrowserRenderer`.
///
/// Launches a headless Chromium, renders <https://example.com>, and checks
/// that the page's single anchor is harvested.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use herald_client::BrowserRenderer;
use herald_core::traits::PageRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let renderer = BrowserRenderer::new().await?;

    let url = "https://example.com";
    let selectors = vec!["main".to_string(), "div".to_string()];
    let page = renderer.harvest_links(url, &selectors).await?;

    anyhow::ensure!(!page.anchors.is_empty(), "no anchors harvested from {url}");
    println!(
        "OK: {} anchors via {:?} on {}",
        page.anchors.len(),
        page.matched_selector,
        page.url
    );
    for anchor in &page.anchors {
        println!("  {} -> {}", anchor.text, anchor.href);
    }
    Ok(())
}
