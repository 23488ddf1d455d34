use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use herald_core::error::AppError;
use herald_core::traits::{HarvestedPage, PageRenderer};

use crate::static_page::harvest_anchors;

/// Headless-browser renderer using Chromium via the Chrome DevTools Protocol.
///
/// Unlike [`super::StaticPageRenderer`], this runs the page's JavaScript
/// before harvesting anchors, which matters for sites that build their
/// article lists client-side.
///
/// A single Chromium process is shared across all clones of this struct;
/// each [`PageRenderer::harvest_links`] call opens a new tab, reads the
/// rendered DOM, and closes the tab.
///
/// # Example
///
/// ```rust,no_run
/// use herald_client::BrowserRenderer;
/// use herald_core::traits::PageRenderer;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let renderer = BrowserRenderer::new().await?;
/// let page = renderer.harvest_links("https://example.com", &["main".to_string()]).await?;
/// println!("{} anchors", page.anchors.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserRenderer {
    browser: Arc<Browser>,
    timeout: Duration,
}

impl BrowserRenderer {
    /// Launches a headless Chromium browser with a **30 s** navigation timeout.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`,
    /// or one of the well-known install locations.
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // The snap wrapper at /snap/bin/chromium drops unknown flags, which
        // breaks headless mode; prefer the real binary when present.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
        })
    }
}

fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl PageRenderer for BrowserRenderer {
    async fn harvest_links(&self, url: &str, selectors: &[String]) -> Result<HarvestedPage, AppError> {
        let rendered = tokio::time::timeout(self.timeout, async {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;

            page.wait_for_navigation()
                .await
                .map_err(|e| AppError::HttpError(format!("Navigation did not finish: {e}")))?;

            let html = page
                .content()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))?;
            let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());

            if let Err(e) = page.close().await {
                tracing::debug!(%url, error = %e, "Failed to close tab");
            }

            Ok::<_, AppError>((final_url, html))
        })
        .await
        .map_err(|_| AppError::Timeout(self.timeout.as_secs()))??;

        let (final_url, html) = rendered;
        Ok(harvest_anchors(&final_url, &html, selectors))
    }
}
