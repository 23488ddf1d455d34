//! Anchor harvesting from server-rendered HTML.

use herald_core::error::AppError;
use herald_core::traits::{Fetcher, HarvestedPage, PageAnchor, PageRenderer};
use scraper::{ElementRef, Html, Selector};

/// Page renderer for sites that don't need JavaScript: fetches the HTML with
/// a [`Fetcher`] and harvests anchors with `scraper`.
#[derive(Clone)]
pub struct StaticPageRenderer<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> StaticPageRenderer<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: Fetcher> PageRenderer for StaticPageRenderer<F> {
    async fn harvest_links(&self, url: &str, selectors: &[String]) -> Result<HarvestedPage, AppError> {
        let html = self.fetcher.fetch(url).await?;
        Ok(harvest_anchors(url, &html, selectors))
    }
}

/// Collect anchors inside the first region matching one of `selectors`,
/// falling back to the whole document.
pub fn harvest_anchors(url: &str, html: &str, selectors: &[String]) -> HarvestedPage {
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href]").ok();

    let region = selectors.iter().find_map(|raw| {
        let selector = Selector::parse(raw)
            .inspect_err(|e| tracing::debug!(selector = %raw, error = ?e, "Skipping invalid selector"))
            .ok()?;
        document.select(&selector).next().map(|el| (raw.clone(), el))
    });

    let (matched_selector, root) = match region {
        Some((raw, el)) => (Some(raw), el),
        None => (None, document.root_element()),
    };

    let anchors = anchor_selector
        .map(|sel| root.select(&sel).filter_map(to_anchor).collect())
        .unwrap_or_default();

    HarvestedPage {
        url: url.to_string(),
        matched_selector,
        anchors,
    }
}

fn to_anchor(element: ElementRef<'_>) -> Option<PageAnchor> {
    let href = element.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }
    let text = element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    Some(PageAnchor {
        href: href.to_string(),
        text,
    })
}
