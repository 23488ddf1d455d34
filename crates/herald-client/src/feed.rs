//! RSS/Atom feed reading with feed-rs.

use feed_rs::model::Entry;
use herald_core::error::AppError;
use herald_core::traits::{FeedEntry, FeedReader, Fetcher};

/// Fetches a feed body and parses it with `feed_rs`.
///
/// Entries without a link are dropped.
#[derive(Clone)]
pub struct FeedClient<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> FeedClient<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: Fetcher> FeedReader for FeedClient<F> {
    async fn read_feed(&self, url: &str) -> Result<Vec<FeedEntry>, AppError> {
        let body = self.fetcher.fetch(url).await?;
        let entries = parse_feed(&body).map_err(|e| AppError::FeedError(format!("{url}: {e}")))?;
        tracing::debug!(%url, entries = entries.len(), "Feed parsed");
        Ok(entries)
    }
}

/// Parse an RSS or Atom document into feed entries.
pub fn parse_feed(body: &str) -> Result<Vec<FeedEntry>, feed_rs::parser::ParseFeedError> {
    let feed = feed_rs::parser::parse(body.as_bytes())?;
    Ok(feed.entries.into_iter().filter_map(to_entry).collect())
}

fn to_entry(entry: Entry) -> Option<FeedEntry> {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())?;

    let image = entry
        .media
        .iter()
        .flat_map(|m| {
            m.thumbnails
                .iter()
                .map(|t| t.image.uri.clone())
                .chain(m.content.iter().filter_map(|c| c.url.as_ref().map(|u| u.to_string())))
        })
        .next();

    Some(FeedEntry {
        link,
        title: entry.title.map(|t| t.content),
        creator: entry.authors.first().map(|p| p.name.clone()),
        published: entry.published.or(entry.updated),
        summary: entry.summary.map(|t| t.content),
        image,
        categories: entry.categories.into_iter().map(|c| c.term).collect(),
    })
}
