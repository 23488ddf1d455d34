//! Link extraction for one content source.
//!
//! Feeds are tried first. When they yield nothing (or the source has none),
//! the source page is rendered and its anchors go through domain scoping,
//! robots.txt, the fast article filter, and finally the classifier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classifier::UrlClassifier;
use crate::error::AppError;
use crate::filter::{ArticleDecision, ArticleFilter, ArticleFilterConfig};
use crate::models::{CandidateLink, ClassifiedUrl, ContentSource, UrlCategory};
use crate::stash::ContentStash;
use crate::traits::{FeedEntry, FeedReader, LinkStore, PageAnchor, PageRenderer, RobotsPolicy};
use crate::urls::{self, normalize_url};

/// Extraction tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Maximum concurrent feed reads and robots checks.
    pub concurrency: usize,
    pub feed_timeout: Duration,
    pub robots_timeout: Duration,
    pub page_timeout: Duration,
    pub user_agent: String,
    /// Return feed items without running them through the article filter
    /// and classifier.
    pub trust_feeds: bool,
    /// Main-content selectors, tried in order.
    pub selectors: Vec<String>,
    /// Classifier records written per transaction.
    pub flush_chunk: usize,
    pub filter: ArticleFilterConfig,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            feed_timeout: Duration::from_secs(10),
            robots_timeout: Duration::from_secs(10),
            page_timeout: Duration::from_secs(30),
            user_agent: "HeraldBot/0.1 (+https://github.com/herald-news/herald)".to_string(),
            trust_feeds: true,
            selectors: ["main", "article", "[role=\"main\"]", "#content", ".content"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            flush_chunk: 100,
            filter: ArticleFilterConfig::default(),
        }
    }
}

impl ExtractorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_trust_feeds(mut self, trust: bool) -> Self {
        self.trust_feeds = trust;
        self
    }

    pub fn with_filter(mut self, filter: ArticleFilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_timeouts(mut self, network: Duration) -> Self {
        self.feed_timeout = network;
        self.robots_timeout = network;
        self
    }
}

/// Produces article links for a source.
pub struct LinkExtractor<F, P, R, L>
where
    F: FeedReader,
    P: PageRenderer,
    R: RobotsPolicy,
    L: LinkStore,
{
    feeds: F,
    renderer: P,
    robots: R,
    store: L,
    classifier: Arc<UrlClassifier>,
    stash: Arc<ContentStash>,
    filter: ArticleFilter,
    config: ExtractorConfig,
}

impl<F, P, R, L> LinkExtractor<F, P, R, L>
where
    F: FeedReader,
    P: PageRenderer,
    R: RobotsPolicy,
    L: LinkStore,
{
    pub fn new(
        feeds: F,
        renderer: P,
        robots: R,
        store: L,
        classifier: Arc<UrlClassifier>,
        stash: Arc<ContentStash>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            feeds,
            renderer,
            robots,
            store,
            classifier,
            stash,
            filter: ArticleFilter::new(config.filter.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn stash(&self) -> &Arc<ContentStash> {
        &self.stash
    }

    /// Drop everything the stash remembers about the source's domain, so the
    /// next pass sees every link again.
    pub fn forget_source(&self, source: &ContentSource) {
        if let Some(host) = urls::host_of(&source.url) {
            self.stash.clear_domain_data(&urls::registrable_domain(&host));
        }
    }

    /// Extract candidate article links for `source`.
    ///
    /// Only a failure to render the source page is returned as an error;
    /// bad feeds, anchors, and robots lookups are logged and skipped.
    pub async fn extract_blog_links(
        &self,
        source: &ContentSource,
    ) -> Result<Vec<CandidateLink>, AppError> {
        if source.has_feeds() {
            let links = self.read_feeds(source).await;
            if !links.is_empty() {
                if self.config.trust_feeds {
                    tracing::info!(
                        source_id = %source.id,
                        links = links.len(),
                        "Extracted links from feeds"
                    );
                    return Ok(links);
                }
                return Ok(self.vet_feed_links(source, links).await);
            }
            tracing::info!(source_id = %source.id, "Feeds yielded nothing, falling back to page");
        }

        self.scrape_page(source).await
    }

    async fn read_feeds(&self, source: &ContentSource) -> Vec<CandidateLink> {
        let feed_urls: Vec<String> = source
            .rss_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        let results: Vec<(String, Result<Vec<FeedEntry>, AppError>)> = stream::iter(feed_urls)
            .map(|feed_url| async move {
                let result =
                    match tokio::time::timeout(self.config.feed_timeout, self.feeds.read_feed(&feed_url))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AppError::Timeout(self.config.feed_timeout.as_secs())),
                    };
                (feed_url, result)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for (feed_url, result) in results {
            let entries = match result {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(source_id = %source.id, feed = %feed_url, error = %e, "Feed failed, skipping");
                    continue;
                }
            };
            for entry in entries {
                let url = match normalize_url(&entry.link, None) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::debug!(feed = %feed_url, error = %e, "Skipping feed item");
                        continue;
                    }
                };
                if seen.insert(url.clone()) {
                    links.push(link_from_entry(url, entry));
                }
            }
        }
        links
    }

    /// Feed items put through the article filter and classifier when feeds
    /// are not trusted.
    async fn vet_feed_links(
        &self,
        source: &ContentSource,
        links: Vec<CandidateLink>,
    ) -> Vec<CandidateLink> {
        let mut decisions = Vec::new();
        let mut kept = Vec::new();
        for link in links {
            let Ok(parsed) = Url::parse(&link.url) else {
                continue;
            };
            if self.is_article(&parsed, &mut decisions) {
                kept.push(link);
            }
        }
        self.flush_classified(&decisions).await;
        tracing::info!(source_id = %source.id, links = kept.len(), "Vetted feed links");
        kept
    }

    async fn scrape_page(&self, source: &ContentSource) -> Result<Vec<CandidateLink>, AppError> {
        let source_url = Url::parse(&source.url)
            .map_err(|e| AppError::ValidationError(format!("Invalid source URL '{}': {e}", source.url)))?;
        let source_host = source_url
            .host_str()
            .ok_or_else(|| AppError::ValidationError(format!("Source URL has no host: {}", source.url)))?
            .to_ascii_lowercase();
        let domain = urls::registrable_domain(&source_host);

        let page = match tokio::time::timeout(
            self.config.page_timeout,
            self.renderer.harvest_links(&source.url, &self.config.selectors),
        )
        .await
        {
            Ok(page) => page?,
            Err(_) => return Err(AppError::Timeout(self.config.page_timeout.as_secs())),
        };
        let page_no = self.stash.increment_page(&domain);
        let base = Url::parse(&page.url).unwrap_or(source_url);

        tracing::debug!(
            source_id = %source.id,
            page = page_no,
            anchors = page.anchors.len(),
            selector = page.matched_selector.as_deref().unwrap_or("<document>"),
            "Harvested page"
        );

        let candidates = self.scope_anchors(&domain, &source_host, &base, page.anchors);
        let allowed = self.check_robots(candidates).await;

        let mut decisions = Vec::new();
        let mut links = Vec::new();
        for (url, anchor_text) in allowed {
            let Ok(parsed) = Url::parse(&url) else {
                continue;
            };
            if !self.is_article(&parsed, &mut decisions) {
                continue;
            }
            self.stash.add_valid_blog_url(&domain, &url);
            if self.stash.add_selected_url(&domain, &url) {
                links.push(CandidateLink::new(url).with_title(anchor_text));
            }
        }

        self.flush_classified(&decisions).await;

        tracing::info!(
            source_id = %source.id,
            domain = %domain,
            links = links.len(),
            classified = decisions.len(),
            "Extracted links from page"
        );
        Ok(links)
    }

    /// Normalize anchors, keep same-site links not seen before in this run.
    fn scope_anchors(
        &self,
        domain: &str,
        source_host: &str,
        base: &Url,
        anchors: Vec<PageAnchor>,
    ) -> Vec<(String, String)> {
        let mut scoped = Vec::new();
        for anchor in anchors {
            let url = match normalize_url(&anchor.href, Some(base)) {
                Ok(url) => url,
                Err(e) => {
                    tracing::trace!(href = %anchor.href, error = %e, "Discarding anchor");
                    continue;
                }
            };
            if !urls::is_valid_url(&url) {
                tracing::trace!(%url, "Discarding anchor with implausible host");
                continue;
            }
            let Some(host) = urls::host_of(&url) else {
                continue;
            };
            if !urls::same_site(&host, source_host) {
                continue;
            }
            if self.stash.add_internal_url(domain, &url) {
                scoped.push((url, anchor.text));
            }
        }
        scoped
    }

    /// Robots checks, bounded by `concurrency`. Lookup failures deny.
    async fn check_robots(&self, candidates: Vec<(String, String)>) -> Vec<(String, String)> {
        let agent = self.config.user_agent.as_str();
        stream::iter(candidates)
            .map(|(url, text)| async move {
                let verdict =
                    tokio::time::timeout(self.config.robots_timeout, self.robots.is_allowed(&url, agent))
                        .await;
                let allowed = match verdict {
                    Ok(Ok(allowed)) => allowed,
                    Ok(Err(e)) => {
                        tracing::debug!(%url, error = %e, "robots.txt unavailable, denying");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(%url, "robots.txt lookup timed out, denying");
                        false
                    }
                };
                allowed.then_some((url, text))
            })
            .buffered(self.config.concurrency.max(1))
            .filter_map(|item| async move { item })
            .collect()
            .await
    }

    /// Fast filter first; the classifier only sees undecided URLs, and each of
    /// its decisions is appended to `decisions`.
    fn is_article(&self, url: &Url, decisions: &mut Vec<ClassifiedUrl>) -> bool {
        match self.filter.decide(url) {
            ArticleDecision::Include => true,
            ArticleDecision::Exclude(reason) => {
                tracing::trace!(%url, ?reason, "Excluded by filter");
                false
            }
            ArticleDecision::Undecided => {
                let prediction = self.classifier.predict(url.as_str());
                decisions.push(ClassifiedUrl {
                    url: url.to_string(),
                    category: prediction.category,
                    confidence: prediction.confidence,
                    created_at: Utc::now(),
                });
                prediction.category == UrlCategory::News
            }
        }
    }

    async fn flush_classified(&self, decisions: &[ClassifiedUrl]) {
        for chunk in decisions.chunks(self.config.flush_chunk.max(1)) {
            if let Err(e) = self.store.save_classified(chunk).await {
                tracing::error!(records = chunk.len(), error = %e, "Failed to save classifier decisions");
            }
        }
    }
}

fn link_from_entry(url: String, entry: FeedEntry) -> CandidateLink {
    let mut link = CandidateLink::new(url);
    if let Some(title) = entry.title {
        link = link.with_title(title);
    }
    link.author = entry.creator;
    link.description = entry.summary;
    link.published_at = entry.published;
    link.featured_image = entry.image;
    link.keywords = entry.categories;
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryLinkStore, MockFeedReader, MockPageRenderer, MockRobots};

    type TestExtractor = LinkExtractor<MockFeedReader, MockPageRenderer, MockRobots, MemoryLinkStore>;

    fn extractor(
        feeds: MockFeedReader,
        renderer: MockPageRenderer,
        robots: MockRobots,
        store: MemoryLinkStore,
        config: ExtractorConfig,
    ) -> TestExtractor {
        LinkExtractor::new(
            feeds,
            renderer,
            robots,
            store,
            Arc::new(UrlClassifier::heuristic_only()),
            Arc::new(ContentStash::new()),
            config,
        )
    }

    fn entry(link: &str, title: &str) -> FeedEntry {
        FeedEntry {
            link: link.to_string(),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn anchor(href: &str, text: &str) -> PageAnchor {
        PageAnchor {
            href: href.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn feed_items_skip_the_renderer() {
        let feeds = MockFeedReader::new().with_feed(
            "https://example.com/feed",
            vec![
                entry("https://example.com/a", "A"),
                entry("https://example.com/b", "B"),
                entry("https://example.com/c", "C"),
            ],
        );
        let renderer = MockPageRenderer::new(vec![]);
        let ex = extractor(
            feeds,
            renderer.clone(),
            MockRobots::allow_all(),
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );
        let source = ContentSource::new("https://example.com")
            .with_feeds(vec!["https://example.com/feed".into()]);

        let links = ex.extract_blog_links(&source).await.unwrap();

        assert_eq!(links.len(), 3);
        assert_eq!(links[0].title.as_deref(), Some("A"));
        assert_eq!(renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn feeds_are_deduplicated_and_failures_skipped() {
        let feeds = MockFeedReader::new()
            .with_feed(
                "https://example.com/feed1",
                vec![entry("https://example.com/a", "A"), entry("https://example.com/b", "B")],
            )
            .with_feed(
                "https://example.com/feed2",
                vec![entry("https://example.com/b/", "B again"), entry("mailto:x@y.z", "bad")],
            )
            .with_failure("https://example.com/broken", AppError::FeedError("bad xml".into()));
        let renderer = MockPageRenderer::new(vec![]);
        let ex = extractor(
            feeds,
            renderer.clone(),
            MockRobots::allow_all(),
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );
        let source = ContentSource::new("https://example.com").with_feeds(vec![
            "https://example.com/feed1".into(),
            "https://example.com/broken".into(),
            "https://example.com/feed2".into(),
        ]);

        let links = ex.extract_blog_links(&source).await.unwrap();
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_feeds_fall_back_to_page() {
        let feeds = MockFeedReader::new().with_feed("https://example.com/feed", vec![]);
        let renderer = MockPageRenderer::new(vec![anchor(
            "/news/2024/03/01/big-discovery-on-mars",
            "Mars",
        )]);
        let ex = extractor(
            feeds,
            renderer.clone(),
            MockRobots::allow_all(),
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );
        let source = ContentSource::new("https://example.com")
            .with_feeds(vec!["https://example.com/feed".into()]);

        let links = ex.extract_blog_links(&source).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(renderer.call_count(), 1);
    }

    #[tokio::test]
    async fn fast_filter_decides_without_classifier() {
        let renderer = MockPageRenderer::new(vec![
            anchor("/news/2024/03/01/big-discovery-on-mars", "Big discovery"),
            anchor("/about", "About us"),
        ]);
        let store = MemoryLinkStore::default();
        let ex = extractor(
            MockFeedReader::new(),
            renderer,
            MockRobots::allow_all(),
            store.clone(),
            ExtractorConfig::default(),
        );

        let links = ex
            .extract_blog_links(&ContentSource::new("https://example.com"))
            .await
            .unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].url,
            "https://example.com/news/2024/03/01/big-discovery-on-mars"
        );
        assert_eq!(links[0].title.as_deref(), Some("Big discovery"));
        assert!(store.classified().is_empty());
    }

    #[tokio::test]
    async fn undecided_urls_are_classified_and_recorded() {
        let renderer = MockPageRenderer::new(vec![
            anchor("/insights/post-mortem-of-our-big-outage", "Post mortem"),
            anchor("/insights/how-we-price-our-enterprise-plans", "Pricing"),
        ]);
        let store = MemoryLinkStore::default();
        let ex = extractor(
            MockFeedReader::new(),
            renderer,
            MockRobots::allow_all(),
            store.clone(),
            ExtractorConfig::default(),
        );

        let links = ex
            .extract_blog_links(&ContentSource::new("https://example.com"))
            .await
            .unwrap();

        assert_eq!(links.len(), 1);
        assert!(links[0].url.ends_with("post-mortem-of-our-big-outage"));
        let classified = store.classified();
        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].category, UrlCategory::News);
        assert_eq!(classified[1].category, UrlCategory::Unknown);
    }

    #[tokio::test]
    async fn classified_records_flush_in_chunks() {
        let anchors: Vec<PageAnchor> = (0..7)
            .map(|i| anchor(&format!("/insights/some-long-post-slug-{i}"), "x"))
            .collect();
        let store = MemoryLinkStore::default();
        let config = ExtractorConfig {
            flush_chunk: 3,
            ..ExtractorConfig::default()
        };
        let ex = extractor(
            MockFeedReader::new(),
            MockPageRenderer::new(anchors),
            MockRobots::allow_all(),
            store.clone(),
            config,
        );

        ex.extract_blog_links(&ContentSource::new("https://example.com"))
            .await
            .unwrap();

        assert_eq!(store.classified_batches(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn offsite_and_disallowed_links_are_dropped() {
        let renderer = MockPageRenderer::new(vec![
            anchor("https://blog.example.com/news/a-very-long-article-slug", "sub"),
            anchor("https://other.org/news/a-very-long-article-slug", "offsite"),
            anchor("https://intranet/news/a-very-long-article-slug", "bare host"),
            anchor("/news/private/a-very-long-article-slug", "private"),
            anchor("mailto:editor@example.com", "mail"),
        ]);
        let robots = MockRobots::deny_prefix("https://example.com/news/private");
        let ex = extractor(
            MockFeedReader::new(),
            renderer,
            robots,
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );

        let links = ex
            .extract_blog_links(&ContentSource::new("https://example.com"))
            .await
            .unwrap();

        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://blog.example.com/news/a-very-long-article-slug"]);
    }

    #[tokio::test]
    async fn robots_errors_fail_closed() {
        let renderer = MockPageRenderer::new(vec![anchor(
            "/news/2024/03/01/big-discovery-on-mars",
            "Mars",
        )]);
        let ex = extractor(
            MockFeedReader::new(),
            renderer,
            MockRobots::failing(),
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );

        let links = ex
            .extract_blog_links(&ContentSource::new("https://example.com"))
            .await
            .unwrap();
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn stash_prevents_reprocessing_within_process() {
        let renderer = MockPageRenderer::new(vec![anchor(
            "/news/2024/03/01/big-discovery-on-mars",
            "Mars",
        )]);
        let ex = extractor(
            MockFeedReader::new(),
            renderer,
            MockRobots::allow_all(),
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );
        let source = ContentSource::new("https://example.com");

        assert_eq!(ex.extract_blog_links(&source).await.unwrap().len(), 1);
        assert!(ex.extract_blog_links(&source).await.unwrap().is_empty());

        let stats = ex.stash().domain_stats("example.com");
        assert_eq!(stats.current_page, 2);
        assert_eq!(stats.selected_urls, 1);
        assert_eq!(stats.valid_blog_urls, 1);
    }

    #[tokio::test]
    async fn untrusted_feeds_are_filtered() {
        let feeds = MockFeedReader::new().with_feed(
            "https://example.com/feed",
            vec![
                entry("https://example.com/news/2024/a-long-article-about-things", "keep"),
                entry("https://example.com/tag/things", "drop"),
            ],
        );
        let ex = extractor(
            feeds,
            MockPageRenderer::new(vec![]),
            MockRobots::allow_all(),
            MemoryLinkStore::default(),
            ExtractorConfig::default().with_trust_feeds(false),
        );
        let source = ContentSource::new("https://example.com")
            .with_feeds(vec!["https://example.com/feed".into()]);

        let links = ex.extract_blog_links(&source).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title.as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn render_failure_is_a_source_failure() {
        let ex = extractor(
            MockFeedReader::new(),
            MockPageRenderer::failing("refused"),
            MockRobots::allow_all(),
            MemoryLinkStore::default(),
            ExtractorConfig::default(),
        );
        let err = ex
            .extract_blog_links(&ContentSource::new("https://example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NetworkError(_)));
    }
}
