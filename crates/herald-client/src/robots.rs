//! robots.txt policy with a per-origin cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_core::error::AppError;
use herald_core::traits::{Fetcher, RobotsPolicy};
use moka::Expiry;
use moka::future::Cache;
use robotstxt::DefaultMatcher;
use url::Url;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// A failed lookup denies the origin only this long before it is retried.
const FAILURE_TTL: Duration = Duration::from_secs(5 * 60);
const CACHE_CAPACITY: u64 = 10_000;

/// What we learned from an origin's robots.txt.
#[derive(Debug, Clone)]
enum RobotsRules {
    /// No robots.txt (4xx): everything is allowed.
    AllowAll,
    /// robots.txt could not be fetched: fail closed.
    DenyAll,
    Body(Arc<str>),
}

impl RobotsRules {
    fn allows(&self, url: &str, agent: &str) -> bool {
        match self {
            RobotsRules::AllowAll => true,
            RobotsRules::DenyAll => false,
            RobotsRules::Body(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, product_token(agent), url)
            }
        }
    }
}

struct RulesExpiry {
    failure_ttl: Duration,
}

impl Expiry<String, RobotsRules> for RulesExpiry {
    fn expire_after_create(
        &self,
        _origin: &String,
        rules: &RobotsRules,
        _created_at: Instant,
    ) -> Option<Duration> {
        match rules {
            RobotsRules::DenyAll => Some(self.failure_ttl),
            RobotsRules::AllowAll | RobotsRules::Body(_) => Some(CACHE_TTL),
        }
    }
}

/// Fetches `{origin}/robots.txt` once per origin and answers policy checks
/// from the cached copy for 24 hours. Failed lookups are kept for minutes.
#[derive(Clone)]
pub struct RobotsClient<F: Fetcher> {
    fetcher: F,
    cache: Cache<String, RobotsRules>,
}

impl<F: Fetcher> RobotsClient<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_failure_ttl(fetcher, FAILURE_TTL)
    }

    pub fn with_failure_ttl(fetcher: F, failure_ttl: Duration) -> Self {
        Self {
            fetcher,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .expire_after(RulesExpiry { failure_ttl })
                .build(),
        }
    }

    async fn rules_for(&self, origin: String) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        self.cache
            .get_with(origin, async {
                match self.fetcher.fetch(&robots_url).await {
                    Ok(body) => RobotsRules::Body(Arc::from(body)),
                    Err(AppError::HttpStatus { status, .. })
                        if (400..500).contains(&status) && status != 429 =>
                    {
                        tracing::debug!(url = %robots_url, status, "No robots.txt, allowing all");
                        RobotsRules::AllowAll
                    }
                    Err(e) => {
                        tracing::warn!(url = %robots_url, error = %e, "robots.txt unavailable, denying origin");
                        RobotsRules::DenyAll
                    }
                }
            })
            .await
    }
}

impl<F: Fetcher + 'static> RobotsPolicy for RobotsClient<F> {
    async fn is_allowed(&self, url: &str, agent: &str) -> Result<bool, AppError> {
        let parsed =
            Url::parse(url).map_err(|e| AppError::ValidationError(format!("{url}: {e}")))?;
        let origin = parsed.origin();
        if !origin.is_tuple() {
            return Err(AppError::ValidationError(format!("{url} has no origin")));
        }
        let rules = self.rules_for(origin.ascii_serialization()).await;
        Ok(rules.allows(url, agent))
    }
}

/// `HeraldBot/0.1 (+https://…)` → `HeraldBot`.
fn product_token(agent: &str) -> &str {
    agent
        .split(['/', ' '])
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or(agent)
}
