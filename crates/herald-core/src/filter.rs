//! Fast, rule-based "is this an article?" decision applied before the classifier.

use serde::{Deserialize, Serialize};
use url::Url;

/// Rules for the fast exclusion/inclusion pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleFilterConfig {
    /// Minimum number of hyphens in the last path segment. 0 disables the check.
    pub min_hyphens: usize,
    /// Path segments that mark listing, navigation, or account pages.
    pub exclusion_segments: Vec<String>,
    /// Path segments that strongly indicate an article.
    pub inclusion_segments: Vec<String>,
}

impl Default for ArticleFilterConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            min_hyphens: 3,
            exclusion_segments: owned(&[
                "category", "categories", "tag", "tags", "topic", "topics", "author", "authors",
                "page", "contact", "contact-us", "about", "about-us", "login", "logout", "signin",
                "signup", "register", "account", "privacy", "privacy-policy", "terms", "search",
                "subscribe", "newsletter", "feed", "cart", "wp-admin", "wp-login.php",
            ]),
            inclusion_segments: owned(&["blog", "news", "article", "articles", "story", "stories"]),
        }
    }
}

impl ArticleFilterConfig {
    pub fn with_min_hyphens(mut self, min_hyphens: usize) -> Self {
        self.min_hyphens = min_hyphens;
        self
    }
}

/// Why a URL was rejected by the fast pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    RootPath,
    ExcludedSegment(String),
    DateArchive,
    ShortSlug { hyphens: usize },
}

/// Outcome of the fast pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleDecision {
    Exclude(ExclusionReason),
    Include,
    /// Neither list was conclusive; ask the classifier.
    Undecided,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    config: ArticleFilterConfig,
}

impl ArticleFilter {
    pub fn new(config: ArticleFilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ArticleFilterConfig {
        &self.config
    }

    /// Exclusions are checked first, then inclusions.
    pub fn decide(&self, url: &Url) -> ArticleDecision {
        let segments: Vec<String> = url
            .path_segments()
            .map(|segs| {
                segs.filter(|s| !s.is_empty())
                    .map(|s| s.to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let Some(last) = segments.last() else {
            return ArticleDecision::Exclude(ExclusionReason::RootPath);
        };

        if let Some(segment) = segments
            .iter()
            .find(|s| self.config.exclusion_segments.iter().any(|ex| ex == *s))
        {
            return ArticleDecision::Exclude(ExclusionReason::ExcludedSegment(segment.clone()));
        }

        if is_date_segment(last) {
            return ArticleDecision::Exclude(ExclusionReason::DateArchive);
        }

        let hyphens = last.matches('-').count();
        if hyphens < self.config.min_hyphens {
            return ArticleDecision::Exclude(ExclusionReason::ShortSlug { hyphens });
        }

        let included = segments.iter().any(|s| {
            self.config.inclusion_segments.iter().any(|inc| inc == s) || is_year_segment(s)
        });
        if included {
            ArticleDecision::Include
        } else {
            ArticleDecision::Undecided
        }
    }
}

/// Four digits in a plausible publication range.
pub fn is_year_segment(segment: &str) -> bool {
    segment.len() == 4
        && segment.bytes().all(|b| b.is_ascii_digit())
        && segment.parse::<u16>().is_ok_and(|y| (1990..=2099).contains(&y))
}

/// Purely numeric (`03`, `2024`) or `YYYY-MM` / `YYYY-MM-DD`.
pub fn is_date_segment(segment: &str) -> bool {
    if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    let parts: Vec<&str> = segment.split('-').collect();
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match parts.as_slice() {
        [y, m] => is_year_segment(y) && m.len() == 2 && all_digits(m),
        [y, m, d] => {
            is_year_segment(y) && m.len() == 2 && all_digits(m) && d.len() == 2 && all_digits(d)
        }
        _ => false,
    }
}
