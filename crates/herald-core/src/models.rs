use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// An external site or feed configuration re-crawled on a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSource {
    pub id: Uuid,
    pub url: String,
    /// RSS/Atom feed URLs. Empty means the source is scraped from HTML.
    #[serde(default)]
    pub rss_urls: Vec<String>,
    pub content_type: String,
    /// Minimum minutes between two extraction passes.
    pub scrape_frequency_minutes: i32,
    pub failure_count: i32,
    pub has_failed: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ContentSource {
    /// Build an ad-hoc source that has never been crawled.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            rss_urls: Vec::new(),
            content_type: "news".to_string(),
            scrape_frequency_minutes: 60,
            failure_count: 0,
            has_failed: false,
            refreshed_at: None,
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<String>) -> Self {
        self.rss_urls = feeds;
        self
    }

    pub fn has_feeds(&self) -> bool {
        self.rss_urls.iter().any(|u| !u.trim().is_empty())
    }
}

/// A normalized, destination-agnostic article record discovered during one
/// extraction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLink {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub featured_image: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CandidateLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            author: None,
            description: None,
            published_at: None,
            featured_image: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let trimmed = title.trim();
        if !trimmed.is_empty() {
            self.title = Some(trimmed.to_string());
        }
        self
    }
}

/// Classifier output label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlCategory {
    News,
    Jobs,
    Unknown,
}

impl UrlCategory {
    pub const ALL: [UrlCategory; 3] = [UrlCategory::News, UrlCategory::Jobs, UrlCategory::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrlCategory::News => "news",
            UrlCategory::Jobs => "jobs",
            UrlCategory::Unknown => "unknown",
        }
    }

    /// Index of this label in the model's output layer.
    pub fn index(&self) -> usize {
        match self {
            UrlCategory::News => 0,
            UrlCategory::Jobs => 1,
            UrlCategory::Unknown => 2,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => UrlCategory::News,
            1 => UrlCategory::Jobs,
            _ => UrlCategory::Unknown,
        }
    }
}

impl fmt::Display for UrlCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UrlCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "news" => Ok(UrlCategory::News),
            "jobs" | "job" => Ok(UrlCategory::Jobs),
            "unknown" | "other" => Ok(UrlCategory::Unknown),
            _ => Err(format!("Unknown URL category: {}", s)),
        }
    }
}

/// Audit record of one classifier decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedUrl {
    pub url: String,
    pub category: UrlCategory,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// Links harvested from one source, ready for persistence.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHarvest {
    pub source_id: Uuid,
    pub links: Vec<CandidateLink>,
}

/// Compute a SHA-256 hash of a byte slice, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
