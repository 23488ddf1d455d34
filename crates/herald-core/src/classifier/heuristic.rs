use url::Url;

use crate::models::UrlCategory;

/// Confidence reported for a keyword match.
pub const KEYWORD_CONFIDENCE: f32 = 0.5;

const NEWS_KEYWORDS: &[&str] = &["news", "article", "blog", "post"];
const JOBS_KEYWORDS: &[&str] = &["jobs", "career", "position"];

/// Keyword match on the URL path. Never fails; unparseable input is `Unknown`.
pub fn classify(raw: &str) -> (UrlCategory, f32) {
    let path = match Url::parse(raw.trim()) {
        Ok(url) => url.path().to_ascii_lowercase(),
        Err(_) => return (UrlCategory::Unknown, 0.0),
    };

    if NEWS_KEYWORDS.iter().any(|k| path.contains(k)) {
        (UrlCategory::News, KEYWORD_CONFIDENCE)
    } else if JOBS_KEYWORDS.iter().any(|k| path.contains(k)) {
        (UrlCategory::Jobs, KEYWORD_CONFIDENCE)
    } else {
        (UrlCategory::Unknown, 0.0)
    }
}
