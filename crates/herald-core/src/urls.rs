//! URL canonicalization, validation, and coarse link classification.
//!
//! Everything here is pure: no I/O, no shared state.

use std::net::IpAddr;

use url::Url;

use crate::error::AppError;

/// Query parameters that only carry tracking information.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_cid",
    "mc_eid",
];

/// Extensions that never point at an article page.
const EXCLUDED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "zip", "gz", "mp3", "mp4", "avi",
    "mov", "css", "js", "json", "xml", "rss", "atom", "txt", "doc", "docx", "xls", "xlsx",
];

const CONTACT_SCHEMES: &[&str] = &["mailto:", "tel:", "sms:", "callto:"];

const EXCLUDED_SCHEMES: &[&str] = &["javascript:", "data:", "file:", "ftp:", "about:", "blob:"];

/// Coarse kind of a raw `href` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// mailto:, tel: and similar.
    Contact,
    /// No scheme; must be resolved against the page URL.
    Relative,
    /// Absolute http(s) URL.
    Absolute,
    /// Fragment-only, script, data, non-http scheme, or a binary/static asset.
    Excluded,
}

/// Classify a raw `href` without resolving it.
pub fn classify_link(href: &str) -> LinkKind {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();

    if href.is_empty() || href.starts_with('#') {
        return LinkKind::Excluded;
    }
    if CONTACT_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return LinkKind::Contact;
    }
    if EXCLUDED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return LinkKind::Excluded;
    }
    if has_excluded_extension(&lower) {
        return LinkKind::Excluded;
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return LinkKind::Absolute;
    }
    if has_scheme(&lower) {
        return LinkKind::Excluded;
    }
    LinkKind::Relative
}

fn has_scheme(lower: &str) -> bool {
    match lower.find(':') {
        Some(idx) => {
            let scheme = &lower[..idx];
            !scheme.is_empty()
                && !scheme.contains('/')
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn has_excluded_extension(lower: &str) -> bool {
    let path = lower
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => EXCLUDED_EXTENSIONS.contains(&ext),
        _ => false,
    }
}

/// Canonicalize `raw`, resolving it against `base` when it is relative.
///
/// Steps: reject non-http(s) and asset links, resolve, drop the fragment,
/// drop tracking query parameters and an empty query, collapse duplicate
/// slashes, and strip trailing slashes (except for the root path). Host and
/// scheme are lowercased and default ports removed by the parser.
///
/// Applying it to its own output returns the same string.
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<String, AppError> {
    let raw = raw.trim();
    let mut url = match classify_link(raw) {
        LinkKind::Absolute => Url::parse(raw)
            .map_err(|e| AppError::ValidationError(format!("Invalid URL '{raw}': {e}")))?,
        LinkKind::Relative => {
            let base = base.ok_or_else(|| {
                AppError::ValidationError(format!("Relative URL '{raw}' without a base"))
            })?;
            base.join(raw)
                .map_err(|e| AppError::ValidationError(format!("Cannot resolve '{raw}': {e}")))?
        }
        LinkKind::Contact | LinkKind::Excluded => {
            return Err(AppError::ValidationError(format!(
                "Not a crawlable link: '{raw}'"
            )));
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::ValidationError(format!(
            "URL scheme '{}' is not allowed",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::ValidationError(format!("URL has no host: '{raw}'")));
    }

    url.set_fragment(None);

    let path = normalize_path(url.path());
    url.set_path(&path);

    if let Some(query) = url.query() {
        if query.is_empty() {
            url.set_query(None);
        } else {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let kept: Vec<&(String, String)> = pairs
                .iter()
                .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
                .collect();
            if kept.is_empty() {
                url.set_query(None);
            } else if kept.len() != pairs.len() {
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
        }
    }

    Ok(url.to_string())
}

fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

/// True for absolute http(s) URLs with a plausible host.
pub fn is_valid_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw.trim()) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host_str() {
        Some(host) if host.parse::<IpAddr>().is_ok() || host.starts_with('[') => true,
        Some(host) => host == "localhost" || (host.contains('.') && !host.ends_with('.')),
        None => false,
    }
}

/// Lowercased host of an absolute URL.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()?
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
}

/// Last two labels of a hostname (`news.bbc.co.uk` → `co.uk` is accepted as a
/// known limitation of the two-label rule). IP literals are returned as-is.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    labels[labels.len() - 2..].join(".")
}

/// True if both hosts share the same registrable domain (subdomains allowed).
pub fn same_site(host: &str, other: &str) -> bool {
    registrable_domain(host) == registrable_domain(other)
}
