//! Fixed-size numeric feature vector for a URL.

use url::Url;

use crate::filter::is_date_segment;

/// Keywords whose presence in the path becomes a 0/1 feature, in vector order.
pub const KEYWORDS: [&str; 7] = ["news", "article", "blog", "post", "jobs", "career", "position"];

/// Length of every vector produced by [`extract_features`].
pub const FEATURE_COUNT: usize = 4 + KEYWORDS.len() + 4;

/// Human-readable feature names, index-aligned with the vector.
pub fn feature_names() -> Vec<String> {
    let mut names = vec![
        "path_length".to_string(),
        "slash_count".to_string(),
        "has_digit".to_string(),
        "avg_segment_length".to_string(),
    ];
    names.extend(KEYWORDS.iter().map(|k| format!("kw_{k}")));
    names.extend(
        [
            "ends_with_extension",
            "ends_with_date",
            "last_segment_hyphens",
            "last_segment_length",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    names
}

/// Extract features from an absolute URL.
///
/// Returns an empty vector when the URL cannot be parsed; callers treat that
/// as "no usable features".
pub fn extract_features(raw: &str) -> Vec<f32> {
    let Ok(url) = Url::parse(raw.trim()) else {
        return Vec::new();
    };
    let path = url.path().to_ascii_lowercase();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.last().copied().unwrap_or_default();

    let avg_segment_length = if segments.is_empty() {
        0.0
    } else {
        segments.iter().map(|s| s.len()).sum::<usize>() as f32 / segments.len() as f32
    };
    let ends_with_extension = last
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty() && ext.len() <= 5);

    let mut features = Vec::with_capacity(FEATURE_COUNT);
    features.push(path.len() as f32);
    features.push(path.matches('/').count() as f32);
    features.push(flag(path.bytes().any(|b| b.is_ascii_digit())));
    features.push(avg_segment_length);
    features.extend(KEYWORDS.iter().map(|k| flag(path.contains(k))));
    features.push(flag(ends_with_extension));
    features.push(flag(!last.is_empty() && is_date_segment(last)));
    features.push(last.matches('-').count() as f32);
    features.push(last.len() as f32);
    features
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}
