//! Similarity Oracle — fuzzy string comparison behind every clustering decision.
//!
//! A pair matches when the character-sequence ratio reaches the threshold, or when
//! either normalised string contains the other ("Google" vs "Google LLC"). The ratio
//! is not guaranteed to be symmetric for every pair; containment is.

use similar::TextDiff;

/// Threshold for company / organisation names.
pub const COMPANY_MATCH_THRESHOLD: f32 = 0.85;

/// Job titles vary more in phrasing than company names, hence the looser bar.
pub const TITLE_MATCH_THRESHOLD: f32 = 0.80;

/// Lowercases and trims a value before comparison.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Character-sequence similarity in [0, 1]: `2 * matched / total` over both strings.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    TextDiff::from_chars(a, b).ratio()
}

/// Returns true when `a` and `b` are similar enough at `threshold`, or one contains the other.
///
/// An empty string is contained in everything, so callers drop unknown values first.
pub fn is_match(a: &str, b: &str, threshold: f32) -> bool {
    let a = normalize(a);
    let b = normalize(b);

    if similarity_ratio(&a, &b) >= threshold {
        return true;
    }

    a.contains(b.as_str()) || b.contains(a.as_str())
}

pub fn is_company_match(a: &str, b: &str) -> bool {
    is_match(a, b, COMPANY_MATCH_THRESHOLD)
}

pub fn is_title_match(a: &str, b: &str) -> bool {
    is_match(a, b, TITLE_MATCH_THRESHOLD)
}
