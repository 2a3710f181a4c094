//! Text normalization shared by scrapers, the processor and persistence keys.

use once_cell::sync::Lazy;
use regex::Regex;

static LEGAL_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:inc|llc|ltd|corp|corporation|limited|incorporated)\.?,?\s*$")
        .expect("legal suffix regex is hardcoded and valid")
});

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-normalized value, or `None` when nothing is left.
pub fn clean_text(input: Option<&str>) -> Option<String> {
    let cleaned = normalize_whitespace(input?);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Display form of a company name with a trailing legal suffix removed.
pub fn normalize_company_name(input: &str) -> String {
    let cleaned = normalize_whitespace(input);
    let stripped = LEGAL_SUFFIX.replace(&cleaned, "");
    let stripped = stripped.trim_end_matches(|c: char| c == '.' || c == ',' || c.is_whitespace());
    if stripped.is_empty() {
        cleaned
    } else {
        stripped.to_string()
    }
}

/// Case-insensitive identity key for a company.
pub fn company_key(input: &str) -> String {
    normalize_company_name(input).to_lowercase()
}

/// Identity form of a profile URL: https, lowercased, no query, fragment or trailing slash.
/// LinkedIn country subdomains collapse onto `www.linkedin.com`.
pub fn normalize_profile_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let cut = trimmed
        .find(|c| c == '?' || c == '#')
        .map_or(trimmed, |idx| &trimmed[..idx]);
    let lower = cut.to_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower)
        .trim_end_matches('/');

    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    if host.is_empty() {
        return None;
    }
    let host = if host == "linkedin.com" || host.ends_with(".linkedin.com") {
        "www.linkedin.com"
    } else {
        host
    };
    if path.is_empty() {
        Some(format!("https://{host}"))
    } else {
        Some(format!("https://{host}/{path}"))
    }
}

/// Case-insensitive search for `term` in `haystack` on word boundaries, so `vp` does not
/// match inside `mvp`.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    find_term(haystack, term, false)
}

/// Like [`contains_term`], but a plural `s` may follow the term, so `Product Manager` also
/// matches `Product Managers`.
pub fn contains_role_term(haystack: &str, term: &str) -> bool {
    find_term(haystack, term, true)
}

fn find_term(haystack: &str, term: &str, allow_plural: bool) -> bool {
    let term = normalize_whitespace(term).to_lowercase();
    if term.is_empty() {
        return false;
    }
    let hay = haystack.to_lowercase();

    let mut start = 0;
    while let Some(pos) = hay[start..].find(&term) {
        let begin = start + pos;
        let mut end = begin + term.len();
        if allow_plural && hay[end..].starts_with('s') {
            let after_s = hay[end + 1..].chars().next();
            if after_s.map_or(true, |c| !c.is_alphanumeric()) {
                end += 1;
            }
        }
        let before_ok = hay[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = hay[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = begin + hay[begin..].chars().next().map_or(1, char::len_utf8);
    }
    false
}
