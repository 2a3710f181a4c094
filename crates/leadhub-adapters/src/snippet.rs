//! Decomposition of profile search results into [`RawLeadRecord`]s.
//!
//! Titles follow the search surface's `Name - Role at Company | LinkedIn` shape with many
//! variations; snippets often lead with `Location · Role · Company`.

use leadhub_core::normalize::{clean_text, normalize_whitespace};
use leadhub_core::RawLeadRecord;
use thiserror::Error;

use crate::search::SearchResult;

const PROFILE_MARKER: &str = "linkedin.com/in/";
const MAX_NAME_CHARS: usize = 80;
const MAX_LOCATION_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("result link is not a profile: {0:?}")]
    NotAProfile(String),
    #[error("result title has no usable name: {0:?}")]
    MissingName(String),
}

pub fn parse_search_result(result: &SearchResult) -> Result<RawLeadRecord, ParseError> {
    let link = result.link.trim();
    if !link.to_ascii_lowercase().contains(PROFILE_MARKER) {
        return Err(ParseError::NotAProfile(link.to_string()));
    }

    let title = normalize_whitespace(&result.title);
    let (name, remainder) = split_title(&title);
    let name = name
        .filter(|n| is_plausible_name(n))
        .ok_or_else(|| ParseError::MissingName(title.clone()))?;

    let snippet = normalize_whitespace(&result.snippet);
    let (role, company) = split_role_company(remainder, &snippet);

    Ok(RawLeadRecord {
        name: name.to_string(),
        profile_url: link.to_string(),
        role,
        company,
        location: extract_location(&result.snippet),
        title,
        snippet,
    })
}

fn strip_site_suffix(title: &str) -> &str {
    for sep in [" | ", " - ", " – "] {
        if let Some((head, tail)) = title.rsplit_once(sep) {
            if tail.trim().eq_ignore_ascii_case("linkedin") {
                return head.trim();
            }
        }
    }
    title
}

/// Splits a result title into name and remainder at the first ` - ` (or ` – `), else ` | `.
fn split_title(title: &str) -> (Option<&str>, Option<&str>) {
    let title = strip_site_suffix(title);
    let split = title
        .split_once(" - ")
        .or_else(|| title.split_once(" – "))
        .or_else(|| title.split_once(" | "));
    let (name, remainder) = match split {
        Some((name, rest)) => (name, Some(rest)),
        None => (title, None),
    };
    let name = name.trim();
    let remainder = remainder.map(str::trim).filter(|r| !r.is_empty());
    ((!name.is_empty()).then_some(name), remainder)
}

fn is_plausible_name(name: &str) -> bool {
    name.chars().count() <= MAX_NAME_CHARS
        && name.chars().any(char::is_alphabetic)
        && !name.eq_ignore_ascii_case("linkedin")
}

/// Case-insensitive split on the first ` at `.
fn split_at_word(text: &str) -> Option<(&str, &str)> {
    let idx = text.to_ascii_lowercase().find(" at ")?;
    Some((&text[..idx], &text[idx + 4..]))
}

fn non_empty(text: &str) -> Option<String> {
    clean_text(Some(text))
}

fn split_role_company(remainder: Option<&str>, snippet: &str) -> (Option<String>, Option<String>) {
    if let Some(rest) = remainder {
        if let Some((role, company)) = split_at_word(rest) {
            return (non_empty(role), non_empty(company));
        }
        if let Some((role, company)) = rest
            .rsplit_once(" - ")
            .or_else(|| rest.rsplit_once(" – "))
            .or_else(|| rest.rsplit_once(" | "))
        {
            return (non_empty(role), non_empty(company));
        }
    }

    let first_sentence = snippet.split('.').next().unwrap_or_default();
    if let Some((role, company)) = split_at_word(first_sentence) {
        return (non_empty(role), non_empty(company));
    }

    (remainder.and_then(non_empty), None)
}

/// `Location: X` wins; otherwise a short leading `X · ...` segment that does not read like a
/// headline or a connection count.
fn extract_location(snippet: &str) -> Option<String> {
    if let Some((_, after)) = snippet.split_once("Location:") {
        let value = after.split('\n').next().unwrap_or_default();
        let value = value.split('·').next().unwrap_or_default();
        return non_empty(value);
    }

    let (head, _) = snippet.split_once('·')?;
    let head = normalize_whitespace(head);
    let lower = head.to_lowercase();
    if head.is_empty()
        || head.chars().count() >= MAX_LOCATION_CHARS
        || lower.contains("connection")
        || lower.contains(" at ")
    {
        return None;
    }
    Some(head)
}
