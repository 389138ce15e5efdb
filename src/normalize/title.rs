use once_cell::sync::Lazy;
use regex::Regex;

use super::tags::strip_labels;

/// Event-series prefixes that precede the actual film title
const BOILERPLATE_PREFIXES: &[&str] = &[
    "Family Film Club:",
    "Event Cinema:",
    "Silent Film & Live Music:",
    "Pay What You Can:",
    "Magic Mondays:",
    "Parent & Baby:",
    "Preview:",
];

static CERTIFICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[\(\[](?:u|pg|12|12a|15|18|r18|tbc|ctbc|e)\*?[\)\]]\s*$")
        .expect("valid certificate pattern")
});

static DUPLICATE_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*\((\d{4})\)\s*\((\d{4})\)\s*$").expect("valid duplicate year pattern")
});

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&ndash;", "–")
        .replace("&mdash;", "—")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(text[prefix.len()..].trim_start())
    } else {
        None
    }
}

fn strip_suffix_ci<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    let tail = text.get(split..)?;
    if tail.eq_ignore_ascii_case(suffix) {
        Some(text[..split].trim_end())
    } else {
        None
    }
}

fn strip_venue_name<'a>(text: &'a str, cinema_name: &str) -> &'a str {
    if cinema_name.is_empty() {
        return text;
    }
    let mut out = text;
    for joiner in [" presents:", " presents", ":", " -"] {
        if let Some(rest) = strip_prefix_ci(out, &format!("{cinema_name}{joiner}")) {
            if !rest.is_empty() {
                out = rest;
                break;
            }
        }
    }
    for separator in [" - ", " | ", " @ ", " at "] {
        if let Some(rest) = strip_suffix_ci(out, &format!("{separator}{cinema_name}")) {
            if !rest.is_empty() {
                out = rest;
                break;
            }
        }
    }
    out
}

/// Produce the display title for a listing. Returns `None` when nothing is left.
pub fn clean_title(raw: &str, cinema_name: &str) -> Option<String> {
    let mut title = collapse_whitespace(&decode_entities(raw));

    for prefix in BOILERPLATE_PREFIXES {
        if let Some(rest) = strip_prefix_ci(&title, prefix) {
            if !rest.is_empty() {
                title = rest.to_string();
            }
        }
    }
    title = strip_venue_name(&title, cinema_name).to_string();

    while CERTIFICATE.is_match(&title) {
        let stripped = CERTIFICATE.replace(&title, "").to_string();
        if stripped.is_empty() {
            break;
        }
        title = stripped;
    }
    if let Some(caps) = DUPLICATE_YEAR.captures(&title) {
        if caps[1] == caps[2] {
            let year = caps[1].to_string();
            title = DUPLICATE_YEAR
                .replace(&title, format!(" ({year})").as_str())
                .to_string();
        }
    }

    let title = strip_labels(&title);
    let title = title.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '|');
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
