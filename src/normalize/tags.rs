//! Keyword table mapping listing labels to canonical tags.
//!
//! New formats or event types are added by extending `TAG_RULES`; the
//! normalizer never branches on individual tags.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// (pattern, canonical tag, strip from display title)
const TAG_RULES: &[(&str, &str, bool)] = &[
    (r"\bimax\b", "IMAX", true),
    (r"\b70\s?mm\b", "70mm", true),
    (r"\b35\s?mm\b", "35mm", true),
    (r"\b16\s?mm\b", "16mm", true),
    (r"\b4k\b", "4K", true),
    (r"\b3d\b", "3D", true),
    (r"\bq\s*(?:&amp;|&|\+|and)\s*a\b", "Q&A", true),
    (r"\brelaxed\s+(?:screening|performance)s?\b", "relaxed-screening", true),
    (r"\b(?:subtitled|subtitles|subs?)\b", "subtitled", true),
    (r"\baudio[\s-]*descri(?:bed|ption)\b", "audio-described", true),
    (r"\b(?:hard\s+of\s+hearing|hoh)\b", "hard-of-hearing", true),
    (r"\b(?:parents?|carers?)\s*(?:&amp;|&|\+|and)\s*bab(?:y|ies)\b", "parent-and-baby", true),
    (r"\bsing[\s-]*a?[\s-]*long(?:[\s-]*a)?\b", "sing-along", false),
    (r"\bpreviews?\b", "preview", true),
    (r"\b(?:intro|introduced\s+by|introduction)\b", "intro", true),
    (r"\bfamily\s+(?:screening|film\s+club|friendly)\b", "family", true),
    (r"\bno\s+ads\b", "no-ads", true),
    (r"\b(?:marathon|all[\s-]*nighter)\b", "marathon", false),
];

pub struct TagRule {
    pub tag: &'static str,
    pub pattern: Regex,
    pub strip_from_title: bool,
}

pub static TAG_TABLE: Lazy<Vec<TagRule>> = Lazy::new(|| {
    TAG_RULES
        .iter()
        .map(|&(pattern, tag, strip_from_title)| TagRule {
            tag,
            pattern: Regex::new(&format!("(?i){pattern}")).expect("valid tag pattern"),
            strip_from_title,
        })
        .collect()
});

static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\(\[]([^\)\]]*)[\)\]]").expect("valid bracket pattern"));

/// Separators and connective words left dangling once a label is cut off
static DANGLING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[\s\-–—:|+,/&;]+|\s+(?:with|in|plus|and|on|at)\b)+$")
        .expect("valid dangling pattern")
});

/// Separator ending a title's leading segment: "Preview: X", "IMAX - X", "35mm | X"
static PREFIX_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*:\s*|\s+[\-–—|]\s+").expect("valid separator pattern"));

/// Punctuation and connective words that join labels together
static CONNECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s\-–—:|+,/&;]+|\b(?:with|in|plus|and|on|at)\b")
        .expect("valid connective pattern")
});

/// Non-label words tolerated in a label prefix ("Sneak Preview:", "Exclusive IMAX Preview:")
const MAX_PREFIX_QUALIFIER_WORDS: usize = 2;

/// Every tag whose pattern matches any of `texts`
pub fn extract_tags<'a>(texts: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for text in texts {
        for rule in TAG_TABLE.iter() {
            if rule.pattern.is_match(text) {
                tags.insert(rule.tag.to_string());
            }
        }
    }
    tags
}

fn is_label_text(text: &str) -> bool {
    TAG_TABLE
        .iter()
        .any(|rule| rule.strip_from_title && rule.pattern.is_match(text))
}

/// Words left once every strippable label and connective is removed
fn label_residue(text: &str) -> Vec<String> {
    let mut residue = text.to_string();
    for rule in TAG_TABLE.iter().filter(|r| r.strip_from_title) {
        residue = rule.pattern.replace_all(&residue, " ").into_owned();
    }
    CONNECTIVE
        .replace_all(&residue, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Remainder after a leading run of labels such as "Preview + Q&A: X"
fn strip_label_prefix(title: &str) -> Option<&str> {
    let sep = PREFIX_SEPARATOR.find(title)?;
    let head = &title[..sep.start()];
    let rest = title[sep.end()..].trim();
    if rest.is_empty() || !is_label_text(head) {
        return None;
    }
    (label_residue(head).len() <= MAX_PREFIX_QUALIFIER_WORDS).then_some(rest)
}

/// Remove label noise from a display title: bracketed label groups, a leading
/// run of labels ending in a separator, and everything from the first trailing
/// label onwards. Never returns an empty title; falls back to the input instead.
pub fn strip_labels(title: &str) -> String {
    let debracketed = BRACKETED.replace_all(title, |caps: &regex::Captures| {
        if is_label_text(&caps[1]) {
            " ".to_string()
        } else {
            caps[0].to_string()
        }
    });
    let mut working = debracketed.split_whitespace().collect::<Vec<_>>().join(" ");

    while let Some(rest) = strip_label_prefix(&working) {
        working = rest.to_string();
    }

    let cut = TAG_TABLE
        .iter()
        .filter(|r| r.strip_from_title)
        .filter_map(|r| r.pattern.find_iter(&working).find(|m| m.start() > 0))
        .map(|m| m.start())
        .min();

    if let Some(cut) = cut {
        // A label before the first colon belongs to the title proper
        let inside_head = working.find(':').is_some_and(|colon| colon > cut);
        let head = DANGLING.replace(&working[..cut], "");
        let head = head.trim();
        if !inside_head && !label_residue(head).is_empty() {
            working = head.to_string();
        }
    }

    let result = working.trim().to_string();
    if result.is_empty() {
        title.trim().to_string()
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_compiles() {
        assert_eq!(TAG_TABLE.len(), TAG_RULES.len());
    }

    #[test]
    fn test_extracts_format_and_event_tags() {
        let tags = extract_tags(["Oppenheimer (35mm) Q&A with director"]);
        assert!(tags.contains("35mm"));
        assert!(tags.contains("Q&A"));
    }

    #[test]
    fn test_q_and_a_variants() {
        for text in ["Q&A", "q + a", "Q and A", "Q&amp;A"] {
            assert!(extract_tags([text]).contains("Q&A"), "{text}");
        }
    }

    #[test]
    fn test_labels_contribute_tags() {
        let tags = extract_tags(["Past Lives", "Relaxed Screening", "Subtitled"]);
        assert!(tags.contains("relaxed-screening"));
        assert!(tags.contains("subtitled"));
    }

    #[test]
    fn test_strip_removes_trailing_and_bracketed_labels() {
        assert_eq!(strip_labels("Oppenheimer (35mm) Q&A with director"), "Oppenheimer");
        assert_eq!(strip_labels("Dune: Part Two in IMAX"), "Dune: Part Two");
        assert_eq!(strip_labels("Paris, Texas - 35mm"), "Paris, Texas");
        assert_eq!(strip_labels("IMAX: Interstellar"), "Interstellar");
    }

    #[test]
    fn test_strip_removes_label_prefix_joined_by_connectives() {
        assert_eq!(
            strip_labels("Preview + Q&A: The Room Next Door"),
            "The Room Next Door"
        );
        assert_eq!(
            strip_labels("Relaxed Screening + Intro: Paddington in Peru"),
            "Paddington in Peru"
        );
        assert_eq!(strip_labels("35mm | Paris, Texas"), "Paris, Texas");
    }

    #[test]
    fn test_strip_removes_qualified_label_prefix() {
        assert_eq!(strip_labels("Sneak Preview: Conclave"), "Conclave");
    }

    #[test]
    fn test_strip_never_leaves_only_label_text() {
        assert_eq!(strip_labels("Preview + Q&A"), "Preview + Q&A");
        assert_eq!(strip_labels("IMAX 3D"), "IMAX 3D");
    }

    #[test]
    fn test_strip_keeps_label_inside_titled_head() {
        assert_eq!(
            strip_labels("The Last Preview Show: A Documentary"),
            "The Last Preview Show: A Documentary"
        );
    }

    #[test]
    fn test_strip_keeps_non_label_brackets() {
        assert_eq!(strip_labels("Nosferatu (1922)"), "Nosferatu (1922)");
    }

    #[test]
    fn test_strip_never_empties_title() {
        assert_eq!(strip_labels("IMAX"), "IMAX");
    }

    #[test]
    fn test_sing_along_title_is_kept() {
        let title = "Sing-A-Long-A Grease";
        assert_eq!(strip_labels(title), title);
        assert!(extract_tags([title]).contains("sing-along"));
    }
}
