//! Stable screening identity and the merge rule for duplicates.
//!
//! Ids are a pure function of durable upstream fields so that successive runs over
//! unchanged listings produce the same id set. Merging is a semilattice join: the
//! result does not depend on the order or grouping in which duplicates arrive.

use crate::types::Screening;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const ID_HEX_LEN: usize = 32;

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid"];

fn hash_parts(parts: &[&str]) -> String {
    let mut s = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            s.push('|');
        }
        s.push_str(part);
    }

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let mut out = hex::encode(hasher.finalize());
    out.truncate(ID_HEX_LEN);
    out
}

/// Compute the id for a screening, preferring the strongest identifier available:
/// provider session id, then booking URL, then title and start time.
pub fn screening_id(
    cinema_id: &str,
    provider_session_id: Option<&str>,
    booking_url: Option<&str>,
    film_title: &str,
    start_time: &DateTime<FixedOffset>,
) -> String {
    if let Some(session) = provider_session_id.map(str::trim).filter(|s| !s.is_empty()) {
        return hash_parts(&["session", cinema_id, session]);
    }
    if let Some(url) = booking_url.map(str::trim).filter(|s| !s.is_empty()) {
        let canonical = canonical_booking_url(url).unwrap_or_else(|| url.to_string());
        return hash_parts(&["booking", cinema_id, &canonical]);
    }
    let title = film_title.trim().to_lowercase();
    let start = start_time
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    hash_parts(&["fallback", cinema_id, &title, &start])
}

/// Drop the fragment and tracking parameters so the same booking page always
/// produces the same string. Returns `None` for anything that is not an absolute URL.
pub fn canonical_booking_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !name.starts_with("utm_") && !TRACKING_PARAMS.contains(&name.as_str())
        })
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

fn primary_order(a: &Screening, b: &Screening) -> Ordering {
    a.start_time
        .cmp(&b.start_time)
        .then_with(|| {
            a.start_time
                .offset()
                .local_minus_utc()
                .cmp(&b.start_time.offset().local_minus_utc())
        })
        .then_with(|| match (&a.end_time, &b.end_time) {
            (Some(x), Some(y)) => x
                .cmp(y)
                .then_with(|| x.offset().local_minus_utc().cmp(&y.offset().local_minus_utc())),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.film_title.cmp(&b.film_title))
}

fn prefer_present(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn smaller_raw(a: serde_json::Value, b: serde_json::Value) -> serde_json::Value {
    let a_text = serde_json::to_string(&a).unwrap_or_default();
    let b_text = serde_json::to_string(&b).unwrap_or_default();
    if b_text < a_text {
        b
    } else {
        a
    }
}

/// Merge two screenings that share an id. Commutative, associative and idempotent.
pub fn merge(a: Screening, b: Screening) -> Screening {
    debug_assert_eq!(a.id, b.id);
    let (primary, secondary) = if primary_order(&b, &a) == Ordering::Less {
        (b, a)
    } else {
        (a, b)
    };

    let mut tags = primary.tags;
    tags.extend(secondary.tags);

    Screening {
        id: primary.id,
        cinema_id: primary.cinema_id.min(secondary.cinema_id),
        film_title: primary.film_title,
        start_time: primary.start_time,
        end_time: primary.end_time,
        booking_url: prefer_present(primary.booking_url, secondary.booking_url),
        provider_session_id: prefer_present(
            primary.provider_session_id,
            secondary.provider_session_id,
        ),
        venue_label: prefer_present(primary.venue_label, secondary.venue_label),
        screen_label: prefer_present(primary.screen_label, secondary.screen_label),
        tags,
        source_raw: smaller_raw(primary.source_raw, secondary.source_raw),
    }
}

/// Accumulates screenings for one run, merging any that share an id
#[derive(Debug, Default)]
pub struct ScreeningSet {
    by_id: BTreeMap<String, Screening>,
    merged: usize,
}

impl ScreeningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a screening; returns true when it was merged into an existing one.
    pub fn insert(&mut self, screening: Screening) -> bool {
        match self.by_id.remove(&screening.id) {
            Some(existing) => {
                let merged = merge(existing, screening);
                self.by_id.insert(merged.id.clone(), merged);
                self.merged += 1;
                true
            }
            None => {
                self.by_id.insert(screening.id.clone(), screening);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Number of inserts absorbed by merging
    pub fn merged_count(&self) -> usize {
        self.merged
    }

    pub fn get(&self, id: &str) -> Option<&Screening> {
        self.by_id.get(id)
    }

    /// Final output ordered by start time, then cinema, then id
    pub fn into_sorted_vec(self) -> Vec<Screening> {
        let mut out: Vec<Screening> = self.by_id.into_values().collect();
        out.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.cinema_id.cmp(&b.cinema_id))
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }
}

impl Extend<Screening> for ScreeningSet {
    fn extend<I: IntoIterator<Item = Screening>>(&mut self, iter: I) {
        for screening in iter {
            self.insert(screening);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn screening(title: &str, start: &str) -> Screening {
        Screening {
            id: "same".into(),
            cinema_id: "rio".into(),
            film_title: title.into(),
            start_time: at(start),
            end_time: None,
            booking_url: None,
            provider_session_id: None,
            venue_label: None,
            screen_label: None,
            tags: BTreeSet::new(),
            source_raw: json!({ "title": title }),
        }
    }

    fn variants() -> Vec<Screening> {
        let mut a = screening("Jaws", "2024-06-01T19:30:00+01:00");
        a.tags.insert("35mm".into());

        let mut b = screening("Jaws", "2024-06-01T19:30:00+01:00");
        b.booking_url = Some("https://riocinema.org.uk/book/1".into());
        b.end_time = Some(at("2024-06-01T21:34:00+01:00"));
        b.tags.insert("Q&A".into());

        let mut c = screening("JAWS", "2024-06-01T19:30:00+01:00");
        c.provider_session_id = Some("4411".into());
        c.screen_label = Some("Screen 2".into());

        let mut d = screening("Jaws", "2024-06-01T19:30:00+01:00");
        d.booking_url = Some("https://riocinema.org.uk/book/0".into());
        d.tags.insert("IMAX".into());
        vec![a, b, c, d]
    }

    fn permutations(items: &[Screening]) -> Vec<Vec<Screening>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    fn fold(items: Vec<Screening>) -> Screening {
        let mut iter = items.into_iter();
        let first = iter.next().unwrap();
        iter.fold(first, merge)
    }

    #[test]
    fn test_id_is_deterministic() {
        let start = at("2024-06-01T19:30:00+01:00");
        let a = screening_id("rio", Some("4411"), None, "Jaws", &start);
        let b = screening_id("rio", Some("4411"), None, "Jaws", &start);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_id_prefers_session_over_booking_and_title() {
        let start = at("2024-06-01T19:30:00+01:00");
        let with_session =
            screening_id("rio", Some("4411"), Some("https://x.test/b"), "Jaws", &start);
        let other_title =
            screening_id("rio", Some("4411"), Some("https://x.test/c"), "Jaws (35mm)", &start);
        assert_eq!(with_session, other_title);

        let by_booking = screening_id("rio", None, Some("https://x.test/b"), "Jaws", &start);
        let by_booking_later = screening_id(
            "rio",
            None,
            Some("https://x.test/b#top"),
            "Jaws",
            &at("2024-06-02T19:30:00+01:00"),
        );
        assert_eq!(by_booking, by_booking_later);
        assert_ne!(by_booking, with_session);
    }

    #[test]
    fn test_fallback_id_ignores_offset_representation() {
        let bst = screening_id("rio", None, None, "Jaws", &at("2024-06-01T19:30:00+01:00"));
        let utc = screening_id("rio", None, None, "jaws ", &at("2024-06-01T18:30:00Z"));
        assert_eq!(bst, utc);
        let other_cinema = screening_id("pcc", None, None, "Jaws", &at("2024-06-01T18:30:00Z"));
        assert_ne!(bst, other_cinema);
    }

    #[test]
    fn test_blank_session_falls_through() {
        let start = at("2024-06-01T19:30:00+01:00");
        assert_eq!(
            screening_id("rio", Some("  "), None, "Jaws", &start),
            screening_id("rio", None, None, "Jaws", &start)
        );
    }

    #[test]
    fn test_canonical_booking_url_drops_tracking() {
        assert_eq!(
            canonical_booking_url("https://Example.com/book?id=7&utm_source=news#seats").as_deref(),
            Some("https://example.com/book?id=7")
        );
        assert_eq!(
            canonical_booking_url("https://example.com/book?fbclid=abc").as_deref(),
            Some("https://example.com/book")
        );
        assert_eq!(canonical_booking_url("/relative/path"), None);
        assert_eq!(canonical_booking_url("mailto:box@office.test"), None);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let items = variants();
        let expected = fold(items.clone());
        for order in permutations(&items) {
            assert_eq!(fold(order), expected);
        }
    }

    #[test]
    fn test_merge_is_associative() {
        let v = variants();
        let left = merge(merge(v[0].clone(), v[1].clone()), merge(v[2].clone(), v[3].clone()));
        let right = merge(
            v[0].clone(),
            merge(v[1].clone(), merge(v[2].clone(), v[3].clone())),
        );
        assert_eq!(left, right);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = variants().remove(1);
        assert_eq!(merge(a.clone(), a.clone()), a);
    }

    #[test]
    fn test_merge_unions_tags_and_keeps_present_fields() {
        let merged = fold(variants());
        let tags: Vec<&str> = merged.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["35mm", "IMAX", "Q&A"]);
        assert_eq!(merged.provider_session_id.as_deref(), Some("4411"));
        assert_eq!(merged.screen_label.as_deref(), Some("Screen 2"));
        assert_eq!(
            merged.booking_url.as_deref(),
            Some("https://riocinema.org.uk/book/0")
        );
        // the candidate with a known end time wins the title/time fields
        assert_eq!(merged.film_title, "Jaws");
        assert!(merged.end_time.is_some());
    }

    #[test]
    fn test_set_merges_and_orders_output() {
        let mut set = ScreeningSet::new();
        let mut late = screening("Heat", "2024-06-02T20:00:00+01:00");
        late.id = "late".into();
        set.insert(late);
        set.extend(variants());
        assert_eq!(set.len(), 2);
        assert_eq!(set.merged_count(), 3);

        let out = set.into_sorted_vec();
        assert_eq!(out[0].id, "same");
        assert_eq!(out[1].id, "late");
    }
}
