//! Normalization engine: raw event records in, canonical `Screening`s out.

pub mod datetime;
pub mod fields;
pub mod tags;
pub mod title;

use crate::error::{Result, ScraperError};
use crate::identity::{canonical_booking_url, screening_id};
use crate::metrics;
use crate::types::{Cinema, DateRange, RawEventRecord, Screening};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of normalizing every record a unit returned
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub screenings: Vec<Screening>,
    /// Rejected for a missing or unparseable required field
    pub dropped: usize,
    /// Valid, but starting outside the requested window
    pub out_of_range: usize,
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty string (or number rendered as string) under any of `keys`
fn first_string(raw: &RawEventRecord, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(value_as_string)
}

fn label_texts(raw: &RawEventRecord) -> Vec<String> {
    let mut texts = Vec::new();
    for key in fields::LABELS {
        match raw.get(*key) {
            Some(Value::Array(items)) => texts.extend(items.iter().filter_map(value_as_string)),
            Some(other) => texts.extend(value_as_string(other)),
            None => {}
        }
    }
    texts
}

fn runtime_minutes(raw: &RawEventRecord) -> Option<i64> {
    let value = fields::RUNTIME.iter().find_map(|key| raw.get(*key))?;
    let minutes = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s
            .trim()
            .trim_end_matches(|c: char| c.is_alphabetic() || c.is_whitespace())
            .parse::<i64>()
            .ok(),
        _ => None,
    }?;
    (minutes > 0 && minutes < 24 * 60).then_some(minutes)
}

/// Maps raw records to screenings against a fixed reference date, which anchors
/// relative tokens such as "tomorrow" or "Friday".
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    reference_date: NaiveDate,
}

impl Normalizer {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self { reference_date }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    fn parse_start(&self, raw: &RawEventRecord, cinema: &Cinema) -> Result<DateTime<FixedOffset>> {
        let tz = cinema.timezone;
        let mut last_error = None;

        for key in fields::START {
            let parsed = match raw.get(*key) {
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(secs) => datetime::from_epoch_seconds(secs, tz),
                    None => Err(format!("non-integer epoch '{n}'")),
                },
                Some(Value::String(s)) if !s.trim().is_empty() => {
                    datetime::parse_datetime(s, tz, self.reference_date).or_else(|e| {
                        s.trim()
                            .parse::<i64>()
                            .map_err(|_| e)
                            .and_then(|secs| datetime::from_epoch_seconds(secs, tz))
                    })
                }
                _ => continue,
            };
            match parsed {
                Ok(dt) => return Ok(dt),
                Err(e) => last_error = Some(e),
            }
        }

        if let (Some(date), Some(time)) = (
            first_string(raw, fields::DATE),
            first_string(raw, fields::TIME),
        ) {
            return datetime::combine(&date, &time, tz, self.reference_date)
                .map_err(ScraperError::Parse);
        }

        match last_error {
            Some(e) => Err(ScraperError::Parse(e)),
            None => Err(ScraperError::MissingField("start_time".into())),
        }
    }

    fn parse_end(
        &self,
        raw: &RawEventRecord,
        cinema: &Cinema,
        start: &DateTime<FixedOffset>,
    ) -> Option<DateTime<FixedOffset>> {
        let end = first_string(raw, fields::END).and_then(|value| {
            datetime::parse_datetime(&value, cinema.timezone, self.reference_date)
                .ok()
                .or_else(|| {
                    // Clock-only end: same local day as the start, rolling past midnight
                    let clock = datetime::parse_time(&value)?;
                    let local = datetime::localize(start.date_naive().and_time(clock), cinema.timezone).ok()?;
                    Some(if local < *start {
                        local + Duration::days(1)
                    } else {
                        local
                    })
                })
        });

        let end = end.or_else(|| {
            runtime_minutes(raw)
                .map(|minutes| datetime::in_zone(*start + Duration::minutes(minutes), cinema.timezone))
        })?;

        if end < *start {
            debug!("Ignoring end time {} before start {}", end, start);
            return None;
        }
        Some(end)
    }

    /// Normalize one record. Missing or unparseable title/start is an error; the
    /// caller decides whether that drops the record.
    pub fn normalize(&self, raw: &RawEventRecord, cinema: &Cinema) -> Result<Screening> {
        let raw_title =
            first_string(raw, fields::TITLE).ok_or_else(|| ScraperError::MissingField("film_title".into()))?;
        let film_title = title::clean_title(&raw_title, &cinema.name)
            .ok_or_else(|| ScraperError::MissingField("film_title".into()))?;

        let start_time = self.parse_start(raw, cinema)?;
        let end_time = self.parse_end(raw, cinema, &start_time);

        let labels = label_texts(raw);
        let tags = tags::extract_tags(
            std::iter::once(raw_title.as_str()).chain(labels.iter().map(String::as_str)),
        );

        let booking_url = first_string(raw, fields::BOOKING).and_then(|url| canonical_booking_url(&url));
        let provider_session_id = first_string(raw, fields::SESSION);

        let id = screening_id(
            &cinema.id,
            provider_session_id.as_deref(),
            booking_url.as_deref(),
            &film_title,
            &start_time,
        );

        Ok(Screening {
            id,
            cinema_id: cinema.id.clone(),
            film_title,
            start_time,
            end_time,
            booking_url,
            provider_session_id,
            venue_label: first_string(raw, fields::VENUE),
            screen_label: first_string(raw, fields::SCREEN),
            tags,
            source_raw: Value::Object(raw.clone()),
        })
    }

    /// Normalize every record from one unit. Bad records are dropped with a
    /// warning and records outside `range` are counted but not emitted.
    pub fn normalize_batch(
        &self,
        raws: &[RawEventRecord],
        cinema: &Cinema,
        range: &DateRange,
    ) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for (index, raw) in raws.iter().enumerate() {
            match self.normalize(raw, cinema) {
                Ok(screening) if range.contains(screening.start_time.date_naive()) => {
                    batch.screenings.push(screening);
                }
                Ok(screening) => {
                    debug!(
                        "{}: '{}' at {} is outside the requested range",
                        cinema.id, screening.film_title, screening.start_time
                    );
                    batch.out_of_range += 1;
                }
                Err(e) => {
                    warn!("{}: dropping record {}: {}", cinema.id, index, e);
                    batch.dropped += 1;
                }
            }
        }

        metrics::normalize::normalized(&cinema.id, batch.screenings.len());
        metrics::normalize::dropped(&cinema.id, batch.dropped);
        metrics::normalize::out_of_range(&cinema.id, batch.out_of_range);
        batch
    }
}
