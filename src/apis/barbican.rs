use super::{RecordBuilder, UnitContext};
use crate::constants::{BARBICAN_API_BASE, BARBICAN_CINEMA, BARBICAN_WEB_BASE};
use crate::error::{Result, ScraperError};
use crate::normalize::datetime::parse_datetime;
use crate::types::{DateRange, ExtractionUnit, RawEventRecord};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const CINEMA_KEYWORDS: &[&str] = &[
    "film club",
    "cinema",
    "screening",
    "silent film",
    "animation",
    "documentary",
];

static SLUG_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));

/// Barbican Cinema via the Spektrix ticketing API: `/events` for the catalogue,
/// then `/events/{id}/instances` for each cinema event's showtimes.
pub struct BarbicanCrawler {
    ctx: UnitContext,
    api_base: String,
    web_base: String,
    request_delay: Duration,
    /// Zone of the venue's wall-clock times
    timezone: Tz,
}

impl BarbicanCrawler {
    pub fn new(ctx: UnitContext) -> Self {
        Self::with_base_urls(ctx, BARBICAN_API_BASE, BARBICAN_WEB_BASE)
    }

    pub fn with_base_urls(
        ctx: UnitContext,
        api_base: impl Into<String>,
        web_base: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            web_base: web_base.into().trim_end_matches('/').to_string(),
            request_delay: Duration::from_millis(100),
            timezone: chrono_tz::Europe::London,
        }
    }

    /// Use the configured cinema timezone for wall-clock times
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Pause between instance requests
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Origin".to_string(), self.web_base.clone()),
            ("Referer".to_string(), format!("{}/", self.web_base)),
        ]
    }

    fn events_url(&self) -> Result<String> {
        Url::parse_with_params(
            &format!("{}/events", self.api_base),
            &[
                ("$filter", "isOnSale eq true"),
                ("$orderby", "firstInstanceDateTime"),
                ("$top", "500"),
            ],
        )
        .map(|u| u.to_string())
        .map_err(|e| ScraperError::Config(format!("invalid Barbican API base: {e}")))
    }

    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let response = self
            .ctx
            .fetcher
            .fetch(url, &self.headers(), self.ctx.cache_ttl)
            .await?;
        Ok(response.json()?)
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn id_field(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Spektrix reports venue-local wall-clock times, sometimes with a spurious `Z`
fn local_wall_time(raw: &str) -> &str {
    raw.trim().trim_end_matches('Z')
}

pub fn is_cinema_event(event: &Value) -> bool {
    if str_field(event, "attribute_PrimaryArtForm").eq_ignore_ascii_case("film") {
        return true;
    }
    let name = str_field(event, "name").to_lowercase();
    if CINEMA_KEYWORDS.iter().any(|keyword| name.contains(keyword)) {
        return true;
    }
    !str_field(event, "attribute_FilmCertificate").is_empty()
}

/// Whether an event's run of instances, in venue wall time, overlaps the requested window
pub fn overlaps_range(event: &Value, range: &DateRange, timezone: Tz) -> bool {
    let parse = |key: &str| {
        let raw = local_wall_time(str_field(event, key));
        parse_datetime(raw, timezone, range.start)
            .ok()
            .map(|dt| dt.date_naive())
    };
    let Some(first) = parse("firstInstanceDateTime") else {
        return false;
    };
    let last = parse("lastInstanceDateTime").unwrap_or(first);
    first < range.end_exclusive() && last >= range.start
}

pub fn booking_url(web_base: &str, event_name: &str, start: &str) -> Option<String> {
    let slug_source = event_name.to_lowercase();
    let slug = SLUG_SEPARATOR.replace_all(&slug_source, "-");
    let slug = slug.trim_matches('-');
    let date = start.get(..10)?;
    if slug.is_empty() || date.len() != 10 {
        return None;
    }
    Some(format!(
        "{}/whats-on/{}/{}",
        web_base,
        date.replace('-', "/"),
        slug
    ))
}

/// Raw records for one event's instances; off-sale instances are skipped
pub fn parse_instances(event: &Value, instances: &Value, web_base: &str) -> Vec<RawEventRecord> {
    let name = str_field(event, "name");
    let runtime = event.get("duration").cloned();
    let labels: Vec<String> = ["attribute_Genre", "attribute_Format", "attribute_AccessInfo"]
        .iter()
        .map(|key| str_field(event, key).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    instances
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|instance| instance.get("isOnSale").and_then(Value::as_bool) != Some(false))
        .map(|instance| {
            let start = local_wall_time(str_field(instance, "start"));
            RecordBuilder::new()
                .text("title", Some(name))
                .text("start", Some(start))
                .text("session_id", id_field(instance))
                .text("booking_url", booking_url(web_base, name, start))
                .value("runtime_minutes", runtime.clone())
                .labels(labels.clone())
                .build()
        })
        .collect()
}

#[async_trait::async_trait]
impl ExtractionUnit for BarbicanCrawler {
    fn cinema_id(&self) -> &str {
        BARBICAN_CINEMA
    }

    #[instrument(skip(self))]
    async fn discover(&self, range: &DateRange) -> Result<Vec<RawEventRecord>> {
        let events = self.fetch_json(&self.events_url()?).await?;
        let events = events
            .as_array()
            .ok_or_else(|| ScraperError::MissingField("events response is not an array".into()))?;

        let cinema_events: Vec<&Value> = events
            .iter()
            .filter(|event| is_cinema_event(event) && overlaps_range(event, range, self.timezone))
            .collect();
        info!("Found {} Barbican cinema events in range", cinema_events.len());

        let mut records = Vec::new();
        for (index, event) in cinema_events.iter().enumerate() {
            let Some(event_id) = id_field(event) else {
                debug!("Skipping event without id: {}", str_field(event, "name"));
                continue;
            };
            if index > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let url = format!("{}/events/{}/instances", self.api_base, event_id);
            match self.fetch_json(&url).await {
                Ok(instances) => {
                    let found = parse_instances(event, &instances, &self.web_base);
                    debug!("{}: {} instances", str_field(event, "name"), found.len());
                    records.extend(found);
                }
                Err(e) => warn!("Skipping instances for event {}: {}", event_id, e),
            }
        }
        Ok(records)
    }
}
