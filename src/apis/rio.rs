use super::{absolute_url, RecordBuilder, UnitContext};
use crate::constants::{RIO_BASE_URL, RIO_CINEMA};
use crate::error::{Result, ScraperError};
use crate::types::{DateRange, ExtractionUnit, RawEventRecord};
use serde_json::Value;
use tracing::{debug, info, instrument};

/// Y/N performance flags and the label each one contributes
const PERFORMANCE_FLAGS: &[(&str, &str)] = &[
    ("QA", "Q&A"),
    ("HoH", "Hard of Hearing"),
    ("RS", "Relaxed Screening"),
    ("CB", "Carers & Babies"),
    ("SP", "Special Performance"),
    ("PP", "Preview"),
    ("FF", "Family Friendly"),
    ("NoAds", "No Ads"),
];

/// Rio Cinema, Dalston. The listings page embeds every film and performance as a
/// `var Events = {...}` object.
pub struct RioCrawler {
    ctx: UnitContext,
    base_url: String,
}

impl RioCrawler {
    pub fn new(ctx: UnitContext) -> Self {
        Self::with_base_url(ctx, RIO_BASE_URL)
    }

    pub fn with_base_url(ctx: UnitContext, base_url: impl Into<String>) -> Self {
        Self {
            ctx,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn listings_url(&self) -> String {
        format!("{}/Rio.dll/WhatsOn", self.base_url)
    }
}

/// Cut the `var Events = {...}` object out of the page by brace matching
pub fn extract_events_json(page: &str) -> Option<Value> {
    let marker = page.find("var Events")?;
    let open = marker + page[marker..].find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in page[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = open + offset + 1;
                    return serde_json::from_str(&page[open..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn flag_set(perf: &Value, flag: &str) -> bool {
    perf.get(flag).and_then(Value::as_str) == Some("Y")
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One raw record per performance that is open for sale
pub fn parse_events(events: &Value, base_url: &str) -> Result<Vec<RawEventRecord>> {
    let films = events
        .get("Events")
        .and_then(Value::as_array)
        .ok_or_else(|| ScraperError::MissingField("Events array not found".into()))?;

    let mut records = Vec::new();
    for film in films {
        let title = string_field(film, "Title");
        let film_url = string_field(film, "URL").and_then(|u| absolute_url(base_url, &u));
        let runtime = film.get("RunningTime").cloned();

        let performances = film
            .get("Performances")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for perf in performances {
            if perf.get("IsOpenForSale").and_then(Value::as_bool) == Some(false) {
                continue;
            }

            let booking_url = string_field(perf, "URL")
                .and_then(|u| absolute_url(&format!("{base_url}/Rio.dll/"), &u))
                .or_else(|| film_url.clone());

            let mut labels: Vec<String> = PERFORMANCE_FLAGS
                .iter()
                .filter(|(flag, _)| flag_set(perf, flag))
                .map(|(_, label)| label.to_string())
                .collect();
            labels.extend(string_field(perf, "Notes").filter(|n| !n.trim().is_empty()));

            records.push(
                RecordBuilder::new()
                    .text("title", title.clone())
                    .text("date", string_field(perf, "StartDate"))
                    .text("time", string_field(perf, "StartTime"))
                    .text("booking_url", booking_url)
                    .text("session_id", string_field(perf, "ID"))
                    .text("screen", string_field(perf, "AuditoriumName"))
                    .value("runtime_minutes", runtime.clone())
                    .labels(labels)
                    .build(),
            );
        }
    }
    Ok(records)
}

#[async_trait::async_trait]
impl ExtractionUnit for RioCrawler {
    fn cinema_id(&self) -> &str {
        RIO_CINEMA
    }

    #[instrument(skip(self))]
    async fn discover(&self, range: &DateRange) -> Result<Vec<RawEventRecord>> {
        let headers = vec![(
            "Accept".to_string(),
            "text/html,application/xhtml+xml".to_string(),
        )];
        let response = self
            .ctx
            .fetcher
            .fetch(&self.listings_url(), &headers, self.ctx.cache_ttl)
            .await?;

        let page = response.text();
        let events = extract_events_json(&page)
            .ok_or_else(|| ScraperError::MissingField("var Events object not found in page".into()))?;
        let records = parse_events(&events, &self.base_url)?;

        debug!("Range {} +{} days left to the normalizer", range.start, range.days);
        info!("Found {} Rio performances", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><script>
        var Events = {"Events": [
            {"Title": "Withnail &amp; I", "URL": "Film/123", "RunningTime": 107,
             "Performances": [
                {"ID": 9001, "StartDate": "2024-06-01", "StartTime": "1430",
                 "URL": "Booking?Booking=TSelectItems.waSelectItemsPrompt.TcsPerformance_9001",
                 "AuditoriumName": "Screen 1", "IsOpenForSale": true, "QA": "Y", "HoH": "N"},
                {"ID": 9002, "StartDate": "2024-06-02", "StartTime": "2045",
                 "IsOpenForSale": false},
                {"ID": 9003, "StartDate": "2024-06-03", "StartTime": "1800",
                 "Notes": "Intro by {guest}", "RS": "Y"}
             ]}
        ]};
        var Other = {"x": 1};
    </script></html>"#;

    #[test]
    fn test_extracts_embedded_object() {
        let events = extract_events_json(PAGE).unwrap();
        assert_eq!(events["Events"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_object_is_none() {
        assert!(extract_events_json("<html>nothing here</html>").is_none());
        assert!(extract_events_json("var Events = {\"unterminated\": ").is_none());
    }

    #[test]
    fn test_parses_open_performances() {
        let events = extract_events_json(PAGE).unwrap();
        let records = parse_events(&events, "https://riocinema.org.uk").unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first["title"], "Withnail &amp; I");
        assert_eq!(first["date"], "2024-06-01");
        assert_eq!(first["time"], "1430");
        assert_eq!(first["session_id"], "9001");
        assert_eq!(first["screen"], "Screen 1");
        assert_eq!(first["runtime_minutes"], 107);
        assert_eq!(first["labels"], serde_json::json!(["Q&A"]));
        assert!(first["booking_url"]
            .as_str()
            .unwrap()
            .starts_with("https://riocinema.org.uk/Rio.dll/Booking"));

        let third = &records[1];
        assert_eq!(third["labels"], serde_json::json!(["Relaxed Screening", "Intro by {guest}"]));
        assert_eq!(third["booking_url"], "https://riocinema.org.uk/Film/123");
    }

    #[test]
    fn test_schema_change_is_an_error() {
        let err = parse_events(&serde_json::json!({"Films": []}), "https://riocinema.org.uk");
        assert!(matches!(err, Err(ScraperError::MissingField(_))));
    }
}
