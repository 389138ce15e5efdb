use crate::constants::DEFAULT_TIMEZONE;
use crate::error::{Result, ScraperError};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Raw event record as returned from an extraction unit. Keys are source-specific;
/// the normalizer understands a conventional vocabulary (see `normalize::fields`).
pub type RawEventRecord = serde_json::Map<String, serde_json::Value>;

fn default_timezone() -> Tz {
    DEFAULT_TIMEZONE.parse().unwrap_or(chrono_tz::Europe::London)
}

/// Static venue metadata, loaded once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cinema {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl Cinema {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: String::new(),
            timezone: default_timezone(),
            postcode: None,
            website: None,
            chain: None,
            lat: None,
            lon: None,
        }
    }
}

/// Read-only table of every known cinema, keyed by id
#[derive(Debug, Clone, Default)]
pub struct CinemaCatalog {
    cinemas: BTreeMap<String, Arc<Cinema>>,
}

impl CinemaCatalog {
    /// Build a catalog, rejecting blank or duplicated ids.
    pub fn from_cinemas(cinemas: Vec<Cinema>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for cinema in cinemas {
            let id = cinema.id.trim();
            if id.is_empty() {
                return Err(ScraperError::Config(format!(
                    "cinema '{}' has an empty id",
                    cinema.name
                )));
            }
            if cinema.name.trim().is_empty() {
                return Err(ScraperError::Config(format!("cinema '{id}' has an empty name")));
            }
            if map.contains_key(id) {
                return Err(ScraperError::Config(format!("duplicate cinema id '{id}'")));
            }
            map.insert(id.to_string(), Arc::new(cinema));
        }
        Ok(Self { cinemas: map })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Cinema>> {
        self.cinemas.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.cinemas.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Cinema>> {
        self.cinemas.values()
    }

    pub fn len(&self) -> usize {
        self.cinemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cinemas.is_empty()
    }
}

/// Requested listing window: `days` calendar days starting at `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub days: u32,
}

impl DateRange {
    pub fn new(start: NaiveDate, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(ScraperError::Config("date range must cover at least one day".into()));
        }
        Ok(Self { start, days })
    }

    pub fn end_exclusive(&self) -> NaiveDate {
        self.start + Duration::days(i64::from(self.days))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end_exclusive()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.days).map(move |offset| self.start + Duration::days(i64::from(offset)))
    }
}

/// One canonical, deduplicated showing of a film at a venue and time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screening {
    pub id: String,
    pub cinema_id: String,
    pub film_title: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub booking_url: Option<String>,
    pub provider_session_id: Option<String>,
    pub venue_label: Option<String>,
    pub screen_label: Option<String>,
    pub tags: BTreeSet<String>,
    pub source_raw: serde_json::Value,
}

/// Core trait that every venue-specific extraction unit implements
#[async_trait::async_trait]
pub trait ExtractionUnit: Send + Sync {
    /// Cinema this unit produces records for
    fn cinema_id(&self) -> &str;

    /// Locate and return the raw event records for the requested window.
    /// All network access goes through the shared `Fetcher`.
    async fn discover(&self, range: &DateRange) -> Result<Vec<RawEventRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_rejects_duplicate_ids() {
        let result = CinemaCatalog::from_cinemas(vec![
            Cinema::new("rio", "Rio Cinema"),
            Cinema::new("rio", "Rio Again"),
        ]);
        assert!(matches!(result, Err(ScraperError::Config(_))));
    }

    #[test]
    fn test_catalog_rejects_blank_id() {
        let result = CinemaCatalog::from_cinemas(vec![Cinema::new("  ", "Nameless")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cinema_timezone_defaults_to_london() {
        let cinema: Cinema = toml::from_str("id = \"rio\"\nname = \"Rio Cinema\"").unwrap();
        assert_eq!(cinema.timezone, chrono_tz::Europe::London);
    }

    #[test]
    fn test_date_range_bounds() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let range = DateRange::new(start, 7).unwrap();
        assert!(range.contains(start));
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 6, 7).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 6, 8).unwrap()));
        assert_eq!(range.dates().count(), 7);
        assert!(DateRange::new(start, 0).is_err());
    }
}
