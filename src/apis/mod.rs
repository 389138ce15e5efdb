//! Built-in extraction units, one per cinema.
//!
//! Each unit only locates raw listing data and maps it onto the conventional raw
//! keys (`title`, `start` or `date` + `time`, `booking_url`, `session_id`, `screen`,
//! `labels`, ...). Everything else is left to the normalizer.

pub mod barbican;
pub mod prince_charles;
pub mod rio;

use crate::fetch::Fetcher;
use crate::types::RawEventRecord;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Shared handles every unit is built with
#[derive(Clone)]
pub struct UnitContext {
    pub fetcher: Arc<Fetcher>,
    pub cache_ttl: Duration,
}

/// Resolve a possibly relative link against the page it came from
pub(crate) fn absolute_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Small builder for raw records that skips empty values
#[derive(Debug, Default)]
pub(crate) struct RecordBuilder {
    record: RawEventRecord,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, key: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            let value: String = value.into();
            if !value.trim().is_empty() {
                self.record.insert(key.to_string(), Value::String(value));
            }
        }
        self
    }

    pub fn value(mut self, key: &str, value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => {}
            Some(value) => {
                self.record.insert(key.to_string(), value);
            }
        }
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        if !labels.is_empty() {
            self.record.insert(
                "labels".to_string(),
                Value::Array(labels.into_iter().map(Value::String).collect()),
            );
        }
        self
    }

    pub fn build(self) -> RawEventRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            absolute_url("https://princecharlescinema.com/whats-on/", "/film/123/").as_deref(),
            Some("https://princecharlescinema.com/film/123/")
        );
        assert_eq!(
            absolute_url("https://a.test/", "https://b.test/x").as_deref(),
            Some("https://b.test/x")
        );
        assert_eq!(absolute_url("https://a.test/", "  "), None);
    }

    #[test]
    fn test_record_builder_skips_empty() {
        let record = RecordBuilder::new()
            .text("title", Some("Jaws"))
            .text("screen", Some("  "))
            .text("venue", None::<String>)
            .value("runtime_minutes", Some(Value::Null))
            .labels(vec![])
            .build();
        assert_eq!(record.len(), 1);
        assert_eq!(record["title"], "Jaws");
    }
}
