//! Metrics for the listings pipeline, recorded through the `metrics` facade.
//!
//! Nothing is exported unless `init_metrics` installs the Prometheus recorder;
//! without a recorder every call here is a no-op.

use crate::constants::METRICS_PORT_ENV;
use std::net::SocketAddr;
use tracing::{info, warn};

/// All metric names used in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    FetchRequests,
    FetchCacheHits,
    FetchRetries,
    FetchFailures,
    FetchDuration,
    RecordsNormalized,
    RecordsDropped,
    RecordsOutOfRange,
    DuplicatesMerged,
    UnitsSucceeded,
    UnitsFailed,
    UnitDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FetchRequests => "cinema_fetch_requests_total",
            MetricName::FetchCacheHits => "cinema_fetch_cache_hits_total",
            MetricName::FetchRetries => "cinema_fetch_retries_total",
            MetricName::FetchFailures => "cinema_fetch_failures_total",
            MetricName::FetchDuration => "cinema_fetch_duration_seconds",
            MetricName::RecordsNormalized => "cinema_records_normalized_total",
            MetricName::RecordsDropped => "cinema_records_dropped_total",
            MetricName::RecordsOutOfRange => "cinema_records_out_of_range_total",
            MetricName::DuplicatesMerged => "cinema_duplicates_merged_total",
            MetricName::UnitsSucceeded => "cinema_units_succeeded_total",
            MetricName::UnitsFailed => "cinema_units_failed_total",
            MetricName::UnitDuration => "cinema_unit_duration_seconds",
        }
    }
}

/// Install the Prometheus exporter when `CINEMA_METRICS_PORT` is set.
pub fn init_metrics() {
    let Some(port) = std::env::var(METRICS_PORT_ENV)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    else {
        return;
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed: {}", e),
    }
}

pub mod fetch {
    use super::MetricName;

    pub fn request() {
        ::metrics::counter!(MetricName::FetchRequests.as_str()).increment(1);
    }

    pub fn cache_hit() {
        ::metrics::counter!(MetricName::FetchCacheHits.as_str()).increment(1);
    }

    pub fn retry() {
        ::metrics::counter!(MetricName::FetchRetries.as_str()).increment(1);
    }

    pub fn failure(kind: &'static str) {
        ::metrics::counter!(MetricName::FetchFailures.as_str(), "kind" => kind).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::FetchDuration.as_str()).record(secs);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn normalized(cinema_id: &str, count: usize) {
        ::metrics::counter!(MetricName::RecordsNormalized.as_str(), "cinema" => cinema_id.to_string())
            .increment(count as u64);
    }

    pub fn dropped(cinema_id: &str, count: usize) {
        ::metrics::counter!(MetricName::RecordsDropped.as_str(), "cinema" => cinema_id.to_string())
            .increment(count as u64);
    }

    pub fn out_of_range(cinema_id: &str, count: usize) {
        ::metrics::counter!(MetricName::RecordsOutOfRange.as_str(), "cinema" => cinema_id.to_string())
            .increment(count as u64);
    }
}

pub mod dedup {
    use super::MetricName;

    pub fn merged(count: usize) {
        ::metrics::counter!(MetricName::DuplicatesMerged.as_str()).increment(count as u64);
    }
}

pub mod units {
    use super::MetricName;

    pub fn succeeded(cinema_id: &str) {
        ::metrics::counter!(MetricName::UnitsSucceeded.as_str(), "cinema" => cinema_id.to_string())
            .increment(1);
    }

    pub fn failed(cinema_id: &str) {
        ::metrics::counter!(MetricName::UnitsFailed.as_str(), "cinema" => cinema_id.to_string())
            .increment(1);
    }

    pub fn duration(cinema_id: &str, secs: f64) {
        ::metrics::histogram!(MetricName::UnitDuration.as_str(), "cinema" => cinema_id.to_string())
            .record(secs);
    }
}
