//! Resilient HTTP retrieval shared by every extraction unit.
//!
//! `Fetcher::fetch` consults the owned cache first, then performs the request
//! with exponential backoff on transient failures. It knows nothing about
//! cinemas or screenings.

use crate::app::ports::{CachedResponse, FetchCachePort, HttpClientPort, TransportError};
use crate::error::FetchError;
use crate::metrics;
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Backoff settings for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1u32 << exponent;
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        if delay.is_zero() {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..0.1);
        delay.mul_f64(1.0 + jitter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Whether a status should be retried. 408 and 429 are the rate-limit/timeout
/// codes treated as transient; every other 4xx is permanent.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}

/// Cache key for a request signature: URL plus headers, order-insensitive
pub fn cache_key(url: &str, headers: &[(String, String)]) -> String {
    let mut normalized: Vec<(String, &str)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
        .collect();
    normalized.sort();

    let mut s = String::new();
    s.push_str(url);
    for (name, value) in normalized {
        s.push('|');
        s.push_str(&name);
        s.push('=');
        s.push_str(value);
    }

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

enum Attempt {
    Done(FetchResponse),
    Retry(String),
    Fail(Option<u16>, String),
}

pub struct Fetcher {
    http: Arc<dyn HttpClientPort>,
    cache: Arc<dyn FetchCachePort>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(
        http: Arc<dyn HttpClientPort>,
        cache: Arc<dyn FetchCachePort>,
        policy: RetryPolicy,
    ) -> Self {
        Self { http, cache, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drop every cached response
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Fetch `url`, serving from cache when an entry younger than `cache_ttl` exists.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        headers: &[(String, String)],
        cache_ttl: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let key = cache_key(url, headers);

        if !cache_ttl.is_zero() {
            if let Some(entry) = self.cache.get(&key) {
                let age = Utc::now()
                    .signed_duration_since(entry.fetched_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age < cache_ttl {
                    debug!("Cache hit (age {:?})", age);
                    metrics::fetch::cache_hit();
                    return Ok(FetchResponse {
                        status: entry.status,
                        body: entry.body,
                        from_cache: true,
                    });
                }
                debug!("Cache entry expired (age {:?})", age);
            }
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.attempt(url, headers).await {
                Attempt::Done(response) => {
                    self.cache.put(
                        &key,
                        CachedResponse {
                            status: response.status,
                            body: response.body.clone(),
                            fetched_at: Utc::now(),
                        },
                    );
                    return Ok(response);
                }
                Attempt::Fail(status, message) => {
                    warn!("Permanent fetch failure: {}", message);
                    metrics::fetch::failure("permanent");
                    return Err(FetchError::Permanent {
                        url: url.to_string(),
                        status,
                        message,
                    });
                }
                Attempt::Retry(message) => {
                    last_error = message;
                    if attempt < max_attempts {
                        let delay = self.policy.jittered_delay(attempt);
                        warn!(
                            "Attempt {}/{} failed ({}), retrying in {:?}",
                            attempt, max_attempts, last_error, delay
                        );
                        metrics::fetch::retry();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        metrics::fetch::failure("transient");
        Err(FetchError::Transient {
            url: url.to_string(),
            attempts: max_attempts,
            message: last_error,
        })
    }

    async fn attempt(&self, url: &str, headers: &[(String, String)]) -> Attempt {
        metrics::fetch::request();
        let t0 = Instant::now();
        let result = self.http.get(url, headers).await;
        metrics::fetch::duration(t0.elapsed().as_secs_f64());

        match result {
            Ok(resp) if (200..=299).contains(&resp.status) => Attempt::Done(FetchResponse {
                status: resp.status,
                body: resp.bytes,
                from_cache: false,
            }),
            Ok(resp) if is_transient_status(resp.status) => {
                Attempt::Retry(format!("HTTP {}", resp.status))
            }
            Ok(resp) => Attempt::Fail(Some(resp.status), format!("HTTP {}", resp.status)),
            Err(e) => transport_attempt(e),
        }
    }
}

fn transport_attempt(e: TransportError) -> Attempt {
    if e.is_retryable() {
        Attempt::Retry(e.to_string())
    } else {
        Attempt::Fail(None, e.to_string())
    }
}
