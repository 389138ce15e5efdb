use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Fetch-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)])
        -> Result<HttpGetResult, TransportError>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connection,
    /// The request could not be built (bad URL, bad header); retrying cannot help
    InvalidRequest,
    Other,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::InvalidRequest)
    }
}

/// A successful response as kept in the fetch cache
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// Storage behind the fetch cache. Implementations must tolerate concurrent
/// readers and writers on the same key; last write wins.
pub trait FetchCachePort: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedResponse>;
    fn put(&self, key: &str, entry: CachedResponse);
    /// Drop every entry
    fn invalidate(&self);
}
