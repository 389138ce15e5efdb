use thiserror::Error;

/// Failure of a single fetch after the retry policy has run its course.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network or server-side failure that survived every retry attempt.
    #[error("transient fetch failure for {url} after {attempts} attempts: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable response (4xx other than rate limiting, bad request URL).
    #[error("permanent fetch failure for {url}: {message}")]
    Permanent {
        url: String,
        status: Option<u16>,
        message: String,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache store error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to parse record: {0}")]
    Parse(String),

    #[error("Run cancelled before completion")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ScraperError>;
