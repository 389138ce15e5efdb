use crate::app::ports::FetchCachePort;
use crate::constants::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, DEFAULT_USER_AGENT};
use crate::error::{Result, ScraperError};
use crate::fetch::{Fetcher, RetryPolicy};
use crate::infra::fetch_cache::{InMemoryFetchCache, SqliteFetchCache};
use crate::infra::http_client::ReqwestHttp;
use crate::orchestrator::OrchestratorSettings;
use crate::types::{Cinema, CinemaCatalog};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub cache_ttl_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub path: PathBuf,
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: PathBuf::from("cache/fetch_cache.db"),
            max_age_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub parallelism: usize,
    pub unit_timeout_secs: u64,
    pub default_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            unit_timeout_secs: 120,
            default_days: 14,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub cinemas: Vec<Cinema>,
}

impl Config {
    /// Resolve the config path: explicit argument, then `CINEMA_LISTINGS_CONFIG`,
    /// then `config.toml` in the working directory.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(explicit);
        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            ScraperError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&config_content)?;
        info!(
            "Loaded config from {} ({} cinemas)",
            config_path.display(),
            config.cinemas.len()
        );
        Ok(config)
    }

    /// Parse and validate. Unknown timezones and malformed values are configuration
    /// errors.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ScraperError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cinemas.is_empty() {
            return Err(ScraperError::Config("no [[cinemas]] configured".into()));
        }
        if self.orchestrator.parallelism == 0 {
            return Err(ScraperError::Config("orchestrator.parallelism must be at least 1".into()));
        }
        if self.orchestrator.default_days == 0 {
            return Err(ScraperError::Config("orchestrator.default_days must be at least 1".into()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ScraperError::Config("fetch.max_attempts must be at least 1".into()));
        }
        // Catalog construction checks ids and names
        self.catalog().map(|_| ())
    }

    pub fn catalog(&self) -> Result<CinemaCatalog> {
        CinemaCatalog::from_cinemas(self.cinemas.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            base_delay: Duration::from_millis(self.fetch.base_delay_ms),
            max_delay: Duration::from_millis(self.fetch.max_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.fetch.cache_ttl_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            parallelism: self.orchestrator.parallelism,
            unit_timeout: Duration::from_secs(self.orchestrator.unit_timeout_secs),
        }
    }

    pub fn build_cache(&self) -> Result<Arc<dyn FetchCachePort>> {
        match self.cache.backend {
            CacheBackend::Memory => Ok(Arc::new(InMemoryFetchCache::new())),
            CacheBackend::Sqlite => {
                // Anything past ten years is as good as forever
                let max_age = chrono::Duration::seconds(
                    i64::try_from(self.cache.max_age_secs)
                        .unwrap_or(i64::MAX)
                        .min(10 * 365 * 86_400),
                );
                let cache = SqliteFetchCache::open(&self.cache.path, max_age)?;
                info!("Using sqlite fetch cache at {}", self.cache.path.display());
                Ok(Arc::new(cache))
            }
        }
    }

    pub fn build_fetcher(&self) -> Result<Fetcher> {
        let http = ReqwestHttp::new(
            &self.fetch.user_agent,
            Duration::from_secs(self.fetch.request_timeout_secs),
        )
        .map_err(|e| ScraperError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Fetcher::new(
            Arc::new(http),
            self.build_cache()?,
            self.retry_policy(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[cinemas]]
        id = "rio"
        name = "Rio Cinema"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.fetch.max_attempts, 4);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.orchestrator.default_days, 14);
        assert_eq!(config.cinemas[0].timezone, chrono_tz::Europe::London);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            [fetch]
            cache_ttl_secs = 60
            max_attempts = 2

            [cache]
            backend = "sqlite"
            path = "tmp/cache.db"

            [orchestrator]
            parallelism = 8
            unit_timeout_secs = 5

            [[cinemas]]
            id = "barbican-cinema"
            name = "Barbican Cinema"
            address = "Silk Street"
            timezone = "Europe/London"
            postcode = "EC2Y 8DS"
            lat = 51.52
            lon = -0.0936
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.retry_policy().max_attempts, 2);
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.orchestrator_settings().parallelism, 8);
        assert_eq!(config.cinemas[0].postcode.as_deref(), Some("EC2Y 8DS"));
    }

    #[test]
    fn test_invalid_timezone_is_config_error() {
        let err = Config::from_toml_str(
            r#"
            [[cinemas]]
            id = "rio"
            name = "Rio Cinema"
            timezone = "Europe/Atlantis"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = Config::from_toml_str("[[cinemas]\nid = ").unwrap_err();
        assert!(matches!(err, ScraperError::Config(_)));
    }

    #[test]
    fn test_duplicate_and_missing_cinemas_rejected() {
        let dup = format!("{MINIMAL}\n{MINIMAL}");
        assert!(matches!(Config::from_toml_str(&dup), Err(ScraperError::Config(_))));
        assert!(matches!(Config::from_toml_str(""), Err(ScraperError::Config(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let content = format!("[orchestrator]\nparallelism = 0\n{MINIMAL}");
        assert!(Config::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_sqlite_cache_builds_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.cache.backend = CacheBackend::Sqlite;
        config.cache.path = dir.path().join("nested").join("cache.db");
        assert!(config.build_cache().is_ok());
        assert!(config.cache.path.exists());
    }
}
