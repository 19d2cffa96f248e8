//! Configuration management
//!
//! Everything is environment-driven (with `.env` support via dotenvy).
//! The exclusion list is configuration, not code: it comes from
//! `LMS_EXCLUDED_COURSE_IDS` (comma-separated) and/or a file named by
//! `LMS_EXCLUSIONS_FILE` (one id per line, `#` comments).

use lms_common::types::ExclusionSet;
use lms_common::{Result, SyncError};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable holding the API bearer token.
pub const TOKEN_ENV_VAR: &str = "LMS_TOKEN";

/// Default base URL of the source API, including the version prefix.
pub const DEFAULT_API_BASE_URL: &str = "https://canvas.instructure.com/api/v1";

/// Default page size requested from the API.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Default delay between successful page fetches, in milliseconds.
/// Keeps the client from triggering rate limits preemptively.
pub const DEFAULT_PAGE_SLEEP_MS: u64 = 200;

/// Default initial backoff after a rate-limit response, in milliseconds.
/// Doubles on each further rate-limit hit within one fetch.
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default hard cap on requests per endpoint, against link loops.
pub const DEFAULT_MAX_REQUESTS: u32 = 50;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/lms_sync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Tool configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub exclusions: ExclusionSet,
}

/// Source API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token. May be empty here; the client constructor rejects an
    /// empty token so that startup fails before any work is attempted.
    pub token: String,
    pub per_page: u32,
    pub page_sleep_ms: u64,
    pub backoff_start_ms: u64,
    pub max_requests: u32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: String::new(),
            per_page: DEFAULT_PER_PAGE,
            page_sleep_ms: DEFAULT_PAGE_SLEEP_MS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api = ApiConfig {
            base_url: std::env::var("LMS_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            token: std::env::var(TOKEN_ENV_VAR).unwrap_or_default(),
            per_page: env_parsed("LMS_PER_PAGE", DEFAULT_PER_PAGE),
            page_sleep_ms: env_parsed("LMS_PAGE_SLEEP_MS", DEFAULT_PAGE_SLEEP_MS),
            backoff_start_ms: env_parsed("LMS_BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            max_requests: env_parsed("LMS_MAX_PAGE_REQUESTS", DEFAULT_MAX_REQUESTS),
            timeout_secs: env_parsed("LMS_API_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env_parsed(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            ),
        };

        let exclusions = load_exclusions()?;

        Ok(Config {
            api,
            database,
            exclusions,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Build the exclusion set from the env list and optional exclusions file
fn load_exclusions() -> Result<ExclusionSet> {
    let mut exclusions = match std::env::var("LMS_EXCLUDED_COURSE_IDS") {
        Ok(list) => ExclusionSet::parse_list(&list)?,
        Err(_) => ExclusionSet::default(),
    };

    if let Ok(path) = std::env::var("LMS_EXCLUSIONS_FILE") {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::config(format!("cannot read exclusions file '{path}': {e}"))
        })?;
        exclusions = exclusions.merge(ExclusionSet::parse_lines(&contents)?);
    }

    Ok(exclusions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn api_config_defaults() {
        let api = ApiConfig::default();
        assert_eq!(api.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(api.per_page, DEFAULT_PER_PAGE);
        assert_eq!(api.max_requests, DEFAULT_MAX_REQUESTS);
        assert!(api.token.is_empty());
    }

    #[test]
    fn env_parsed_falls_back_on_garbage() {
        std::env::set_var("LMS_SYNC_TEST_ENV_PARSED", "not-a-number");
        let value: u32 = env_parsed("LMS_SYNC_TEST_ENV_PARSED", 7);
        assert_eq!(value, 7);
        std::env::remove_var("LMS_SYNC_TEST_ENV_PARSED");
    }
}
