//! HTTP API client with pagination, throttling, and backoff
//!
//! Wraps a reqwest client with the behaviors the source API requires:
//! bearer-token auth on every request, Link-header pagination drained to
//! completion, exponential backoff on rate-limit responses, and a defensive
//! cap on request counts.

use std::time::Duration;

use lms_common::{Result, SyncError};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::endpoints;
use crate::api::pagination::PageLinks;
use crate::config::{ApiConfig, TOKEN_ENV_VAR};

/// Header carrying the remaining rate-limit quota
pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-Rate-Limit-Remaining";

/// Client for the source LMS API
#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    per_page: u32,
    page_sleep: Duration,
    backoff_start: Duration,
    max_requests: u32,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// Fails with a configuration error when no bearer token is configured,
    /// so a misconfigured run stops before any work is attempted.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(SyncError::config(format!(
                "no API token in ${TOKEN_ENV_VAR}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            per_page: config.per_page,
            page_sleep: Duration::from_millis(config.page_sleep_ms),
            backoff_start: Duration::from_millis(config.backoff_start_ms),
            max_requests: config.max_requests,
        })
    }

    /// Fetch every page of a collection endpoint and return the concatenated
    /// JSON objects. Never returns a partially drained collection.
    ///
    /// - 401 and 404 are "no data available", not errors.
    /// - A 403 with zero remaining quota triggers a backoff sleep and a retry
    ///   of the same page; the backoff doubles on each further hit and resets
    ///   on the next `fetch_all` call.
    /// - Elements that are not JSON objects are dropped.
    pub async fn fetch_all(&self, path: &str) -> Result<Vec<Value>> {
        let mut url = format!("{}{}?per_page={}", self.base_url, path, self.per_page);
        let mut results: Vec<Value> = Vec::new();
        let mut backoff = self.backoff_start;
        let mut requests = 0u32;

        loop {
            if requests >= self.max_requests {
                warn!(url = %url, requests, "request cap reached, aborting pagination");
                break;
            }

            let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
            requests += 1;

            let status = response.status();
            let remaining = rate_limit_remaining(response.headers());
            debug!(%status, ?remaining, url = %url, "page fetched");

            if status == StatusCode::FORBIDDEN && remaining == Some(0.0) {
                warn!(
                    backoff_ms = backoff.as_millis() as u64,
                    url = %url,
                    "rate limit exhausted, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
                debug!(%status, url = %url, "no data available for endpoint");
                return Ok(Vec::new());
            }

            let response = response.error_for_status()?;
            let links = PageLinks::from_headers(response.headers());
            let page: Value = response.json().await?;

            match page {
                Value::Array(items) => results.extend(items),
                other => warn!(url = %url, "expected a JSON array page, got {}", kind_of(&other)),
            }

            match links.follow() {
                Some(next) => {
                    url = next.to_string();
                    tokio::time::sleep(self.page_sleep).await;
                },
                None => break,
            }
        }

        let before = results.len();
        results.retain(Value::is_object);
        if results.len() < before {
            warn!(
                dropped = before - results.len(),
                "dropped non-object elements from response"
            );
        }

        Ok(results)
    }

    /// All courses visible to the configured token
    pub async fn get_all_courses(&self) -> Result<Vec<Value>> {
        self.fetch_all(&endpoints::courses()).await
    }

    /// Sections of one course
    pub async fn get_course_sections(&self, course_id: i64) -> Result<Vec<Value>> {
        self.fetch_all(&endpoints::course_sections(course_id)).await
    }

    /// Enrollments of one course
    pub async fn get_course_enrollments(&self, course_id: i64) -> Result<Vec<Value>> {
        self.fetch_all(&endpoints::course_enrollments(course_id))
            .await
    }
}

/// Parse the remaining-quota header, if present
fn rate_limit_remaining(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(RATE_LIMIT_REMAINING_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
