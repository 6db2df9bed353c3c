//! Webflow CMS API client
//!
//! Fetches single pages of collection items from the Webflow v2 API.
//!
//! - **Endpoint**: `GET {base_url}/collections/{collection_id}/items?limit=&offset=`
//! - **Authentication**: bearer token in the `Authorization` header.
//! - **Rate limiting**: a minimum interval between requests derived from the
//!   per-minute budget (Webflow allows ~60 requests/minute on most plans).
//! - **Pagination**: `limit` is capped at 100. The response's
//!   `pagination.total` decides whether more pages remain; without it a full
//!   page means "maybe more" and a short page is the last one.
//!
//! The client is stateless across calls apart from the shared rate limiter.
//! Retrying is the caller's concern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ItemRecord, Page};

/// Default base URL for the Webflow Data API
pub const DEFAULT_BASE_URL: &str = "https://api.webflow.com/v2";

/// Largest page the items endpoint will return
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default user agent
const DEFAULT_USER_AGENT: &str = concat!("flowcache/", env!("CARGO_PKG_VERSION"));

/// Default request budget per minute
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Errors that can occur when talking to the Webflow API
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Too many requests (HTTP 429); back off and retry later
    #[error("rate limited by Webflow API")]
    RateLimited {
        /// Server-requested wait from the `Retry-After` header
        retry_after: Option<Duration>,
    },

    /// Token rejected (HTTP 401/403); retrying will not help
    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },

    /// Connection failure, timeout or server-side error
    #[error("network error: {0}")]
    Network(String),

    /// Response could not be understood
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Client could not be built because credentials are missing
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
}

impl ApiError {
    /// Whether the error is worth retrying after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Network(_))
    }

    /// Short machine-friendly label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Auth { .. } => "auth",
            ApiError::Network(_) => "network",
            ApiError::MalformedResponse(_) => "malformed_response",
            ApiError::MissingCredentials(_) => "missing_credentials",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::MalformedResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// A paginated source of collection items
///
/// Implemented by [`WebflowClient`]; the cache manager only depends on this
/// trait.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Fetch up to `limit` items of a collection starting at `offset`
    async fn fetch_page(
        &self,
        collection_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page, ApiError>;
}

/// Webflow API client configuration
#[derive(Debug, Clone)]
pub struct WebflowConfig {
    /// Site API token
    pub api_token: String,
    /// Site id, only needed for the connection test
    pub site_id: Option<String>,
    /// Base URL (default: https://api.webflow.com/v2)
    pub base_url: String,
    /// Request timeout (default: 10s)
    pub timeout: Duration,
    /// User-agent string
    pub user_agent: String,
    /// Request budget per minute (default: 60)
    pub requests_per_minute: u32,
}

impl Default for WebflowConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            site_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }
}

/// Rate limiter to enforce request intervals.
#[derive(Debug)]
struct RateLimiter {
    last_request: Mutex<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    fn per_minute(requests: u32) -> Self {
        let min_interval = Duration::from_secs(60) / requests.max(1);
        Self {
            last_request: Mutex::new(
                Instant::now()
                    .checked_sub(min_interval)
                    .unwrap_or_else(Instant::now),
            ),
            min_interval,
        }
    }

    /// Acquire permission to make a request, waiting if necessary.
    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// Response body of the list-items endpoint
#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(default)]
    items: Vec<ItemRecord>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    total: Option<u64>,
}

/// Client for the Webflow CMS items API
#[derive(Debug, Clone)]
pub struct WebflowClient {
    http: Client,
    config: WebflowConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl WebflowClient {
    /// Create a new client with the given configuration
    pub fn new(config: WebflowConfig) -> Result<Self, ApiError> {
        if config.api_token.is_empty() {
            return Err(ApiError::MissingCredentials("API token is required"));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let rate_limiter = Arc::new(RateLimiter::per_minute(config.requests_per_minute));

        tracing::debug!(base_url = %config.base_url, "Webflow client initialized");

        Ok(Self {
            http,
            config,
            rate_limiter,
        })
    }

    pub fn config(&self) -> &WebflowConfig {
        &self.config
    }

    /// Check that the token can read the configured site
    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let site_id = self
            .config
            .site_id
            .as_deref()
            .ok_or(ApiError::MissingCredentials("site id is required for the connection test"))?;

        self.rate_limiter.acquire().await;

        let url = format!("{}/sites/{}", self.config.base_url, site_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        check_status(response.status(), retry_after(response.headers()))?;
        tracing::info!(site_id, "Webflow connection successful");
        Ok(())
    }
}

#[async_trait]
impl CollectionSource for WebflowClient {
    async fn fetch_page(
        &self,
        collection_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page, ApiError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let url = format!("{}/collections/{}/items", self.config.base_url, collection_id);

        tracing::debug!(collection_id, offset, limit, "fetching collection page");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_token)
            .header(header::ACCEPT, "application/json")
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;

        let status = response.status();
        check_status(status, retry_after(response.headers()))?;

        let body = response.bytes().await?;
        let page = parse_page(&body, offset, limit)?;

        tracing::debug!(
            collection_id,
            offset,
            items = page.items.len(),
            has_more = page.has_more,
            "page fetched in {:?}",
            start.elapsed()
        );

        Ok(page)
    }
}

/// Maps an HTTP status to the error taxonomy
fn check_status(status: StatusCode, retry_after: Option<Duration>) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }

    Err(match status.as_u16() {
        401 | 403 => ApiError::Auth { status: status.as_u16() },
        429 => ApiError::RateLimited { retry_after },
        408 => ApiError::Network(format!("HTTP {}", status)),
        code if status.is_server_error() => {
            ApiError::Network(format!("server error: HTTP {}", code))
        }
        code => ApiError::MalformedResponse(format!("unexpected HTTP {}", code)),
    })
}

/// Reads a `Retry-After` header given in whole seconds
fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Decodes an items response body into a page
fn parse_page(body: &[u8], offset: u32, limit: u32) -> Result<Page, ApiError> {
    let response: ItemsResponse =
        serde_json::from_slice(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

    let count = response.items.len() as u64;
    let has_more = if count == 0 {
        false
    } else {
        match response.pagination.and_then(|p| p.total) {
            Some(total) => u64::from(offset) + count < total,
            None => count >= u64::from(limit),
        }
    };

    Ok(Page {
        items: response.items,
        has_more,
    })
}
