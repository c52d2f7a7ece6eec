//! HTTP fetcher implementation
//!
//! This module handles all requests against the favorites endpoint, including:
//! - Building the HTTP client with the configured identity
//! - GET requests for one page of favorites
//! - Error classification into the fetch error taxonomy
//! - Retry logic for transient failures

use crate::config::ApiConfig;
use crate::crawler::normalizer::RawItem;
use crate::session::Credential;
use crate::ConfigError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, REFERER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failure of a single page fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network timeout, connection failure, 5xx or throttling; retryable
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote service refused the credential (HTTP 401/403); run-fatal
    #[error("credential rejected (HTTP {0})")]
    AuthRejected(u16),

    /// The body does not match the expected envelope; page-fatal
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    /// Classifies a request-level failure
    pub fn from_request(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::MalformedResponse(error.to_string())
        } else if error.is_timeout() {
            Self::Transient("request timeout".to_string())
        } else if error.is_connect() {
            Self::Transient(format!("connection failed: {}", error))
        } else {
            Self::Transient(error.to_string())
        }
    }

    /// Returns true for statuses worth retrying
    pub fn is_transient_status(status: StatusCode) -> bool {
        status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
    }

    /// Classifies a non-success HTTP status
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::AuthRejected(status.as_u16())
        } else if Self::is_transient_status(status) {
            Self::Transient(format!("HTTP {}", status.as_u16()))
        } else {
            Self::MalformedResponse(format!("unexpected HTTP {}", status.as_u16()))
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One decoded page of the favorites envelope
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// Raw items in the order the service returned them; empty means exhausted
    pub items: Vec<RawItem>,
    /// Total favorites count when the service reports it
    pub total_number: Option<u64>,
}

impl RawPage {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct FavoritesEnvelope {
    data: Option<Vec<RawItem>>,
    total_number: Option<u64>,
}

/// Decodes a favorites response body
///
/// A body without a `data` array, or with an item whose fields have the
/// wrong JSON type, is a `MalformedResponse`.
pub fn decode_page(body: &str) -> Result<RawPage, FetchError> {
    let envelope: FavoritesEnvelope = serde_json::from_str(body)
        .map_err(|e| FetchError::MalformedResponse(format!("invalid envelope: {}", e)))?;

    let items = envelope
        .data
        .ok_or_else(|| FetchError::MalformedResponse("missing data array".to_string()))?;

    Ok(RawPage {
        items,
        total_number: envelope.total_number,
    })
}

/// Source of favorites pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches one page, 1-based
    async fn fetch(&self, page: u32, credential: &Credential) -> Result<RawPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The API configuration (user agent and timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetcher backed by `GET <favorites-url>?page=<n>`
pub struct HttpPageFetcher {
    client: Client,
    endpoint: Url,
    referer: Option<String>,
}

impl HttpPageFetcher {
    pub fn new(client: Client, config: &ApiConfig) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(&config.favorites_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", config.favorites_url, e)))?;
        Ok(Self {
            client,
            endpoint,
            referer: config.referer.clone(),
        })
    }

    /// URL of one page, with the page number embedded as a query parameter
    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, page: u32, credential: &Credential) -> Result<RawPage, FetchError> {
        let mut request = self
            .client
            .get(self.page_url(page))
            .header(COOKIE, credential.cookie.as_str())
            .header(ACCEPT, "application/json, text/plain, */*");
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = request.send().await.map_err(FetchError::from_request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status));
        }

        let body = response.text().await.map_err(FetchError::from_request)?;
        decode_page(&body)
    }
}

/// Retry budget for transient failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Backoff to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Fetches a page, retrying transient failures with exponential backoff
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | Timeout, connection failure, 5xx, 429 | Retry up to `max_attempts`, doubling the delay |
/// | HTTP 401/403 | Immediate `AuthRejected` |
/// | Schema violation | Immediate `MalformedResponse` |
///
/// # Arguments
///
/// * `fetcher` - The page source
/// * `page` - Page number to fetch
/// * `credential` - Session credential attached to every attempt
/// * `policy` - Retry budget
///
/// # Returns
///
/// The page, or the last error once the budget is spent
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    page: u32,
    credential: &Credential,
    policy: &RetryPolicy,
) -> Result<RawPage, FetchError> {
    let mut attempt = 1;
    loop {
        match fetcher.fetch(page, credential).await {
            Ok(raw) => return Ok(raw),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    page,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient fetch failure, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
