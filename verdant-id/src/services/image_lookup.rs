//! Preview image lookup
//!
//! Best-effort: the encyclopedia page summary for a plant name is fetched and
//! its thumbnail used as the preview. Callers treat every failure as "no
//! image".

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_WIKI_BASE_URL: &str = "https://en.wikipedia.org/api/rest_v1";
const USER_AGENT: &str = concat!("verdant-id/", env!("CARGO_PKG_VERSION"));
const RATE_LIMIT_MS: u64 = 100;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}")]
    Api(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Query → optional preview image URL
#[async_trait]
pub trait ImageLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<String>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    thumbnail: Option<Thumbnail>,
    originalimage: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    source: String,
}

type DirectRateLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Limiter allowing one request per `period`
fn rate_limiter(period: Duration) -> Result<DirectRateLimiter, LookupError> {
    let quota = governor::Quota::with_period(period)
        .ok_or_else(|| LookupError::Parse("rate limit period must be non-zero".to_string()))?;
    Ok(governor::RateLimiter::direct(quota))
}

/// Page-summary thumbnail lookup
pub struct WikiImageLookup {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: DirectRateLimiter,
}

impl WikiImageLookup {
    pub fn new() -> Result<Self, LookupError> {
        Self::with_base_url(DEFAULT_WIKI_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, LookupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: rate_limiter(Duration::from_millis(RATE_LIMIT_MS))?,
        })
    }

    fn summary_url(&self, query: &str) -> Result<url::Url, LookupError> {
        let mut url = url::Url::parse(&format!("{}/page/summary/", self.base_url))
            .map_err(|e| LookupError::Parse(e.to_string()))?;
        let title = query.trim().replace(' ', "_");
        url.path_segments_mut()
            .map_err(|_| LookupError::Parse("base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .push(&title);
        Ok(url)
    }
}

#[async_trait]
impl ImageLookup for WikiImageLookup {
    async fn lookup(&self, query: &str) -> Result<Option<String>, LookupError> {
        if query.trim().is_empty() {
            return Ok(None);
        }

        self.rate_limiter.until_ready().await;
        let url = self.summary_url(query)?;
        tracing::debug!(query, url = %url, "Looking up preview image");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LookupError::Api(status.as_u16()));
        }

        let summary: PageSummary = response
            .json()
            .await
            .map_err(|e| LookupError::Parse(e.to_string()))?;

        Ok(summary
            .thumbnail
            .or(summary.originalimage)
            .map(|thumb| thumb.source))
    }
}
