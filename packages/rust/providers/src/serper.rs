//! Serper.dev client for Google web and news search.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sourcing_shared::{Result, SourcingError};
use tracing::{debug, instrument};

use crate::{NewsItem, NewsSource, ProviderError, RateLimiter, SearchHit, SearchSource};

const DEFAULT_BASE_URL: &str = "https://google.serper.dev";

const PROVIDER: &str = "serper";

/// News search window: last five years.
const NEWS_TIME_RANGE: &str = "qdr:y5";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    news: Vec<NewsItem>,
}

/// Serper API client. Clones share one rate limiter.
#[derive(Clone)]
pub struct SerperClient {
    client: Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl SerperClient {
    pub fn new(api_key: impl Into<String>, min_interval: Duration, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourcingError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            limiter: Arc::new(RateLimiter::new(PROVIDER, min_interval)),
        })
    }

    /// Point the client at another host (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> std::result::Result<T, ProviderError> {
        self.limiter.acquire().await;

        let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(PROVIDER, status));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl SearchSource for SerperClient {
    #[instrument(skip_all, fields(provider = PROVIDER, query = %query))]
    async fn search(&self, query: &str, num: u32) -> std::result::Result<Vec<SearchHit>, ProviderError> {
        let body = json!({ "q": query, "gl": "us", "hl": "en", "num": num });
        let response: SearchResponse = self.post("search", body).await?;
        debug!(results = response.organic.len(), "web search done");
        Ok(response.organic)
    }
}

#[async_trait]
impl NewsSource for SerperClient {
    #[instrument(skip_all, fields(provider = PROVIDER, query = %query))]
    async fn news(&self, query: &str, num: u32) -> std::result::Result<Vec<NewsItem>, ProviderError> {
        let body = json!({
            "q": query,
            "gl": "us",
            "hl": "en",
            "num": num,
            "tbs": NEWS_TIME_RANGE,
        });
        let response: NewsResponse = self.post("news", body).await?;
        debug!(results = response.news.len(), "news search done");
        Ok(response.news)
    }
}
