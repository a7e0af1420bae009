//! Company website fetcher.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sourcing_shared::{EnrichmentSettings, Result, SourcingError};
use tracing::debug;

use crate::{ProviderError, WebPage, WebSource};

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

const PROVIDER: &str = "website";

/// Plain HTTP GET against company websites. No API key, no rate limit:
/// every entity hits a different host.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| SourcingError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_settings(settings: &EnrichmentSettings) -> Result<Self> {
        Self::new(
            &settings.user_agent,
            Duration::from_secs(settings.http_timeout_secs),
        )
    }
}

#[async_trait]
impl WebSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<WebPage, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url, %status, "page fetch failed");
            return Err(ProviderError::from_status(PROVIDER, status));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: format!("{url}: response too large ({len} bytes)"),
                });
            }
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        Ok(WebPage {
            url: final_url,
            body,
        })
    }
}
