//! Google Places (New) text-search client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sourcing_providers::{ProviderError, RateLimiter};
use sourcing_shared::{Result, SourcingError};
use tracing::{debug, instrument};

use crate::{DirectoryPage, DirectorySearch, Listing};

const DEFAULT_BASE_URL: &str = "https://places.googleapis.com";

const PROVIDER: &str = "places";

/// Only the listing fields we store.
const FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.websiteUri,\
places.nationalPhoneNumber,places.rating,places.userRatingCount,nextPageToken";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<Place>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    website_uri: Option<String>,
    national_phone_number: Option<String>,
    rating: Option<f64>,
    user_rating_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    text: String,
}

impl From<Place> for Listing {
    fn from(place: Place) -> Self {
        Listing {
            name: place.display_name.map(|n| n.text),
            address: place.formatted_address,
            website: place.website_uri,
            phone: place.national_phone_number,
            rating: place.rating,
            reviews: place.user_rating_count,
        }
    }
}

/// Places `searchText` client.
#[derive(Clone)]
pub struct PlacesClient {
    client: Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl PlacesClient {
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
}

#[async_trait]
impl DirectorySearch for PlacesClient {
    #[instrument(skip_all, fields(provider = PROVIDER, query = %text_query))]
    async fn search_page(
        &self,
        text_query: &str,
        region_code: &str,
        page_token: Option<&str>,
    ) -> std::result::Result<DirectoryPage, ProviderError> {
        self.limiter.acquire().await;

        let mut body = json!({ "textQuery": text_query, "regionCode": region_code });
        if let Some(token) = page_token {
            body["pageToken"] = json!(token);
        }

        let url = format!("{}/v1/places:searchText", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(PROVIDER, status));
        }

        let parsed: SearchTextResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER,
                    message: e.to_string(),
                })?;

        debug!(
            listings = parsed.places.len(),
            has_next = parsed.next_page_token.is_some(),
            "directory page fetched"
        );

        Ok(DirectoryPage {
            listings: parsed.places.into_iter().map(Listing::from).collect(),
            next_page_token: parsed.next_page_token,
        })
    }
}
