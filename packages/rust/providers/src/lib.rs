//! External data sources used by the enrichment stages.
//!
//! This crate provides:
//! - Capability traits ([`WebSource`], [`SearchSource`], [`NewsSource`], [`LlmSource`])
//!   that enrichers depend on, so each stage can be tested against a stub
//! - HTTP implementations: [`HttpFetcher`] (company websites), [`SerperClient`]
//!   (web + news search), [`GeminiClient`] (structured LLM extraction)
//! - [`RateLimiter`]: per-provider call spacing shared by every task using that provider

pub mod gemini;
pub mod limiter;
pub mod serper;
pub mod web;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sourcing_shared::SourcingError;

pub use gemini::GeminiClient;
pub use limiter::RateLimiter;
pub use serper::SerperClient;
pub use web::HttpFetcher;

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Failure talking to an external provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider}: request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider}: rate limited (HTTP 429)")]
    RateLimited { provider: &'static str },

    #[error("{provider}: HTTP {status}")]
    Status { provider: &'static str, status: u16 },

    #[error("{provider}: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: unusable response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidResponse { .. } => false,
        }
    }

    /// Classify a reqwest error.
    pub fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider }
        } else if err.is_decode() {
            Self::InvalidResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                provider,
                message: err.to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(provider: &'static str, status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited { provider }
        } else {
            Self::Status {
                provider,
                status: status.as_u16(),
            }
        }
    }

    fn provider(&self) -> &'static str {
        match self {
            Self::Timeout { provider }
            | Self::RateLimited { provider }
            | Self::Status { provider, .. }
            | Self::Transport { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
        }
    }
}

impl From<ProviderError> for SourcingError {
    fn from(err: ProviderError) -> Self {
        SourcingError::provider(err.provider(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// A fetched web page.
#[derive(Debug, Clone)]
pub struct WebPage {
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

/// Fetches company web pages.
#[async_trait]
pub trait WebSource: Send + Sync {
    /// GET `url`. Non-success statuses are errors.
    async fn fetch(&self, url: &str) -> Result<WebPage, ProviderError>;
}

/// One organic web search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Web search (used for profile discovery and owner lookups).
#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn search(&self, query: &str, num: u32) -> Result<Vec<SearchHit>, ProviderError>;
}

/// One news article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Recent-news search (used for risk scanning).
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn news(&self, query: &str, num: u32) -> Result<Vec<NewsItem>, ProviderError>;
}

/// A language model that answers with a single JSON document.
#[async_trait]
pub trait LlmSource: Send + Sync {
    /// Model identifier, recorded alongside derived values.
    fn model(&self) -> &str;

    /// Send `prompt`, parse the reply as JSON.
    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, ProviderError>;
}
