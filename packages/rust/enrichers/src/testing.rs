//! Stub sources for stage tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sourcing_providers::{
    LlmSource, NewsItem, NewsSource, ProviderError, SearchHit, SearchSource, WebPage, WebSource,
};
use sourcing_shared::{Entity, IdentityKey};

pub(crate) fn entity(name: &str) -> Entity {
    Entity::new(IdentityKey::from_name_address(name, None), name)
}

pub(crate) fn timeout() -> ProviderError {
    ProviderError::Timeout { provider: "stub" }
}

pub(crate) fn forbidden() -> ProviderError {
    ProviderError::Status {
        provider: "stub",
        status: 403,
    }
}

/// Serves fixed bodies by exact URL; anything else is a 404.
#[derive(Default)]
pub(crate) struct StubWeb {
    pages: HashMap<String, String>,
    fail: Option<fn() -> ProviderError>,
    pub calls: Mutex<Vec<String>>,
}

impl StubWeb {
    pub fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    pub fn failing(mut self, err: fn() -> ProviderError) -> Self {
        self.fail = Some(err);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WebSource for StubWeb {
    async fn fetch(&self, url: &str) -> Result<WebPage, ProviderError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(err) = self.fail {
            return Err(err());
        }
        match self.pages.get(url) {
            Some(body) => Ok(WebPage {
                url: url.to_string(),
                body: body.clone(),
            }),
            None => Err(ProviderError::Status {
                provider: "stub",
                status: 404,
            }),
        }
    }
}

#[derive(Default)]
pub(crate) struct StubSearch {
    hits: Vec<SearchHit>,
    fail: Option<fn() -> ProviderError>,
    pub queries: Mutex<Vec<String>>,
}

impl StubSearch {
    pub fn hit(mut self, title: &str, link: &str, snippet: &str) -> Self {
        self.hits.push(SearchHit {
            title: title.into(),
            link: link.into(),
            snippet: snippet.into(),
        });
        self
    }

    pub fn failing(mut self, err: fn() -> ProviderError) -> Self {
        self.fail = Some(err);
        self
    }

    pub fn last_query(&self) -> Option<String> {
        self.queries.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SearchSource for StubSearch {
    async fn search(&self, query: &str, _num: u32) -> Result<Vec<SearchHit>, ProviderError> {
        self.queries.lock().unwrap().push(query.to_string());
        match self.fail {
            Some(err) => Err(err()),
            None => Ok(self.hits.clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct StubNews {
    items: Vec<NewsItem>,
    fail: Option<fn() -> ProviderError>,
    pub queries: Mutex<Vec<String>>,
}

impl StubNews {
    pub fn item(mut self, title: &str, snippet: &str) -> Self {
        self.items.push(NewsItem {
            title: title.into(),
            link: format!("https://news.example/{}", self.items.len()),
            snippet: snippet.into(),
            date: Some("2 months ago".into()),
            source: Some("Local Herald".into()),
        });
        self
    }

    pub fn failing(mut self, err: fn() -> ProviderError) -> Self {
        self.fail = Some(err);
        self
    }
}

#[async_trait]
impl NewsSource for StubNews {
    async fn news(&self, query: &str, _num: u32) -> Result<Vec<NewsItem>, ProviderError> {
        self.queries.lock().unwrap().push(query.to_string());
        match self.fail {
            Some(err) => Err(err()),
            None => Ok(self.items.clone()),
        }
    }
}

/// Answers every prompt with the same JSON value.
#[derive(Default)]
pub(crate) struct StubLlm {
    reply: serde_json::Value,
    fail: Option<fn() -> ProviderError>,
    pub prompts: Mutex<Vec<String>>,
}

impl StubLlm {
    pub fn replying(reply: serde_json::Value) -> Self {
        Self {
            reply,
            ..Default::default()
        }
    }

    pub fn failing(err: fn() -> ProviderError) -> Self {
        Self {
            fail: Some(err),
            ..Default::default()
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmSource for StubLlm {
    fn model(&self) -> &str {
        "stub-model"
    }

    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.fail {
            Some(err) => Err(err()),
            None => Ok(self.reply.clone()),
        }
    }
}
