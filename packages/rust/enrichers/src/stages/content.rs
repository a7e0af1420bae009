use std::sync::Arc;

use async_trait::async_trait;
use sourcing_providers::{ProviderError, WebSource};
use sourcing_shared::{Entity, FieldUpdate};
use tracing::{debug, instrument};
use url::Url;

use super::{page_url, site_url};
use crate::html::{SocialLinks, links, visible_text};
use crate::{Enricher, StageFailure, StageOutput, StageResult, truncate_chars};

/// Pages worth reading for a company description, in fetch order.
const PAGES: &[&str] = &["", "/about", "/about-us", "/our-story", "/contact"];

const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Text length after which no further pages are read (if socials were found).
const ENOUGH_TEXT_CHARS: usize = 500;

/// Reads the company site: longest page text becomes the description, social
/// profile links are collected from every page.
pub struct ContentStage {
    web: Arc<dyn WebSource>,
}

impl ContentStage {
    pub const NAME: &'static str = "content";

    pub fn new(web: Arc<dyn WebSource>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl Enricher for ContentStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["domain"]
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        let base = site_url(entity)?;

        let mut best_text = String::new();
        let mut social = SocialLinks::default();
        let mut first_error: Option<ProviderError> = None;
        let mut fetched = 0usize;

        for path in PAGES {
            let url = page_url(&base, path);
            let page = match self.web.fetch(&url).await {
                Ok(page) => page,
                Err(e) => {
                    debug!(url = %url, error = %e, "page skipped");
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            fetched += 1;

            let page_base = Url::parse(&page.url).unwrap_or_else(|_| base.clone());
            for link in links(&page.body, &page_base) {
                social.absorb(&link);
            }

            let text = visible_text(&page.body);
            if text.chars().count() > best_text.chars().count() {
                best_text = text;
            }

            if best_text.chars().count() > ENOUGH_TEXT_CHARS && social.count() > 1 {
                break;
            }
        }

        if fetched == 0 {
            return Err(first_error
                .map(StageFailure::from)
                .unwrap_or_else(|| StageFailure::permanent("no pages fetched")));
        }

        let mut updates = Vec::new();
        if !best_text.is_empty() {
            updates.push(FieldUpdate::Description(
                truncate_chars(&best_text, MAX_DESCRIPTION_CHARS).to_string(),
            ));
        }
        updates.extend(social.into_updates());

        debug!(pages = fetched, updates = updates.len(), "site content read");
        Ok(StageOutput::with_updates(updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubWeb, entity, timeout};

    fn site_entity() -> Entity {
        let mut e = entity("Acme HVAC");
        e.website = Some("https://acme.com".into());
        e
    }

    #[tokio::test]
    async fn keeps_longest_text_and_collects_socials() {
        let web = StubWeb::default()
            .page(
                "https://acme.com/",
                r#"<body><p>Welcome</p><a href="https://facebook.com/acmehvac">fb</a></body>"#,
            )
            .page(
                "https://acme.com/about",
                r#"<body><p>Family owned commercial HVAC contractor since 1982.</p>
                   <a href="https://www.linkedin.com/company/acme-hvac">in</a></body>"#,
            );
        let stage = ContentStage::new(Arc::new(web));
        let out = stage.enrich(&site_entity()).await.unwrap();

        assert!(out.updates.contains(&FieldUpdate::Description(
            "Family owned commercial HVAC contractor since 1982. in".into()
        )));
        assert!(out.updates.contains(&FieldUpdate::FacebookUrl(
            "https://facebook.com/acmehvac".into()
        )));
        assert!(out.updates.contains(&FieldUpdate::LinkedinCompanyUrl(
            "https://www.linkedin.com/company/acme-hvac".into()
        )));
    }

    #[tokio::test]
    async fn stops_early_with_enough_text_and_socials() {
        let long = "word ".repeat(200);
        let body = format!(
            r#"<body><p>{long}</p><a href="https://facebook.com/a">f</a>
               <a href="https://instagram.com/a">i</a></body>"#
        );
        let web = Arc::new(StubWeb::default().page("https://acme.com/", &body));
        let stage = ContentStage::new(web.clone());
        stage.enrich(&site_entity()).await.unwrap();
        assert_eq!(web.call_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_site_is_retryable_failure() {
        let web = StubWeb::default().failing(timeout);
        let stage = ContentStage::new(Arc::new(web));
        let err = stage.enrich(&site_entity()).await.unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn missing_website_is_permanent_failure() {
        let stage = ContentStage::new(Arc::new(StubWeb::default()));
        let err = stage.enrich(&entity("No Site")).await.unwrap_err();
        assert!(!err.retryable);
    }
}
