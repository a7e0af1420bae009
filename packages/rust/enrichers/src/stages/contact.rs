use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use sourcing_providers::{ProviderError, WebSource};
use sourcing_shared::{Entity, FieldUpdate};
use tracing::{debug, instrument};

use super::{page_url, site_url};
use crate::{Enricher, StageFailure, StageOutput, StageResult};

const PAGES: &[&str] = &["", "/contact", "/about"];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex")
});

/// Substrings that mark platform, placeholder, or asset addresses.
const JUNK: &[&str] = &[
    "sentry.io",
    "wix.com",
    "squarespace.com",
    "wordpress.com",
    "example.com",
    "domain.com",
    ".png",
    ".jpg",
    ".jpeg",
];

/// Shared-inbox local parts, used only when nothing personal is found.
const GENERIC_PREFIXES: &[&str] = &["info", "contact", "sales", "support", "admin", "office", "hello"];

/// Finds a contact email on the site, preferring the owner's own address.
pub struct ContactStage {
    web: Arc<dyn WebSource>,
}

impl ContactStage {
    pub const NAME: &'static str = "contact";

    pub fn new(web: Arc<dyn WebSource>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl Enricher for ContactStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["domain"]
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        if entity.contact_email.is_some() {
            return Ok(StageOutput::empty());
        }
        let base = site_url(entity)?;

        let mut found: Vec<String> = Vec::new();
        let mut first_error: Option<ProviderError> = None;
        let mut fetched = 0usize;

        for path in PAGES {
            let url = page_url(&base, path);
            match self.web.fetch(&url).await {
                Ok(page) => {
                    fetched += 1;
                    for email in extract_emails(&page.body) {
                        if !found.contains(&email) {
                            found.push(email);
                        }
                    }
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "page skipped");
                    first_error.get_or_insert(e);
                }
            }
        }

        if fetched == 0 {
            return Err(first_error
                .map(StageFailure::from)
                .unwrap_or_else(|| StageFailure::permanent("no pages fetched")));
        }

        let updates = pick_email(&found, entity.owner_name.as_deref())
            .map(FieldUpdate::ContactEmail)
            .into_iter()
            .collect();
        Ok(StageOutput::with_updates(updates))
    }
}

/// Lowercased addresses in page order, junk removed.
fn extract_emails(body: &str) -> Vec<String> {
    EMAIL_RE
        .find_iter(body)
        .map(|m| m.as_str().to_lowercase())
        .filter(|e| !JUNK.iter().any(|j| e.contains(j)))
        .collect()
}

/// Owner first-name match, then any personal address, then the first found.
fn pick_email(found: &[String], owner_name: Option<&str>) -> Option<String> {
    let first_name = owner_name
        .and_then(|n| n.split_whitespace().next())
        .map(str::to_lowercase)
        .filter(|n| n.len() >= 2);
    if let Some(first) = first_name {
        if let Some(e) = found.iter().find(|e| local_part(e).contains(first.as_str())) {
            return Some(e.clone());
        }
    }

    found
        .iter()
        .find(|e| !GENERIC_PREFIXES.contains(&local_part(e)))
        .or_else(|| found.first())
        .cloned()
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or_default()
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

    #[test]
    fn junk_addresses_are_dropped() {
        let emails = extract_emails(
            "Write to Info@Acme.com or logo@2x.png; errors go to abc@o123.ingest.sentry.io",
        );
        assert_eq!(emails, vec!["info@acme.com".to_string()]);
    }

    #[test]
    fn preference_order() {
        let found = vec![
            "info@acme.com".to_string(),
            "mike@acme.com".to_string(),
            "jane.doe@acme.com".to_string(),
        ];
        assert_eq!(pick_email(&found, Some("Jane Doe")).as_deref(), Some("jane.doe@acme.com"));
        assert_eq!(pick_email(&found, None).as_deref(), Some("mike@acme.com"));
        assert_eq!(
            pick_email(&["office@acme.com".to_string()], None).as_deref(),
            Some("office@acme.com")
        );
        assert_eq!(pick_email(&[], None), None);
    }

    #[tokio::test]
    async fn reads_home_and_contact_pages() {
        let web = StubWeb::default()
            .page("https://acme.com/", "<footer>info@acme.com</footer>")
            .page(
                "https://acme.com/contact",
                r#"<a href="mailto:jane@acme.com">Jane</a>"#,
            );
        let mut e = site_entity();
        e.owner_name = Some("Jane Doe".into());
        let out = ContactStage::new(Arc::new(web)).enrich(&e).await.unwrap();
        assert_eq!(
            out.updates,
            vec![FieldUpdate::ContactEmail("jane@acme.com".into())]
        );
    }

    #[tokio::test]
    async fn existing_email_skips_fetch() {
        let web = Arc::new(StubWeb::default());
        let mut e = site_entity();
        e.contact_email = Some("owner@acme.com".into());
        let out = ContactStage::new(web.clone()).enrich(&e).await.unwrap();
        assert!(out.updates.is_empty());
        assert_eq!(web.call_count(), 0);
    }

    #[tokio::test]
    async fn unreachable_site_is_retryable() {
        let web = StubWeb::default().failing(timeout);
        let err = ContactStage::new(Arc::new(web))
            .enrich(&site_entity())
            .await
            .unwrap_err();
        assert!(err.retryable);
    }
}
