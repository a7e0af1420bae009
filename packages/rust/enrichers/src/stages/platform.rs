use std::sync::Arc;

use async_trait::async_trait;
use sourcing_providers::WebSource;
use sourcing_shared::{Entity, FieldUpdate};
use tracing::instrument;

use super::{merge_unique, page_url, site_url};
use crate::html::visible_text;
use crate::{Enricher, StageOutput, StageResult};

/// Markup or copy that indicates an online store.
const ECOMMERCE_SIGNATURES: &[&str] = &[
    "cdn.shopify.com",
    "woocommerce",
    "wp-e-commerce",
    "add to cart",
    "checkout",
];

/// `(technology, markers)`: any marker in the raw page means the technology is in use.
const FINGERPRINTS: &[(&str, &[&str])] = &[
    ("Shopify", &["cdn.shopify.com", "myshopify.com"]),
    ("WooCommerce", &["woocommerce"]),
    ("WordPress", &["wp-content", "wp-includes"]),
    ("Squarespace", &["static1.squarespace.com", "squarespace.com"]),
    ("Wix", &["wixstatic.com", "wix.com"]),
    ("Google Tag Manager", &["googletagmanager.com"]),
    ("HubSpot", &["js.hs-scripts.com", "hs-analytics", "hubspot"]),
    ("ServiceTitan", &["servicetitan"]),
    ("Jobber", &["getjobber.com"]),
    ("Housecall Pro", &["housecallpro"]),
];

/// Detects e-commerce and the site's technology stack from the home page.
pub struct PlatformStage {
    web: Arc<dyn WebSource>,
}

impl PlatformStage {
    pub const NAME: &'static str = "platform";

    pub fn new(web: Arc<dyn WebSource>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl Enricher for PlatformStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["domain"]
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        let base = site_url(entity)?;
        let page = self.web.fetch(&page_url(&base, "")).await?;

        let raw = page.body.to_lowercase();
        let is_ecommerce = ECOMMERCE_SIGNATURES.iter().any(|s| raw.contains(s))
            || visible_text(&page.body).to_lowercase().contains("add to cart");

        let detected = FINGERPRINTS
            .iter()
            .filter(|(_, markers)| markers.iter().any(|m| raw.contains(m)))
            .map(|(tech, _)| tech.to_string());

        Ok(StageOutput::with_updates(vec![
            FieldUpdate::IsEcommerce(is_ecommerce),
            FieldUpdate::TechStack(merge_unique(&entity.tech_stack, detected)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubWeb, entity};

    fn site_entity() -> Entity {
        let mut e = entity("Acme");
        e.website = Some("https://acme.com".into());
        e
    }

    #[tokio::test]
    async fn detects_store_and_stack() {
        let web = StubWeb::default().page(
            "https://acme.com/",
            r#"<html><head><script src="https://cdn.shopify.com/s/x.js"></script>
               <script src="https://www.googletagmanager.com/gtm.js"></script></head>
               <body>Shop now</body></html>"#,
        );
        let out = PlatformStage::new(Arc::new(web))
            .enrich(&site_entity())
            .await
            .unwrap();
        assert_eq!(
            out.updates,
            vec![
                FieldUpdate::IsEcommerce(true),
                FieldUpdate::TechStack(vec!["Shopify".into(), "Google Tag Manager".into()]),
            ]
        );
    }

    #[tokio::test]
    async fn plain_site_is_not_ecommerce_and_keeps_known_stack() {
        let web = StubWeb::default().page(
            "https://acme.com/",
            r#"<body><img src="/wp-content/logo.png">Call us today</body>"#,
        );
        let mut e = site_entity();
        e.tech_stack = vec!["ServiceTitan".into()];
        let out = PlatformStage::new(Arc::new(web)).enrich(&e).await.unwrap();
        assert_eq!(
            out.updates,
            vec![
                FieldUpdate::IsEcommerce(false),
                FieldUpdate::TechStack(vec!["ServiceTitan".into(), "WordPress".into()]),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_error_fails_stage() {
        let err = PlatformStage::new(Arc::new(StubWeb::default()))
            .enrich(&site_entity())
            .await
            .unwrap_err();
        assert!(err.reason.contains("404"));
        assert!(!err.retryable);
    }
}
