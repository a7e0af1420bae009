use async_trait::async_trait;
use sourcing_shared::{Entity, FieldUpdate, normalize_domain};

use crate::{Enricher, StageFailure, StageOutput, StageResult};

/// Normalizes the listed website to `https://host`.
pub struct DomainStage;

impl DomainStage {
    pub const NAME: &'static str = "domain";
}

#[async_trait]
impl Enricher for DomainStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn enrich(&self, entity: &Entity) -> StageResult {
        let website = entity
            .website
            .as_deref()
            .ok_or_else(|| StageFailure::permanent("no website listed"))?;
        let host = normalize_domain(website)
            .ok_or_else(|| StageFailure::permanent(format!("unresolvable website '{website}'")))?;

        Ok(StageOutput::with_updates(vec![FieldUpdate::Website(format!(
            "https://{host}"
        ))]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entity;

    #[tokio::test]
    async fn normalizes_website() {
        let mut e = entity("Acme");
        e.website = Some("http://WWW.Acme.com/home?ref=maps".into());
        let out = DomainStage.enrich(&e).await.unwrap();
        assert_eq!(
            out.updates,
            vec![FieldUpdate::Website("https://acme.com".into())]
        );
    }

    #[tokio::test]
    async fn missing_website_is_permanent() {
        let err = DomainStage.enrich(&entity("Acme")).await.unwrap_err();
        assert!(!err.retryable);
    }
}
