use std::sync::Arc;

use async_trait::async_trait;
use sourcing_providers::SearchSource;
use sourcing_shared::{Entity, FieldUpdate};
use tracing::{debug, instrument};

use super::location;
use crate::html::{SocialKind, classify_social};
use crate::{Enricher, StageOutput, StageResult};

const MAX_RESULTS: u32 = 5;

/// Searches for the company's LinkedIn page when the site did not link one.
pub struct SocialStage {
    search: Arc<dyn SearchSource>,
}

impl SocialStage {
    pub const NAME: &'static str = "social";

    pub fn new(search: Arc<dyn SearchSource>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Enricher for SocialStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["content"]
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        if entity.linkedin_company_url.is_some() {
            return Ok(StageOutput::empty());
        }

        let query = format!("site:linkedin.com \"{}\" {}", entity.name, location(entity))
            .trim_end()
            .to_string();
        let hits = self.search.search(&query, MAX_RESULTS).await?;

        let mut company = None;
        let mut person = None;
        for hit in &hits {
            match classify_social(&hit.link) {
                Some(SocialKind::LinkedinCompany) => {
                    company = Some(hit.link.clone());
                    break;
                }
                Some(SocialKind::LinkedinPerson) if person.is_none() => {
                    person = Some(hit.link.clone());
                }
                _ => {}
            }
        }

        let mut updates = Vec::new();
        if let Some(url) = company {
            updates.push(FieldUpdate::LinkedinCompanyUrl(url));
        }
        if let Some(url) = person.filter(|_| entity.owner_linkedin_url.is_none()) {
            updates.push(FieldUpdate::OwnerLinkedinUrl(url));
        }

        debug!(results = hits.len(), found = updates.len(), "linkedin search done");
        Ok(StageOutput::with_updates(updates))
    }
}
