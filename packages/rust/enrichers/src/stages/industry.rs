use async_trait::async_trait;
use sourcing_shared::{Entity, FieldUpdate};

use crate::{Enricher, StageOutput, StageResult};

/// `(keyword, tag)` in priority order; the first keyword found wins.
const KEYWORD_MAP: &[(&str, &str)] = &[
    ("industrial cleaning", "Industrial Cleaning"),
    ("pressure wash", "Industrial Cleaning"),
    ("janitorial", "Janitorial Services"),
    ("floor coating", "Flooring"),
    ("pest control", "Pest Control"),
    ("landscap", "Landscaping"),
    ("concrete", "Concrete Services"),
    ("excavation", "Excavation"),
];

/// Keyword taxonomy over the description and name. Never replaces an
/// existing tag.
pub struct IndustryStage;

impl IndustryStage {
    pub const NAME: &'static str = "industry";
}

#[async_trait]
impl Enricher for IndustryStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["content"]
    }

    async fn enrich(&self, entity: &Entity) -> StageResult {
        if entity.industry_tag.is_some() {
            return Ok(StageOutput::empty());
        }

        let text = format!(
            "{} {}",
            entity.description.as_deref().unwrap_or_default(),
            entity.name
        )
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

        let updates = KEYWORD_MAP
            .iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, tag)| FieldUpdate::IndustryTag(tag.to_string()))
            .into_iter()
            .collect();

        Ok(StageOutput::with_updates(updates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entity;

    #[tokio::test]
    async fn first_keyword_wins() {
        let mut e = entity("Lone Star Landscaping");
        e.description = Some("Commercial pressure   washing and landscaping".into());
        let out = IndustryStage.enrich(&e).await.unwrap();
        assert_eq!(
            out.updates,
            vec![FieldUpdate::IndustryTag("Industrial Cleaning".into())]
        );
    }

    #[tokio::test]
    async fn existing_tag_is_kept() {
        let mut e = entity("Acme Concrete");
        e.industry_tag = Some("Commercial HVAC".into());
        assert!(IndustryStage.enrich(&e).await.unwrap().updates.is_empty());
    }

    #[tokio::test]
    async fn no_match_is_empty_success() {
        let out = IndustryStage.enrich(&entity("Acme Dental")).await.unwrap();
        assert!(out.updates.is_empty());
    }
}
