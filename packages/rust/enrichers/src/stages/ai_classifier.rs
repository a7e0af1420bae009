use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sourcing_providers::LlmSource;
use sourcing_shared::{Entity, FieldUpdate};
use tracing::{debug, instrument};

use super::{merge_unique, non_empty};
use crate::{Enricher, StageFailure, StageOutput, StageResult, truncate_chars};

const MIN_DESCRIPTION_CHARS: usize = 20;
const MAX_PROMPT_DESCRIPTION_CHARS: usize = 3500;
const MAX_EVIDENCE_CHARS: usize = 500;

/// Placeholder owner names models emit instead of `null`.
const NO_OWNER: &[&str] = &["null", "none", "unknown", "n/a"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Classification {
    legal_name: Option<String>,
    industry_tag: Option<String>,
    /// Arrives as either a string or a number.
    naics_code: Option<Value>,
    naics_description: Option<String>,
    customer_type: Option<String>,
    revenue_model: Option<String>,
    is_family_owned: Option<bool>,
    is_franchise: Option<bool>,
    owner_name: Option<String>,
    website_tech_stack: Option<Vec<String>>,
    confidence: Option<f64>,
    evidence: Option<String>,
}

/// Structured classification of the site description by a language model.
pub struct AiClassifierStage {
    llm: Arc<dyn LlmSource>,
}

impl AiClassifierStage {
    pub const NAME: &'static str = "ai_classifier";

    pub fn new(llm: Arc<dyn LlmSource>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Enricher for AiClassifierStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["content"]
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key, model = self.llm.model()))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        let description = entity
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| d.chars().count() >= MIN_DESCRIPTION_CHARS)
            .ok_or_else(|| StageFailure::permanent("no usable description to classify"))?;

        let reply = self.llm.generate_json(&prompt(description)).await?;
        let parsed: Classification = serde_json::from_value(reply).map_err(|e| {
            StageFailure::permanent(format!("classifier reply did not match schema: {e}"))
        })?;

        debug!(
            industry = parsed.industry_tag.as_deref().unwrap_or("-"),
            confidence = parsed.confidence.unwrap_or_default(),
            "classified"
        );
        Ok(into_output(entity, parsed))
    }
}

fn prompt(description: &str) -> String {
    format!(
        r#"Act as a private equity analyst. Analyze this company website text:
"{}"

Extract:
1. Legal name (look for "Copyright (c) [Legal Name]" or terms of service).
2. Industry tag: specific classification (e.g. "Commercial HVAC").
3. NAICS code: the most accurate 6-digit NAICS code (2022 standard) and its description.
4. Customer type: "B2B", "B2C", or "Both".
5. Revenue model: "Recurring", "Project", or "Retail".
6. Family owned: boolean.
7. Franchise: boolean.
8. Owner name: names near "Founder", "President", "CEO", "Owner".
9. Tech stack: software found on the site.
10. Confidence: 0.0 to 1.0.

Return strictly valid JSON:
{{"legal_name": str or null, "industry_tag": str, "naics_code": str,
 "naics_description": str, "customer_type": str, "revenue_model": str,
 "is_family_owned": bool, "is_franchise": bool, "owner_name": str or null,
 "website_tech_stack": [str], "confidence": float, "evidence": str}}"#,
        truncate_chars(description, MAX_PROMPT_DESCRIPTION_CHARS)
    )
}

fn into_output(entity: &Entity, c: Classification) -> StageOutput {
    let mut updates = Vec::new();

    if let Some(v) = non_empty(c.legal_name.as_deref()) {
        updates.push(FieldUpdate::LegalName(v));
    }
    if let Some(v) = non_empty(c.industry_tag.as_deref()) {
        updates.push(FieldUpdate::IndustryTag(v));
    }
    let naics = match c.naics_code {
        Some(Value::String(s)) => non_empty(Some(&s)),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    if let Some(v) = naics {
        updates.push(FieldUpdate::NaicsCode(v));
    }
    if let Some(v) = non_empty(c.naics_description.as_deref()) {
        updates.push(FieldUpdate::NaicsDescription(v));
    }
    if let Some(v) = non_empty(c.customer_type.as_deref()) {
        updates.push(FieldUpdate::CustomerType(v));
    }
    if let Some(v) = non_empty(c.revenue_model.as_deref()) {
        updates.push(FieldUpdate::RevenueModel(v));
    }
    if let Some(v) = c.is_family_owned {
        updates.push(FieldUpdate::IsFamilyOwned(v));
    }
    updates.push(FieldUpdate::IsFranchise(c.is_franchise.unwrap_or(false)));

    let owner = non_empty(c.owner_name.as_deref())
        .filter(|o| !NO_OWNER.iter().any(|n| o.eq_ignore_ascii_case(n)));
    if let Some(v) = owner {
        updates.push(FieldUpdate::OwnerName(v));
    }

    if let Some(stack) = c.website_tech_stack.filter(|s| !s.is_empty()) {
        let cleaned = stack.into_iter().filter_map(|t| non_empty(Some(&t)));
        updates.push(FieldUpdate::TechStack(merge_unique(&entity.tech_stack, cleaned)));
    }

    StageOutput {
        updates,
        confidence: c.confidence.map(|v| v.clamp(0.0, 1.0)),
        evidence: non_empty(c.evidence.as_deref())
            .map(|e| truncate_chars(&e, MAX_EVIDENCE_CHARS).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubLlm, entity, timeout};
    use serde_json::json;

    fn described() -> Entity {
        let mut e = entity("Acme HVAC");
        e.description = Some("Family owned commercial HVAC contractor serving Austin since 1982.".into());
        e.tech_stack = vec!["WordPress".into()];
        e
    }

    #[tokio::test]
    async fn maps_reply_to_updates_and_provenance() {
        let llm = Arc::new(StubLlm::replying(json!({
            "legal_name": "Acme Heating & Air, Inc.",
            "industry_tag": "Commercial HVAC",
            "naics_code": 238220,
            "naics_description": "Plumbing, Heating, and Air-Conditioning Contractors",
            "customer_type": "B2B",
            "revenue_model": "Recurring",
            "is_family_owned": true,
            "owner_name": "Unknown",
            "website_tech_stack": ["ServiceTitan", "wordpress"],
            "confidence": 1.4,
            "evidence": "Family owned since 1982"
        })));
        let out = AiClassifierStage::new(llm.clone()).enrich(&described()).await.unwrap();

        assert!(out.updates.contains(&FieldUpdate::NaicsCode("238220".into())));
        assert!(out.updates.contains(&FieldUpdate::IsFamilyOwned(true)));
        assert!(out.updates.contains(&FieldUpdate::IsFranchise(false)));
        assert!(out.updates.contains(&FieldUpdate::TechStack(vec![
            "WordPress".into(),
            "ServiceTitan".into()
        ])));
        assert!(!out.updates.iter().any(|u| matches!(u, FieldUpdate::OwnerName(_))));
        assert_eq!(out.confidence, Some(1.0));
        assert_eq!(out.evidence.as_deref(), Some("Family owned since 1982"));
        assert!(llm.prompts.lock().unwrap()[0].contains("serving Austin since 1982"));
    }

    #[tokio::test]
    async fn short_description_is_permanent_and_skips_model() {
        let llm = Arc::new(StubLlm::replying(json!({})));
        let mut e = described();
        e.description = Some("Call us".into());
        let err = AiClassifierStage::new(llm.clone()).enrich(&e).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(llm.prompt_count(), 0);
    }

    #[tokio::test]
    async fn schema_mismatch_is_permanent() {
        let llm = Arc::new(StubLlm::replying(json!({ "is_franchise": "maybe" })));
        let err = AiClassifierStage::new(llm).enrich(&described()).await.unwrap_err();
        assert!(err.reason.contains("schema"));
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn model_timeout_is_retryable() {
        let llm = Arc::new(StubLlm::failing(timeout));
        let err = AiClassifierStage::new(llm).enrich(&described()).await.unwrap_err();
        assert!(err.retryable);
    }
}
