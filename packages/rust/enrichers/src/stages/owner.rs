use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sourcing_providers::{LlmSource, SearchHit, SearchSource};
use sourcing_shared::{Entity, FieldUpdate};
use tracing::{debug, instrument};

use super::{location, non_empty};
use crate::{Enricher, StageFailure, StageOutput, StageResult};

const MAX_RESULTS: u32 = 5;
const MAX_CONTEXT_CHARS: usize = 3000;

/// Minimum model confidence for accepting an owner.
const ACCEPT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwnerReply {
    owner_name: Option<String>,
    title: Option<String>,
    source: Option<String>,
    confidence: Option<f64>,
}

/// Off-site owner lookup: runs only when the site itself did not name an
/// owner. Search snippets from business directories are read by the model.
pub struct OwnerStage {
    search: Arc<dyn SearchSource>,
    llm: Arc<dyn LlmSource>,
}

impl OwnerStage {
    pub const NAME: &'static str = "owner";

    pub fn new(search: Arc<dyn SearchSource>, llm: Arc<dyn LlmSource>) -> Self {
        Self { search, llm }
    }
}

#[async_trait]
impl Enricher for OwnerStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["content", "ai_classifier"]
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        if entity.owner_name.is_some() {
            return Ok(StageOutput::empty());
        }

        let query = format!(
            "site:linkedin.com OR site:zoominfo.com OR site:buzzfile.com \"{}\" {} (Owner OR CEO OR President OR Principal)",
            entity.name,
            location(entity)
        );
        let hits = self.search.search(&query, MAX_RESULTS).await?;
        if hits.is_empty() {
            debug!("no directory results");
            return Ok(StageOutput::empty());
        }

        let reply = self
            .llm
            .generate_json(&prompt(&entity.name, &context(&hits)))
            .await?;
        let reply: OwnerReply = serde_json::from_value(reply).map_err(|e| {
            StageFailure::permanent(format!("owner reply did not match schema: {e}"))
        })?;

        let confidence = reply.confidence.unwrap_or_default().clamp(0.0, 1.0);
        let Some(owner) = non_empty(reply.owner_name.as_deref())
            .filter(|o| !o.eq_ignore_ascii_case("null") && !o.eq_ignore_ascii_case("unknown"))
        else {
            return Ok(StageOutput::empty());
        };
        if confidence <= ACCEPT_CONFIDENCE {
            debug!(confidence, "owner candidate rejected");
            return Ok(StageOutput::empty());
        }

        let source = non_empty(reply.source.as_deref()).unwrap_or_else(|| "Web Search".into());
        let evidence = match non_empty(reply.title.as_deref()) {
            Some(title) => format!("{owner}, {title} ({source})"),
            None => format!("{owner} ({source})"),
        };

        Ok(StageOutput {
            updates: vec![
                FieldUpdate::OwnerName(owner),
                FieldUpdate::OwnerSource(format!("Ghost Hunter: {source}")),
            ],
            confidence: Some(confidence),
            evidence: Some(evidence),
        })
    }
}

/// `SOURCE:`/`TEXT:` blocks for each hit, cut at the context limit.
fn context(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for hit in hits {
        let block = format!("SOURCE: {}\nTEXT: {} {}\n\n", hit.link, hit.title, hit.snippet);
        if out.len() + block.len() > MAX_CONTEXT_CHARS {
            break;
        }
        out.push_str(&block);
    }
    out
}

fn prompt(name: &str, context: &str) -> String {
    format!(
        r#"Identify the owner of "{name}" from these search results.

{context}
Return strictly valid JSON:
{{"owner_name": str or null, "title": str or null, "source": str or null, "confidence": float}}
Use null if no owner is clearly named. Confidence is 0.0 to 1.0."#
    )
}
