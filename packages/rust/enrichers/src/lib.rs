//! Enrichment stages and the ordered plan that runs them.
//!
//! This crate provides:
//! - [`Enricher`]: one independent, fallible stage (entity snapshot in,
//!   [`StageOutput`] or [`StageFailure`] out)
//! - [`stages`]: the built-in stages (domain, content, social, platform,
//!   industry, news, AI classification, owner, contact, revenue)
//! - [`StagePlan`]: the validated stage order, where every declared
//!   dependency appears before the stage that needs it

pub mod html;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sourcing_providers::{LlmSource, NewsSource, ProviderError, SearchSource, WebSource};
use sourcing_shared::{Entity, FieldUpdate, Result, SourcingError};
use tracing::warn;

pub use stages::{
    AiClassifierStage, ContactStage, ContentStage, DomainStage, IndustryStage, NewsStage,
    OwnerStage, PlatformStage, RevenueStage, SocialStage,
};

// ---------------------------------------------------------------------------
// Stage contract
// ---------------------------------------------------------------------------

/// Successful stage result: field writes plus the provenance they carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub updates: Vec<FieldUpdate>,
    /// AI confidence in `[0, 1]` for derived values.
    pub confidence: Option<f64>,
    /// Excerpt backing a derived classification.
    pub evidence: Option<String>,
}

impl StageOutput {
    /// Success with nothing to write (input already present, nothing found).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_updates(updates: Vec<FieldUpdate>) -> Self {
        Self {
            updates,
            ..Default::default()
        }
    }
}

/// Typed stage failure. Never aborts the entity or the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub reason: String,
    /// `true` for transient provider trouble (timeouts, 429, 5xx).
    pub retryable: bool,
}

impl StageFailure {
    /// Missing or malformed input; retrying without new data will not help.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }
}

impl From<ProviderError> for StageFailure {
    fn from(err: ProviderError) -> Self {
        Self {
            retryable: err.is_retryable(),
            reason: err.to_string(),
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

pub type StageResult = std::result::Result<StageOutput, StageFailure>;

/// One enrichment stage.
///
/// Stages only read the snapshot they are given; they never see another
/// stage's internal state.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Stable stage name (ledger key, provenance tag).
    fn name(&self) -> &'static str;

    /// Stages whose output this one reads. They must run earlier in the plan.
    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    async fn enrich(&self, entity: &Entity) -> StageResult;
}

// ---------------------------------------------------------------------------
// StagePlan
// ---------------------------------------------------------------------------

/// Ordered, dependency-checked list of stages.
#[derive(Clone)]
pub struct StagePlan {
    stages: Vec<Arc<dyn Enricher>>,
}

impl std::fmt::Debug for StagePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl StagePlan {
    /// Validate and build a plan. Fails on duplicate names or on a stage
    /// placed before (or without) one of its dependencies.
    pub fn new(stages: Vec<Arc<dyn Enricher>>) -> Result<Self> {
        let mut seen: HashSet<&'static str> = HashSet::new();
        for stage in &stages {
            for dep in stage.depends_on() {
                if !seen.contains(dep) {
                    return Err(SourcingError::validation(format!(
                        "stage '{}' depends on '{dep}', which does not run before it",
                        stage.name()
                    )));
                }
            }
            if !seen.insert(stage.name()) {
                return Err(SourcingError::validation(format!(
                    "stage '{}' appears twice in the plan",
                    stage.name()
                )));
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Arc<dyn Enricher>] {
        &self.stages
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Default plan
// ---------------------------------------------------------------------------

/// External sources available to the built-in stages. A missing source
/// removes the stages that need it.
#[derive(Clone, Default)]
pub struct Sources {
    pub web: Option<Arc<dyn WebSource>>,
    pub search: Option<Arc<dyn SearchSource>>,
    pub news: Option<Arc<dyn NewsSource>>,
    pub llm: Option<Arc<dyn LlmSource>>,
}

/// Names of every built-in stage, in execution order.
pub const DEFAULT_STAGE_ORDER: [&str; 10] = [
    DomainStage::NAME,
    ContentStage::NAME,
    SocialStage::NAME,
    PlatformStage::NAME,
    IndustryStage::NAME,
    NewsStage::NAME,
    AiClassifierStage::NAME,
    OwnerStage::NAME,
    ContactStage::NAME,
    RevenueStage::NAME,
];

/// Build the standard ten-stage plan from whatever sources are available.
///
/// Stages listed in `disabled`, stages whose source is missing, and stages
/// whose dependencies were removed are all left out (with a warning).
pub fn default_plan(sources: &Sources, disabled: &[String]) -> Result<StagePlan> {
    for name in disabled {
        if !DEFAULT_STAGE_ORDER.contains(&name.as_str()) {
            return Err(SourcingError::validation(format!(
                "unknown stage '{name}' in disabled_stages"
            )));
        }
    }

    let web = sources.web.clone();
    let search = sources.search.clone();
    let news = sources.news.clone();
    let llm = sources.llm.clone();

    let candidates: Vec<(&'static str, Option<Arc<dyn Enricher>>)> = vec![
        (DomainStage::NAME, Some(Arc::new(DomainStage) as Arc<dyn Enricher>)),
        (
            ContentStage::NAME,
            web.clone().map(|w| Arc::new(ContentStage::new(w)) as Arc<dyn Enricher>),
        ),
        (
            SocialStage::NAME,
            search.clone().map(|s| Arc::new(SocialStage::new(s)) as Arc<dyn Enricher>),
        ),
        (
            PlatformStage::NAME,
            web.clone().map(|w| Arc::new(PlatformStage::new(w)) as Arc<dyn Enricher>),
        ),
        (IndustryStage::NAME, Some(Arc::new(IndustryStage) as Arc<dyn Enricher>)),
        (
            NewsStage::NAME,
            news.map(|n| Arc::new(NewsStage::new(n)) as Arc<dyn Enricher>),
        ),
        (
            AiClassifierStage::NAME,
            llm.clone().map(|l| Arc::new(AiClassifierStage::new(l)) as Arc<dyn Enricher>),
        ),
        (
            OwnerStage::NAME,
            search
                .zip(llm)
                .map(|(s, l)| Arc::new(OwnerStage::new(s, l)) as Arc<dyn Enricher>),
        ),
        (
            ContactStage::NAME,
            web.map(|w| Arc::new(ContactStage::new(w)) as Arc<dyn Enricher>),
        ),
        (RevenueStage::NAME, Some(Arc::new(RevenueStage) as Arc<dyn Enricher>)),
    ];

    let mut included: HashSet<&'static str> = HashSet::new();
    let mut stages = Vec::new();
    for (name, stage) in candidates {
        if disabled.iter().any(|d| d == name) {
            warn!(stage = name, "stage disabled by config");
            continue;
        }
        let Some(stage) = stage else {
            warn!(stage = name, "stage skipped: provider not configured");
            continue;
        };
        if let Some(missing) = stage.depends_on().iter().find(|d| !included.contains(*d)) {
            warn!(stage = name, dependency = *missing, "stage skipped: dependency not in plan");
            continue;
        }
        included.insert(name);
        stages.push(stage);
    }

    StagePlan::new(stages)
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubLlm, StubNews, StubSearch, StubWeb};

    struct Named(&'static str, &'static [&'static str]);

    #[async_trait]
    impl Enricher for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn depends_on(&self) -> &'static [&'static str] {
            self.1
        }
        async fn enrich(&self, _entity: &Entity) -> StageResult {
            Ok(StageOutput::empty())
        }
    }

    fn named(name: &'static str, deps: &'static [&'static str]) -> Arc<dyn Enricher> {
        Arc::new(Named(name, deps))
    }

    #[test]
    fn plan_accepts_dependencies_in_order() {
        let plan = StagePlan::new(vec![
            named("a", &[]),
            named("b", &["a"]),
            named("c", &["a", "b"]),
        ])
        .unwrap();
        assert_eq!(plan.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn plan_rejects_dependency_after_dependent() {
        let err = StagePlan::new(vec![named("b", &["a"]), named("a", &[])])
            .unwrap_err();
        assert!(err.to_string().contains("'b' depends on 'a'"));
    }

    #[test]
    fn plan_rejects_duplicates() {
        let err = StagePlan::new(vec![named("a", &[]), named("a", &[])])
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    fn all_sources() -> Sources {
        Sources {
            web: Some(Arc::new(StubWeb::default())),
            search: Some(Arc::new(StubSearch::default())),
            news: Some(Arc::new(StubNews::default())),
            llm: Some(Arc::new(StubLlm::default())),
        }
    }

    #[test]
    fn default_plan_has_all_stages_in_order() {
        let plan = default_plan(&all_sources(), &[]).unwrap();
        assert_eq!(plan.names(), DEFAULT_STAGE_ORDER.to_vec());
    }

    #[test]
    fn missing_llm_drops_dependents() {
        let sources = Sources {
            llm: None,
            ..all_sources()
        };
        let plan = default_plan(&sources, &[]).unwrap();
        let names = plan.names();
        assert!(!names.contains(&"ai_classifier"));
        assert!(!names.contains(&"owner"));
        assert!(!names.contains(&"revenue"));
        assert!(names.contains(&"contact"));
        assert!(names.contains(&"news"));
    }

    #[test]
    fn disabling_content_removes_its_dependents() {
        let plan = default_plan(&all_sources(), &["content".to_string()]).unwrap();
        assert_eq!(
            plan.names(),
            vec!["domain", "platform", "news", "contact"]
        );
    }

    #[test]
    fn unknown_disabled_stage_is_rejected() {
        assert!(default_plan(&all_sources(), &["nope".to_string()]).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
