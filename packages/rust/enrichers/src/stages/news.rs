use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use sourcing_providers::{NewsItem, NewsSource};
use sourcing_shared::{Entity, FieldUpdate, RiskEvidence, RiskSignal};
use tracing::{debug, instrument};

use crate::{Enricher, StageOutput, StageResult};

const MAX_ARTICLES: u32 = 5;

/// Alerts kept in the flag; the rest stay in the evidence list.
const MAX_ALERTS: usize = 2;

static RISK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(lawsuits?|sue[sd]?|suing|bankrupt\w*|fraud\w*|scandals?|court|guilty|fined?|violations?|investigations?)\b",
    )
    .expect("risk keyword regex")
});

/// Legal-form suffixes dropped before matching a name in article text.
static LEGAL_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(inc|llc|corp|co|ltd)\b\.?").expect("legal suffix regex")
});

/// Scans recent local news for legal or financial trouble.
pub struct NewsStage {
    news: Arc<dyn NewsSource>,
}

impl NewsStage {
    pub const NAME: &'static str = "news";

    pub fn new(news: Arc<dyn NewsSource>) -> Self {
        Self { news }
    }
}

#[async_trait]
impl Enricher for NewsStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip_all, fields(stage = Self::NAME, entity = %entity.key))]
    async fn enrich(&self, entity: &Entity) -> StageResult {
        let city = entity.city.as_deref().unwrap_or_default().trim();
        let anchor = if city.is_empty() {
            String::new()
        } else {
            format!(" \"{city}\"")
        };
        let query = format!(
            "\"{}\"{anchor} lawsuit OR bankruptcy OR fraud OR scandal OR \"court case\" OR complaint",
            entity.name
        );

        let articles = self.news.news(&query, MAX_ARTICLES).await?;
        let signal = assess(&entity.name, city, &articles);

        debug!(articles = articles.len(), alert = signal.is_alert(), "news scanned");
        Ok(StageOutput::with_updates(vec![FieldUpdate::RiskSignal(signal)]))
    }
}

/// Build the risk signal from a set of articles.
///
/// An article raises an alert only when it mentions a risk keyword and
/// names the company (suffixes stripped) or its city.
fn assess(name: &str, city: &str, articles: &[NewsItem]) -> RiskSignal {
    if articles.is_empty() {
        return RiskSignal::clean("No local negative news");
    }

    let simple_name = LEGAL_SUFFIX_RE
        .replace_all(&name.to_lowercase(), "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let city = city.to_lowercase();

    let mut alerts = Vec::new();
    for article in articles {
        let text = format!("{} {}", article.title, article.snippet).to_lowercase();
        let relevant = (!simple_name.is_empty() && text.contains(&simple_name))
            || (!city.is_empty() && text.contains(&city));
        if relevant && RISK_RE.is_match(&text) {
            alerts.push(format!("{}: {}", RiskSignal::ALERT_MARKER, article.title));
        }
    }

    let evidence = articles
        .iter()
        .map(|a| RiskEvidence {
            title: a.title.clone(),
            date: a.date.clone(),
            source: a.source.clone(),
            link: Some(a.link.clone()).filter(|l| !l.is_empty()),
        })
        .collect();

    let flag = if alerts.is_empty() {
        RiskSignal::clean("News found but validated as irrelevant/safe").flag
    } else {
        alerts.truncate(MAX_ALERTS);
        alerts.join(" | ")
    };

    RiskSignal { flag, evidence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubNews, entity, timeout};

    fn located() -> Entity {
        let mut e = entity("Acme HVAC, Inc.");
        e.city = Some("Austin".into());
        e
    }

    fn signal(out: StageOutput) -> RiskSignal {
        match out.updates.as_slice() {
            [FieldUpdate::RiskSignal(s)] => s.clone(),
            other => panic!("unexpected updates: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_articles_is_clean() {
        let news = Arc::new(StubNews::default());
        let out = NewsStage::new(news.clone()).enrich(&located()).await.unwrap();
        let s = signal(out);
        assert_eq!(s.flag, "Clean (No local negative news)");
        assert!(!s.is_alert());
        assert!(news.queries.lock().unwrap()[0].starts_with("\"Acme HVAC, Inc.\" \"Austin\" lawsuit"));
    }

    #[tokio::test]
    async fn relevant_risky_articles_alert() {
        let news = StubNews::default()
            .item("Acme HVAC sued by former customer", "A lawsuit filed Monday...")
            .item("Austin contractor files for bankruptcy", "Local firm ...")
            .item("Acme HVAC fined by state board", "...")
            .item("HVAC industry fraud trends", "nationwide");
        let s = signal(NewsStage::new(Arc::new(news)).enrich(&located()).await.unwrap());

        assert!(s.is_alert());
        assert_eq!(
            s.flag,
            "ALERT: Acme HVAC sued by former customer | ALERT: Austin contractor files for bankruptcy"
        );
        assert_eq!(s.evidence.len(), 4);
        assert_eq!(s.evidence[0].source.as_deref(), Some("Local Herald"));
    }

    #[tokio::test]
    async fn irrelevant_articles_are_clean() {
        let news = StubNews::default().item("HVAC industry fraud trends", "nationwide");
        let s = signal(NewsStage::new(Arc::new(news)).enrich(&located()).await.unwrap());
        assert_eq!(s.flag, "Clean (News found but validated as irrelevant/safe)");
        assert_eq!(s.evidence.len(), 1);
    }

    #[tokio::test]
    async fn keyword_must_be_a_whole_word() {
        let news = StubNews::default().item("Acme HVAC opens Austin courtyard showroom", "");
        let s = signal(NewsStage::new(Arc::new(news)).enrich(&located()).await.unwrap());
        assert!(!s.is_alert());
    }

    #[tokio::test]
    async fn provider_timeout_is_retryable() {
        let news = StubNews::default().failing(timeout);
        let err = NewsStage::new(Arc::new(news)).enrich(&located()).await.unwrap_err();
        assert!(err.retryable);
    }
}
