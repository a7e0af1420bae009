use async_trait::async_trait;
use sourcing_shared::{Entity, Field, FieldUpdate};
use tracing::debug;

use crate::{Enricher, StageOutput, StageResult};

const REVENUE_PER_HEAD: i64 = 200_000;
const REVENUE_PER_HEAD_COMMERCIAL: i64 = 350_000;
const REVENUE_PER_HEAD_CLEANING: i64 = 90_000;

const BASELINE: i64 = 1_200_000;
const COMMERCIAL_UPLIFT: i64 = 1_500_000;
const INDUSTRIAL_UPLIFT: i64 = 3_000_000;
const FRANCHISE_UNIT: i64 = 1_500_000;
const RESIDENTIAL_CLEANING: i64 = 750_000;

/// Revenue estimate from headcount, or a sector baseline without one.
/// A manually entered estimate is left alone.
pub struct RevenueStage;

impl RevenueStage {
    pub const NAME: &'static str = "revenue";
}

#[async_trait]
impl Enricher for RevenueStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &["ai_classifier"]
    }

    async fn enrich(&self, entity: &Entity) -> StageResult {
        if entity.revenue_estimate.is_some() && entity.is_manual(Field::RevenueEstimate) {
            return Ok(StageOutput::empty());
        }

        let estimate = estimate(entity);
        debug!(entity = %entity.key, estimate, "revenue estimated");
        Ok(StageOutput::with_updates(vec![FieldUpdate::RevenueEstimate(
            estimate,
        )]))
    }
}

fn estimate(entity: &Entity) -> i64 {
    let industry = entity.industry_tag.as_deref().unwrap_or_default().to_lowercase();
    let commercial = industry.contains("commercial") || industry.contains("industrial");
    let cleaning = industry.contains("cleaning") || industry.contains("janitorial");

    if let Some(employees) = entity.employee_count.filter(|n| *n > 0) {
        let per_head = if commercial {
            REVENUE_PER_HEAD_COMMERCIAL
        } else if cleaning {
            REVENUE_PER_HEAD_CLEANING
        } else {
            REVENUE_PER_HEAD
        };
        return employees.saturating_mul(per_head);
    }

    let mut estimate = BASELINE;
    if commercial {
        estimate += COMMERCIAL_UPLIFT;
    }
    if industry.contains("industrial") {
        estimate += INDUSTRIAL_UPLIFT;
    }
    if entity.sells_to_businesses() {
        estimate = estimate * 5 / 4;
    }
    if entity.is_franchise == Some(true) {
        estimate = FRANCHISE_UNIT;
    }
    if industry.contains("residential") && industry.contains("cleaning") {
        estimate = RESIDENTIAL_CLEANING;
    }
    estimate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entity;
    use chrono::Utc;
    use sourcing_shared::{MANUAL_SOURCE, Provenance};

    async fn run(e: &Entity) -> Vec<FieldUpdate> {
        RevenueStage.enrich(e).await.unwrap().updates
    }

    #[tokio::test]
    async fn headcount_rates() {
        let mut e = entity("Acme");
        e.employee_count = Some(10);
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(2_000_000)]);

        e.industry_tag = Some("Commercial HVAC".into());
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(3_500_000)]);

        e.industry_tag = Some("Janitorial Services".into());
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(900_000)]);
    }

    #[tokio::test]
    async fn sector_baselines() {
        let mut e = entity("Acme");
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(1_200_000)]);

        e.industry_tag = Some("Industrial Cleaning".into());
        e.customer_type = Some("B2B".into());
        // (1.2M + 1.5M + 3M) * 1.25
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(7_125_000)]);

        e.customer_type = Some("B2B/Commercial".into());
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(7_125_000)]);

        e.customer_type = Some("B2C".into());
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(5_700_000)]);

        e.is_franchise = Some(true);
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(1_500_000)]);

        e.is_franchise = None;
        e.industry_tag = Some("Residential Cleaning".into());
        assert_eq!(run(&e).await, vec![FieldUpdate::RevenueEstimate(750_000)]);
    }

    #[tokio::test]
    async fn manual_estimate_is_kept() {
        let mut e = entity("Acme");
        e.revenue_estimate = Some(9_000_000);
        e.provenance.insert(
            Field::RevenueEstimate,
            Provenance {
                stage: MANUAL_SOURCE.into(),
                confidence: None,
                evidence: None,
                recorded_at: Utc::now(),
            },
        );
        assert!(run(&e).await.is_empty());
    }
}
