//! Acquisition-suitability scoring.
//!
//! Pure function of the stored fields: four components are computed
//! unclamped (the franchise disqualifier can make Quality negative), the risk
//! penalty is subtracted, and the sum is clamped to `[0, 100]` once.

use sourcing_shared::{Entity, ScoreCard};

const MILLION: i64 = 1_000_000;

const FAMILY_OWNED_POINTS: i32 = 20;
const COMMERCIAL_POINTS: i32 = 20;
const RESIDENTIAL_POINTS: i32 = 5;
const FRANCHISE_PENALTY: i32 = 50;
const OWNER_POINTS: i32 = 15;
const PROFILE_POINTS: i32 = 15;
const RISK_PENALTY: i32 = 50;

/// Score an entity. Missing inputs contribute nothing.
pub fn score(entity: &Entity) -> ScoreCard {
    let mut reasons = Vec::new();

    let financial_size = financial_size(entity.revenue_estimate, &mut reasons);
    let quality = quality(entity, &mut reasons);
    let actionability = actionability(entity, &mut reasons);

    let risk_penalty = if entity.risk_signal.as_ref().is_some_and(|r| r.is_alert()) {
        reasons.push("risk_alert".to_string());
        RISK_PENALTY
    } else {
        0
    };

    let total = (financial_size + quality + actionability - risk_penalty).clamp(0, 100);

    ScoreCard {
        financial_size,
        quality,
        actionability,
        risk_penalty,
        total: total as u8,
        reasons,
    }
}

fn financial_size(revenue: Option<i64>, reasons: &mut Vec<String>) -> i32 {
    let (points, label) = match revenue.unwrap_or_default() {
        r if r >= 15 * MILLION => (30, "size_large"),
        r if r >= 5 * MILLION => (20, "size_medium"),
        r if r >= MILLION => (10, "size_small"),
        _ => return 0,
    };
    reasons.push(label.to_string());
    points
}

fn quality(entity: &Entity, reasons: &mut Vec<String>) -> i32 {
    let mut points = 0;

    if entity.is_family_owned == Some(true) {
        points += FAMILY_OWNED_POINTS;
        reasons.push("family_owned".to_string());
    }

    let industry = entity.industry_tag.as_deref().unwrap_or_default().to_lowercase();
    if industry.contains("commercial")
        || industry.contains("industrial")
        || entity.sells_to_businesses()
    {
        points += COMMERCIAL_POINTS;
        reasons.push("commercial_focus".to_string());
    } else if industry.contains("residential") {
        points += RESIDENTIAL_POINTS;
        reasons.push("residential_focus".to_string());
    }

    if entity.is_franchise == Some(true) {
        points -= FRANCHISE_PENALTY;
        reasons.push("franchise_penalty".to_string());
    }

    points
}

fn actionability(entity: &Entity, reasons: &mut Vec<String>) -> i32 {
    let mut points = 0;

    if entity
        .owner_name
        .as_deref()
        .is_some_and(|o| !o.trim().is_empty())
    {
        points += OWNER_POINTS;
        reasons.push("owner_known".to_string());
    }

    if entity.linkedin_company_url.is_some() || entity.owner_linkedin_url.is_some() {
        points += PROFILE_POINTS;
        reasons.push("linkedin_found".to_string());
    }

    points
}
