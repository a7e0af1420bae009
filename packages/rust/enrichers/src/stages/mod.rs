//! Built-in enrichment stages, in plan order.

pub mod ai_classifier;
pub mod contact;
pub mod content;
pub mod domain;
pub mod industry;
pub mod news;
pub mod owner;
pub mod platform;
pub mod revenue;
pub mod social;

pub use ai_classifier::AiClassifierStage;
pub use contact::ContactStage;
pub use content::ContentStage;
pub use domain::DomainStage;
pub use industry::IndustryStage;
pub use news::NewsStage;
pub use owner::OwnerStage;
pub use platform::PlatformStage;
pub use revenue::RevenueStage;
pub use social::SocialStage;

use sourcing_shared::Entity;
use url::Url;

use crate::StageFailure;

/// The entity's site root. Missing or unparseable websites are permanent
/// failures for any stage that needs the site.
pub(crate) fn site_url(entity: &Entity) -> Result<Url, StageFailure> {
    let website = entity
        .website
        .as_deref()
        .filter(|w| !w.trim().is_empty())
        .ok_or_else(|| StageFailure::permanent("no website to fetch"))?;
    Url::parse(website)
        .map_err(|e| StageFailure::permanent(format!("invalid website '{website}': {e}")))
}

/// `base` with its path replaced by `path` (empty for the home page).
pub(crate) fn page_url(base: &Url, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    base.join(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| base.to_string())
}

/// Non-empty, trimmed value or `None`.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `"{city} {state}"` with missing parts left out.
pub(crate) fn location(entity: &Entity) -> String {
    [entity.city.as_deref(), entity.state.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `existing` followed by the new entries it does not already contain.
pub(crate) fn merge_unique(existing: &[String], new: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut merged = existing.to_vec();
    for item in new {
        if !merged.iter().any(|m| m.eq_ignore_ascii_case(&item)) {
            merged.push(item);
        }
    }
    merged
}
