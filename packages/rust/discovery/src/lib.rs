//! Discovery Collector: directory search → deduplicated, unprocessed entities.
//!
//! Each configured query is run against a [`DirectorySearch`] source page by
//! page. Every listing gets an identity key (normalized domain, else
//! `name|address`), and only keys not already in the store are inserted.
//! A failing query is reported and skipped; it never stops the others.

mod identity;
mod places;

use std::time::Duration;

use async_trait::async_trait;
use sourcing_providers::ProviderError;
use sourcing_shared::{DiscoveryConfig, Entity, QuerySpec, Result};
use sourcing_storage::Storage;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

pub use identity::{ParsedAddress, identity_key, parse_address};
pub use places::PlacesClient;

// ---------------------------------------------------------------------------
// Directory capability
// ---------------------------------------------------------------------------

/// One raw directory listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub name: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub rating: Option<f64>,
    pub reviews: Option<i64>,
}

/// One page of directory results.
#[derive(Debug, Clone, Default)]
pub struct DirectoryPage {
    pub listings: Vec<Listing>,
    pub next_page_token: Option<String>,
}

/// A location/category directory.
#[async_trait]
pub trait DirectorySearch: Send + Sync {
    async fn search_page(
        &self,
        text_query: &str,
        region_code: &str,
        page_token: Option<&str>,
    ) -> std::result::Result<DirectoryPage, ProviderError>;
}

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Runtime discovery options.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Default region when a query does not set one.
    pub region_code: String,
    /// Pause between pages of the same query.
    pub page_delay: Duration,
    /// User tag stamped on every inserted entity.
    pub owner_tag: Option<String>,
}

impl From<&DiscoveryConfig> for CollectOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            region_code: config.region_code.clone(),
            page_delay: Duration::from_millis(config.page_delay_ms),
            owner_tag: None,
        }
    }
}

/// Outcome of a single query.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub query: String,
    pub listings_seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Why the query stopped early, if it did.
    pub error: Option<String>,
}

/// Summary of a collection run.
#[derive(Debug, Clone, Default)]
pub struct CollectReport {
    pub queries: Vec<QueryOutcome>,
    pub inserted: usize,
    pub duplicates: usize,
    /// Set when the run stopped because cancellation was requested.
    pub cancelled: bool,
}

impl CollectReport {
    /// Queries that reported an error.
    pub fn failed_queries(&self) -> impl Iterator<Item = &QueryOutcome> {
        self.queries.iter().filter(|q| q.error.is_some())
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Run every query and admit new entities in `unprocessed` state.
///
/// Provider errors and empty results are recorded on the query's outcome and
/// the next query proceeds. Store errors abort the run: they mean the
/// database itself is unusable.
#[instrument(skip_all, fields(queries = queries.len()))]
pub async fn collect(
    queries: &[QuerySpec],
    directory: &dyn DirectorySearch,
    storage: &Storage,
    opts: &CollectOptions,
    cancel: &watch::Receiver<bool>,
) -> Result<CollectReport> {
    let mut report = CollectReport::default();

    for spec in queries {
        if *cancel.borrow() {
            info!("discovery cancelled");
            report.cancelled = true;
            break;
        }

        let outcome = collect_query(spec, directory, storage, opts, cancel).await?;
        report.inserted += outcome.inserted;
        report.duplicates += outcome.duplicates;
        report.queries.push(outcome);
    }

    if !report.cancelled && *cancel.borrow() {
        report.cancelled = true;
    }

    info!(
        inserted = report.inserted,
        duplicates = report.duplicates,
        failed_queries = report.failed_queries().count(),
        "discovery finished"
    );
    Ok(report)
}

async fn collect_query(
    spec: &QuerySpec,
    directory: &dyn DirectorySearch,
    storage: &Storage,
    opts: &CollectOptions,
    cancel: &watch::Receiver<bool>,
) -> Result<QueryOutcome> {
    let text_query = spec.text_query();
    let region = spec.region_code.as_deref().unwrap_or(&opts.region_code);
    let limit = spec.limit as usize;
    let mut outcome = QueryOutcome {
        query: text_query.clone(),
        ..Default::default()
    };
    let mut page_token: Option<String> = None;

    info!(query = %text_query, limit, "searching directory");

    while outcome.listings_seen < limit && !*cancel.borrow() {
        let page = match directory
            .search_page(&text_query, region, page_token.as_deref())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(query = %text_query, error = %e, "directory query failed");
                outcome.error = Some(e.to_string());
                break;
            }
        };

        if page.listings.is_empty() {
            if outcome.listings_seen == 0 {
                outcome.error = Some("no results".into());
            }
            break;
        }

        let remaining = limit - outcome.listings_seen;
        for listing in page.listings.into_iter().take(remaining) {
            outcome.listings_seen += 1;
            let entity = listing_to_entity(listing, opts.owner_tag.as_deref());
            if storage.insert_entity_if_absent(&entity).await? {
                debug!(key = %entity.key, name = %entity.name, "entity admitted");
                outcome.inserted += 1;
            } else {
                debug!(key = %entity.key, name = %entity.name, "duplicate discarded");
                outcome.duplicates += 1;
            }
        }

        page_token = page.next_page_token;
        if page_token.is_none() || outcome.listings_seen >= limit {
            break;
        }
        if !opts.page_delay.is_zero() {
            tokio::time::sleep(opts.page_delay).await;
        }
    }

    info!(
        query = %text_query,
        inserted = outcome.inserted,
        duplicates = outcome.duplicates,
        "query done"
    );
    Ok(outcome)
}

/// Build an unprocessed entity from a listing.
pub fn listing_to_entity(listing: Listing, owner_tag: Option<&str>) -> Entity {
    let name = listing
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| listing.website.clone())
        .unwrap_or_else(|| "Unknown".into());

    let key = identity_key(listing.website.as_deref(), &name, listing.address.as_deref());
    let parsed = listing
        .address
        .as_deref()
        .map(parse_address)
        .unwrap_or_default();

    let mut entity = Entity::new(key, name);
    entity.website = listing.website;
    entity.phone = listing.phone;
    entity.address = listing.address;
    entity.city = parsed.city;
    entity.state = parsed.state;
    entity.zip = parsed.zip;
    entity.country = parsed.country;
    entity.directory_rating = listing.rating;
    entity.directory_reviews = listing.reviews;
    entity.owner_tag = owner_tag.map(str::to_string);
    entity
}
