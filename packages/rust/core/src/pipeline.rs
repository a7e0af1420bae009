//! End-to-end `run` pipeline: discovery → enrichment batch → rescoring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{info, instrument, warn};

use sourcing_discovery::{CollectOptions, CollectReport, DirectorySearch};
use sourcing_enrichers::StagePlan;
use sourcing_shared::{QuerySpec, Result, RunOptions};
use sourcing_storage::Storage;

use crate::orchestrator::{self, BatchProgress, BatchSummary};

/// Configuration for [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory queries to collect from.
    pub queries: Vec<QuerySpec>,
    pub collect: CollectOptions,
    pub run: RunOptions,
}

/// Result of [`run_pipeline`].
#[derive(Debug)]
pub struct PipelineReport {
    pub collect: CollectReport,
    /// `None` when the run was cancelled during discovery.
    pub batch: Option<BatchSummary>,
    /// Entities rescored after the batch.
    pub rescored: usize,
    pub elapsed: Duration,
}

/// Discover new entities, enrich one batch, then rescore every entity so
/// scores reflect the current rules.
#[instrument(skip_all, fields(queries = config.queries.len()))]
pub async fn run_pipeline(
    storage: Arc<Storage>,
    directory: &dyn DirectorySearch,
    plan: Arc<StagePlan>,
    config: &PipelineConfig,
    progress: &dyn BatchProgress,
    cancel: watch::Receiver<bool>,
) -> Result<PipelineReport> {
    let start = Instant::now();

    progress.phase("Discovering");
    let collect =
        sourcing_discovery::collect(&config.queries, directory, &storage, &config.collect, &cancel)
            .await?;
    for failed in collect.failed_queries() {
        warn!(
            query = %failed.query,
            error = failed.error.as_deref().unwrap_or_default(),
            "query produced nothing"
        );
    }

    if collect.cancelled {
        return Ok(PipelineReport {
            collect,
            batch: None,
            rescored: 0,
            elapsed: start.elapsed(),
        });
    }

    progress.phase("Enriching");
    let batch =
        orchestrator::run_batch(storage.clone(), plan, &config.run, progress, cancel).await?;

    progress.phase("Scoring");
    let rescored = orchestrator::rescore_all(&storage).await?;

    let report = PipelineReport {
        collect,
        batch: Some(batch),
        rescored,
        elapsed: start.elapsed(),
    };

    info!(
        inserted = report.collect.inserted,
        duplicates = report.collect.duplicates,
        rescored = report.rescored,
        duration_ms = report.elapsed.as_millis(),
        "pipeline completed"
    );

    Ok(report)
}
