//! Batch enrichment: select pending entities, run the stage plan on each,
//! score the result, commit everything for an entity in one write.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sourcing_enrichers::{StageFailure, StagePlan};
use sourcing_shared::{
    Entity, Field, IdentityKey, ProcessingStatus, Provenance, Result, RunOptions, SourcingError,
    StageRecord, StageState,
};
use sourcing_storage::{EntityCommit, Storage};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::scoring;

/// Failure reasons listed in a batch summary.
const TOP_FAILURES: usize = 5;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A stage that failed during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailureReport {
    pub stage: String,
    pub reason: String,
    pub retryable: bool,
}

/// Outcome for one entity.
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub key: IdentityKey,
    pub name: String,
    /// Stages run and succeeded this time.
    pub succeeded: Vec<String>,
    /// Stages not run because an earlier pass settled them: succeeded, or
    /// failed without being retryable.
    pub skipped: Vec<String>,
    pub failed: Vec<StageFailureReport>,
    pub status: ProcessingStatus,
    pub score: Option<u8>,
    /// Set when the entity's write was rejected; nothing from this run was kept.
    pub store_error: Option<String>,
}

/// Outcome of [`run_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Entities selected for the batch.
    pub selected: usize,
    /// Entities actually processed (fewer than `selected` after cancellation).
    pub processed: usize,
    pub by_status: BTreeMap<ProcessingStatus, usize>,
    pub store_failures: usize,
    /// `("stage: reason", count)`, most frequent first.
    pub top_failures: Vec<(String, usize)>,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// In selection order.
    pub reports: Vec<EntityReport>,
}

impl BatchSummary {
    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or_default()
    }
}

/// Progress callback for batch runs.
pub trait BatchProgress: Send + Sync {
    /// Called when a multi-step run enters a new phase.
    fn phase(&self, _name: &str) {}
    /// Called once the batch has been selected.
    fn started(&self, total: usize);
    /// Called as each entity finishes.
    fn entity_done(&self, report: &EntityReport, done: usize, total: usize);
    /// Called when the batch completes.
    fn finished(&self, summary: &BatchSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn started(&self, _total: usize) {}
    fn entity_done(&self, _report: &EntityReport, _done: usize, _total: usize) {}
    fn finished(&self, _summary: &BatchSummary) {}
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Enrich one batch of `unprocessed`/`partial` entities.
///
/// Entities with nothing left to run are not selected. A stage is settled
/// once it succeeds or fails permanently; only `force_refresh` runs it again.
/// Entities run concurrently up to `opts.concurrency`; stages within an
/// entity run in plan order. Once `cancel` turns `true` no further entities
/// are admitted, while those already running finish and commit.
///
/// Only failing to select the batch is an error. Stage failures and rejected
/// writes are reported per entity.
#[instrument(skip_all, fields(stages = plan.len(), force = opts.force_refresh))]
pub async fn run_batch(
    storage: Arc<Storage>,
    plan: Arc<StagePlan>,
    opts: &RunOptions,
    progress: &dyn BatchProgress,
    cancel: watch::Receiver<bool>,
) -> Result<BatchSummary> {
    let start = Instant::now();
    let due_for: Vec<&str> = if opts.force_refresh {
        Vec::new()
    } else {
        plan.names()
    };
    let entities = storage.list_due(&due_for, opts.batch_size).await?;
    let total = entities.len();

    info!(
        selected = total,
        concurrency = opts.concurrency,
        "starting enrichment batch"
    );
    progress.started(total);

    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1) as usize));
    let mut tasks = JoinSet::new();
    let mut cancel_wait = cancel.clone();
    let mut cancelled = false;

    for (index, entity) in entities.into_iter().enumerate() {
        if *cancel.borrow() {
            cancelled = true;
            break;
        }
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit
                .map_err(|e| SourcingError::validation(format!("worker pool closed: {e}")))?,
            _ = cancellation(&mut cancel_wait) => {
                cancelled = true;
                break;
            }
        };

        let storage = storage.clone();
        let plan = plan.clone();
        let opts = opts.clone();
        tasks.spawn(async move {
            let _permit = permit;
            (index, process_entity(&storage, &plan, &opts, entity).await)
        });
    }

    if cancelled {
        warn!("cancellation requested, waiting for in-flight entities");
    }

    let mut finished: Vec<(usize, EntityReport)> = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, report)) => {
                progress.entity_done(&report, finished.len() + 1, total);
                finished.push((index, report));
            }
            Err(e) => warn!(error = %e, "entity task aborted"),
        }
    }
    finished.sort_by_key(|(index, _)| *index);

    let summary = summarize(
        total,
        finished.into_iter().map(|(_, r)| r).collect(),
        cancelled,
        start.elapsed(),
    );

    info!(
        processed = summary.processed,
        complete = summary.count(ProcessingStatus::Complete),
        partial = summary.count(ProcessingStatus::Partial),
        unprocessed = summary.count(ProcessingStatus::Unprocessed),
        store_failures = summary.store_failures,
        cancelled = summary.cancelled,
        duration_ms = summary.elapsed.as_millis(),
        "enrichment batch completed"
    );
    progress.finished(&summary);

    Ok(summary)
}

/// Resolves once cancellation is requested. Never resolves if the sender is
/// dropped without cancelling.
async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn summarize(
    selected: usize,
    reports: Vec<EntityReport>,
    cancelled: bool,
    elapsed: Duration,
) -> BatchSummary {
    let mut by_status = BTreeMap::new();
    let mut reasons: HashMap<String, usize> = HashMap::new();
    let mut store_failures = 0;

    for report in &reports {
        *by_status.entry(report.status).or_insert(0) += 1;
        if report.store_error.is_some() {
            store_failures += 1;
        }
        for failure in &report.failed {
            *reasons
                .entry(format!("{}: {}", failure.stage, failure.reason))
                .or_insert(0) += 1;
        }
    }

    let mut top_failures: Vec<(String, usize)> = reasons.into_iter().collect();
    top_failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_failures.truncate(TOP_FAILURES);

    BatchSummary {
        selected,
        processed: reports.len(),
        by_status,
        store_failures,
        top_failures,
        cancelled,
        elapsed,
        reports,
    }
}

// ---------------------------------------------------------------------------
// Single entity
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(entity = %entity.key, name = %entity.name))]
async fn process_entity(
    storage: &Storage,
    plan: &StagePlan,
    opts: &RunOptions,
    entity: Entity,
) -> EntityReport {
    let mut report = EntityReport {
        key: entity.key.clone(),
        name: entity.name.clone(),
        succeeded: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
        status: entity.status,
        score: entity.score,
        store_error: None,
    };

    let ledger = match storage.stage_records(&entity.key).await {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!(error = %e, "could not read stage ledger");
            report.store_error = Some(e.to_string());
            return report;
        }
    };

    let mut snapshot = entity.clone();
    let mut changed: BTreeSet<Field> = BTreeSet::new();
    let mut records: Vec<StageRecord> = Vec::new();

    for stage in plan.stages() {
        let name = stage.name();
        let previous = ledger.get(name);
        let succeeded_before = previous.is_some_and(|r| r.state == StageState::Succeeded);
        let failed_for_good =
            previous.is_some_and(|r| r.state == StageState::Failed && !r.retryable);

        if (succeeded_before || failed_for_good) && !opts.force_refresh {
            report.skipped.push(name.to_string());
            continue;
        }

        let outcome = match tokio::time::timeout(opts.stage_timeout, stage.enrich(&snapshot)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(StageFailure::retryable(format!(
                "timed out after {}s",
                opts.stage_timeout.as_secs_f32()
            ))),
        };

        let now = Utc::now();
        let attempts = previous.map_or(0, |r| r.attempts) + 1;

        match outcome {
            Ok(output) => {
                for update in output.updates {
                    let field = update.field();
                    if snapshot.is_manual(field) {
                        debug!(stage = name, field = field.column(), "manual value kept");
                        continue;
                    }
                    snapshot.apply(update);
                    snapshot.provenance.insert(
                        field,
                        Provenance {
                            stage: name.to_string(),
                            confidence: output.confidence,
                            evidence: output.evidence.clone(),
                            recorded_at: now,
                        },
                    );
                    changed.insert(field);
                }
                records.push(StageRecord {
                    stage: name.to_string(),
                    state: StageState::Succeeded,
                    attempts,
                    last_error: None,
                    retryable: false,
                    last_attempt_at: now,
                });
                report.succeeded.push(name.to_string());
            }
            Err(failure) => {
                debug!(stage = name, reason = %failure.reason, retryable = failure.retryable, "stage failed");
                records.push(StageRecord {
                    stage: name.to_string(),
                    // A stage that once succeeded stays succeeded.
                    state: if succeeded_before {
                        StageState::Succeeded
                    } else {
                        StageState::Failed
                    },
                    attempts,
                    last_error: Some(failure.reason.clone()),
                    retryable: failure.retryable,
                    last_attempt_at: now,
                });
                report.failed.push(StageFailureReport {
                    stage: name.to_string(),
                    reason: failure.reason,
                    retryable: failure.retryable,
                });
            }
        }
    }

    let computed = status_after(plan, &ledger, &records, entity.status);
    let card = scoring::score(&snapshot);
    snapshot.status = entity.status.max(computed);
    snapshot.score = Some(card.total);
    snapshot.score_card = Some(card);
    snapshot.last_enriched_at = Some(Utc::now());

    let changed: Vec<Field> = changed.into_iter().collect();
    let commit = EntityCommit {
        entity: &snapshot,
        changed: &changed,
        stages: &records,
    };
    match storage.commit_entity(commit).await {
        Ok(()) => {
            report.status = snapshot.status;
            report.score = snapshot.score;
            debug!(
                status = %report.status,
                score = ?report.score,
                fields = changed.len(),
                "entity committed"
            );
        }
        Err(e) => {
            warn!(error = %e, "entity commit rejected");
            report.store_error = Some(e.to_string());
        }
    }

    report
}

/// Status implied by the ledger once this run's records are applied:
/// every plan stage succeeded → complete, some → partial, none → unprocessed.
fn status_after(
    plan: &StagePlan,
    ledger: &BTreeMap<String, StageRecord>,
    records: &[StageRecord],
    current: ProcessingStatus,
) -> ProcessingStatus {
    if plan.is_empty() {
        return current;
    }

    let succeeded = plan
        .names()
        .into_iter()
        .filter(|name| {
            records
                .iter()
                .find(|r| r.stage == *name)
                .or_else(|| ledger.get(*name))
                .is_some_and(|r| r.state == StageState::Succeeded)
        })
        .count();

    if succeeded == plan.len() {
        ProcessingStatus::Complete
    } else if succeeded > 0 {
        ProcessingStatus::Partial
    } else {
        ProcessingStatus::Unprocessed
    }
}

// ---------------------------------------------------------------------------
// Rescoring
// ---------------------------------------------------------------------------

/// Recompute and persist the score of every entity without running any stage.
/// Returns how many entities were rescored.
#[instrument(skip_all)]
pub async fn rescore_all(storage: &Storage) -> Result<usize> {
    let mut rescored = 0;
    for key in storage.list_keys().await? {
        let Some(entity) = storage.get_entity(&key).await? else {
            continue;
        };
        let card = scoring::score(&entity);
        storage.update_score(&key, &card).await?;
        rescored += 1;
    }
    info!(rescored, "scores recomputed");
    Ok(rescored)
}
