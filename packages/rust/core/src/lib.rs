//! Enrichment orchestration and scoring.
//!
//! - [`orchestrator`]: batch enrichment with stage-isolated failures and
//!   idempotent resumption
//! - [`scoring`]: the pure acquisition-suitability score
//! - [`pipeline`]: discovery, enrichment and rescoring in one run

pub mod orchestrator;
pub mod pipeline;
pub mod scoring;

pub use orchestrator::{
    BatchProgress, BatchSummary, EntityReport, SilentProgress, StageFailureReport, rescore_all,
    run_batch,
};
pub use pipeline::{PipelineConfig, PipelineReport, run_pipeline};
pub use scoring::score;
