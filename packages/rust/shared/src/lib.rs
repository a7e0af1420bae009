//! Shared types, error model, and configuration for the sourcing engine.
//!
//! This crate is the foundation depended on by all other sourcing crates.
//! It provides:
//! - [`SourcingError`]: the unified error type
//! - Domain types ([`Entity`], [`FieldUpdate`], [`RiskSignal`], [`ScoreCard`], [`IdentityKey`])
//! - Configuration ([`AppConfig`], [`RunOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, DiscoveryConfig, EnrichmentSettings, ProvidersConfig, QuerySpec,
    RunOptions, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, missing_provider_keys, read_api_key, validate_places_key,
};
pub use error::{Result, SourcingError};
pub use types::{
    ALL_FIELDS, Entity, Field, FieldUpdate, IdentityKey, MANUAL_SOURCE, ProcessingStatus,
    Provenance, RiskEvidence, RiskSignal, ScoreCard, StageRecord, StageState, normalize_domain,
};
