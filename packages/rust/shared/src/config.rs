//! Application configuration for the sourcing engine.
//!
//! User config lives at `~/.sourcing/sourcing.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SourcingError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sourcing.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sourcing";

// ---------------------------------------------------------------------------
// Config structs (matching sourcing.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Directory search settings and queries.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Enrichment stage settings.
    #[serde(default)]
    pub enrichment: EnrichmentSettings,

    /// External provider settings.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum entities selected per enrichment batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Entities processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-stage timeout in seconds.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            stage_timeout_secs: default_stage_timeout(),
        }
    }
}

fn default_database_path() -> String {
    "~/.sourcing/sourcing.db".into()
}
fn default_batch_size() -> u32 {
    50
}
fn default_concurrency() -> u32 {
    4
}
fn default_stage_timeout() -> u64 {
    30
}

/// `[discovery]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Region bias for directory searches.
    #[serde(default = "default_region")]
    pub region_code: String,

    /// Pause between result pages of the same query.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Category/location queries to run.
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            region_code: default_region(),
            page_delay_ms: default_page_delay(),
            queries: Vec::new(),
        }
    }
}

fn default_region() -> String {
    "US".into()
}
fn default_page_delay() -> u64 {
    2_000
}

/// `[[discovery.queries]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Business category, e.g. `commercial HVAC`.
    pub category: String,
    /// Location terms, e.g. `Austin, TX`.
    pub location: String,
    /// Maximum listings admitted from this query.
    #[serde(default = "default_query_limit")]
    pub limit: u32,
    /// Overrides `[discovery].region_code`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_code: Option<String>,
}

impl QuerySpec {
    /// Free-text query sent to the directory.
    pub fn text_query(&self) -> String {
        format!("{} in {}", self.category.trim(), self.location.trim())
    }
}

fn default_query_limit() -> u32 {
    20
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    /// User-Agent for website fetches.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for a single HTTP request.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Stage names removed from the plan.
    #[serde(default)]
    pub disabled_stages: Vec<String>,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            http_timeout_secs: default_http_timeout(),
            disabled_stages: Vec::new(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("SourcingEngine/", env!("CARGO_PKG_VERSION")).into()
}
fn default_http_timeout() -> u64 {
    15
}

/// `[providers]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Name of the env var holding the Google Places key (never the key itself).
    #[serde(default = "default_places_key_env")]
    pub places_api_key_env: String,

    /// Name of the env var holding the Serper key.
    #[serde(default = "default_serper_key_env")]
    pub serper_api_key_env: String,

    /// Name of the env var holding the Gemini key.
    #[serde(default = "default_gemini_key_env")]
    pub gemini_api_key_env: String,

    /// Gemini model used for classification and owner extraction.
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Minimum ms between Places calls.
    #[serde(default)]
    pub places_rate_limit_ms: u64,

    /// Minimum ms between Serper calls.
    #[serde(default = "default_rate_limit")]
    pub serper_rate_limit_ms: u64,

    /// Minimum ms between Gemini calls.
    #[serde(default = "default_rate_limit")]
    pub gemini_rate_limit_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            places_api_key_env: default_places_key_env(),
            serper_api_key_env: default_serper_key_env(),
            gemini_api_key_env: default_gemini_key_env(),
            gemini_model: default_gemini_model(),
            places_rate_limit_ms: 0,
            serper_rate_limit_ms: default_rate_limit(),
            gemini_rate_limit_ms: default_rate_limit(),
        }
    }
}

fn default_places_key_env() -> String {
    "GOOGLE_PLACES_API_KEY".into()
}
fn default_serper_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_gemini_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_gemini_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_rate_limit() -> u64 {
    1_000
}

// ---------------------------------------------------------------------------
// Run options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime enrichment batch options, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum entities selected (`None` = all eligible).
    pub batch_size: Option<u32>,
    /// Entities processed in parallel.
    pub concurrency: u32,
    /// Per-stage timeout.
    pub stage_timeout: Duration,
    /// Re-run stages that already succeeded.
    pub force_refresh: bool,
}

impl From<&AppConfig> for RunOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: Some(config.defaults.batch_size),
            concurrency: config.defaults.concurrency.max(1),
            stage_timeout: Duration::from_secs(config.defaults.stage_timeout_secs),
            force_refresh: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sourcing/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SourcingError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sourcing/sourcing.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SourcingError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SourcingError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SourcingError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SourcingError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SourcingError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| SourcingError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Read an API key from the env var named in the config. Empty counts as missing.
pub fn read_api_key(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

/// Check that the directory-search key is available before running discovery.
pub fn validate_places_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.providers.places_api_key_env;
    read_api_key(var_name).ok_or_else(|| {
        SourcingError::config(format!(
            "Google Places API key not found. Set the {var_name} environment variable."
        ))
    })
}

/// Names of provider key env vars that are not set.
pub fn missing_provider_keys(config: &AppConfig) -> Vec<String> {
    [
        &config.providers.serper_api_key_env,
        &config.providers.gemini_api_key_env,
    ]
    .into_iter()
    .filter(|name| read_api_key(name).is_none())
    .cloned()
    .collect()
}
