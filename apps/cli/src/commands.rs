//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use sourcing_core::{BatchProgress, BatchSummary, EntityReport, PipelineConfig};
use sourcing_discovery::{CollectOptions, CollectReport, PlacesClient};
use sourcing_enrichers::{Sources, StagePlan};
use sourcing_providers::{
    GeminiClient, HttpFetcher, LlmSource, NewsSource, SearchSource, SerperClient, WebSource,
};
use sourcing_shared::{
    AppConfig, FieldUpdate, IdentityKey, ProcessingStatus, QuerySpec, RunOptions, config_file_path,
    expand_home, init_config, load_config, missing_provider_keys, read_api_key,
    validate_places_key,
};
use sourcing_storage::Storage;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sourcing: find, enrich and score acquisition targets.
#[derive(Parser)]
#[command(
    name = "sourcing",
    version,
    about = "Discover local businesses, enrich them from public sources, and score them for acquisition.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search the business directory and store new entities.
    Discover(DiscoverArgs),

    /// Run the enrichment stages over one batch of pending entities.
    Enrich(EnrichArgs),

    /// Recompute the score of every entity from its stored fields.
    Score,

    /// Discover, enrich one batch, then rescore everything.
    Run {
        #[command(flatten)]
        discover: DiscoverArgs,

        #[command(flatten)]
        enrich: EnrichArgs,
    },

    /// List stored entities, best score first.
    List {
        /// Only entities in this status: unprocessed, partial, or complete.
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum rows to print.
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Print one entity, its provenance, and its stage ledger as JSON.
    Show {
        /// Identity key (UUID).
        key: String,
    },

    /// Move complete entities back to partial so the next batch selects them.
    Reopen {
        /// Identity key (UUID) of the entity to reopen.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        key: Option<String>,

        /// Reopen every complete entity.
        #[arg(long)]
        all: bool,
    },

    /// Record a hand-entered value that enrichment will never overwrite.
    Set {
        /// Identity key (UUID).
        key: String,

        /// Field name, e.g. owner_name, revenue_estimate, is_franchise.
        field: String,

        /// JSON value (`42`, `true`, `["a","b"]`). Anything that is not JSON
        /// is taken as a string.
        value: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Discovery flags shared by `discover` and `run`.
#[derive(Args)]
pub(crate) struct DiscoverArgs {
    /// Run a single ad hoc query instead of the configured ones.
    #[arg(long, requires = "location")]
    pub category: Option<String>,

    /// Location for the ad hoc query, e.g. "Austin, TX".
    #[arg(long, requires = "category")]
    pub location: Option<String>,

    /// Listing cap for the ad hoc query.
    #[arg(long, default_value = "20")]
    pub query_limit: u32,

    /// Tag new entities as assigned to this user.
    #[arg(long)]
    pub owner_tag: Option<String>,
}

/// Batch flags shared by `enrich` and `run`.
#[derive(Args)]
pub(crate) struct EnrichArgs {
    /// Maximum entities in the batch (0 = every pending entity).
    #[arg(short, long)]
    pub batch_size: Option<u32>,

    /// Entities processed in parallel.
    #[arg(short, long)]
    pub concurrency: Option<u32>,

    /// Re-run stages that already succeeded.
    #[arg(long)]
    pub force: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sourcing=info",
        1 => "sourcing=debug",
        _ => "sourcing=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Discover(args) => cmd_discover(&args).await,
        Command::Enrich(args) => cmd_enrich(&args).await,
        Command::Score => cmd_score().await,
        Command::Run { discover, enrich } => cmd_run(&discover, &enrich).await,
        Command::List { status, limit } => cmd_list(status.as_deref(), limit).await,
        Command::Show { key } => cmd_show(&key).await,
        Command::Reopen { key, all } => cmd_reopen(key.as_deref(), all).await,
        Command::Set { key, field, value } => cmd_set(&key, &field, &value).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.defaults.database_path)?;
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = expand_home(&config.defaults.database_path)?;
    if !path.exists() {
        return Err(eyre!(
            "no database at {}. Run `sourcing discover` first.",
            path.display()
        ));
    }
    Ok(Storage::open_readonly(&path).await?)
}

fn parse_key(raw: &str) -> Result<IdentityKey> {
    raw.parse::<IdentityKey>()
        .map_err(|e| eyre!("invalid identity key '{raw}': {e}"))
}

/// Build the stage plan from the providers whose keys are available.
fn build_plan(config: &AppConfig) -> Result<StagePlan> {
    let providers = &config.providers;
    let http_timeout = Duration::from_secs(config.enrichment.http_timeout_secs);

    for name in missing_provider_keys(config) {
        warn!(env = %name, "provider key not set, dependent stages will be skipped");
    }

    let mut sources = Sources {
        web: Some(Arc::new(HttpFetcher::from_settings(&config.enrichment)?) as Arc<dyn WebSource>),
        ..Default::default()
    };

    if let Some(key) = read_api_key(&providers.serper_api_key_env) {
        let serper = Arc::new(SerperClient::new(
            key,
            Duration::from_millis(providers.serper_rate_limit_ms),
            http_timeout,
        )?);
        sources.search = Some(serper.clone() as Arc<dyn SearchSource>);
        sources.news = Some(serper as Arc<dyn NewsSource>);
    }

    if let Some(key) = read_api_key(&providers.gemini_api_key_env) {
        let gemini = GeminiClient::new(
            key,
            &providers.gemini_model,
            Duration::from_millis(providers.gemini_rate_limit_ms),
            Duration::from_secs(config.defaults.stage_timeout_secs),
        )?;
        sources.llm = Some(Arc::new(gemini) as Arc<dyn LlmSource>);
    }

    let plan = sourcing_enrichers::default_plan(&sources, &config.enrichment.disabled_stages)?;
    info!(stages = ?plan.names(), "stage plan ready");
    Ok(plan)
}

fn build_directory(config: &AppConfig) -> Result<PlacesClient> {
    let key = validate_places_key(config)?;
    Ok(PlacesClient::new(
        key,
        Duration::from_millis(config.providers.places_rate_limit_ms),
        Duration::from_secs(config.enrichment.http_timeout_secs),
    )?)
}

fn queries(config: &AppConfig, args: &DiscoverArgs) -> Result<Vec<QuerySpec>> {
    if let (Some(category), Some(location)) = (&args.category, &args.location) {
        return Ok(vec![QuerySpec {
            category: category.clone(),
            location: location.clone(),
            limit: args.query_limit,
            region_code: None,
        }]);
    }
    if config.discovery.queries.is_empty() {
        return Err(eyre!(
            "no discovery queries configured. Add [[discovery.queries]] to {} or pass --category and --location.",
            config_file_path()?.display()
        ));
    }
    Ok(config.discovery.queries.clone())
}

fn collect_options(config: &AppConfig, args: &DiscoverArgs) -> CollectOptions {
    let mut opts = CollectOptions::from(&config.discovery);
    opts.owner_tag = args.owner_tag.clone();
    opts
}

fn run_options(config: &AppConfig, args: &EnrichArgs) -> RunOptions {
    let mut opts = RunOptions::from(config);
    if let Some(size) = args.batch_size {
        opts.batch_size = (size > 0).then_some(size);
    }
    if let Some(concurrency) = args.concurrency {
        opts.concurrency = concurrency.max(1);
    }
    opts.force_refresh = args.force;
    opts
}

/// Cancellation flag flipped by Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight entities");
            let _ = tx.send(true);
        }
    });
    rx
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_discover(args: &DiscoverArgs) -> Result<()> {
    let config = load_config()?;
    let directory = build_directory(&config)?;
    let queries = queries(&config, args)?;
    let storage = open_storage(&config).await?;
    let cancel = cancel_on_ctrl_c();

    info!(queries = queries.len(), "starting discovery");

    let report = sourcing_discovery::collect(
        &queries,
        &directory,
        &storage,
        &collect_options(&config, args),
        &cancel,
    )
    .await?;

    print_collect_report(&report);
    Ok(())
}

async fn cmd_enrich(args: &EnrichArgs) -> Result<()> {
    let config = load_config()?;
    let plan = Arc::new(build_plan(&config)?);
    let storage = open_storage(&config).await?;
    let opts = run_options(&config, args);

    let reporter = CliProgress::new();
    let summary =
        sourcing_core::run_batch(storage, plan, &opts, &reporter, cancel_on_ctrl_c()).await?;
    reporter.clear();

    print_batch_summary(&summary);
    Ok(())
}

async fn cmd_score() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let count = sourcing_core::rescore_all(&storage).await?;
    println!("Rescored {count} entities.");
    Ok(())
}

async fn cmd_run(discover: &DiscoverArgs, enrich: &EnrichArgs) -> Result<()> {
    let config = load_config()?;
    let directory = build_directory(&config)?;
    let plan = Arc::new(build_plan(&config)?);
    let storage = open_storage(&config).await?;

    let pipeline = PipelineConfig {
        queries: queries(&config, discover)?,
        collect: collect_options(&config, discover),
        run: run_options(&config, enrich),
    };

    let reporter = CliProgress::new();
    let report = sourcing_core::run_pipeline(
        storage,
        &directory,
        plan,
        &pipeline,
        &reporter,
        cancel_on_ctrl_c(),
    )
    .await?;
    reporter.clear();

    print_collect_report(&report.collect);
    match &report.batch {
        Some(summary) => print_batch_summary(summary),
        None => println!("  Enrichment skipped: run cancelled during discovery."),
    }
    if report.rescored > 0 {
        println!("  Rescored:  {}", report.rescored);
    }
    println!("  Total time: {:.1}s", report.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_list(status: Option<&str>, limit: u32) -> Result<()> {
    let config = load_config()?;
    let status = status.map(str::parse::<ProcessingStatus>).transpose()?;
    let storage = open_storage_readonly(&config).await?;

    let entities = storage.list_entities(status, Some(limit)).await?;
    if entities.is_empty() {
        println!("No entities found.");
        return Ok(());
    }

    println!("{:>5}  {:<11}  {:<36}  {:<40}  WEBSITE", "SCORE", "STATUS", "KEY", "NAME");
    for entity in &entities {
        let score = entity
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{score:>5}  {:<11}  {:<36}  {:<40}  {}",
            entity.status.as_str(),
            entity.key.to_string(),
            truncate(&entity.name, 40),
            entity.website.as_deref().unwrap_or("-"),
        );
    }

    let counts = storage.status_counts().await?;
    let totals: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{status}: {count}"))
        .collect();
    println!();
    println!("  {}", totals.join(", "));
    Ok(())
}

async fn cmd_show(key: &str) -> Result<()> {
    let config = load_config()?;
    let key = parse_key(key)?;
    let storage = open_storage_readonly(&config).await?;

    let entity = storage
        .get_entity(&key)
        .await?
        .ok_or_else(|| eyre!("no entity with key {key}"))?;
    let stages = storage.stage_records(&key).await?;

    let doc = serde_json::json!({
        "entity": entity,
        "stages": stages,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

async fn cmd_reopen(key: Option<&str>, all: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    if all {
        let count = storage.reopen_all().await?;
        println!("Reopened {count} entities. Run `sourcing enrich --force` to refresh them.");
        return Ok(());
    }

    let key = parse_key(key.ok_or_else(|| eyre!("pass an identity key or --all"))?)?;
    if storage.reopen(&key).await? {
        println!("Reopened {key}. Run `sourcing enrich --force` to refresh it.");
    } else {
        println!("{key} is not complete; nothing to reopen.");
    }
    Ok(())
}

async fn cmd_set(key: &str, field: &str, value: &str) -> Result<()> {
    let config = load_config()?;
    let key = parse_key(key)?;

    let value = serde_json::from_str::<serde_json::Value>(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    let update: FieldUpdate =
        serde_json::from_value(serde_json::json!({ "field": field, "value": value }))
            .map_err(|e| eyre!("cannot set '{field}': {e}"))?;

    let storage = open_storage(&config).await?;
    storage.set_manual_value(&key, update).await?;
    println!("Set {field} on {key} (manual).");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_collect_report(report: &CollectReport) {
    println!();
    println!("  Discovery");
    for outcome in &report.queries {
        match &outcome.error {
            Some(error) => println!(
                "    {}: {} seen, {} new, stopped: {error}",
                outcome.query, outcome.listings_seen, outcome.inserted
            ),
            None => println!(
                "    {}: {} seen, {} new, {} known",
                outcome.query, outcome.listings_seen, outcome.inserted, outcome.duplicates
            ),
        }
    }
    println!("  Inserted:   {}", report.inserted);
    println!("  Duplicates: {}", report.duplicates);
    if report.cancelled {
        println!("  Cancelled before all queries ran.");
    }
    println!();
}

fn print_batch_summary(summary: &BatchSummary) {
    println!();
    println!("  Enrichment");
    println!("  Selected:   {}", summary.selected);
    println!("  Processed:  {}", summary.processed);
    for status in [
        ProcessingStatus::Complete,
        ProcessingStatus::Partial,
        ProcessingStatus::Unprocessed,
    ] {
        println!("  {:<11} {}", format!("{status}:"), summary.count(status));
    }
    if summary.store_failures > 0 {
        println!("  Store failures: {}", summary.store_failures);
    }
    if !summary.top_failures.is_empty() {
        println!("  Top failures:");
        for (reason, count) in &summary.top_failures {
            println!("    {count:>4}  {reason}");
        }
    }
    if summary.cancelled {
        println!("  Cancelled: remaining entities stay pending.");
    }
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner that turns into a bar
/// once the batch size is known.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn started(&self, total: usize) {
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=> "),
        );
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn entity_done(&self, report: &EntityReport, done: usize, _total: usize) {
        self.bar.set_position(done as u64);
        self.bar
            .set_message(format!("{} ({})", truncate(&report.name, 40), report.status));
    }

    fn finished(&self, summary: &BatchSummary) {
        self.bar.set_message(format!(
            "{} of {} entities processed",
            summary.processed, summary.selected
        ));
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_discover_and_enrich_flags() {
        let cli = Cli::try_parse_from([
            "sourcing",
            "run",
            "--category",
            "commercial HVAC",
            "--location",
            "Austin, TX",
            "--batch-size",
            "10",
            "--force",
        ])
        .unwrap();
        let Command::Run { discover, enrich } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(discover.category.as_deref(), Some("commercial HVAC"));
        assert_eq!(enrich.batch_size, Some(10));
        assert!(enrich.force);
    }

    #[test]
    fn category_without_location_is_rejected() {
        assert!(Cli::try_parse_from(["sourcing", "discover", "--category", "HVAC"]).is_err());
    }

    #[test]
    fn reopen_needs_key_or_all() {
        assert!(Cli::try_parse_from(["sourcing", "reopen"]).is_err());
        assert!(Cli::try_parse_from(["sourcing", "reopen", "--all"]).is_ok());
    }

    #[test]
    fn flags_override_config() {
        let config = AppConfig::default();
        let args = EnrichArgs {
            batch_size: Some(0),
            concurrency: Some(0),
            force: true,
        };
        let opts = run_options(&config, &args);
        assert_eq!(opts.batch_size, None);
        assert_eq!(opts.concurrency, 1);
        assert!(opts.force_refresh);

        let defaults = run_options(
            &config,
            &EnrichArgs {
                batch_size: None,
                concurrency: None,
                force: false,
            },
        );
        assert_eq!(defaults.batch_size, Some(50));
        assert_eq!(defaults.concurrency, 4);
    }

    #[test]
    fn ad_hoc_query_replaces_configured_ones() {
        let args = DiscoverArgs {
            category: Some("janitorial".into()),
            location: Some("Dallas, TX".into()),
            query_limit: 5,
            owner_tag: Some("sam".into()),
        };
        let queries = queries(&AppConfig::default(), &args).unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text_query(), "janitorial in Dallas, TX");
        assert_eq!(collect_options(&AppConfig::default(), &args).owner_tag.as_deref(), Some("sam"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("Acme", 10), "Acme");
        assert_eq!(truncate("Acme Heating and Air", 8), "Acme He…");
    }
}
