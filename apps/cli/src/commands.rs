//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};

use actorlens_core::pipeline::{SyncOptions, SyncProgress, SyncReport, run_sync};
use actorlens_fetcher::SourceClient;
use actorlens_inference::ReasoningClient;
use actorlens_shared::{
    AppConfig, InferenceConfig, SourceConfig, config_file_path, expand_home, init_config,
    load_config, validate_api_key,
};
use actorlens_storage::{CountBy, Storage};
use actorlens_taxonomy::TaxonomyIndex;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// actorlens — sync a threat-actor catalog and enrich it with techniques.
#[derive(Parser)]
#[command(
    name = "actorlens",
    version,
    about = "Sync a threat-actor catalog and enrich each actor with validated technique identifiers.",
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
    /// Run the sync-and-enrichment pipeline.
    Sync {
        /// Re-run the full cascade even for unchanged actors.
        #[arg(long)]
        force: bool,

        /// Database path (defaults to the configured one).
        #[arg(long)]
        db: Option<String>,

        /// Taxonomy bundle path (defaults to the configured one).
        #[arg(long)]
        taxonomy: Option<String>,

        /// Override the source catalog base URL.
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Print aggregate enrichment counts.
    Stats {
        /// Group counts by: source or confidence.
        #[arg(long, default_value = "source")]
        by: GroupKey,

        /// Database path (defaults to the configured one).
        #[arg(long)]
        db: Option<String>,
    },

    /// Print one actor and its enrichment record as JSON.
    Show {
        /// Actor canonical name.
        actor: String,

        /// Database path (defaults to the configured one).
        #[arg(long)]
        db: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Grouping key for `stats`.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum GroupKey {
    Source,
    Confidence,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a default config file.
    Init,
    /// Print the effective config.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "actorlens=info",
        1 => "actorlens=debug",
        _ => "actorlens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .with_env_filter(env_filter)
                .json()
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command routing
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sync {
            force,
            db,
            taxonomy,
            base_url,
        } => cmd_sync(force, db, taxonomy, base_url).await,
        Command::Stats { by, db } => cmd_stats(by, db).await,
        Command::Show { actor, db } => cmd_show(&actor, db).await,
        Command::Config { action } => cmd_config(action),
    }
}

fn db_path(config: &AppConfig, db: Option<String>) -> PathBuf {
    expand_home(db.as_deref().unwrap_or(&config.defaults.db_path))
}

async fn cmd_sync(
    force: bool,
    db: Option<String>,
    taxonomy: Option<String>,
    base_url: Option<String>,
) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;

    // The taxonomy loads before anything else: without it the run is
    // pointless, so a load failure aborts here.
    let taxonomy_path = expand_home(taxonomy.as_deref().unwrap_or(&config.defaults.taxonomy_path));
    let taxonomy = Arc::new(TaxonomyIndex::load_file(&taxonomy_path)?);

    let storage = Storage::open(&db_path(&config, db)).await?;

    let mut source_config = SourceConfig::from(&config);
    if let Some(url) = base_url {
        source_config.base_url = url;
    }
    let source = SourceClient::new(source_config)?;

    let inferrer = Arc::new(ReasoningClient::new(
        InferenceConfig::from(&config),
        taxonomy.clone(),
    )?);

    let options = SyncOptions {
        force,
        inference_concurrency: config.reasoning.concurrency,
    };

    let progress = CliProgress::new();
    let report = run_sync(&options, &storage, &taxonomy, &source, inferrer, &progress).await?;

    print_report(&report);
    Ok(())
}

async fn cmd_stats(by: GroupKey, db: Option<String>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(&config, db)).await?;

    let group = match by {
        GroupKey::Source => CountBy::Source,
        GroupKey::Confidence => CountBy::Confidence,
    };
    let counts = storage.count_enrichments_by(group).await?;

    if counts.is_empty() {
        println!("No enrichment records yet. Run `actorlens sync` first.");
        return Ok(());
    }

    let mut entries: Vec<_> = counts.into_iter().collect();
    entries.sort();
    for (key, count) in entries {
        println!("{key:>14}  {count}");
    }
    println!("{:>14}  {}", "actors", storage.count_actors().await?);
    Ok(())
}

async fn cmd_show(actor: &str, db: Option<String>) -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&db_path(&config, db)).await?;

    let record = storage
        .get_actor(actor)
        .await?
        .ok_or_else(|| eyre!("actor not found: {actor}"))?;
    let enrichment = storage.get_enrichment(actor).await?;

    let output = serde_json::json!({
        "actor": record,
        "enrichment": enrichment,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = init_config()?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config()?;
            println!("# {}", config_file_path()?.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress & report output
// ---------------------------------------------------------------------------

/// Spinner-backed progress reporter for interactive runs.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .expect("valid progress template"),
        );
        Self { bar }
    }
}

impl SyncProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
        self.bar.tick();
    }

    fn actor_done(&self, name: &str, current: usize, total: usize) {
        self.bar.set_message(format!("[{current}/{total}] {name}"));
        self.bar.tick();
    }

    fn done(&self, _report: &SyncReport) {
        self.bar.finish_and_clear();
    }
}

fn print_report(report: &SyncReport) {
    println!("Sync run {} finished in {:.1?}", report.run_id, report.elapsed);
    println!(
        "  fetched {} actors ({} invalid records skipped)",
        report.total_fetched, report.skipped_invalid
    );
    println!(
        "  changes: {} new, {} updated, {} unchanged",
        report.new, report.updated, report.unchanged
    );
    println!(
        "  outcomes: {} direct, {} inferred, {} no-techniques",
        report.direct, report.inferred, report.no_techniques
    );
    if !report.failures.is_empty() {
        println!("  failures ({}):", report.failures.len());
        for (actor, error) in &report.failures {
            println!("    {actor}: {error}");
        }
    }
}
