//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use mneprofiler_cache::CacheStore;
use mneprofiler_classifier::{Classifier, VocabIndex};
use mneprofiler_collab::LlmClient;
use mneprofiler_core::pipeline::{PipelineReport, ProgressReporter};
use mneprofiler_core::LiveCollaborators;
use mneprofiler_shared::{
    init_config, load_config, load_config_from, validate_api_key, AppConfig, Enterprise,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// MNE Profiler — reconcile multinational-enterprise profiles from
/// conflicting sources.
#[derive(Parser)]
#[command(
    name = "mneprofiler",
    version,
    about = "Build reconciled enterprise profiles: merge sources, recover figures from annual reports, classify activities into NACE.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path (defaults to ~/.mneprofiler/mneprofiler.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Profile a batch of enterprises from an input CSV.
    Run {
        /// Input CSV (`ID;NAME` with optional COUNTRY and TICKER columns).
        input: PathBuf,

        /// Output directory for discovery.csv and extraction.csv
        /// (overrides the configured one).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Classify one activity description into a NACE code.
    Classify {
        /// Free-text activity description.
        activity: String,
    },

    /// Cache inspection and refresh.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List the entries of one cache namespace.
    List {
        /// Namespace (e.g. `reports`, `tickers`).
        namespace: String,
    },
    /// Drop one entry so the next run refetches it.
    Invalidate {
        /// Namespace the entry lives in.
        namespace: String,

        /// Enterprise name the entry was cached under.
        #[arg(long)]
        entity: String,

        /// Source tag of the entry (e.g. `report_search`, `ticker_lookup`).
        #[arg(long)]
        source: String,

        /// Original query text the entry was keyed by.
        #[arg(long)]
        query: String,
    },
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
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "mneprofiler=info",
        1 => "mneprofiler=debug",
        _ => "mneprofiler=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Run { input, out } => cmd_run(&config_path, &input, out.as_deref()).await,
        Command::Classify { activity } => cmd_classify(&config_path, &activity).await,
        Command::Cache { action } => match action {
            CacheAction::List { namespace } => cmd_cache_list(&config_path, &namespace).await,
            CacheAction::Invalidate {
                namespace,
                entity,
                source,
                query,
            } => cmd_cache_invalidate(&config_path, &namespace, &entity, &source, &query).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config_path).await,
        },
    }
}

fn resolve_config(path: &Option<PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: &Option<PathBuf>, input: &Path, out: Option<&str>) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    validate_api_key(&config)?;
    if let Some(out) = out {
        config.pipeline.output_dir = out.to_string();
    }

    let enterprises = mneprofiler_core::read_enterprises(input)?;
    if enterprises.is_empty() {
        return Err(eyre!("no enterprises found in '{}'", input.display()));
    }

    info!(
        input = %input.display(),
        enterprises = enterprises.len(),
        "starting profiling run"
    );

    let collaborators = Arc::new(LiveCollaborators::from_config(&config)?);
    let reporter = Arc::new(CliProgress::new());

    let report = mneprofiler_core::run_pipeline(
        Arc::new(config),
        enterprises,
        collaborators,
        reporter,
    )
    .await?;

    println!();
    println!("  Profiling run complete!");
    println!("  Run:         {}", report.run_id);
    println!("  Enterprises: {}", report.enterprises);
    println!("  Classified:  {}", report.classified);
    println!("  Failed:      {}", report.failed);
    println!("  Discovery:   {}", report.discovery_path.display());
    println!("  Extraction:  {}", report.extraction_path.display());
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar
            .enable_steady_tick(std::time::Duration::from_millis(80));
    }

    fn enterprise_done(&self, enterprise: &Enterprise, ok: bool) {
        self.bar.inc(1);
        let mark = if ok { "" } else { " (failed)" };
        self.bar.set_message(format!("{}{mark}", enterprise.name));
    }

    fn done(&self, _report: &PipelineReport) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

async fn cmd_classify(config_path: &Option<PathBuf>, activity: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    validate_api_key(&config)?;

    let llm = LlmClient::new(&config.llm, config.retry)?;
    let index = VocabIndex::load(Path::new(&config.retrieval.vocab_path))?;
    let classification = Classifier::new(&index, &llm, &llm, config.retrieval.top_k)
        .classify(activity)
        .await?;

    println!("NACE:    {}", classification.code);
    println!("Section: {}", classification.section);
    Ok(())
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

async fn cmd_cache_list(config_path: &Option<PathBuf>, namespace: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let dir = config.cache.resolved_dir()?;
    let store = CacheStore::open_namespace(&dir, namespace)?;

    let entries = store.snapshot().await;
    if entries.is_empty() {
        println!("namespace '{namespace}' is empty");
        return Ok(());
    }

    println!("{} entries in '{namespace}':", entries.len());
    for (key, entry) in entries {
        let preview = serde_json::to_string(&entry.artifact)?;
        let preview = if preview.chars().count() > 60 {
            format!("{}...", preview.chars().take(60).collect::<String>())
        } else {
            preview
        };
        println!(
            "  {} / {} [{}] fetched {} → {}",
            key.entity,
            key.source,
            &key.query_signature[..12],
            entry.fetched_at.format("%Y-%m-%d %H:%M"),
            preview
        );
    }
    Ok(())
}

async fn cmd_cache_invalidate(
    config_path: &Option<PathBuf>,
    namespace: &str,
    entity: &str,
    source: &str,
    query: &str,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let dir = config.cache.resolved_dir()?;
    let store = CacheStore::open_namespace(&dir, namespace)?;

    let key = mneprofiler_cache::CacheKey::new(entity, source, query);
    store.invalidate(&key).await?;
    println!("invalidated {entity} / {source} in '{namespace}'");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: &Option<PathBuf>) -> Result<()> {
    let config: AppConfig = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
