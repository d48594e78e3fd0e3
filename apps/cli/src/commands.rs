//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use photoblog_core::pipeline::{Pipeline, ProgressReporter, RunResult};
use photoblog_shared::{
    AppConfig, SourceKind, init_config, load_config, load_config_from, resolve_api_key,
    resolve_drive_token,
};
use photoblog_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Photoblog: photos in, blog posts out.
#[derive(Parser)]
#[command(
    name = "photoblog",
    version,
    about = "Caption new photos with AI, draft a post, and publish it to a git-backed blog.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.photoblog/photoblog.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Process one batch of new photos into a post.
    Run {
        /// Write the post locally but skip git and leave the processed set untouched.
        #[arg(long)]
        dry_run: bool,

        /// Use the offline mock model instead of the configured provider.
        #[arg(long)]
        mock: bool,
    },

    /// Inspect or edit the processed set.
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Processed-set subcommands.
#[derive(Subcommand)]
pub(crate) enum StateAction {
    /// List recorded items, newest first.
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Record an item as processed without running the pipeline.
    Mark {
        /// Media item id.
        id: String,

        /// Post slug to record against the item.
        #[arg(long, default_value = "manual")]
        slug: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Check the configuration and required credentials.
    Validate,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "photoblog=info",
        1 => "photoblog=debug",
        _ => "photoblog=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { dry_run, mock } => cmd_run(config_path, dry_run, mock).await,
        Command::State { action } => match action {
            StateAction::List { limit } => cmd_state_list(config_path, limit).await,
            StateAction::Mark { id, slug } => cmd_state_mark(config_path, &id, &slug).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
            ConfigAction::Validate => cmd_config_validate(config_path).await,
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, dry_run: bool, mock: bool) -> Result<()> {
    let mut config = load(config_path)?;
    if mock {
        config.ai.mock_mode = true;
    }

    info!(
        dry_run,
        mock = config.ai.mock_mode,
        repo = %config.repo_dir().display(),
        "starting run"
    );

    let pipeline = Pipeline::from_config(&config, dry_run).await?;
    let reporter = CliProgress::new();
    let result = pipeline.run(&reporter).await;

    print_summary(&result);

    if !result.ok {
        return Err(eyre!(
            "run {} failed: {}",
            result.run_id,
            result.errors.first().unwrap_or(&result.message)
        ));
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    println!();
    println!("  {}", result.message);
    println!("  Run:       {}", result.run_id);
    println!(
        "  Processed: {}/{}",
        result.processed_count, result.attempted_count
    );
    if let Some(slug) = &result.post_slug {
        println!("  Slug:      {slug}");
    }
    if let Some(path) = &result.post_path {
        println!("  Post:      {}", path.display());
    }
    for error in &result.errors {
        println!("  Error:     {error}");
    }
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

async fn cmd_state_list(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let config = load(config_path)?;
    let storage = Storage::open_readonly(&config.state_db_path()).await?;

    let total = storage.count_processed().await?;
    let records = storage.list_processed(limit).await?;

    println!("{total} processed item(s)");
    for record in records {
        println!(
            "  {}  {}  {}",
            record.processed_at.format("%Y-%m-%d %H:%M"),
            record.item_id,
            record.post_slug
        );
    }
    Ok(())
}

async fn cmd_state_mark(config_path: Option<&Path>, id: &str, slug: &str) -> Result<()> {
    let config = load(config_path)?;
    let storage = Storage::open(&config.state_db_path()).await?;

    if storage.mark_processed(id, slug).await? {
        println!("Marked {id} as processed ({slug})");
    } else {
        println!("{id} was already processed");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_config_validate(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    config.validate()?;

    if !config.ai.mock_mode {
        resolve_api_key(&config.ai)?;
    }
    if config.source.kind == SourceKind::Drive {
        resolve_drive_token(&config.source)?;
    }

    println!("Config OK");
    println!("  Source:  {:?}", config.source.kind);
    let model = if config.ai.mock_mode {
        "mock"
    } else {
        config.ai.text_model.as_str()
    };
    println!("  Model:   {model}");
    println!("  Posts:   {}", config.posts_dir().display());
    println!("  State:   {}", config.state_db_path().display());
    Ok(())
}
