//! Shelfsync - reconcile a local collection library with its object-store copy.
//!
//! Log output goes to stderr; summaries and reports go to stdout.

mod commands;

use clap::{Args, Parser, Subcommand};
use shelfsync_core::{CancellationToken, ConflictPolicy, MatchTier, ReconcileConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(about = "Reconcile a local collection library with an object store")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// JSON config file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Local library root (artist/collection/files)
    #[arg(long)]
    pub local: PathBuf,

    /// Remote store: s3://bucket/prefix or emulated://<dir>#<bucket>
    #[arg(long)]
    pub remote: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan, match and diff both sides into a decision file
    Plan {
        #[command(flatten)]
        stores: StoreArgs,
        #[arg(long)]
        decisions: PathBuf,
        /// Merge with the existing decision file instead of replacing it
        #[arg(long)]
        merge: bool,
        /// Leave out collections matched below this tier
        #[arg(long)]
        min_tier: Option<MatchTier>,
        /// preferLarger, preferLocal, preferRemote or manual
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// Mark decision sets as approved for execution
    Approve {
        #[arg(long)]
        decisions: PathBuf,
        /// Local artist/collection key to approve (repeatable)
        #[arg(long = "collection", required_unless_present = "auto")]
        collections: Vec<String>,
        /// Approve every safe set at or above the configured tier
        #[arg(long, conflicts_with = "collections")]
        auto: bool,
        /// Lowest tier for --auto
        #[arg(long, requires = "auto")]
        min_tier: Option<MatchTier>,
    },
    /// Re-check approved sets against live state
    Validate {
        #[command(flatten)]
        stores: StoreArgs,
        #[arg(long)]
        decisions: PathBuf,
    },
    /// Execute a validated decision file
    Apply {
        #[command(flatten)]
        stores: StoreArgs,
        #[arg(long)]
        decisions: PathBuf,
        /// Validate and print what would run without touching either store
        #[arg(long)]
        dry_run: bool,
        /// Audit log (defaults next to the decision file)
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Collections executed concurrently
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Summarize runs from an audit log
    Report {
        #[arg(long)]
        audit_log: PathBuf,
        #[arg(long)]
        run_id: Option<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(debug: bool, json: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_json);

    match run(cli).await {
        Ok(status) => status.into(),
        Err(e) => {
            error!("{:#}", e);
            commands::Status::Fatal.into()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<commands::Status> {
    let config = ReconcileConfig::load(cli.config.as_deref())?;
    let cancel = CancellationToken::new();
    cancel.install_signal_handler()?;

    match cli.command {
        Command::Plan {
            stores,
            decisions,
            merge,
            min_tier,
            policy,
        } => {
            let mut config = config;
            if let Some(tier) = min_tier {
                config.min_plan_tier = tier;
            }
            if let Some(policy) = policy {
                config.conflict_policy = policy;
            }
            commands::plan(&stores, &decisions, merge, config, cancel).await
        }
        Command::Approve {
            decisions,
            collections,
            auto,
            min_tier,
        } => {
            let min_tier = min_tier.unwrap_or(config.auto_approve_min_tier);
            commands::approve(&decisions, collections, auto.then_some(min_tier))
        }
        Command::Validate { stores, decisions } => {
            commands::validate(&stores, &decisions, config, cancel).await
        }
        Command::Apply {
            stores,
            decisions,
            dry_run,
            audit_log,
            workers,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.validate()?;
            commands::apply(&stores, &decisions, dry_run, audit_log, config, cancel).await
        }
        Command::Report {
            audit_log,
            run_id,
            json,
        } => commands::report(&audit_log, run_id.as_deref(), json),
    }
}
