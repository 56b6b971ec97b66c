//! kg-quality - Data Quality & Confidence Lifecycle Engine
//!
//! Entry point: serves the HTTP API with the background scheduler, or runs
//! a single report, maintenance action or job from the command line.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use kg_quality::{ApiServer, AppConfig, AppState, QualityAction, TripleId};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kg-quality")]
#[command(about = "Confidence lifecycle engine for knowledge triples", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, env = "KG_QUALITY_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long)]
    db_path: Option<String>,

    /// Set log level (RUST_LOG takes precedence)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run scheduled jobs
    Serve {
        /// Listen address (overrides the config file)
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Serve the API without starting scheduled jobs
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Print the quality report as JSON
    Report,

    /// Run one maintenance action
    Maintain {
        #[arg(short, long, value_enum)]
        action: MaintainAction,

        /// Triple ids to merge (merge-duplicates)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,

        /// Confidence threshold (delete-low-confidence)
        #[arg(long)]
        threshold: Option<f64>,

        /// Age in days (decay-outdated)
        #[arg(long)]
        days: Option<i64>,

        /// Decay step (decay-outdated)
        #[arg(long)]
        rate: Option<f64>,
    },

    /// Scheduled job commands
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MaintainAction {
    MergeDuplicates,
    DeleteLowConfidence,
    DecayOutdated,
    Archive,
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs and their schedules
    List,

    /// Run a job once, now
    Run {
        /// Job name
        name: String,
    },
}

fn init_tracing(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Quiet the HTTP stack unless asked for
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "kg_quality={},tower_http=info,hyper=warn,libsql=warn",
            level.as_str().to_lowercase()
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    debug!("kg-quality v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }

    let state = AppState::open(&config)
        .await
        .with_context(|| format!("opening database {}", config.database.path))?;

    match cli.command {
        Commands::Serve { addr, no_scheduler } => {
            let addr = addr.unwrap_or(config.server.addr);
            let mut server = ApiServer::new(addr, state);
            if no_scheduler {
                server = server.without_scheduler();
            }
            info!("Starting kg-quality API on {}", addr);
            server.serve().await?;
        }
        Commands::Report => {
            let report = state.engine.report().await?;
            print_json(&report)?;
        }
        Commands::Maintain {
            action,
            ids,
            threshold,
            days,
            rate,
        } => {
            let quality = state.engine.config().clone();
            let action = match action {
                MaintainAction::MergeDuplicates => QualityAction::MergeDuplicates {
                    ids: ids.into_iter().map(TripleId).collect(),
                },
                MaintainAction::DeleteLowConfidence => QualityAction::DeleteLowConfidence {
                    threshold: threshold.unwrap_or(quality.low_confidence_threshold),
                },
                MaintainAction::DecayOutdated => QualityAction::DecayOutdated {
                    days: days.unwrap_or(quality.stale_days),
                    rate: rate.unwrap_or(quality.decay_rate),
                },
                MaintainAction::Archive => {
                    let archived = state.engine.archive_stale().await?;
                    println!("Archived {} triple(s)", archived);
                    return Ok(());
                }
            };
            let result = state.engine.run_action(action).await?;
            println!("{}", result.message());
        }
        Commands::Jobs { command } => match command {
            JobCommands::List => {
                for job in state.scheduler.get_job_status(None).await? {
                    println!(
                        "{:<22} {:<12} {}",
                        job.name,
                        job.schedule,
                        if job.enabled { "enabled" } else { "disabled" }
                    );
                }
            }
            JobCommands::Run { name } => {
                let run = state.scheduler.run_job_manually(&name).await?;
                print_json(&run)?;
                if run.status != kg_quality::JobStatus::Success {
                    anyhow::bail!("job {} finished with status {:?}", name, run.status);
                }
            }
        },
    }

    Ok(())
}
