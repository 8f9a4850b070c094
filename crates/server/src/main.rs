//! skyfeed: scheduled multi-source ingestion into an idempotent store and a
//! vector search index.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use skyfeed_core::{Config, SourcesFile};
use skyfeed_server::job_runner::read_run_log;
use skyfeed_server::pipeline::list_dead_letters;
use skyfeed_server::{Pipeline, RunOutcome};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "skyfeed", version, about)]
struct Cli {
    /// Per-source schedule file (overrides SKYFEED_SOURCES).
    #[arg(long, global = true)]
    sources: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scheduler, change dispatcher and maintenance until Ctrl-C.
    Run,
    /// Run one source immediately and sync its changes.
    Once {
        #[arg(long)]
        source: String,
    },
    /// List configured source schedules.
    Sources,
    /// List retained dead-letter records.
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the most recent ingestion runs.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    skyfeed_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.sources {
        config.sources_path = path;
    }

    match cli.command {
        Command::Run => {
            config.log_summary();
            let pipeline = Pipeline::build(config).await?;
            pipeline.run(shutdown_signal()).await?;
        }
        Command::Once { source } => {
            let pipeline = Pipeline::build(config).await?;
            let (outcome, report) = pipeline.run_once(&source).await?;
            let stats = outcome.stats();
            match &outcome {
                RunOutcome::Completed(_) => println!("{source}: completed"),
                RunOutcome::DeadLettered { stage, error, .. } => {
                    println!("{source}: dead-lettered at {stage:?}: {error}")
                }
            }
            println!(
                "  pages={} fetched={} inserted={} modified={} stale={} item_dead_letters={}{}",
                stats.pages,
                stats.items_fetched,
                stats.inserted,
                stats.modified,
                stats.skipped_stale,
                stats.items_dead_lettered,
                match (stats.resumed, stats.truncated) {
                    (true, true) => " (resumed, page limit reached)",
                    (true, false) => " (resumed)",
                    (false, true) => " (page limit reached)",
                    (false, false) => "",
                }
            );
            println!("  index sync: {report}");
        }
        Command::Sources => {
            let sources = SourcesFile::load_or_builtin(&config.sources_path)?;
            for entry in &sources.sources {
                println!(
                    "{:<12} adapter={:<6} cadence={:<16} window={}s max_pages={} {}",
                    entry.name,
                    entry.adapter_name(),
                    entry.cadence,
                    entry.flexible_window().as_secs(),
                    entry.max_pages,
                    if entry.enabled { "enabled" } else { "disabled" }
                );
            }
        }
        Command::DeadLetters { limit } => {
            let records = list_dead_letters(&config, limit).await?;
            if records.is_empty() {
                info!(path = %config.dead_letter.path.display(), "no dead-letter records");
            }
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Runs { limit } => {
            for entry in read_run_log(&config.storage.run_log_dir(), limit) {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
}
