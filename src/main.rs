//! # List Digest CLI (`ldg`)
//!
//! The `ldg` binary ingests mailing-list archives into a local SQLite corpus
//! and generates LLM summaries of emails, threads, and days or weeks of list
//! traffic.
//!
//! ## Usage
//!
//! ```bash
//! ldg --config ./config/ldg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ldg init` | Create the SQLite database and run schema migrations |
//! | `ldg ingest <path>` | Ingest a local mbox, Atom, or EML file (optionally gzipped) |
//! | `ldg fetch <date>` | Download and ingest one day's archive |
//! | `ldg fetch-atom` | Download and ingest the latest Atom feed |
//! | `ldg summarize thread <id>` | Summarize one thread |
//! | `ldg summarize email <message-id>` | Summarize one email |
//! | `ldg summarize pending` | Summarize threads that have no summary yet |
//! | `ldg digest daily\|weekly <date>` | Build a digest for a window |
//! | `ldg stats` | Print corpus statistics |

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use list_digest::config::{self, Config};
use list_digest::normalize::ArchiveFormat;
use list_digest::progress::ProgressMode;
use list_digest::summarize::{self, DigestWindow, SummarizationOrchestrator};
use list_digest::{archive, db, ingest, migrate, stats};

/// List Digest CLI: mailing-list ingestion, threading, and summaries.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ldg.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ldg",
    about = "Ingest mailing-list archives, rebuild threads, and summarize them with an LLM",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ldg.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human`, or `json`.
    /// Defaults to `human` on a terminal, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a local archive file.
    ///
    /// The format is detected from the extension (`.mbox`, `.atom`, `.eml`,
    /// each optionally `.gz`) unless `--format` is given. Re-ingesting the
    /// same file is a no-op.
    Ingest {
        path: PathBuf,

        /// Archive format: `mbox`, `atom`, or `eml`.
        #[arg(long)]
        format: Option<String>,
    },

    /// Download and ingest one day's gzipped mbox archive (YYYY-MM-DD).
    Fetch { date: String },

    /// Download and ingest the list's Atom feed.
    FetchAtom,

    /// Generate summaries.
    Summarize {
        #[command(subcommand)]
        target: SummarizeTarget,
    },

    /// Generate a digest for a day or a week.
    Digest {
        #[command(subcommand)]
        window: DigestKind,
    },

    /// Show corpus statistics.
    Stats,
}

#[derive(Subcommand)]
enum SummarizeTarget {
    /// Summarize one thread by id.
    Thread {
        id: String,
        /// Regenerate even if a cached summary exists.
        #[arg(long)]
        force: bool,
    },
    /// Summarize one email by message id.
    Email {
        message_id: String,
        #[arg(long)]
        force: bool,
    },
    /// Summarize threads without a summary, most recently active first.
    Pending {
        /// Maximum number of threads to summarize.
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Skip threads with fewer emails than this.
        #[arg(long, default_value_t = 2)]
        min_emails: i64,
    },
}

#[derive(Subcommand)]
enum DigestKind {
    /// One UTC day starting at `date`.
    Daily {
        date: String,
        #[arg(long)]
        force: bool,
    },
    /// Seven UTC days starting at `date`.
    Weekly {
        date: String,
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match config.logging.format.as_str() {
        "json" => registry.with(layer.json()).init(),
        "pretty" => registry.with(layer.pretty()).init(),
        _ => registry.with(layer.compact()).init(),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD", s))
}

async fn orchestrator(cfg: &Config) -> Result<SummarizationOrchestrator> {
    let pool = db::connect(cfg).await?;
    SummarizationOrchestrator::from_config(cfg, pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg);

    let progress_mode = match cli.progress.as_deref() {
        Some(s) => match ProgressMode::parse(s) {
            Some(mode) => mode,
            None => bail!("Unknown progress mode '{}': expected off, human, or json", s),
        },
        None => ProgressMode::default_for_tty(),
    };
    let progress = progress_mode.reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, format } => {
            let format = match format.as_deref() {
                Some(s) => match ArchiveFormat::parse(s) {
                    Some(f) => Some(f),
                    None => bail!("Unknown archive format '{}': expected mbox, atom, or eml", s),
                },
                None => None,
            };
            let manifest = ingest::run_ingest(&cfg, &path, format, progress.as_ref()).await?;
            ingest::print_manifest(&path.display().to_string(), &manifest);
        }
        Commands::Fetch { date } => {
            let date = parse_date(&date)?;
            let manifest = archive::run_fetch_day(&cfg, date, progress.as_ref()).await?;
            ingest::print_manifest(&date.to_string(), &manifest);
        }
        Commands::FetchAtom => {
            let manifest = archive::run_fetch_atom(&cfg, progress.as_ref()).await?;
            ingest::print_manifest("atom feed", &manifest);
        }
        Commands::Summarize { target } => {
            let orch = orchestrator(&cfg).await?;
            match target {
                SummarizeTarget::Thread { id, force } => {
                    let outcome = orch.summarize_thread(&id, force).await?;
                    summarize::print_outcome(&outcome);
                }
                SummarizeTarget::Email { message_id, force } => {
                    let outcome = orch.summarize_email(&message_id, force).await?;
                    summarize::print_outcome(&outcome);
                }
                SummarizeTarget::Pending { limit, min_emails } => {
                    let cancel = orch.cancel_handle();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            warn!("interrupt received; finishing the current thread");
                            cancel.store(true, Ordering::SeqCst);
                        }
                    });
                    let report = orch
                        .summarize_pending(limit, min_emails, progress.as_ref())
                        .await?;
                    println!("summarize pending");
                    println!("  succeeded: {}", report.succeeded);
                    println!("  cached:    {}", report.cached);
                    println!("  failed:    {}", report.failed);
                    println!("  estimated cost: ${:.4}", report.estimated_cost_usd);
                    if report.cancelled {
                        println!("cancelled");
                    } else {
                        println!("ok");
                    }
                }
            }
        }
        Commands::Digest { window } => {
            let (window, force) = match window {
                DigestKind::Daily { date, force } => (DigestWindow::daily(parse_date(&date)?), force),
                DigestKind::Weekly { date, force } => {
                    (DigestWindow::weekly(parse_date(&date)?), force)
                }
            };
            let orch = orchestrator(&cfg).await?;
            let outcome = orch.generate_digest(window, force).await?;
            summarize::print_outcome(&outcome);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
