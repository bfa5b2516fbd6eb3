//! # Bookforge CLI
//!
//! The `bookforge` binary is the operator interface for the ingestion and
//! versioning pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bookforge init` | Create the metadata database and run schema migrations |
//! | `bookforge ingest <path>` | Ingest a chapter file or directory of chapter files |
//! | `bookforge search "<query>"` | Semantic search over ingested units |
//! | `bookforge version create` | Snapshot all three stores as a pending version |
//! | `bookforge version commit <id>` | Mark a version committed |
//! | `bookforge version rollback <id>` | Delete a version's snapshots |
//! | `bookforge version rotate` | Delete old committed versions beyond the keep count |
//! | `bookforge version baseline` | Register pre-existing data as the baseline |
//! | `bookforge version list` | List version records (or one version's operation log) |
//! | `bookforge validate` | Cross-check unit counts and identifiers across stores |
//! | `bookforge stats` | Registry statistics |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bookforge::config::load_config;
use bookforge::ingest::{run_ingest, IngestRunOptions};
use bookforge::search::{run_search, SearchArgs};
use bookforge::stats::run_stats;
use bookforge::version_cmd;

/// Bookforge — tri-store ingestion and version coordination for
/// hierarchical textbook content.
#[derive(Parser)]
#[command(
    name = "bookforge",
    about = "Tri-store ingestion and version coordination for hierarchical textbook content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/bookforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the metadata database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest chapter files into all three stores.
    ///
    /// Accepts a single chapter JSON file or a directory walked with the
    /// configured include globs. Unchanged chapters (same content
    /// fingerprint) are skipped entirely.
    Ingest {
        /// Chapter file or directory of chapter files.
        path: PathBuf,

        /// Ignore the fingerprint skip — re-write unchanged chapters.
        #[arg(long)]
        full: bool,

        /// Show what would be ingested without writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of chapter files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Semantic search over ingested content units.
    Search {
        /// Query text.
        query: String,

        /// Restrict to one textbook.
        #[arg(long)]
        textbook: Option<String>,

        /// Restrict to one chapter number.
        #[arg(long)]
        chapter: Option<u32>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Version lifecycle operations.
    #[command(subcommand)]
    Version(VersionCommands),

    /// Cross-check unit counts and identifiers across the three stores.
    Validate {
        /// Version to validate; defaults to the latest committed version.
        #[arg(long)]
        version: Option<String>,

        /// Counts only — skip the identifier set comparison.
        #[arg(long)]
        fast: bool,
    },

    /// Registry statistics.
    Stats,
}

#[derive(Subcommand)]
enum VersionCommands {
    /// Snapshot all three stores and register a pending version.
    Create {
        /// Human-readable description of the version.
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Mark a pending or validating version as committed.
    Commit {
        version_id: String,
    },

    /// Delete a version's snapshots and mark it rolled back. Idempotent.
    Rollback {
        version_id: String,
    },

    /// Delete old committed versions beyond the retention count.
    Rotate {
        /// Number of committed versions to keep (defaults to config).
        #[arg(long)]
        keep: Option<usize>,

        /// Allow deletion of protected baseline versions.
        #[arg(long)]
        include_baseline: bool,
    },

    /// Register the current tri-store state as the baseline version.
    /// Idempotent: an existing baseline's id is returned unchanged.
    Baseline {
        #[arg(short, long, default_value = "pre-versioning data")]
        description: String,
    },

    /// List version records, newest first.
    List {
        /// Show the operation log of one version instead.
        #[arg(long)]
        log: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = bookforge::db::connect(&config.metadata.path).await?;
            bookforge::migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.metadata.path.display());
        }
        Commands::Ingest {
            path,
            full,
            dry_run,
            limit,
        } => {
            run_ingest(
                &config,
                &path,
                IngestRunOptions {
                    full,
                    dry_run,
                    limit,
                },
            )
            .await?;
        }
        Commands::Search {
            query,
            textbook,
            chapter,
            limit,
        } => {
            run_search(
                &config,
                SearchArgs {
                    query,
                    textbook,
                    chapter,
                    limit,
                },
            )
            .await?;
        }
        Commands::Version(cmd) => match cmd {
            VersionCommands::Create { description } => {
                version_cmd::run_create(&config, &description).await?;
            }
            VersionCommands::Commit { version_id } => {
                version_cmd::run_commit(&config, &version_id).await?;
            }
            VersionCommands::Rollback { version_id } => {
                version_cmd::run_rollback(&config, &version_id).await?;
            }
            VersionCommands::Rotate {
                keep,
                include_baseline,
            } => {
                version_cmd::run_rotate(&config, keep, include_baseline).await?;
            }
            VersionCommands::Baseline { description } => {
                version_cmd::run_baseline(&config, &description).await?;
            }
            VersionCommands::List { log } => {
                version_cmd::run_list(&config, log.as_deref()).await?;
            }
        },
        Commands::Validate { version, fast } => {
            version_cmd::run_validate(&config, version.as_deref(), fast).await?;
        }
        Commands::Stats => {
            run_stats(&config).await?;
        }
    }

    Ok(())
}
