//! # Document dedup CLI (`dedup`)
//!
//! ## Usage
//!
//! ```bash
//! dedup --config ./config/dedup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dedup init` | Create the SQLite database and run schema migrations |
//! | `dedup ingest [DIR]` | Deduplicate every matching file under a directory |
//! | `dedup stats` | Counts by type and OCR quality |
//! | `dedup duplicates` | List duplicate groups |
//! | `dedup sources <id>` | List the physical copies of a canonical document |
//! | `dedup show <id>` | Show a canonical document |
//! | `dedup search "<query>"` | Search titles and subjects |
//! | `dedup export` | Dump the store as JSON or JSON Lines |
//! | `dedup scan` | Batch near-duplicate and partial-overlap detection |
//! | `dedup merge <from> <into>` | Fold one canonical document into another |
//! | `dedup log` | Show the processing log |
//! | `dedup verify` | Check store integrity |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use docdedup::export::ExportFormat;
use docdedup::ingest::IngestArgs;
use docdedup::models::DuplicateType;
use docdedup::progress::ProgressMode;
use docdedup::{config, export, get, ingest, logging, maintain, migrate, stats};

/// Document canonicalization and deduplication engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dedup.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dedup",
    about = "Document canonicalization and deduplication engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dedup.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Duplicate group type filter as spelled on the command line.
#[derive(Clone, Copy, ValueEnum)]
enum GroupType {
    Exact,
    NearDuplicate,
    PartialOverlap,
}

impl From<GroupType> for DuplicateType {
    fn from(t: GroupType) -> Self {
        match t {
            GroupType::Exact => DuplicateType::Exact,
            GroupType::NearDuplicate => DuplicateType::NearDuplicate,
            GroupType::PartialOverlap => DuplicateType::PartialOverlap,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// multiple times is safe.
    Init,

    /// Deduplicate every matching file under a directory.
    ///
    /// Exits non-zero if any document failed; the rest of the batch is
    /// still processed.
    Ingest {
        /// Directory to walk. Defaults to `[ingest].root`.
        dir: Option<PathBuf>,

        /// Collection label recorded on every source.
        #[arg(long)]
        collection: Option<String>,

        /// Provenance name recorded as primary source. Defaults to the collection.
        #[arg(long)]
        source_name: Option<String>,

        /// Only count the documents that would be processed.
        #[arg(long)]
        dry_run: bool,

        /// Process at most this many documents.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr. Defaults to human on a TTY, otherwise off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show document, source and group counts.
    Stats {
        /// Print the statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List duplicate groups.
    Duplicates {
        /// Only groups of this type.
        #[arg(long = "type", value_enum)]
        group_type: Option<GroupType>,
    },

    /// List the source copies of a canonical document.
    Sources { canonical_id: String },

    /// Show a canonical document with its sources and groups.
    Show { canonical_id: String },

    /// Case-insensitive search over titles and subjects.
    Search {
        query: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Export canonical documents, sources and groups.
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Batch fuzzy rescan and page-overlap detection over the whole store.
    Scan,

    /// Fold canonical document FROM into INTO, moving its sources.
    Merge { from: String, into: String },

    /// Show the processing log, newest first.
    Log {
        /// Only error entries.
        #[arg(long)]
        errors: bool,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Check store integrity. Exits non-zero on any violation.
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            dir,
            collection,
            source_name,
            dry_run,
            limit,
            progress,
        } => {
            let args = IngestArgs {
                dir,
                collection,
                source_name,
                dry_run,
                limit,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, &args, mode).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Duplicates { group_type } => {
            get::run_duplicates(&cfg, group_type.map(DuplicateType::from)).await?;
        }
        Commands::Sources { canonical_id } => {
            get::run_sources(&cfg, &canonical_id).await?;
        }
        Commands::Show { canonical_id } => {
            get::run_show(&cfg, &canonical_id).await?;
        }
        Commands::Search { query, limit } => {
            get::run_search(&cfg, &query, limit).await?;
        }
        Commands::Export { format, output } => {
            export::run_export(&cfg, format, output.as_deref()).await?;
        }
        Commands::Scan => {
            maintain::run_scan(&cfg).await?;
        }
        Commands::Merge { from, into } => {
            maintain::run_merge(&cfg, &from, &into).await?;
        }
        Commands::Log { errors, limit } => {
            get::run_log(&cfg, errors, limit).await?;
        }
        Commands::Verify => {
            maintain::run_verify(&cfg).await?;
        }
    }

    Ok(())
}
