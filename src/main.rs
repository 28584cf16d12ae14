//! # Fulltext Index CLI (`fti`)
//!
//! The `fti` binary drives the index from the command line: database
//! initialization, synchronizer runs, searching the bundled FTS5 index,
//! inspecting compiled boolean-mode queries, and maintenance operations.
//!
//! ## Usage
//!
//! ```bash
//! fti --config ./config/fti.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fti init` | Create the SQLite database and run schema migrations |
//! | `fti sync` | Run synchronizer ticks until the index converges |
//! | `fti search "<query>"` | Search the bundled full-text index |
//! | `fti compile "<query>"` | Print the compiled boolean-mode string |
//! | `fti status` | Show index completeness and extraction statuses |
//! | `fti clear-text` | Drop extracted attachment text, keeping records |

mod config;
mod db;
mod extract;
mod migrate;
mod models;
mod query;
mod sched;
mod source;
mod stats;
mod store;
mod sync;
mod textfilter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Dialect;
use crate::sched::{Scheduler, TokioScheduler};
use crate::source::{AttachmentResolver, MediaResolver, SourceAccessor, SqliteSource};
use crate::store::{IndexStore, SqliteStore};
use crate::sync::Indexer;

/// Fulltext Index CLI — keeps a searchable side index in step with a
/// primary document collection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/fti.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fti",
    about = "Fulltext Index — incremental full-text index maintenance with attachment text extraction",
    version,
    long_about = "Fulltext Index maintains a searchable side index over a host-owned document \
    collection: an incremental synchronizer processes stale and orphaned records in bounded \
    batches, attachment text (PDF, Word, Excel, PowerPoint) is extracted into the index, and \
    user search strings compile to boolean-mode syntax for mroonga and ngram engines."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fti.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, index_records, index_fts). Idempotent — running it
    /// multiple times is safe.
    Init,

    /// Run synchronizer ticks until the index converges.
    ///
    /// Each tick sweeps orphaned records and re-indexes up to one batch
    /// of stale documents; the loop continues until a tick reports no
    /// remaining backlog.
    Sync {
        /// Wipe the index first and rebuild from scratch, re-attempting
        /// previously failed extractions.
        #[arg(long)]
        rebuild: bool,

        /// Per-tick batch size override (defaults to the configured or
        /// automatic limit).
        #[arg(long)]
        limit: Option<u64>,

        /// Run a single tick and stop, even if backlog remains.
        #[arg(long)]
        once: bool,
    },

    /// Search the bundled full-text index.
    Search {
        /// The search query string. Supports quoted phrases, OR/AND,
        /// parenthesized groups, and `-term` exclusion.
        query: String,

        /// Restrict results to one document type (e.g. `post`, `attachment`).
        #[arg(long = "type")]
        doc_type: Option<String>,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Compile a search string and print the boolean-mode result.
    ///
    /// Useful for inspecting what a host-side fulltext engine would
    /// receive.
    Compile {
        /// The search query string.
        query: String,

        /// Target dialect: `mroonga` or `ngram`. Defaults to the
        /// configured dialect.
        #[arg(long)]
        dialect: Option<String>,
    },

    /// Show index completeness and per-status extraction counts.
    Status,

    /// Clear extracted attachment text, keeping the records.
    ///
    /// Pairs with `sync --rebuild` to force fresh extraction after an
    /// extractor upgrade.
    ClearText,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            rebuild,
            limit,
            once,
        } => {
            run_sync(&cfg, rebuild, limit, once).await?;
        }
        Commands::Search {
            query,
            doc_type,
            limit,
        } => {
            run_search(&cfg, &query, doc_type.as_deref(), limit).await?;
        }
        Commands::Compile { query, dialect } => {
            let dialect = match dialect.as_deref() {
                Some("mroonga") => Dialect::Mroonga,
                Some("ngram") => Dialect::Ngram,
                Some(other) => anyhow::bail!("unknown dialect: {}", other),
                None => cfg.index.dialect,
            };
            println!(
                "{}",
                query::compile(&query, dialect, &cfg.index.weight_directive)
            );
        }
        Commands::Status => {
            let pool = db::connect(&cfg).await?;
            let source: Arc<dyn SourceAccessor> = Arc::new(SqliteSource::new(pool.clone()));
            let store: Arc<dyn IndexStore> = Arc::new(SqliteStore::new(pool));
            let report = stats::gather(&source, &store).await?;
            stats::print_report(&report);
        }
        Commands::ClearText => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool);
            let cleared = store.clear_attachment_text().await?;
            println!("Cleared extracted text from {} record(s).", cleared);
        }
    }

    Ok(())
}

/// Drives the synchronizer to convergence: ticks run back to back via
/// the scheduler until no backlog remains.
async fn run_sync(
    cfg: &config::Config,
    rebuild: bool,
    limit: Option<u64>,
    once: bool,
) -> anyhow::Result<()> {
    let mut cfg = cfg.clone();
    if let Some(limit) = limit {
        cfg.index.batch_limit = limit;
    }

    let pool = db::connect(&cfg).await?;
    migrate::run_migrations(&pool).await?;

    let source: Arc<dyn SourceAccessor> = Arc::new(SqliteSource::new(pool.clone()));
    let store: Arc<dyn IndexStore> = Arc::new(SqliteStore::new(pool));
    let resolver: Arc<dyn AttachmentResolver> =
        Arc::new(MediaResolver::new(cfg.extract.media_root.clone()));
    let scheduler = Arc::new(TokioScheduler::new());
    let indexer = Indexer::new(
        source,
        store,
        resolver,
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        cfg,
    );

    if rebuild {
        indexer.wipe_index().await?;
        println!("Index wiped; rebuilding.");
    }

    let mut tick = 1u64;
    loop {
        let report = indexer.run_tick().await?;
        println!(
            "Tick {}: {} upserted, {} deleted, {} extracted, {} failed, {} remaining",
            tick, report.upserted, report.deleted, report.extracted, report.failed, report.remaining
        );
        if report.remaining == 0 || once {
            break;
        }
        scheduler.fired().await;
        tick += 1;
    }

    Ok(())
}

/// Executes a query against the bundled FTS5 index and prints ranked hits.
async fn run_search(
    cfg: &config::Config,
    query: &str,
    doc_type: Option<&str>,
    limit: i64,
) -> anyhow::Result<()> {
    let tokens = query::tokenize(query);
    if tokens.is_empty() {
        println!("Empty query.");
        return Ok(());
    }

    let pool = db::connect(cfg).await?;
    let store = SqliteStore::new(pool);
    let hits = store.search(&tokens, doc_type, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for hit in &hits {
        let label = match store.get_by_id(hit.id).await? {
            Some(record) => record.status.label(),
            None => "",
        };
        let title = if hit.title.is_empty() {
            "(untitled)"
        } else {
            hit.title.as_str()
        };
        if label.is_empty() {
            println!("{:>6}  {:.3}  [{}] {}", hit.id, hit.score, hit.doc_type, title);
        } else {
            println!(
                "{:>6}  {:.3}  [{}] {} {}",
                hit.id, hit.score, hit.doc_type, title, label
            );
        }
        if !hit.excerpt.is_empty() {
            println!("        {}", hit.excerpt);
        }
    }

    Ok(())
}
