//! # kb-harvest CLI (`kbh`)
//!
//! The `kbh` binary drives the knowledge-base ingestion pipeline. It
//! provides commands for database initialization, source registration,
//! harvest runs, and semantic search over the harvested chunks.
//!
//! ## Usage
//!
//! ```bash
//! kbh --config ./config/kbh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbh init` | Create the SQLite database and run schema migrations |
//! | `kbh add <name> <url>` | Register a crawl source, optionally with credentials |
//! | `kbh sources` | List registered sources and their processing status |
//! | `kbh harvest <id\|all>` | Run the pipeline for one source or every eligible one |
//! | `kbh search "<query>"` | Semantic search over harvested chunks |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! kbh init --config ./config/kbh.toml
//!
//! # Register a gated source with credentials
//! kbh add "Vakblad" https://vakblad.nl --email user@kantoor.nl --password geheim
//!
//! # Harvest everything that is active and not yet processed
//! kbh harvest all
//!
//! # Re-harvest one source with JSON progress on stderr
//! kbh harvest 6f9d... --progress json
//!
//! # Search the knowledge base
//! kbh search "verjaringstermijn vordering"
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kb_harvest::completion::{CompletionService, HttpCompletionClient};
use kb_harvest::embedding::{EmbeddingService, HttpEmbeddingClient};
use kb_harvest::pipeline::Coordinator;
use kb_harvest::progress::{CancelToken, ProgressMode};
use kb_harvest::{config, db, migrate, search, sources_cmd, store};

/// kb-harvest CLI — ingestion pipeline for authentication-gated sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbh",
    about = "kb-harvest — knowledge-base ingestion for authentication-gated sources",
    version,
    long_about = "kb-harvest crawls registered sources behind logins, extracts their articles, \
    summarizes them with a text-completion service, chunks the corpus, and embeds the chunks \
    for semantic search."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (sources,
    /// chunks, chunk_vectors). Idempotent — running it again is safe.
    Init,

    /// Register a crawl source.
    ///
    /// Sources are created active and unprocessed; the next `harvest all`
    /// picks them up. Credentials are optional and stored serialized on
    /// the source record.
    Add {
        /// Display name for the source.
        name: String,
        /// Start URL to crawl.
        url: String,
        /// Login email. Must be paired with --password.
        #[arg(long)]
        email: Option<String>,
        /// Login password. Must be paired with --email.
        #[arg(long)]
        password: Option<String>,
        /// Free-form category label.
        #[arg(long)]
        category: Option<String>,
    },

    /// List registered sources and their processing status.
    Sources,

    /// Run the harvest pipeline.
    ///
    /// Pass a source id to harvest one source, or `all` to harvest every
    /// active unprocessed source sequentially with a cool-down pause
    /// between sources. Ctrl-C cancels at the next stage boundary.
    Harvest {
        /// Source id, or `all`.
        source: String,

        /// With `all`: include sources that were already processed.
        #[arg(long)]
        full: bool,

        /// Progress reporting on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Semantic search over harvested chunks.
    ///
    /// Embeds the query and ranks stored chunk vectors by cosine
    /// similarity. Requires an embedding provider to be configured.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("initialized database at {}", config.db.path.display());
        }

        Commands::Add {
            name,
            url,
            email,
            password,
            category,
        } => {
            sources_cmd::run_add(&config, &name, &url, email, password, category).await?;
        }

        Commands::Sources => {
            sources_cmd::run_list(&config).await?;
        }

        Commands::Harvest {
            source,
            full,
            progress,
        } => {
            run_harvest(config, &source, full, progress.as_deref()).await?;
        }

        Commands::Search { query, limit } => {
            search::run_search(&config, &query, limit).await?;
        }
    }

    Ok(())
}

async fn run_harvest(
    config: config::Config,
    source_spec: &str,
    full: bool,
    progress: Option<&str>,
) -> Result<()> {
    let mode = match progress {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode: {}. Use off, human, or json.", other),
    };
    let sink = mode.sink();

    let completion: Arc<dyn CompletionService> =
        Arc::new(HttpCompletionClient::from_config(&config.completion)?);

    // The run degrades gracefully without embeddings: summary and chunks
    // are still produced and persisted.
    let embedding: Option<Arc<dyn EmbeddingService>> = if config.embedding.is_enabled() {
        match HttpEmbeddingClient::from_config(&config.embedding) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("embedding client unavailable, continuing without: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let pool = db::connect(&config).await?;
    let coordinator = Coordinator::new(config, pool.clone(), completion, embedding);

    let cancel = CancelToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling at next stage boundary");
            cancel_on_signal.cancel();
        }
    });

    if source_spec == "all" {
        let filter = store::SourceFilter {
            include_processed: full,
        };
        let outcome = coordinator.run_eligible(filter, sink.as_ref(), &cancel).await?;
        println!("harvest all");
        println!("  processed: {}", outcome.processed);
        println!("  failed: {}", outcome.failed);
    } else {
        let source = store::get_source(&pool, source_spec)
            .await?
            .with_context(|| format!("no source with id {}", source_spec))?;
        let stats = coordinator.run_source(&source, sink.as_ref(), &cancel).await?;
        println!("harvest {}", source.name);
        println!("  articles: {}", stats.articles_processed);
        println!("  corpus: {} chars", stats.total_chars);
        println!("  summary: {} chars", stats.summary_length);
        println!("  chunks: {}", stats.chunks_created);
    }

    pool.close().await;
    Ok(())
}
