//! # Evidence RAG CLI (`erag`)
//!
//! Ingestion, indexing, retrieval preview, interactive chat, and the HTTP
//! server over a Korean legal document corpus.
//!
//! ## Usage
//!
//! ```bash
//! erag --config ./config/erag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `erag preprocess` | Normalise `data/raw/<category>/*` into `data/cleaned/` |
//! | `erag split` | Cut cleaned documents into chunk files |
//! | `erag index build` | Embed new or changed chunks and append them to the index |
//! | `erag index status` | Show index/metadata sizes and consistency |
//! | `erag index repair` | Re-point metadata paths at the current chunk store |
//! | `erag search "<q>"` | Show the ranked evidence for a question |
//! | `erag chat` | Interactive question loop with session logging |
//! | `erag serve` | Start the HTTP server |
//! | `erag ingest` | `preprocess` + `split` + `index build` |
//!
//! ## Examples
//!
//! ```bash
//! # Full pipeline from raw documents
//! erag ingest --config ./config/erag.toml
//!
//! # Rebuild the index from scratch
//! erag index build --full
//!
//! # What would the model see?
//! erag search "과태료 금액은?" --limit 3
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use evidence_rag::config::{self, Config};
use evidence_rag::indexer::{run_index_build, BuildOptions};
use evidence_rag::progress::ProgressMode;
use evidence_rag::{chat_cmd, chunk, logging, maintenance, preprocess, search, server};

/// Evidence RAG: grounded question answering over a legal document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/erag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "erag",
    about = "Evidence-gated retrieval-augmented answering over a legal document corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, defaults rooted at the current
    /// directory are used.
    #[arg(long, global = true, default_value = "./config/erag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalise raw documents into plain text.
    Preprocess,

    /// Split cleaned documents into fixed-size chunk files.
    Split,

    /// Manage the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Show the ranked evidence for a question without calling the model.
    Search {
        /// The question.
        query: String,

        /// Maximum number of results (capped at `retrieval.max_docs`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Interactive question loop. An empty line exits.
    Chat,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Run preprocess, split and an incremental index build in sequence.
    Ingest {
        /// Override the batch size from config (texts per embedding call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Embed chunks whose (path, digest) pair is not yet indexed.
    Build {
        /// Discard the existing index and embed every chunk.
        #[arg(long)]
        full: bool,

        /// Override the batch size from config (texts per embedding call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print index and metadata sizes and whether they agree.
    Status,

    /// Rewrite metadata paths to match the current chunk store.
    Repair,
}

fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    let root = std::env::current_dir()?;
    Ok(Config::minimal(root))
}

fn print_preprocess(cfg: &Config) -> anyhow::Result<()> {
    let report = preprocess::run_preprocess(cfg)?;
    println!("preprocess");
    println!("  categories: {}", report.categories);
    println!("  written: {}", report.written);
    println!("  skipped: {}", report.skipped);
    Ok(())
}

fn print_split(cfg: &Config) -> anyhow::Result<()> {
    let report = chunk::run_split(cfg)?;
    println!("split");
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = load_or_default(&cli.config)?;
    logging::init_with_config(&cfg.logging);
    if !cli.config.exists() {
        tracing::info!(
            "{} not found; using defaults rooted at {}",
            cli.config.display(),
            cfg.paths.root.display()
        );
    }

    match cli.command {
        Commands::Preprocess => print_preprocess(&cfg)?,
        Commands::Split => print_split(&cfg)?,
        Commands::Index { action } => match action {
            IndexAction::Build {
                full,
                batch_size,
                progress,
            } => {
                let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
                let options = BuildOptions { full, batch_size };
                run_index_build(&cfg, &options, progress.reporter().as_ref()).await?;
            }
            IndexAction::Status => maintenance::run_index_status(&cfg)?,
            IndexAction::Repair => maintenance::run_index_repair(&cfg)?,
        },
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Chat => chat_cmd::run_chat(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Ingest { batch_size } => {
            print_preprocess(&cfg)?;
            print_split(&cfg)?;
            let options = BuildOptions {
                full: false,
                batch_size,
            };
            let progress = ProgressMode::default_for_tty();
            run_index_build(&cfg, &options, progress.reporter().as_ref()).await?;
        }
    }

    Ok(())
}
