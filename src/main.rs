//! # code-rag CLI (`crag`)
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the chunk database and its schema |
//! | `crag parse [--root DIR]` | Walk a source tree into the chunk store |
//! | `crag chunks get <file>` | Print the chunks stored for a file |
//! | `crag chunks delete <file>` | Remove a file's chunks |
//! | `crag chunks delete-all` | Empty the chunk store |
//! | `crag build` | Rebuild the vector index from every stored chunk |
//! | `crag search "<query>" [--k N]` | Ranked similar chunks |
//! | `crag clear-index` | Delete the index snapshot |
//! | `crag refresh` | Clear everything, re-walk and rebuild |
//! | `crag serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! crag init
//! crag parse --root ./codebase
//! crag build
//! crag search "open a database connection" --k 3
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use code_rag::config;
use code_rag::logging;
use code_rag::server;
use code_rag::service::CodeRag;
use code_rag::store::SqliteChunkStore;

/// code-rag: split a source tree into functions, classes, CSV rows and JSON
/// entries, embed them, and search them by meaning.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Chunk, embed and search a codebase",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the chunk database schema. Idempotent.
    Init,

    /// Walk a source tree and store its chunks.
    Parse {
        /// Directory to walk. Defaults to `[walker].root`.
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Inspect or delete stored chunks.
    Chunks {
        #[command(subcommand)]
        action: ChunksAction,
    },

    /// Rebuild the vector index from all stored chunks.
    Build,

    /// Search the index.
    Search {
        /// Free-text query.
        query: String,

        /// Number of results. Defaults to `[retrieval].default_k`.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Delete the index snapshot.
    ClearIndex,

    /// Clear the index and chunk store, re-walk `[walker].root`, rebuild.
    Refresh,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ChunksAction {
    /// Print every chunk stored for a file path.
    Get { file_path: String },
    /// Delete every chunk stored for a file path.
    Delete { file_path: String },
    /// Delete all chunks.
    DeleteAll,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Init => {
            let store = SqliteChunkStore::open(&cfg.store.path).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Parse { root } => {
            let root = root.unwrap_or_else(|| cfg.walker.root.clone());
            let rag = CodeRag::open(cfg).await?;
            let report = rag.parse_now(&root).await?;
            println!("parse {}", root.display());
            println!("  files scanned: {}", report.files_scanned);
            println!("  files parsed: {}", report.files_parsed);
            println!("  files skipped: {}", report.files_skipped);
            println!("  chunks written: {}", report.chunks_written);
            println!("  errors: {}", report.errors);
            println!("ok");
        }
        Commands::Chunks { action } => {
            let rag = CodeRag::open(cfg).await?;
            match action {
                ChunksAction::Get { file_path } => {
                    let chunks = rag.get_chunks(&file_path).await?;
                    println!("--- Chunks ({}) ---", chunks.len());
                    for chunk in &chunks {
                        let id = chunk.vector_id.unwrap_or(-1);
                        let name = chunk.name.as_deref().unwrap_or("-");
                        println!("[{}] {} {}", id, chunk.kind, name);
                        println!("{}", chunk.content);
                        println!();
                    }
                }
                ChunksAction::Delete { file_path } => {
                    let deleted = rag.delete_chunks(&file_path).await?;
                    println!("deleted {} chunks from {}", deleted, file_path);
                }
                ChunksAction::DeleteAll => {
                    let deleted = rag.delete_all_chunks().await?;
                    println!("deleted {} chunks", deleted);
                }
            }
        }
        Commands::Build => {
            let rag = CodeRag::open(cfg).await?;
            let report = rag.build_index_now().await?;
            println!("build");
            println!("  chunks seen: {}", report.chunks_seen);
            println!("  vectors indexed: {}", report.vectors_indexed);
            println!("  skipped (empty): {}", report.skipped_empty);
            println!("ok");
        }
        Commands::Search { query, k } => {
            let rag = CodeRag::open(cfg).await?;
            let hits = rag.search(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} {} ({})",
                    rank + 1,
                    hit.distance,
                    hit.file_path,
                    hit.name.as_deref().unwrap_or("-"),
                    hit.kind
                );
                for line in hit.content.lines() {
                    println!("    {}", line);
                }
                println!();
            }
        }
        Commands::ClearIndex => {
            let rag = CodeRag::open(cfg).await?;
            if rag.clear_index().await? {
                println!("index cleared");
            } else {
                println!("no index to clear");
            }
        }
        Commands::Refresh => {
            let rag = CodeRag::open(cfg).await?;
            let report = rag.refresh_now().await?;
            println!("refresh");
            println!("  chunks deleted: {}", report.chunks_deleted);
            println!("  chunks written: {}", report.walk.chunks_written);
            println!("  vectors indexed: {}", report.build.vectors_indexed);
            println!("ok");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
