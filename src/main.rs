//! # docqa CLI
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa import <file.jsonl>` | Load pre-chunked documents, embedding as needed |
//! | `docqa search "<query>"` | Print fused, re-ranked chunks as JSON |
//! | `docqa ask "<query>"` | Print a grounded, cited answer as JSON |
//! | `docqa serve` | Start the HTTP API |
//!
//! Results go to stdout as JSON; logs go to stderr (`RUST_LOG` overrides
//! the default `docqa=info` filter).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::app::{build_pipeline, open_store};
use docqa::config::load_config;
use docqa::embedding::create_embedder;
use docqa::import::import_file;
use docqa::server::run_server;
use docqa_core::models::AnswerRequest;

#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Grounded, citation-backed question answering over large documents",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema (idempotent).
    Init,

    /// Import chunks from a JSONL file.
    Import { file: PathBuf },

    /// Retrieve and rank chunks without generating an answer.
    Search {
        query: String,
        #[arg(long)]
        document: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },

    /// Answer a question with citations.
    Ask {
        query: String,
        #[arg(long)]
        document: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },

    /// Start the HTTP server.
    Serve,
}

fn request(query: String, document: Option<String>, owner: Option<String>) -> AnswerRequest {
    AnswerRequest {
        query,
        document_id: document,
        owner_id: owner,
        document_context: None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docqa=info,docqa_core=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&config).await?;
            store.pool().close().await;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Import { file } => {
            let store = open_store(&config).await?;
            let embedder = if config.embedding.is_enabled() {
                Some(create_embedder(&config.embedding)?)
            } else {
                None
            };
            let stats = import_file(
                &file,
                &store,
                embedder.as_deref(),
                config.embedding.batch_size,
            )
            .await?;
            println!("import {}", file.display());
            println!("  imported: {}", stats.chunks);
            println!("  embedded: {}", stats.embedded);
            println!("  without vectors: {}", stats.without_vectors);
            println!("ok");
        }
        Commands::Search {
            query,
            document,
            owner,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let results = pipeline.search(&request(query, document, owner)).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Ask {
            query,
            document,
            owner,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let response = pipeline.answer(&request(query, document, owner)).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Serve => run_server(&config).await?,
    }

    Ok(())
}
