//! # Concierge CLI (`concierge`)
//!
//! Administration and serving for the chat widget backend.
//!
//! ## Usage
//!
//! ```bash
//! concierge --config ./config/concierge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `concierge init` | Create the SQLite database and run schema migrations |
//! | `concierge serve` | Start the HTTP API |
//! | `concierge ingest <path>` | Upload a file through the ingestion pipeline |
//! | `concierge search "<query>"` | Show the knowledge chunks a question would retrieve |
//! | `concierge reembed <id>` | Rebuild a document's chunks and embeddings |
//! | `concierge documents` | List knowledge-base documents |
//!
//! Secrets are read from `OPENAI_API_KEY`, `STRIPE_SECRET_KEY`, and
//! `STRIPE_WEBHOOK_SECRET`. Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use concierge::clients::{Clients, Secrets};
use concierge::config::{self, Config};
use concierge::extract::mime_from_path;
use concierge::ingest::{self, Upload};
use concierge::{db, documents, migrate, search, server};
use concierge_core::models::{DocumentStatus, DocumentType};

/// Concierge: customer chat widget backend with a retrieval-augmented
/// knowledge base.
#[derive(Parser)]
#[command(name = "concierge", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/concierge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Ingest a local file.
    ///
    /// The file is stored, its text extracted, and, for knowledge-base
    /// documents, chunked and embedded.
    Ingest {
        path: PathBuf,

        /// Add the file to the shared knowledge base.
        #[arg(long)]
        knowledge_base: bool,

        /// Attach the upload to a paid session.
        #[arg(long)]
        session: Option<String>,

        /// Override the MIME type guessed from the file extension.
        #[arg(long)]
        mime: Option<String>,
    },

    /// Print the knowledge chunks that would ground a reply to `query`.
    Search { query: String },

    /// Drop and rebuild a knowledge-base document's chunks.
    Reembed { id: String },

    /// List documents, newest first.
    Documents {
        /// `active` or `archived`.
        #[arg(long)]
        status: Option<String>,

        /// `knowledge_base` or `user_upload`.
        #[arg(long = "type", default_value = "knowledge_base")]
        document_type: String,
    },
}

async fn open_clients(cfg: &Config) -> anyhow::Result<Clients> {
    let pool = db::connect(cfg).await?;
    Clients::new(Arc::new(cfg.clone()), pool, Secrets::from_env())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest {
            path,
            knowledge_base,
            session,
            mime,
        } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mime_type = match mime {
                Some(mime) => mime,
                None => mime_from_path(&path)
                    .with_context(|| {
                        format!(
                            "Cannot infer a supported type for {}; pass --mime",
                            path.display()
                        )
                    })?
                    .to_string(),
            };
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());

            let clients = open_clients(&cfg).await?;
            let outcome = ingest::ingest_upload(
                &clients,
                Upload {
                    file_name,
                    mime_type,
                    bytes,
                    knowledge_base,
                    session_id: session,
                },
            )
            .await?;

            println!("Ingested {}", outcome.document.title);
            println!("  id: {}", outcome.document.id);
            println!("  type: {}", outcome.document.document_type);
            println!("  url: {}", outcome.document.url);
            println!(
                "  text: {}",
                if outcome.document.content_text.is_some() {
                    "extracted"
                } else {
                    "none"
                }
            );
            println!(
                "  chunks: {} stored, {} skipped",
                outcome.chunks_stored, outcome.chunks_skipped
            );
            clients.pool().close().await;
        }
        Commands::Search { query } => {
            let clients = open_clients(&cfg).await?;
            search::run_search(&clients, &query).await?;
            clients.pool().close().await;
        }
        Commands::Reembed { id } => {
            let clients = open_clients(&cfg).await?;
            let outcome = ingest::reembed_document(&clients, &id).await?;
            println!(
                "Re-embedded {}: {} stored, {} skipped",
                outcome.document.title, outcome.chunks_stored, outcome.chunks_skipped
            );
            clients.pool().close().await;
        }
        Commands::Documents {
            status,
            document_type,
        } => {
            let document_type = document_type.parse::<DocumentType>()?;
            let status = status.map(|s| s.parse::<DocumentStatus>()).transpose()?;

            let clients = open_clients(&cfg).await?;
            let listed = documents::list(clients.pool(), document_type, status).await?;
            if listed.is_empty() {
                println!("No documents.");
            }
            for doc in &listed {
                println!(
                    "{}  {:<8}  {:>9} B  {}  {}",
                    doc.id,
                    doc.status.as_str(),
                    doc.size_bytes,
                    doc.created_at.format("%Y-%m-%d"),
                    doc.title
                );
            }
            clients.pool().close().await;
        }
    }

    Ok(())
}
