//! # Concierge
//!
//! Backend for an embeddable customer chat widget. Visitors chat with an
//! assistant grounded in an admin-curated knowledge base; sessions start
//! free and can be upgraded through a payment checkout, which unlocks
//! document uploads and session reports.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload  │──▶│   Pipeline   │──▶│    SQLite    │
//! │ PDF/DOCX │   │ Chunk+Embed  │   │ chunks+vecs  │
//! └──────────┘   └──────────────┘   └──────┬───────┘
//!                                          │ similarity
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                ┌───────────┐       ┌───────────┐
//!                │ Assembler │──────▶│ Chat model│
//!                │  (core)   │       │ (OpenAI)  │
//!                └───────────┘       └───────────┘
//! ```
//!
//! Pure logic (chunking, similarity, prompt assembly, language templates)
//! lives in the `concierge-core` crate. This crate adds persistence, the
//! external clients, and the HTTP and CLI surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`clients`] | Registry of external clients |
//! | [`openai`] | Shared HTTP client for the OpenAI API |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat completion providers |
//! | [`sqlite_store`] | Knowledge store backed by SQLite |
//! | [`storage`] | Blob storage for originals and reports |
//! | [`extract`] | Text extraction from PDF, DOCX, and text files |
//! | [`ingest`] | Ingestion pipeline |
//! | [`documents`] | Document records and admin operations |
//! | [`sessions`] | Sessions and messages |
//! | [`chat`] | One chat turn |
//! | [`search`] | Knowledge-base lookup for the CLI |
//! | [`billing`] | Checkout and signed payment webhooks |
//! | [`reports`] | Session reports |
//! | [`server`] | HTTP API |

pub mod billing;
pub mod chat;
pub mod clients;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod openai;
pub mod reports;
pub mod search;
pub mod server;
pub mod sessions;
pub mod sqlite_store;
pub mod storage;

#[cfg(test)]
mod testing;
