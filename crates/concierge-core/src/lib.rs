//! # Concierge Core
//!
//! Runtime-free logic for the Concierge chat backend: data models,
//! the text chunker, the embedding and knowledge-store traits, the
//! per-language prompt templates, and the retrieval-augmented prompt
//! assembler.
//!
//! This crate contains no sqlx, HTTP client, or filesystem I/O. The
//! application crate supplies concrete [`embedding::Embedder`],
//! [`store::KnowledgeStore`], and [`retrieval::ChatModel`] implementations.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;

pub use error::{Error, ErrorKind, Result};
