//! Knowledge-base lookup for the `search` command.
//!
//! Runs the same thresholded similarity query the assembler uses, so the
//! output shows exactly which chunks would ground a reply.

use concierge_core::error::{Error, Result};
use concierge_core::models::ChunkMatch;

use crate::clients::Clients;

/// Embed `query` and return the matching chunks, best first.
pub async fn search_knowledge(clients: &Clients, query: &str) -> Result<Vec<ChunkMatch>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let embedder = clients.embedder();
    if embedder.dims() == 0 {
        return Err(Error::validation(
            "search requires embeddings. Set OPENAI_API_KEY and [embedding] provider.",
        ));
    }
    let policy = clients.config().retrieval.policy();
    let vector = embedder.embed(query).await?;
    clients
        .knowledge()
        .match_chunks(&vector, policy.similarity_threshold, policy.top_k)
        .await
}

pub async fn run_search(clients: &Clients, query: &str) -> anyhow::Result<()> {
    let matches = search_knowledge(clients, query).await?;
    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let title = crate::documents::get(clients.pool(), &m.document_id)
            .await
            .map(|d| d.title)
            .unwrap_or_else(|_| "(unknown)".to_string());
        println!(
            "{}. [{:.3}] {} #{}",
            i + 1,
            m.similarity,
            title,
            m.chunk_index
        );
        let excerpt: String = m.chunk_text.chars().take(200).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    document: {}", m.document_id);
        println!();
    }
    Ok(())
}
