//! Retrieval-augmented prompt assembly.
//!
//! Given a user message, the session language, and the conversation so far,
//! the [`Assembler`]:
//!
//! 1. Embeds the message and asks the [`KnowledgeStore`] for the `top_k`
//!    chunks at or above `similarity_threshold`.
//! 2. Joins the qualifying chunks, most similar first, into a bounded
//!    [`ContextBlock`] and appends it to the language's system prompt.
//! 3. Builds one linear transcript
//!    `[system, ...recent history, user]` and sends it to the [`ChatModel`].
//! 4. Returns the model's text, or the language's fallback reply when the
//!    model call fails.
//!
//! Nothing here persists anything. Knowledge lookup failures are logged and
//! the reply is produced without grounding; generation failures are logged
//! and replaced by a canned reply. [`Assembler::respond`] cannot fail.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{ChunkMatch, Message, Role};
use crate::prompt::Language;
use crate::store::KnowledgeStore;

/// Separator placed between chunks inside a context block.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// One entry of the transcript sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Chat-completion capability: transcript in, text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate the next assistant turn. An empty string means the model
    /// returned no content.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Tunable retrieval constants.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPolicy {
    pub similarity_threshold: f32,
    pub top_k: usize,
    /// Maximum number of prior turns included in the transcript.
    pub history_limit: usize,
    /// Upper bound on the joined chunk text. The best chunk is always kept.
    pub max_context_chars: usize,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            top_k: 3,
            history_limit: 20,
            max_context_chars: 12_000,
        }
    }
}

/// Knowledge-base excerpts selected for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    /// Chunk texts joined by [`CHUNK_SEPARATOR`], most similar first.
    pub text: String,
    pub chunk_count: usize,
    pub top_similarity: f32,
}

impl ContextBlock {
    /// Build a block from store matches, or `None` when nothing qualifies.
    ///
    /// Matches are re-sorted by descending similarity (stable), so a chunk
    /// never appears after a less similar one regardless of backend order.
    pub fn from_matches(mut matches: Vec<ChunkMatch>, max_chars: usize) -> Option<Self> {
        if matches.is_empty() {
            return None;
        }
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        let top_similarity = matches[0].similarity;
        let mut text = String::new();
        let mut used = 0usize;
        let mut chunk_count = 0usize;

        for m in &matches {
            let len = m.chunk_text.chars().count();
            let sep = if chunk_count == 0 {
                0
            } else {
                CHUNK_SEPARATOR.chars().count()
            };
            if chunk_count > 0 && used + sep + len > max_chars {
                break;
            }
            if chunk_count > 0 {
                text.push_str(CHUNK_SEPARATOR);
            }
            text.push_str(&m.chunk_text);
            used += sep + len;
            chunk_count += 1;
        }

        Some(Self {
            text,
            chunk_count,
            top_similarity,
        })
    }

    /// The block as appended to a system prompt, fenced off from it.
    pub fn render(&self, heading: &str) -> String {
        format!("\n\n---\n{}\n{}", heading, self.text)
    }
}

/// The assistant turn produced by [`Assembler::respond`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    /// Whether knowledge-base context was included in the prompt.
    pub grounded: bool,
    /// Whether `text` is a canned reply instead of model output.
    pub fallback: bool,
}

struct Knowledge {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn KnowledgeStore>,
}

pub struct Assembler {
    chat: Arc<dyn ChatModel>,
    knowledge: Option<Knowledge>,
    policy: RetrievalPolicy,
}

impl Assembler {
    /// An assembler without a knowledge base; every reply is ungrounded.
    pub fn new(chat: Arc<dyn ChatModel>, policy: RetrievalPolicy) -> Self {
        Self {
            chat,
            knowledge: None,
            policy,
        }
    }

    pub fn with_knowledge(
        mut self,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn KnowledgeStore>,
    ) -> Self {
        self.knowledge = Some(Knowledge { embedder, store });
        self
    }

    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    /// Look up grounding for `query`. Errors are returned to the caller;
    /// [`respond`](Self::respond) is the variant that swallows them.
    pub async fn try_retrieve_context(&self, query: &str) -> Result<Option<ContextBlock>> {
        let Some(knowledge) = &self.knowledge else {
            return Ok(None);
        };
        if query.trim().is_empty() || self.policy.top_k == 0 {
            return Ok(None);
        }

        let vector = knowledge.embedder.embed(query).await?;
        let matches = knowledge
            .store
            .match_chunks(
                &vector,
                self.policy.similarity_threshold,
                self.policy.top_k,
            )
            .await?;
        debug!(matches = matches.len(), "knowledge base lookup");

        Ok(ContextBlock::from_matches(
            matches,
            self.policy.max_context_chars,
        ))
    }

    /// Like [`try_retrieve_context`](Self::try_retrieve_context), but a
    /// failed lookup is logged and treated as "no grounding available".
    pub async fn retrieve_context(&self, query: &str) -> Option<ContextBlock> {
        match self.try_retrieve_context(query).await {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "knowledge context lookup failed; answering without it");
                None
            }
        }
    }

    /// Assemble `[system, ...history, user]`.
    ///
    /// Only the most recent `policy.history_limit` turns are kept, in
    /// chronological order. Stored system turns are not replayed.
    pub fn build_transcript(
        &self,
        language: Language,
        context: Option<&ContextBlock>,
        history: &[Message],
        user_message: &str,
    ) -> Vec<ChatMessage> {
        let template = language.template();
        let mut system = template.system_prompt.to_string();
        if let Some(block) = context {
            system.push_str(&block.render(template.context_heading));
        }

        let turns: Vec<&Message> = history.iter().filter(|m| m.role != Role::System).collect();
        let skip = turns.len().saturating_sub(self.policy.history_limit);

        let mut messages = Vec::with_capacity(turns.len() - skip + 2);
        messages.push(ChatMessage::new(Role::System, system));
        messages.extend(
            turns[skip..]
                .iter()
                .map(|m| ChatMessage::new(m.role, m.content.clone())),
        );
        messages.push(ChatMessage::new(Role::User, user_message));
        messages
    }

    /// Produce the assistant's reply. Never fails and never returns an
    /// empty string.
    pub async fn respond(
        &self,
        user_message: &str,
        language: Language,
        history: &[Message],
    ) -> Reply {
        let context = self.retrieve_context(user_message).await;
        let grounded = context.is_some();
        let transcript = self.build_transcript(language, context.as_ref(), history, user_message);
        let template = language.template();

        match self.chat.complete(&transcript).await {
            Ok(text) if !text.trim().is_empty() => Reply {
                text,
                grounded,
                fallback: false,
            },
            Ok(_) => {
                warn!(model = self.chat.model_name(), "chat model returned no content");
                Reply {
                    text: template.empty_reply.to_string(),
                    grounded,
                    fallback: true,
                }
            }
            Err(e) => {
                let rate_limited = is_rate_limited(&e);
                warn!(
                    model = self.chat.model_name(),
                    error = %e,
                    rate_limited,
                    "chat generation failed; sending fallback reply"
                );
                Reply {
                    text: template.fallback(rate_limited).to_string(),
                    grounded,
                    fallback: true,
                }
            }
        }
    }
}

fn is_rate_limited(err: &Error) -> bool {
    match err {
        Error::Upstream { message, .. } => {
            message.contains("429") || message.to_lowercase().contains("rate limit")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use crate::store::memory::InMemoryKnowledgeStore;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Maps a text to a fixed vector by keyword.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("pricing") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::EmbeddingFailed("connection refused".into()))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KnowledgeStore for FailingStore {
        async fn insert_chunk(&self, _chunk: &Chunk, _embedding: &[f32]) -> Result<()> {
            Ok(())
        }
        async fn match_chunks(&self, _e: &[f32], _t: f32, _k: usize) -> Result<Vec<ChunkMatch>> {
            Err(Error::upstream("database", "rpc search_documents failed"))
        }
        async fn delete_chunks(&self, _document_id: &str) -> Result<u64> {
            Ok(0)
        }
        async fn count_chunks(&self, _document_id: &str) -> Result<u64> {
            Ok(0)
        }
    }

    /// Records the transcript and answers with a fixed outcome.
    struct ScriptedChat {
        outcome: std::result::Result<String, String>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedChat {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
        fn err(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }
        fn system_prompt(&self) -> String {
            self.seen.lock().unwrap()[0].content.clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            *self.seen.lock().unwrap() = messages.to_vec();
            self.outcome
                .clone()
                .map_err(|m| Error::upstream("chat", m))
        }
    }

    fn chunk(doc: &str, index: i64, text: &str) -> Chunk {
        Chunk {
            document_id: doc.to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn matched(text: &str, similarity: f32) -> ChunkMatch {
        ChunkMatch {
            document_id: "d".into(),
            chunk_index: 0,
            chunk_text: text.to_string(),
            similarity,
        }
    }

    fn message(role: Role, content: &str) -> Message {
        Message {
            id: content.to_string(),
            session_id: "s".into(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    async fn pricing_store() -> Arc<InMemoryKnowledgeStore> {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        store
            .insert_chunk(&chunk("d1", 0, "Consulting costs 49 EUR."), &[1.0, 0.0])
            .await
            .unwrap();
        store
            .insert_chunk(&chunk("d1", 1, "Office hours are 9-18."), &[0.0, 1.0])
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_context_block_orders_by_similarity() {
        let block = ContextBlock::from_matches(
            vec![matched("low", 0.71), matched("high", 0.95), matched("mid", 0.8)],
            10_000,
        )
        .unwrap();
        assert_eq!(block.text, ["high", "mid", "low"].join(CHUNK_SEPARATOR));
        assert_eq!(block.chunk_count, 3);
        assert!((block.top_similarity - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_context_block_empty_is_none() {
        assert!(ContextBlock::from_matches(Vec::new(), 100).is_none());
    }

    #[test]
    fn test_context_block_bounded_but_keeps_best() {
        let big = "x".repeat(50);
        let block = ContextBlock::from_matches(
            vec![matched(&big, 0.9), matched("small", 0.8)],
            20,
        )
        .unwrap();
        assert_eq!(block.chunk_count, 1);
        assert_eq!(block.text, big);
    }

    #[test]
    fn test_transcript_shape_and_history_bound() {
        let policy = RetrievalPolicy {
            history_limit: 2,
            ..RetrievalPolicy::default()
        };
        let assembler = Assembler::new(ScriptedChat::ok("hi"), policy);
        let history = vec![
            message(Role::User, "one"),
            message(Role::Assistant, "two"),
            message(Role::System, "internal"),
            message(Role::User, "three"),
        ];
        let t = assembler.build_transcript(Language::En, None, &history, "four");
        let contents: Vec<&str> = t.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(t[0].role, Role::System);
        assert_eq!(contents[1..], ["two", "three", "four"]);
        assert_eq!(t.last().unwrap().role, Role::User);
    }

    #[test]
    fn test_transcript_includes_delimited_context() {
        let assembler = Assembler::new(ScriptedChat::ok("hi"), RetrievalPolicy::default());
        let block = ContextBlock::from_matches(vec![matched("Fact A", 0.9)], 1000).unwrap();
        let t = assembler.build_transcript(Language::Pt, Some(&block), &[], "q");
        let system = &t[0].content;
        assert!(system.starts_with(Language::Pt.template().system_prompt));
        assert!(system.contains("\n\n---\nContexto adicional da base de conhecimento:\nFact A"));
    }

    #[tokio::test]
    async fn test_respond_grounded() {
        let chat = ScriptedChat::ok("It costs 49 EUR.");
        let assembler = Assembler::new(chat.clone(), RetrievalPolicy::default())
            .with_knowledge(Arc::new(KeywordEmbedder), pricing_store().await);

        let reply = assembler.respond("what is the pricing?", Language::En, &[]).await;
        assert_eq!(reply.text, "It costs 49 EUR.");
        assert!(reply.grounded);
        assert!(!reply.fallback);
        let system = chat.system_prompt();
        assert!(system.contains("Consulting costs 49 EUR."));
        assert!(!system.contains("Office hours"));
    }

    #[tokio::test]
    async fn test_respond_without_qualifying_chunks_is_ungrounded() {
        let chat = ScriptedChat::ok("Hello!");
        let policy = RetrievalPolicy {
            similarity_threshold: 0.99,
            ..RetrievalPolicy::default()
        };
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let assembler =
            Assembler::new(chat.clone(), policy).with_knowledge(Arc::new(KeywordEmbedder), store);

        let reply = assembler.respond("hello", Language::En, &[]).await;
        assert!(!reply.grounded);
        assert_eq!(chat.system_prompt(), Language::En.template().system_prompt);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_ungrounded_reply() {
        let chat = ScriptedChat::ok("Answer without docs");
        let assembler = Assembler::new(chat, RetrievalPolicy::default())
            .with_knowledge(Arc::new(KeywordEmbedder), Arc::new(FailingStore));

        let reply = assembler.respond("pricing", Language::Fr, &[]).await;
        assert_eq!(reply.text, "Answer without docs");
        assert!(!reply.grounded);
        assert!(!reply.fallback);
    }

    #[tokio::test]
    async fn test_embedder_failure_degrades_to_ungrounded_reply() {
        let chat = ScriptedChat::ok("ok");
        let assembler = Assembler::new(chat, RetrievalPolicy::default())
            .with_knowledge(Arc::new(FailingEmbedder), pricing_store().await);
        let reply = assembler.respond("pricing", Language::En, &[]).await;
        assert!(!reply.grounded);
        assert_eq!(reply.text, "ok");
    }

    #[tokio::test]
    async fn test_generation_failure_returns_language_fallback() {
        for lang in Language::ALL {
            let assembler = Assembler::new(ScriptedChat::err("timeout"), RetrievalPolicy::default())
                .with_knowledge(Arc::new(FailingEmbedder), Arc::new(FailingStore));
            let reply = assembler.respond("hi", lang, &[]).await;
            assert!(reply.fallback);
            assert_eq!(reply.text, lang.template().fallbacks[0]);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_uses_alternate_fallback() {
        let assembler = Assembler::new(
            ScriptedChat::err("HTTP 429 Too Many Requests"),
            RetrievalPolicy::default(),
        );
        let reply = assembler.respond("hi", Language::Es, &[]).await;
        assert_eq!(reply.text, Language::Es.template().fallbacks[1]);
    }

    #[tokio::test]
    async fn test_empty_completion_uses_empty_reply() {
        let assembler = Assembler::new(ScriptedChat::ok("   "), RetrievalPolicy::default());
        let reply = assembler.respond("hi", Language::Pt, &[]).await;
        assert_eq!(reply.text, Language::Pt.template().empty_reply);
        assert!(reply.fallback);
    }
}
