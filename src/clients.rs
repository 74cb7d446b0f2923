//! Explicit registry of external clients.
//!
//! [`Clients`] is built once at startup and shared by every request
//! handler and CLI command. Each accessor creates its client on first use
//! and returns the same instance afterwards. Tests replace any client with
//! the `with_*` builders before the first access.

use std::sync::{Arc, OnceLock};

use sqlx::SqlitePool;

use concierge_core::chunk::ChunkConfig;
use concierge_core::embedding::Embedder;
use concierge_core::retrieval::{Assembler, ChatModel};
use concierge_core::store::KnowledgeStore;

use crate::billing::{PaymentGateway, StripeGateway};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::create_chat;
use crate::sqlite_store::SqliteKnowledgeStore;
use crate::storage::{BlobStore, FsBlobStore};

/// API keys read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
}

impl Secrets {
    /// `OPENAI_API_KEY`, `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`.
    /// Empty values count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            stripe_secret_key: var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
        }
    }
}

pub struct Clients {
    config: Arc<Config>,
    secrets: Secrets,
    pool: SqlitePool,
    chunking: ChunkConfig,
    embedder: OnceLock<Arc<dyn Embedder>>,
    chat: OnceLock<Arc<dyn ChatModel>>,
    knowledge: OnceLock<Arc<dyn KnowledgeStore>>,
    blobs: OnceLock<Arc<dyn BlobStore>>,
    payments: OnceLock<Option<Arc<dyn PaymentGateway>>>,
}

impl Clients {
    pub fn new(config: Arc<Config>, pool: SqlitePool, secrets: Secrets) -> anyhow::Result<Self> {
        let chunking = config.chunking.chunk_config()?;
        Ok(Self {
            config,
            secrets,
            pool,
            chunking,
            embedder: OnceLock::new(),
            chat: OnceLock::new(),
            knowledge: OnceLock::new(),
            blobs: OnceLock::new(),
            payments: OnceLock::new(),
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = OnceLock::from(embedder);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = OnceLock::from(chat);
        self
    }

    pub fn with_knowledge_store(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = OnceLock::from(store);
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = OnceLock::from(blobs);
        self
    }

    pub fn with_payments(mut self, payments: Option<Arc<dyn PaymentGateway>>) -> Self {
        self.payments = OnceLock::from(payments);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn chunking(&self) -> &ChunkConfig {
        &self.chunking
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder
            .get_or_init(|| {
                Arc::from(create_embedder(
                    &self.config.embedding,
                    self.secrets.openai_api_key.clone(),
                ))
            })
            .clone()
    }

    pub fn chat(&self) -> Arc<dyn ChatModel> {
        self.chat
            .get_or_init(|| {
                Arc::from(create_chat(
                    &self.config.chat,
                    self.secrets.openai_api_key.clone(),
                ))
            })
            .clone()
    }

    pub fn knowledge(&self) -> Arc<dyn KnowledgeStore> {
        self.knowledge
            .get_or_init(|| {
                Arc::new(SqliteKnowledgeStore::new(
                    self.pool.clone(),
                    self.config.embedding.model.clone(),
                ))
            })
            .clone()
    }

    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        self.blobs
            .get_or_init(|| Arc::new(FsBlobStore::new(&self.config.storage)))
            .clone()
    }

    /// `None` when no payment provider key is configured.
    pub fn payments(&self) -> Option<Arc<dyn PaymentGateway>> {
        self.payments
            .get_or_init(|| {
                let key = self.secrets.stripe_secret_key.clone()?;
                match StripeGateway::new(&self.config, key) {
                    Ok(gateway) => Some(Arc::new(gateway) as Arc<dyn PaymentGateway>),
                    Err(e) => {
                        tracing::error!(error = %e, "could not build payment client");
                        None
                    }
                }
            })
            .clone()
    }

    /// A prompt assembler wired to the current chat model and knowledge
    /// base. Without a working embedder replies are never grounded.
    pub fn assembler(&self) -> Assembler {
        let assembler = Assembler::new(self.chat(), self.config.retrieval.policy());
        let embedder = self.embedder();
        if embedder.dims() == 0 {
            return assembler;
        }
        assembler.with_knowledge(embedder, self.knowledge())
    }
}
