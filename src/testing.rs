//! Fakes and fixtures shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use concierge_core::embedding::Embedder;
use concierge_core::error::{Error, Result};
use concierge_core::retrieval::{ChatMessage, ChatModel};

use crate::billing::{CheckoutSession, PaymentGateway};
use crate::clients::{Clients, Secrets};
use crate::config::Config;

/// Two-dimensional embeddings: texts mentioning "pricing" point one way,
/// everything else the other.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.to_lowercase().contains("pricing") {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.0, 1.0])
        }
    }
}

/// Fails every `n`-th call (1-based), succeeds otherwise.
pub struct FailingEveryNth {
    n: usize,
    calls: AtomicUsize,
}

impl FailingEveryNth {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FailingEveryNth {
    fn model_name(&self) -> &str {
        "flaky"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.n == 0 {
            Err(Error::EmbeddingFailed("HTTP 500".into()))
        } else {
            Ok(vec![0.0, 1.0])
        }
    }
}

/// Replies with a fixed text and records the last transcript.
pub struct ScriptedChat {
    reply: String,
    pub seen: Mutex<Vec<ChatMessage>>,
}

impl ScriptedChat {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        *self.seen.lock().unwrap() = messages.to_vec();
        Ok(self.reply.clone())
    }
}

/// Returns a predictable checkout for any session.
pub struct FakeGateway;

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(&self, session_id: &str) -> Result<CheckoutSession> {
        Ok(CheckoutSession {
            id: format!("cs_test_{}", session_id),
            url: format!("https://checkout.example/{}", session_id),
        })
    }
}

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn test_config(tmp: &TempDir, extra: &str) -> Config {
    let toml = format!(
        r#"
[db]
path = "{db}"

[storage]
root = "{files}"
public_base_url = "http://localhost:7331/files"

[uploads]
max_bytes = 1048576

[server]
bind = "127.0.0.1:0"
{extra}
"#,
        db = tmp.path().join("test.sqlite").display(),
        files = tmp.path().join("files").display(),
        extra = extra,
    );
    toml::from_str(&toml).unwrap()
}

/// Clients over a fresh database with a keyword embedder, a scripted chat
/// model, no payment gateway, and the webhook secret set. `customize`
/// may replace any of them.
pub async fn test_clients(customize: impl FnOnce(Clients) -> Clients) -> (TempDir, Clients) {
    test_clients_with_config("", customize).await
}

pub async fn test_clients_with_config(
    extra_toml: &str,
    customize: impl FnOnce(Clients) -> Clients,
) -> (TempDir, Clients) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, extra_toml);
    let pool = crate::db::connect(&config).await.unwrap();
    crate::migrate::apply(&pool).await.unwrap();

    let secrets = Secrets {
        stripe_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        ..Secrets::default()
    };
    let clients = Clients::new(Arc::new(config), pool, secrets)
        .unwrap()
        .with_embedder(Arc::new(KeywordEmbedder))
        .with_chat(Arc::new(ScriptedChat::new("Assistant reply")))
        .with_payments(None);
    (tmp, customize(clients))
}
