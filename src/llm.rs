//! Chat-completion backends for the prompt assembler.
//!
//! [`OpenAiChat`] calls `POST /v1/chat/completions`. [`DisabledChat`]
//! always fails, which the assembler turns into the language's fallback
//! reply; this is how a deployment without an API key behaves.

use async_trait::async_trait;
use tracing::warn;

use concierge_core::error::{Error, Result};
use concierge_core::retrieval::{ChatMessage, ChatModel};

use crate::config::ChatConfig;
use crate::openai::{OpenAiClient, OpenAiError};

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(Error::upstream("chat", "chat provider is disabled"))
    }
}

pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig, api_key: String) -> Result<Self> {
        // Generation is never retried; a failed turn gets a fallback reply.
        let client = OpenAiClient::new(api_key, &config.base_url, config.timeout_secs, 0)
            .map_err(|e| Error::upstream("openai", e))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let json = self
            .client
            .post_json("chat/completions", &body)
            .await
            .map_err(|e| Error::upstream("openai", e))?;
        parse_completion(&json).map_err(|e| Error::upstream("openai", e))
    }
}

/// `choices[0].message.content`, or an empty string when the model
/// returned no content.
fn parse_completion(json: &serde_json::Value) -> Result<String, OpenAiError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| OpenAiError::InvalidResponse("missing choices".to_string()))?;

    Ok(choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string())
}

pub fn create_chat(config: &ChatConfig, api_key: Option<String>) -> Box<dyn ChatModel> {
    if !config.is_enabled() {
        return Box::new(DisabledChat);
    }
    let Some(api_key) = api_key else {
        warn!("OPENAI_API_KEY not set; chat replies will use fallback messages");
        return Box::new(DisabledChat);
    };
    match OpenAiChat::new(config, api_key) {
        Ok(chat) => Box::new(chat),
        Err(e) => {
            warn!(error = %e, "could not build OpenAI chat client; using fallback replies");
            Box::new(DisabledChat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::models::Role;

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Olá!"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Olá!");
    }

    #[test]
    fn test_parse_completion_null_content_is_empty() {
        let json = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(parse_completion(&json).unwrap(), "");
        assert!(parse_completion(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_messages_serialize_as_openai_roles() {
        let messages = vec![
            ChatMessage::new(Role::System, "sys"),
            ChatMessage::new(Role::User, "hi"),
        ];
        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["content"], "hi");
    }

    #[tokio::test]
    async fn test_disabled_chat_fails() {
        assert!(DisabledChat.complete(&[]).await.is_err());
        let chat = create_chat(&ChatConfig::default(), None);
        assert_eq!(chat.model_name(), "disabled");
    }
}
