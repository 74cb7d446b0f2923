//! One chat turn: gate, persist the user message, generate, persist the
//! reply.

use serde::Serialize;

use concierge_core::error::{Error, Result};
use concierge_core::models::{Message, Role};

use crate::clients::Clients;
use crate::sessions;

pub const MAX_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Serialize)]
pub struct ChatTurn {
    /// The stored assistant message; `None` when an upgrade is required.
    pub message: Option<Message>,
    pub upgrade_required: bool,
    /// User turns left before a free session must upgrade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_messages: Option<i64>,
}

/// Submit a user message to a session and return the assistant's reply.
///
/// A free session at its message limit gets `upgrade_required` and no
/// rows are written. Generation failures never surface here; the
/// assembler substitutes a fallback reply.
pub async fn submit(clients: &Clients, session_id: &str, message: &str) -> Result<ChatTurn> {
    let len = message.chars().count();
    if len == 0 || message.trim().is_empty() {
        return Err(Error::validation("message must not be empty"));
    }
    if len > MAX_MESSAGE_CHARS {
        return Err(Error::validation(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let pool = clients.pool();
    let session = sessions::get(pool, session_id).await?;
    if session.is_ended() {
        return Err(Error::validation("Session has ended"));
    }

    let limit = clients.config().billing.free_message_limit;
    if !session.is_paid() && session.message_count >= limit {
        return Ok(ChatTurn {
            message: None,
            upgrade_required: true,
            remaining_messages: Some(0),
        });
    }

    let history_limit = clients.config().retrieval.history_limit;
    let history = sessions::recent_history(pool, &session.id, history_limit).await?;

    sessions::append_message(pool, &session.id, Role::User, message).await?;

    let reply = clients
        .assembler()
        .respond(message, session.language, &history)
        .await;

    let stored = sessions::append_message(pool, &session.id, Role::Assistant, &reply.text).await?;

    let remaining_messages = if session.is_paid() {
        None
    } else {
        Some((limit - session.message_count - 1).max(0))
    };

    Ok(ChatTurn {
        message: Some(stored),
        upgrade_required: false,
        remaining_messages,
    })
}
