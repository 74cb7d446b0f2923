//! Core data models shared by the ingestion, retrieval, and session layers.
//!
//! Every closed set of states is an enum that serializes to the lowercase
//! string stored in the database and returned over HTTP, and parses back
//! from the same string via [`FromStr`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::prompt::Language;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::validation(format!(
                        concat!("invalid ", stringify!($name), ": '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Lifecycle of a document. Archived documents keep their chunks but are
/// excluded from retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Active,
    Archived,
}

string_enum!(DocumentStatus {
    Active => "active",
    Archived => "archived",
});

/// Whether a document feeds the shared knowledge base or belongs to a
/// single paid session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    KnowledgeBase,
    UserUpload,
}

string_enum!(DocumentType {
    KnowledgeBase => "knowledge_base",
    UserUpload => "user_upload",
});

impl DocumentType {
    /// Storage bucket holding the original upload.
    pub fn bucket(&self) -> &'static str {
        match self {
            DocumentType::KnowledgeBase => "knowledge-base",
            DocumentType::UserUpload => "user-uploads",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Free,
    Paid,
}

string_enum!(SessionMode {
    Free => "free",
    Paid => "paid",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

string_enum!(SessionStatus {
    Active => "active",
    Ended => "ended",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

string_enum!(Role {
    User => "user",
    Assistant => "assistant",
    System => "system",
});

/// An uploaded file and its extracted text.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    /// Public URL of the stored original.
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub document_type: DocumentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One window of a knowledge-base document, ready to be embedded.
///
/// `chunk_index` values for a document are contiguous from 0 in source order.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk returned by a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    pub document_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub similarity: f32,
}

/// One end-user conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub language: Language,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub payment_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl Session {
    pub fn is_paid(&self) -> bool {
        self.mode == SessionMode::Paid
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }
}

/// A single conversation turn. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A generated session report stored in the `reports` bucket.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: String,
    pub session_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}
