//! Error taxonomy shared by the core and the application crate.
//!
//! Four families of failure reach a caller: the request was malformed
//! ([`Error::Validation`]), something it referenced does not exist
//! ([`Error::NotFound`]), the action is not allowed for the current state
//! of the session ([`Error::BusinessRule`]), or an external service failed
//! ([`Error::EmbeddingFailed`], [`Error::Upstream`]).
//!
//! Which of these surface to the end user and which degrade silently is a
//! policy decision of the caller: the prompt assembler swallows upstream
//! failures, the ingestion pipeline skips a chunk whose embedding failed,
//! and the HTTP layer maps everything else to a status code.

use thiserror::Error;

/// Coarse classification of an [`Error`], used for matching and for
/// HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    BusinessRule,
    EmbeddingFailed,
    Upstream,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BusinessRule(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("{service} error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::BusinessRule(_) => ErrorKind::BusinessRule,
            Error::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            Error::Upstream { .. } => ErrorKind::Upstream,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn business_rule(message: impl Into<String>) -> Self {
        Error::BusinessRule(message.into())
    }

    pub fn upstream(service: &'static str, message: impl std::fmt::Display) -> Self {
        Error::Upstream {
            service,
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::business_rule("x").kind(), ErrorKind::BusinessRule);
        assert_eq!(
            Error::EmbeddingFailed("x".into()).kind(),
            ErrorKind::EmbeddingFailed
        );
        assert_eq!(Error::upstream("database", "x").kind(), ErrorKind::Upstream);
    }

    #[test]
    fn upstream_message_names_service() {
        let err = Error::upstream("storage", "disk full");
        assert_eq!(err.to_string(), "storage error: disk full");
    }
}
