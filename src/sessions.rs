//! Session and message persistence.
//!
//! Messages are append-only. `message_count` counts user turns and is
//! bumped in the same transaction that inserts the user message.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::LazyLock;

use concierge_core::error::{Error, Result};
use concierge_core::models::{Document, Message, Report, Role, Session, SessionMode, SessionStatus};
use concierge_core::prompt::Language;

use crate::db::db_error;
use crate::documents;

const SESSION_COLUMNS: &str =
    "id, mode, status, language, started_at, ended_at, message_count, payment_id, metadata_json";

/// Parse a stored enum value; a bad value means a corrupt row.
fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let raw: String = row.get(column);
    raw.parse()
        .map_err(|e| Error::upstream("database", format!("column {}: {}", column, e)))
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let metadata: String = row.get("metadata_json");
    Ok(Session {
        id: row.get("id"),
        mode: parse_column(row, "mode")?,
        status: parse_column(row, "status")?,
        language: parse_column(row, "language")?,
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        message_count: row.get("message_count"),
        payment_id: row.get("payment_id"),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role: parse_column(row, "role")?,
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

fn report_from_row(row: &SqliteRow) -> Report {
    Report {
        id: row.get("id"),
        session_id: row.get("session_id"),
        url: row.get("url"),
        created_at: row.get("created_at"),
    }
}

fn session_not_found() -> Error {
    Error::not_found("Session not found")
}

// ============ Sessions ============

/// Start a free, active session with no messages.
pub async fn create(
    pool: &SqlitePool,
    language: Language,
    metadata: serde_json::Value,
) -> Result<Session> {
    let metadata = if metadata.is_null() {
        serde_json::json!({})
    } else {
        metadata
    };
    let id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO sessions (id, mode, status, language, started_at, message_count, metadata_json)
         VALUES (?, 'free', 'active', ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(language.as_str())
    .bind(Utc::now())
    .bind(metadata.to_string())
    .execute(pool)
    .await
    .map_err(db_error)?;

    get(pool, &id).await
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Session> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM sessions WHERE id = ?",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(db_error)?
    .ok_or_else(session_not_found)?;
    session_from_row(&row)
}

/// A session with everything attached to it.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub messages: Vec<Message>,
    pub documents: Vec<Document>,
    pub reports: Vec<Report>,
}

pub async fn get_detail(pool: &SqlitePool, id: &str) -> Result<SessionDetail> {
    let session = get(pool, id).await?;

    let messages = sqlx::query(
        "SELECT id, session_id, role, content, created_at FROM messages
         WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(db_error)?
    .iter()
    .map(message_from_row)
    .collect::<Result<Vec<_>>>()?;

    let documents = documents::list_for_session(pool, id).await?;

    let reports = sqlx::query(
        "SELECT id, session_id, url, created_at FROM reports
         WHERE session_id = ? ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(db_error)?
    .iter()
    .map(report_from_row)
    .collect();

    Ok(SessionDetail {
        session,
        messages,
        documents,
        reports,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub mode: Option<SessionMode>,
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub pagination: Pagination,
}

/// Sessions with at least one user message, newest first.
pub async fn list(pool: &SqlitePool, query: &ListQuery) -> Result<SessionPage> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let mut filter = String::from(
        "WHERE EXISTS (SELECT 1 FROM messages m WHERE m.session_id = s.id AND m.role = 'user')",
    );
    if query.mode.is_some() {
        filter.push_str(" AND s.mode = ?");
    }
    if query.status.is_some() {
        filter.push_str(" AND s.status = ?");
    }

    let count_sql = format!("SELECT COUNT(*) FROM sessions s {}", filter);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(mode) = query.mode {
        count_query = count_query.bind(mode.as_str());
    }
    if let Some(status) = query.status {
        count_query = count_query.bind(status.as_str());
    }
    let total = count_query.fetch_one(pool).await.map_err(db_error)?;

    let page_sql = format!(
        "SELECT {} FROM sessions s {} ORDER BY s.started_at DESC, s.rowid DESC LIMIT ? OFFSET ?",
        SESSION_COLUMNS, filter
    );
    let mut page_query = sqlx::query(&page_sql);
    if let Some(mode) = query.mode {
        page_query = page_query.bind(mode.as_str());
    }
    if let Some(status) = query.status {
        page_query = page_query.bind(status.as_str());
    }
    let rows = page_query
        .bind(limit)
        .bind((page - 1).saturating_mul(limit))
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in &rows {
        let session = session_from_row(row)?;
        let early: Vec<String> = sqlx::query_scalar(
            "SELECT content FROM messages WHERE session_id = ? AND role = 'user'
             ORDER BY created_at ASC, rowid ASC LIMIT 5",
        )
        .bind(&session.id)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;
        sessions.push(SessionSummary {
            user_name: extract_user_name(&early),
            session,
        });
    }

    Ok(SessionPage {
        sessions,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    })
}

#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub mode: Option<SessionMode>,
    pub payment_id: Option<String>,
}

/// Apply the given fields. Moving to `ended` stamps `ended_at` once;
/// moving back to `active` clears it.
pub async fn update(pool: &SqlitePool, id: &str, update: &SessionUpdate) -> Result<Session> {
    if update.status.is_none() && update.mode.is_none() && update.payment_id.is_none() {
        return Err(Error::validation("No fields to update"));
    }
    let current = get(pool, id).await?;

    let status = update.status.unwrap_or(current.status);
    let mode = update.mode.unwrap_or(current.mode);
    let payment_id = update.payment_id.clone().or(current.payment_id);
    let ended_at: Option<DateTime<Utc>> = match status {
        SessionStatus::Ended => current.ended_at.or_else(|| Some(Utc::now())),
        SessionStatus::Active => None,
    };

    sqlx::query(
        "UPDATE sessions SET status = ?, mode = ?, payment_id = ?, ended_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(mode.as_str())
    .bind(&payment_id)
    .bind(ended_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(db_error)?;

    get(pool, id).await
}

pub async fn end(pool: &SqlitePool, id: &str) -> Result<Session> {
    let update = SessionUpdate {
        status: Some(SessionStatus::Ended),
        ..SessionUpdate::default()
    };
    self::update(pool, id, &update).await
}

// ============ Messages ============

/// Insert a message. A user message also increments `message_count`;
/// both writes commit together.
pub async fn append_message(
    pool: &SqlitePool,
    session_id: &str,
    role: Role,
    content: &str,
) -> Result<Message> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    let mut tx = pool.begin().await.map_err(db_error)?;

    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
    if exists.is_none() {
        return Err(session_not_found());
    }

    sqlx::query(
        "INSERT INTO messages (id, session_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(session_id)
    .bind(role.as_str())
    .bind(content)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(db_error)?;

    if role == Role::User {
        sqlx::query("UPDATE sessions SET message_count = message_count + 1 WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
    }

    tx.commit().await.map_err(db_error)?;

    Ok(Message {
        id,
        session_id: session_id.to_string(),
        role,
        content: content.to_string(),
        created_at: now,
    })
}

/// The last `limit` messages of a session, oldest first.
pub async fn recent_history(pool: &SqlitePool, session_id: &str, limit: usize) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        "SELECT id, session_id, role, content, created_at FROM messages
         WHERE session_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(session_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    let mut messages = rows
        .iter()
        .map(message_from_row)
        .collect::<Result<Vec<_>>>()?;
    messages.reverse();
    Ok(messages)
}

pub async fn count_messages(pool: &SqlitePool, session_id: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await
        .map_err(db_error)
}

// ============ Linked documents and reports ============

pub async fn link_document(pool: &SqlitePool, session_id: &str, document_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO session_documents (session_id, document_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(session_id)
    .bind(document_id)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(db_error)?;
    Ok(())
}

pub async fn insert_report(pool: &SqlitePool, session_id: &str, url: &str) -> Result<Report> {
    let report = Report {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        url: url.to_string(),
        created_at: Utc::now(),
    };
    sqlx::query("INSERT INTO reports (id, session_id, url, created_at) VALUES (?, ?, ?, ?)")
        .bind(&report.id)
        .bind(&report.session_id)
        .bind(&report.url)
        .bind(report.created_at)
        .execute(pool)
        .await
        .map_err(db_error)?;
    Ok(report)
}

// ============ User name heuristic ============

static GREETING_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(olá|oi|hello|hi|hey|bom dia|boa tarde|boa noite|me chamo|meu nome é|i am|i'm|my name is|je suis|je m'appelle|me llamo|soy)\b",
    )
    .expect("valid greeting regex")
});

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:me chamo|meu nome é|o meu nome é|sou o|sou a|chamo-me)\s+([a-zà-ÿ\s]{2,30})",
        r"(?:my name is|i am|i'm|call me)\s+([a-z\s]{2,30})",
        r"(?:je m'appelle|je suis)\s+([a-zà-ÿ\s]{2,30})",
        r"(?:me llamo|mi nombre es|soy)\s+([a-zà-ÿ\s]{2,30})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid name regex"))
    .collect()
});

fn title_case(words: &str) -> String {
    words
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn plausible(name: &str) -> bool {
    let len = name.chars().count();
    len > 1 && len < 30
}

/// Best-effort display name from a session's first user messages.
///
/// A short first message is read as a bare name (after stripping a
/// greeting); otherwise the messages are scanned for introductions such
/// as "my name is" or "me chamo". At most two words are kept.
pub fn extract_user_name(messages: &[String]) -> Option<String> {
    let first = messages.first()?.trim();

    if first.chars().count() < 50 && first.split(' ').count() <= 3 {
        let stripped = GREETING_PREFIX.replace(first, "");
        let cleaned: String = stripped
            .chars()
            .filter(|c| !matches!(c, '.' | ',' | '!' | '?'))
            .collect();
        let cleaned = cleaned.trim();
        if plausible(cleaned) {
            return Some(title_case(cleaned));
        }
    }

    for message in messages {
        let lowered = message.to_lowercase();
        for pattern in NAME_PATTERNS.iter() {
            let Some(captured) = pattern.captures(&lowered).and_then(|c| c.get(1)) else {
                continue;
            };
            let words: Vec<&str> = captured.as_str().split_whitespace().take(2).collect();
            let name = title_case(&words.join(" "));
            if plausible(&name) {
                return Some(name);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_create_defaults() {
        let (_tmp, pool) = test_pool().await;
        let session = create(&pool, Language::En, serde_json::Value::Null).await.unwrap();
        assert_eq!(session.mode, SessionMode::Free);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.language, Language::En);
        assert_eq!(session.message_count, 0);
        assert!(session.ended_at.is_none());
        assert_eq!(session.metadata, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_tmp, pool) = test_pool().await;
        let err = get(&pool, "nope").await.unwrap_err();
        assert_eq!(err.kind(), concierge_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_append_counts_user_turns() {
        let (_tmp, pool) = test_pool().await;
        let session = create(&pool, Language::Pt, serde_json::json!({})).await.unwrap();

        append_message(&pool, &session.id, Role::User, "olá").await.unwrap();
        append_message(&pool, &session.id, Role::Assistant, "Olá! Como posso ajudar?")
            .await
            .unwrap();

        let session = get(&pool, &session.id).await.unwrap();
        assert_eq!(session.message_count, 1);
        assert_eq!(count_messages(&pool, &session.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_to_missing_session_writes_nothing() {
        let (_tmp, pool) = test_pool().await;
        let err = append_message(&pool, "missing", Role::User, "hi").await.unwrap_err();
        assert_eq!(err.kind(), concierge_core::ErrorKind::NotFound);
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_recent_history_is_latest_in_order() {
        let (_tmp, pool) = test_pool().await;
        let session = create(&pool, Language::En, serde_json::json!({})).await.unwrap();
        for i in 0..5 {
            append_message(&pool, &session.id, Role::User, &format!("m{}", i))
                .await
                .unwrap();
        }
        let history = recent_history(&pool, &session.id, 3).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_update_and_end() {
        let (_tmp, pool) = test_pool().await;
        let session = create(&pool, Language::Fr, serde_json::json!({})).await.unwrap();

        let paid = update(
            &pool,
            &session.id,
            &SessionUpdate {
                mode: Some(SessionMode::Paid),
                payment_id: Some("cs_test_1".into()),
                ..SessionUpdate::default()
            },
        )
        .await
        .unwrap();
        assert!(paid.is_paid());
        assert_eq!(paid.payment_id.as_deref(), Some("cs_test_1"));

        let ended = end(&pool, &session.id).await.unwrap();
        assert!(ended.is_ended());
        assert!(ended.ended_at.is_some());
        assert!(ended.is_paid());

        assert!(update(&pool, &session.id, &SessionUpdate::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_list_only_sessions_with_user_messages() {
        let (_tmp, pool) = test_pool().await;
        let silent = create(&pool, Language::Pt, serde_json::json!({})).await.unwrap();
        let chatty = create(&pool, Language::Pt, serde_json::json!({})).await.unwrap();
        append_message(&pool, &silent.id, Role::Assistant, "Olá!").await.unwrap();
        append_message(&pool, &chatty.id, Role::User, "Me chamo joão silva").await.unwrap();

        let page = list(&pool, &ListQuery::default()).await.unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session.id, chatty.id);
        assert_eq!(page.sessions[0].user_name.as_deref(), Some("João Silva"));
        assert_eq!(
            page.pagination,
            Pagination {
                page: 1,
                limit: 20,
                total: 1,
                total_pages: 1
            }
        );

        let paid_only = list(
            &pool,
            &ListQuery {
                mode: Some(SessionMode::Paid),
                ..ListQuery::default()
            },
        )
        .await
        .unwrap();
        assert!(paid_only.sessions.is_empty());
        assert_eq!(paid_only.pagination.total, 0);
    }

    #[tokio::test]
    async fn test_list_page_past_the_end_is_empty() {
        let (_tmp, pool) = test_pool().await;
        let session = create(&pool, Language::En, serde_json::json!({})).await.unwrap();
        append_message(&pool, &session.id, Role::User, "hello").await.unwrap();

        let page = list(
            &pool,
            &ListQuery {
                page: Some(i64::MAX),
                limit: Some(100),
                ..ListQuery::default()
            },
        )
        .await
        .unwrap();
        assert!(page.sessions.is_empty());
        assert_eq!(page.pagination.page, i64::MAX);
        assert_eq!(page.pagination.total, 1);
    }

    #[test]
    fn test_user_name_from_short_first_message() {
        assert_eq!(extract_user_name(&["carlos".into()]), Some("Carlos".into()));
        assert_eq!(extract_user_name(&["Olá, Ana!".into()]), Some("Ana".into()));
        assert_eq!(extract_user_name(&["Hello".into()]), None);
    }

    #[test]
    fn test_user_name_from_introduction() {
        let messages = vec![
            "I would like to know more about your consulting packages please".to_string(),
            "By the way my name is sarah connor and I run a startup".to_string(),
        ];
        assert_eq!(extract_user_name(&messages), Some("Sarah Connor".into()));
    }

    #[test]
    fn test_user_name_absent() {
        let messages = vec!["I need information about funding for my company".to_string()];
        assert_eq!(extract_user_name(&messages), None);
        assert_eq!(extract_user_name(&[]), None);
    }

    #[test]
    fn test_greeting_needs_word_boundary() {
        assert_eq!(extract_user_name(&["Hilda".into()]), Some("Hilda".into()));
    }
}
