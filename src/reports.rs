//! Session reports for paid sessions.
//!
//! A report is a plain-text transcript stored in the `reports` bucket.
//! Generating one ends the session.

use chrono::{DateTime, Utc};
use tracing::info;

use concierge_core::error::{Error, Result};
use concierge_core::models::{Message, Report, Role, Session};
use concierge_core::prompt::Language;

use crate::clients::Clients;
use crate::sessions;
use crate::storage::REPORTS_BUCKET;

struct Labels {
    title: &'static str,
    session: &'static str,
    started: &'static str,
    user: &'static str,
    assistant: &'static str,
}

fn labels(language: Language) -> Labels {
    match language {
        Language::Pt => Labels {
            title: "Relatório da sessão",
            session: "Sessão",
            started: "Início",
            user: "Utilizador",
            assistant: "Assistente",
        },
        Language::En => Labels {
            title: "Session report",
            session: "Session",
            started: "Started",
            user: "User",
            assistant: "Assistant",
        },
        Language::Fr => Labels {
            title: "Rapport de session",
            session: "Session",
            started: "Début",
            user: "Utilisateur",
            assistant: "Assistant",
        },
        Language::Es => Labels {
            title: "Informe de la sesión",
            session: "Sesión",
            started: "Inicio",
            user: "Usuario",
            assistant: "Asistente",
        },
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Render a transcript. System turns are omitted.
pub fn render_transcript(session: &Session, messages: &[Message]) -> String {
    let l = labels(session.language);
    let mut out = format!(
        "{}\n{}: {}\n{}: {}\n\n",
        l.title,
        l.session,
        session.id,
        l.started,
        timestamp(session.started_at)
    );

    for message in messages {
        let speaker = match message.role {
            Role::User => l.user,
            Role::Assistant => l.assistant,
            Role::System => continue,
        };
        out.push_str(&format!(
            "[{}] {}:\n{}\n\n",
            timestamp(message.created_at),
            speaker,
            message.content.trim()
        ));
    }
    out
}

/// Generate, store, and record a report, then end the session.
pub async fn generate(clients: &Clients, session_id: &str) -> Result<Report> {
    let pool = clients.pool();
    let detail = sessions::get_detail(pool, session_id).await?;
    if !detail.session.is_paid() {
        return Err(Error::business_rule(
            "Reports are only available for paid sessions",
        ));
    }

    let body = render_transcript(&detail.session, &detail.messages);
    let key = format!(
        "{}-{}.txt",
        detail.session.id,
        Utc::now().format("%Y%m%d%H%M%S%3f")
    );
    let url = clients
        .blobs()
        .put(REPORTS_BUCKET, &key, body.as_bytes())
        .await?;

    let report = sessions::insert_report(pool, &detail.session.id, &url).await?;
    sessions::end(pool, &detail.session.id).await?;

    info!(session_id = %detail.session.id, report_id = %report.id, "report generated");
    Ok(report)
}
