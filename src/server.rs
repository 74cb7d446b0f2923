//! HTTP API for the chat widget and the admin dashboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/sessions` | Start a session |
//! | `GET`  | `/api/sessions` | Paginated session list |
//! | `GET`  | `/api/sessions/{id}` | Session with messages, documents, reports |
//! | `PATCH`| `/api/sessions/{id}` | Update status, mode, or payment id |
//! | `POST` | `/api/sessions/{id}/end` | End a session |
//! | `POST` | `/api/chat` | Submit one user message |
//! | `POST` | `/api/documents/upload` | Multipart upload into the pipeline |
//! | `GET`  | `/api/documents` | List documents (`?status=&type=`) |
//! | `GET`  | `/api/documents/{id}` | One document with its text |
//! | `PATCH`| `/api/documents/{id}` | Update title, description, status |
//! | `DELETE`| `/api/documents/{id}` | Archive, or remove with `?permanent=true` |
//! | `POST` | `/api/reports/generate` | Report for a paid session |
//! | `POST` | `/api/stripe/checkout` | Start checkout for a session |
//! | `POST` | `/api/webhooks/stripe` | Signed payment events |
//! | `GET`  | `/files/{bucket}/{key}` | Stored originals and reports |
//!
//! # Error Contract
//!
//! Every failure is `{ "error": "<message>" }` with a status derived from the
//! error kind: validation 400, business rule 403, not found 404, upstream
//! 500, payments unconfigured 503.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the widget is embedded
//! in third-party pages.

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use concierge_core::error::{Error, ErrorKind};
use concierge_core::models::{DocumentStatus, DocumentType, SessionMode, SessionStatus};
use concierge_core::prompt::Language;

use crate::billing::{self, verify_signature};
use crate::chat;
use crate::clients::{Clients, Secrets};
use crate::config::Config;
use crate::documents::{self, DocumentUpdate};
use crate::extract::mime_from_path;
use crate::ingest::{self, Upload};
use crate::reports;
use crate::sessions::{self, ListQuery, SessionUpdate};
use crate::storage::content_type_for_key;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    clients: Arc<Clients>,
}

impl AppState {
    pub fn new(clients: Clients) -> Self {
        Self {
            clients: Arc::new(clients),
        }
    }
}

/// Starts the HTTP server.
///
/// Opens the database, applies migrations, and binds to `[server].bind`.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = crate::db::connect(config).await?;
    crate::migrate::apply(&pool).await?;

    let clients = Clients::new(Arc::new(config.clone()), pool, Secrets::from_env())?;
    if clients.payments().is_none() {
        warn!("STRIPE_SECRET_KEY not set; checkout will answer 503");
    }
    let app = router(AppState::new(clients));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Concierge listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the router with every route, CORS, and the body limit.
pub fn router(state: AppState) -> Router {
    let body_limit = state.clients.config().uploads.max_bytes + 1024 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/sessions",
            post(handle_create_session).get(handle_list_sessions),
        )
        .route(
            "/api/sessions/{id}",
            get(handle_get_session).patch(handle_update_session),
        )
        .route("/api/sessions/{id}/end", post(handle_end_session))
        .route("/api/chat", post(handle_chat))
        .route("/api/documents/upload", post(handle_upload))
        .route("/api/documents", get(handle_list_documents))
        .route(
            "/api/documents/{id}",
            get(handle_get_document)
                .patch(handle_update_document)
                .delete(handle_delete_document),
        )
        .route("/api/reports/generate", post(handle_generate_report))
        .route("/api/stripe/checkout", post(handle_checkout))
        .route("/api/webhooks/stripe", post(handle_stripe_webhook))
        .route("/files/{bucket}/{key}", get(handle_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BusinessRule => StatusCode::FORBIDDEN,
            ErrorKind::EmbeddingFailed | ErrorKind::Upstream => {
                error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

/// Constructs a 503 error for features without configured credentials.
fn service_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: message.into(),
    }
}

/// Unwraps a JSON body, reporting malformed input in the error contract.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

/// Unwraps query parameters, reporting bad values in the error contract.
fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    params
        .map(|Query(params)| params)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

/// Unwraps path segments, reporting bad values in the error contract.
fn path_params<T>(params: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    params
        .map(|Path(params)| params)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn parse_uuid(value: &str, field: &str) -> Result<String, AppError> {
    uuid::Uuid::parse_str(value)
        .map(|id| id.to_string())
        .map_err(|_| bad_request(format!("Invalid {}", field)))
}

fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr<Err = Error>,
{
    value
        .filter(|v| !v.is_empty())
        .map(str::parse)
        .transpose()
        .map_err(AppError::from)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Sessions ============

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    language: Option<String>,
    metadata: Option<Value>,
}

/// Handler for `POST /api/sessions`.
///
/// The body is optional; an empty body starts a Portuguese session with
/// no metadata.
async fn handle_create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("Invalid JSON: {}", e)))?
    };
    let language = parse_opt::<Language>(request.language.as_deref())?.unwrap_or_default();
    let metadata = request.metadata.unwrap_or_else(|| json!({}));

    let session = sessions::create(state.clients.pool(), language, metadata).await?;
    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

#[derive(Deserialize)]
struct ListSessionsParams {
    page: Option<i64>,
    limit: Option<i64>,
    mode: Option<String>,
    status: Option<String>,
}

/// Handler for `GET /api/sessions`.
async fn handle_list_sessions(
    State(state): State<AppState>,
    params: Result<Query<ListSessionsParams>, QueryRejection>,
) -> Result<Json<sessions::SessionPage>, AppError> {
    let params = query_params(params)?;
    let query = ListQuery {
        page: params.page,
        limit: params.limit,
        mode: parse_opt::<SessionMode>(params.mode.as_deref())?,
        status: parse_opt::<SessionStatus>(params.status.as_deref())?,
    };
    Ok(Json(sessions::list(state.clients.pool(), &query).await?))
}

/// Handler for `GET /api/sessions/{id}`.
async fn handle_get_session(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<sessions::SessionDetail>, AppError> {
    let id = path_params(id)?;
    Ok(Json(sessions::get_detail(state.clients.pool(), &id).await?))
}

#[derive(Deserialize)]
struct UpdateSessionRequest {
    status: Option<SessionStatus>,
    mode: Option<SessionMode>,
    payment_id: Option<String>,
}

/// Handler for `PATCH /api/sessions/{id}`.
async fn handle_update_session(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateSessionRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_params(id)?;
    let request = json_body(payload)?;
    let update = SessionUpdate {
        status: request.status,
        mode: request.mode,
        payment_id: request.payment_id,
    };
    let session = sessions::update(state.clients.pool(), &id, &update).await?;
    Ok(Json(json!({ "session": session })))
}

/// Handler for `POST /api/sessions/{id}/end`.
async fn handle_end_session(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_params(id)?;
    let session = sessions::end(state.clients.pool(), &id).await?;
    Ok(Json(json!({ "session": session })))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

/// Handler for `POST /api/chat`.
///
/// Generation failures still answer 200 with a fallback reply.
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<chat::ChatTurn>, AppError> {
    let request = json_body(payload)?;
    let session_id = parse_uuid(&request.session_id, "session_id")?;
    let turn = chat::submit(&state.clients, &session_id, &request.message).await?;
    Ok(Json(turn))
}

// ============ Documents ============

/// Handler for `POST /api/documents/upload`.
///
/// Multipart fields: `file` (required), `session_id`, and
/// `knowledge_base` (`true`/`false`). Without `knowledge_base`, an upload
/// with a session is a user upload and one without is a knowledge-base
/// document.
async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ingest::IngestOutcome>), AppError> {
    let mut multipart = multipart.map_err(|rejection| bad_request(rejection.body_text()))?;

    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut session_id: Option<String> = None;
    let mut knowledge_base: Option<bool> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
                    .map(str::to_string)
                    .or_else(|| {
                        mime_from_path(std::path::Path::new(&file_name)).map(str::to_string)
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Invalid file field: {}", e)))?;
                file = Some((file_name, mime_type, bytes.to_vec()));
            }
            "session_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Invalid session_id field: {}", e)))?;
                if !text.trim().is_empty() {
                    session_id = Some(parse_uuid(text.trim(), "session_id")?);
                }
            }
            "knowledge_base" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Invalid knowledge_base field: {}", e)))?;
                knowledge_base = Some(matches!(text.trim(), "true" | "1" | "on" | "yes"));
            }
            _ => {}
        }
    }

    let Some((file_name, mime_type, bytes)) = file else {
        return Err(bad_request("No file provided"));
    };
    let upload = Upload {
        file_name,
        mime_type,
        bytes,
        knowledge_base: knowledge_base.unwrap_or(session_id.is_none()),
        session_id,
    };

    let outcome = ingest::ingest_upload(&state.clients, upload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Deserialize)]
struct ListDocumentsParams {
    status: Option<String>,
    #[serde(rename = "type")]
    document_type: Option<String>,
}

/// Handler for `GET /api/documents`. Defaults to knowledge-base documents.
async fn handle_list_documents(
    State(state): State<AppState>,
    params: Result<Query<ListDocumentsParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let params = query_params(params)?;
    let document_type = parse_opt::<DocumentType>(params.document_type.as_deref())?
        .unwrap_or(DocumentType::KnowledgeBase);
    let status = parse_opt::<DocumentStatus>(params.status.as_deref())?;
    let documents = documents::list(state.clients.pool(), document_type, status).await?;
    Ok(Json(json!({ "documents": documents })))
}

/// Handler for `GET /api/documents/{id}`.
async fn handle_get_document(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_params(id)?;
    let document = documents::get(state.clients.pool(), &id).await?;
    Ok(Json(json!({ "document": document })))
}

#[derive(Deserialize)]
struct UpdateDocumentRequest {
    title: Option<String>,
    description: Option<String>,
    status: Option<DocumentStatus>,
}

/// Handler for `PATCH /api/documents/{id}`.
async fn handle_update_document(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateDocumentRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_params(id)?;
    let request = json_body(payload)?;
    let update = DocumentUpdate {
        title: request.title,
        description: request.description,
        status: request.status,
    };
    let document = documents::update(state.clients.pool(), &id, &update).await?;
    Ok(Json(json!({ "document": document })))
}

#[derive(Deserialize)]
struct DeleteDocumentParams {
    #[serde(default)]
    permanent: bool,
}

/// Handler for `DELETE /api/documents/{id}`.
async fn handle_delete_document(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    params: Result<Query<DeleteDocumentParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_params(id)?;
    let params = query_params(params)?;
    documents::delete(&state.clients, &id, params.permanent).await?;
    Ok(Json(json!({ "success": true })))
}

// ============ Reports ============

#[derive(Deserialize)]
struct SessionRef {
    session_id: String,
}

/// Handler for `POST /api/reports/generate`.
async fn handle_generate_report(
    State(state): State<AppState>,
    payload: Result<Json<SessionRef>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request = json_body(payload)?;
    let session_id = parse_uuid(&request.session_id, "session_id")?;
    let report = reports::generate(&state.clients, &session_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "report": report }))))
}

// ============ Billing ============

/// Handler for `POST /api/stripe/checkout`.
///
/// Returns 503 when no payment provider is configured.
async fn handle_checkout(
    State(state): State<AppState>,
    payload: Result<Json<SessionRef>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let request = json_body(payload)?;
    let gateway = state
        .clients
        .payments()
        .ok_or_else(|| service_unavailable("Payments are not configured"))?;
    let session_id = parse_uuid(&request.session_id, "session_id")?;

    let checkout = billing::start_checkout(&state.clients, gateway.as_ref(), &session_id).await?;
    Ok(Json(json!({
        "url": checkout.url,
        "checkout_session_id": checkout.id,
    })))
}

/// Handler for `POST /api/webhooks/stripe`.
///
/// The raw body is verified against the `Stripe-Signature` header before
/// it is parsed. A rejected signature changes nothing.
async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let secret = state
        .clients
        .secrets()
        .stripe_webhook_secret
        .clone()
        .ok_or_else(|| service_unavailable("Webhook secret is not configured"))?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());
    let tolerance = state.clients.config().billing.webhook_tolerance_secs;

    if let Err(e) = verify_signature(&body, signature, &secret, tolerance, Utc::now().timestamp()) {
        warn!(error = %e, "webhook signature rejected");
        return Err(bad_request(e.to_string()));
    }

    billing::handle_event(&state.clients, &body).await?;
    Ok(Json(json!({ "received": true })))
}

// ============ GET /files/{bucket}/{key} ============

/// Handler for `GET /files/{bucket}/{key}`.
async fn handle_file(
    State(state): State<AppState>,
    segments: Result<Path<(String, String)>, PathRejection>,
) -> Result<Response, AppError> {
    let (bucket, key) = path_params(segments)?;
    let bytes = state.clients.blobs().get(&bucket, &key).await?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for_key(&key))],
        bytes,
    )
        .into_response())
}
