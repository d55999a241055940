//! HTTP API over one [`RagSession`].
//!
//! A thin adapter: handlers decode JSON, lock the session, call the
//! matching engine operation and encode the result. The session sits
//! behind a `tokio::sync::Mutex`, so requests against it are serialised.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | API info |
//! | `GET`  | `/health` | Health check (status, timestamp, version) |
//! | `POST` | `/index` | Index a repository: `{"repo_url": "...", "refresh": false}` |
//! | `POST` | `/query` | Ask a question: `{"repo_url": "...", "query": "..."}` |
//! | `POST` | `/set-context` | Replace memory from a `[{role, content}]` transcript |
//! | `POST` | `/clear` | Clear conversation memory |
//!
//! `repo_url` is optional on `/query`; when present and different from the
//! indexed repository, the repository is indexed first.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_indexed", "message": "no repository has been indexed in this session" } }
//! ```

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::engine::{IndexReport, RagSession};
use crate::error::{IndexError, RagError};
use crate::memory::TranscriptMessage;
use crate::models::{ParseTier, SourceRef};

/// Shared application state passed to all route handlers.
pub type SharedSession = Arc<Mutex<RagSession>>;

/// Build a session from `config` and serve it on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let session = RagSession::from_config(config).await?;
    let app = router(Arc::new(Mutex::new(session)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "repo-chat server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// The application router over `session`.
pub fn router(session: SharedSession) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/index", post(handle_index))
        .route("/query", post(handle_query))
        .route("/set-context", post(handle_set_context))
        .route("/clear", post(handle_clear))
        .layer(cors)
        .with_state(session)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::SourceUnavailable(_) | RagError::IndexingFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RagError::NotIndexed | RagError::Index(IndexError::NotReady) => StatusCode::CONFLICT,
            RagError::QueryEmbedding(_)
            | RagError::GenerationFailed(_)
            | RagError::NoEmbeddings { .. } => StatusCode::BAD_GATEWAY,
            RagError::Index(IndexError::Dimension { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    endpoints: Vec<&'static str>,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        name: "repo-chat",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "GET /health",
            "POST /index",
            "POST /query",
            "POST /set-context",
            "POST /clear",
        ],
    })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /index ============

#[derive(Deserialize)]
struct IndexRequest {
    repo_url: String,
    #[serde(default)]
    refresh: bool,
}

async fn handle_index(
    State(session): State<SharedSession>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexReport>, AppError> {
    if req.repo_url.trim().is_empty() {
        return Err(bad_request("repo_url must not be empty"));
    }
    let mut session = session.lock().await;
    let report = if req.refresh {
        session.rebuild(&req.repo_url).await?
    } else {
        session.index(&req.repo_url).await?
    };
    Ok(Json(report))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    repo_url: Option<String>,
    query: String,
}

#[derive(Serialize)]
struct ContextMetadata {
    file_path: String,
    #[serde(rename = "type")]
    file_type: String,
    is_code: bool,
    is_implementation: bool,
    title: String,
}

#[derive(Serialize)]
struct ContextDocument {
    text: String,
    meta_data: ContextMetadata,
    score: f32,
}

#[derive(Serialize)]
struct QueryResponse {
    rationale: String,
    answer: String,
    parse_tier: ParseTier,
    sources: Vec<SourceRef>,
    contexts: Vec<ContextDocument>,
}

async fn handle_query(
    State(session): State<SharedSession>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let mut session = session.lock().await;
    if let Some(repo_url) = req.repo_url.as_deref().filter(|u| !u.trim().is_empty()) {
        if !session.is_indexed(repo_url) {
            session.index(repo_url).await?;
        }
    }

    let response = session.ask(&req.query).await?;
    let sources = response.sources();
    let contexts = response
        .retrieved
        .iter()
        .map(|hit| {
            let doc = &hit.chunk.document;
            ContextDocument {
                text: hit.chunk.text.clone(),
                meta_data: ContextMetadata {
                    file_path: doc.path.clone(),
                    file_type: doc.file_type.clone(),
                    is_code: doc.is_code(),
                    is_implementation: doc.is_implementation,
                    title: doc.title().to_string(),
                },
                score: hit.score,
            }
        })
        .collect();

    Ok(Json(QueryResponse {
        rationale: response.answer.rationale,
        answer: response.answer.answer,
        parse_tier: response.answer.tier,
        sources,
        contexts,
    }))
}

// ============ POST /set-context ============

#[derive(Serialize)]
struct ContextResponse {
    status: &'static str,
    turns: usize,
}

async fn handle_set_context(
    State(session): State<SharedSession>,
    Json(messages): Json<Vec<TranscriptMessage>>,
) -> Json<ContextResponse> {
    let turns = session.lock().await.restore_context(&messages);
    Json(ContextResponse {
        status: "success",
        turns,
    })
}

// ============ POST /clear ============

async fn handle_clear(State(session): State<SharedSession>) -> Json<ContextResponse> {
    let mut session = session.lock().await;
    session.clear_memory();
    Json(ContextResponse {
        status: "success",
        turns: 0,
    })
}
