//! HTTP API over [`CodeRag`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/parse` | Start a walk (body `{"root": "..."}` optional) → `{job_id}` |
//! | `GET` | `/get-chunks-by-filename?file_path=` | Chunks stored for one file |
//! | `DELETE` | `/delete-chunks-by-filename?file_path=` | Remove one file's chunks |
//! | `DELETE` | `/delete-all-chunks` | Empty the chunk store |
//! | `POST` | `/create-vectors` | Start an index rebuild → `{job_id}` |
//! | `POST` | `/search-vectors` | `{query, k?}` → ranked hits |
//! | `DELETE` | `/delete-all-vectors` | Remove the index snapshot |
//! | `POST` | `/refresh-vectors` | Clear, re-walk and rebuild in one job → `{job_id}` |
//! | `GET` | `/jobs` | All jobs, newest first |
//! | `GET` | `/jobs/{id}` | One job's status and result |
//! | `GET` | `/health` | Health check |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "file_path must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::path::PathBuf;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{EmbeddingError, RagError};
use crate::jobs::JobInfo;
use crate::models::{Chunk, SearchHit};
use crate::service::CodeRag;

/// Open the service from `config` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = CodeRag::open(config.clone()).await?;
    let app = build_router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("code-rag server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(service: CodeRag) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/parse", post(handle_parse))
        .route("/get-chunks-by-filename", get(handle_get_chunks))
        .route("/delete-chunks-by-filename", delete(handle_delete_chunks))
        .route("/delete-all-chunks", delete(handle_delete_all_chunks))
        .route("/create-vectors", post(handle_create_vectors))
        .route("/search-vectors", post(handle_search))
        .route("/delete-all-vectors", delete(handle_delete_vectors))
        .route("/refresh-vectors", post(handle_refresh))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/health", get(handle_health))
        .layer(middleware::from_fn(log_timing))
        .layer(cors)
        .with_state(service)
}

async fn log_timing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::InvalidArgument(msg) => bad_request(msg),
            RagError::Embedding(EmbeddingError::Disabled) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "embeddings_disabled",
                message: EmbeddingError::Disabled.to_string(),
            },
            other => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

// ============ Request / response bodies ============

#[derive(Debug, Default, Deserialize)]
struct ParseRequest {
    root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct JobAccepted {
    job_id: Uuid,
}

#[derive(Serialize)]
struct ChunksResponse {
    file_path: String,
    chunks: Vec<Chunk>,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: usize,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Serialize)]
struct ClearedResponse {
    removed: bool,
}

#[derive(Serialize)]
struct JobsResponse {
    jobs: Vec<JobInfo>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: usize,
}

fn accepted(job_id: Uuid) -> (StatusCode, Json<JobAccepted>) {
    (StatusCode::ACCEPTED, Json(JobAccepted { job_id }))
}

fn require_file_path(query: &FileQuery) -> Result<&str, AppError> {
    if query.file_path.trim().is_empty() {
        return Err(bad_request("file_path must not be empty"));
    }
    Ok(&query.file_path)
}

// ============ Handlers ============

async fn handle_parse(
    State(service): State<CodeRag>,
    body: Bytes,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let request: ParseRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ParseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {e}")))?
    };
    let root = request
        .root
        .unwrap_or_else(|| service.config().walker.root.clone());

    Ok(accepted(service.parse(root).await))
}

async fn handle_get_chunks(
    State(service): State<CodeRag>,
    Query(query): Query<FileQuery>,
) -> Result<Json<ChunksResponse>, AppError> {
    let file_path = require_file_path(&query)?;
    let chunks = service.get_chunks(file_path).await?;
    Ok(Json(ChunksResponse {
        file_path: file_path.to_string(),
        chunks,
    }))
}

async fn handle_delete_chunks(
    State(service): State<CodeRag>,
    Query(query): Query<FileQuery>,
) -> Result<Json<DeletedResponse>, AppError> {
    let file_path = require_file_path(&query)?;
    let deleted = service.delete_chunks(file_path).await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn handle_delete_all_chunks(
    State(service): State<CodeRag>,
) -> Result<Json<DeletedResponse>, AppError> {
    let deleted = service.delete_all_chunks().await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn handle_create_vectors(State(service): State<CodeRag>) -> (StatusCode, Json<JobAccepted>) {
    accepted(service.build_index().await)
}

async fn handle_search(
    State(service): State<CodeRag>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let max_k = service.config().retrieval.max_k;
    match request.k {
        Some(0) => return Err(bad_request("k must be >= 1")),
        Some(k) if k > max_k => return Err(bad_request(format!("k must be <= {max_k}"))),
        _ => {}
    }
    let results = service.search(&request.query, request.k).await?;
    Ok(Json(SearchResponse { results }))
}

async fn handle_delete_vectors(
    State(service): State<CodeRag>,
) -> Result<Json<ClearedResponse>, AppError> {
    let removed = service.clear_index().await?;
    Ok(Json(ClearedResponse { removed }))
}

async fn handle_refresh(State(service): State<CodeRag>) -> (StatusCode, Json<JobAccepted>) {
    accepted(service.refresh().await)
}

async fn handle_list_jobs(State(service): State<CodeRag>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: service.jobs().await,
    })
}

async fn handle_get_job(
    State(service): State<CodeRag>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    let id = Uuid::parse_str(&id).map_err(|_| bad_request(format!("invalid job id: {id}")))?;
    service
        .job(id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("no job with id {id}")))
}

async fn handle_health(State(service): State<CodeRag>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks: service.chunk_count().await?,
    }))
}
