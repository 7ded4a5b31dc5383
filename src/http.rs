//! Thin axum surface over `AppContext`: health check, document upload,
//! manual ingestion triggers, and a chat endpoint that exercises the
//! Context Assembler end to end.

use crate::chat_client::ChatClient;
use crate::context::AppContext;
use crate::document_worker;
use crate::error::IngestError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

/// API-layer mapping: `NotFound -> 404`, `ValidationFailure -> 400`,
/// everything else -> `500`. Core itself stays on typed `Result`s.
fn map_ingest_error(e: IngestError) -> (StatusCode, String) {
    let status = match e {
        IngestError::BlobNotFound(_) | IngestError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        IngestError::ValidationFailure(_) | IngestError::EmptySession(_) => StatusCode::BAD_REQUEST,
        IngestError::ParseFailure(_)
        | IngestError::EmbeddingFailure(_)
        | IngestError::VectorStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    chat_client: Arc<ChatClient>,
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let state = AppState {
        ctx,
        chat_client: Arc::new(ChatClient::new()),
    };

    Router::new()
        .route("/health", get(health))
        .route("/documents", post(upload_document))
        .route("/sessions/{session_id}/ingest", post(ingest_session))
        .route("/sessions/{session_id}/status", get(ingestion_status))
        .route("/chat", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind = ctx.config.http_bind.clone();
    let router = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "http server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct UploadResponse {
    blob_id: String,
    job_id: String,
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    let mut filename = "upload.txt".to_string();
    let mut bytes = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if let Some(name) = field.file_name() {
            filename = name.to_string();
        }
        bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
            .to_vec();
    }

    if bytes.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "no file content uploaded".to_string()));
    }

    let blob_id = state
        .ctx
        .blob_store
        .save(&bytes, &filename)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let job_id = state
        .ctx
        .job_queue
        .enqueue("ingest_document", serde_json::json!({ "blob_id": blob_id }))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(UploadResponse { blob_id, job_id }))
}

async fn ingest_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<crate::journal::JournalIngestOutcome>, (StatusCode, String)> {
    state
        .ctx
        .journal
        .ingest_session(&session_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!(session_id, error = %e, "session ingest failed");
            map_ingest_error(e)
        })
}

async fn ingestion_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<crate::journal::IngestionStatus>, (StatusCode, String)> {
    state
        .ctx
        .journal
        .get_ingestion_status(&session_id)
        .await
        .map(Json)
        .map_err(map_ingest_error)
}

#[derive(Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    library_hits: usize,
    journal_hits: usize,
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    state
        .ctx
        .session_store
        .upsert_session(&req.session_id, None)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state
        .ctx
        .session_store
        .add_message(&req.session_id, "user", &req.message, None)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let assembled = state
        .ctx
        .context_assembler
        .assemble(&req.message, None, Some(&req.session_id))
        .await;

    let reply = state.chat_client.complete(&assembled.formatted_message).await;

    state
        .ctx
        .session_store
        .add_message(&req.session_id, "assistant", &reply.content, None)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ChatResponse {
        reply: reply.content,
        library_hits: assembled.library_results.len(),
        journal_hits: assembled.journal_results.len(),
    }))
}

/// Used by the background maintenance task and by the manual upload
/// endpoint's job handler registration in `main`.
pub async fn run_document_ingest_job(
    ctx: Arc<AppContext>,
    args: serde_json::Value,
) -> Result<(), String> {
    let blob_id = args
        .get("blob_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing blob_id".to_string())?;

    document_worker::process_document(
        blob_id,
        &ctx.blob_store,
        &ctx.vector_store,
        &ctx.library_embedder,
        &ctx.config,
    )
    .await
    .map(|_| ())
    .map_err(|e| e.to_string())
}
