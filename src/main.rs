//! home-assistant-core — local-first retrieval engine for a personal RAG
//! chat assistant: document ingestion, conversation journaling, and
//! context assembly over a dual Qdrant index.

use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

mod blob_store;
mod chat_client;
mod chunking;
mod config;
mod context;
mod context_assembler;
mod document_parser;
mod document_worker;
mod embedding;
mod error;
mod http;
mod job_queue;
mod journal;
mod journal_blob;
mod session_store;
mod vector_store;

use context::AppContext;

#[derive(Parser)]
#[command(name = "home-assistant-core")]
#[command(about = "Local-first retrieval engine for a personal RAG chat assistant")]
struct Args {
    /// Run the background worker loop instead of the HTTP server
    #[arg(long)]
    worker: bool,

    /// HTTP bind address (host:port)
    #[arg(long)]
    http_bind: Option<String>,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Qdrant host
    #[arg(long, env = "QDRANT_HOST")]
    qdrant_host: Option<String>,

    /// Redis host
    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    /// Embedding API key
    #[arg(long, env = "EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_path = dirs::home_dir()
        .map(|h| h.join(".home-assistant").join(".env"))
        .filter(|p| p.exists());
    if let Some(path) = env_path {
        let _ = dotenvy::from_path(&path);
    } else {
        let _ = dotenvy::dotenv();
    }

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let mut config = config::Config::load();
    if let Some(http_bind) = args.http_bind {
        config.http_bind = http_bind;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }
    if let Some(qdrant_host) = args.qdrant_host {
        config.qdrant_host = qdrant_host;
    }
    if let Some(redis_host) = args.redis_host {
        config.redis_host = redis_host;
    }
    if args.embedding_api_key.is_some() {
        config.embedding_api_key = args.embedding_api_key;
    }

    tracing::info!(
        database_url = %config.database_url,
        qdrant_host = %config.qdrant_host,
        redis_host = %config.redis_host,
        "starting home-assistant-core"
    );

    let ctx = Arc::new(AppContext::new(config).await?);

    spawn_ingestion_sweep(Arc::clone(&ctx));

    if args.worker {
        run_worker(ctx).await;
        Ok(())
    } else {
        http::run(ctx).await
    }
}

/// Periodically enqueues a journal-ingest job for every session whose
/// watermark is stale, so manual chat activity gets indexed without an
/// explicit trigger.
fn spawn_ingestion_sweep(ctx: Arc<AppContext>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.tick().await; // skip the immediate tick
        loop {
            interval.tick().await;
            match ctx.session_store.get_sessions_needing_ingest(50).await {
                Ok(sessions) => {
                    for session in sessions {
                        let result = ctx
                            .job_queue
                            .enqueue(
                                "ingest_session",
                                serde_json::json!({ "session_id": session.session_id }),
                            )
                            .await;
                        if let Err(e) = result {
                            tracing::warn!(session_id = %session.session_id, error = %e, "failed to enqueue journal ingest");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "ingestion sweep query failed"),
            }
        }
    });
}

async fn run_worker(ctx: Arc<AppContext>) {
    let mut handlers: HashMap<String, job_queue::JobHandler> = HashMap::new();

    let document_ctx = Arc::clone(&ctx);
    handlers.insert(
        "ingest_document".to_string(),
        Arc::new(move |args: serde_json::Value| {
            let ctx = Arc::clone(&document_ctx);
            Box::pin(async move { http::run_document_ingest_job(ctx, args).await })
                as std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>
        }),
    );

    let journal_ctx = Arc::clone(&ctx);
    handlers.insert(
        "ingest_session".to_string(),
        Arc::new(move |args: serde_json::Value| {
            let ctx = Arc::clone(&journal_ctx);
            Box::pin(async move {
                let session_id = args
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "missing session_id".to_string())?;
                ctx.journal
                    .ingest_session(session_id)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>
        }),
    );

    tracing::info!("starting job queue worker loop");
    ctx.job_queue
        .run_worker(
            handlers,
            ctx.config.worker_max_concurrent_jobs,
            Duration::from_secs(ctx.config.worker_job_timeout),
        )
        .await;
}
