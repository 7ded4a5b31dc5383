//! Explicit application context. Every shared resource is constructed once
//! in `AppContext::new` and threaded through by reference — no
//! process-wide singleton, no `lazy_static`.

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::context_assembler::ContextAssembler;
use crate::embedding::EmbeddingClient;
use crate::job_queue::JobQueue;
use crate::journal::JournalStore;
use crate::journal_blob::JournalBlobStore;
use crate::session_store::SessionStore;
use crate::vector_store::VectorStoreDriver;
use anyhow::Context as _;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing::info;

pub struct AppContext {
    pub config: Config,
    pub blob_store: Arc<BlobStore>,
    pub session_store: Arc<SessionStore>,
    pub journal_blob: Arc<JournalBlobStore>,
    pub job_queue: Arc<JobQueue>,
    pub vector_store: Arc<VectorStoreDriver>,
    pub library_embedder: Arc<EmbeddingClient>,
    pub journal_embedder: Arc<EmbeddingClient>,
    pub journal: Arc<JournalStore>,
    pub context_assembler: Arc<ContextAssembler>,
}

impl AppContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let blob_store = Arc::new(
            BlobStore::new(config.blob_storage_path.clone())
                .await
                .context("failed to initialize blob store")?,
        );
        info!(path = %config.blob_storage_path, "blob store ready");

        let journal_blob = Arc::new(
            JournalBlobStore::new(config.journal_blob_storage_path.clone())
                .await
                .context("failed to initialize journal blob store")?,
        );
        info!(path = %config.journal_blob_storage_path, "journal blob store ready");

        let pool = SqlitePoolOptions::new()
            .connect(&config.database_url)
            .await
            .context("failed to connect to session database")?;
        let session_store = Arc::new(
            SessionStore::new(pool)
                .await
                .context("failed to initialize session store")?,
        );
        info!(url = %config.database_url, "session store ready");

        let job_queue = Arc::new(
            JobQueue::new(&config.redis_host, config.redis_port)
                .await
                .context("failed to initialize job queue")?,
        );
        info!(host = %config.redis_host, port = config.redis_port, "job queue ready");

        let vector_store = Arc::new(
            VectorStoreDriver::new(config.storage_use_persistent, &config.qdrant_url())
                .await
                .context("failed to initialize vector store")?,
        );
        vector_store
            .setup_collection(&config.library_collection_name, config.embedding_dim as u64)
            .await
            .context("failed to set up library collection")?;
        vector_store
            .setup_collection(&config.journal_collection_name, config.embedding_dim as u64)
            .await
            .context("failed to set up journal collection")?;
        info!(
            embedded = vector_store.is_embedded(),
            "vector store ready"
        );

        // One embedding client instance per role: Library and Journal search
        // independently and must not block on a shared client.
        let library_embedder = Arc::new(EmbeddingClient::new(
            config.embedding_api_url.clone(),
            config.embedding_api_key.clone(),
        ));
        let journal_embedder = Arc::new(EmbeddingClient::new(
            config.embedding_api_url.clone(),
            config.embedding_api_key.clone(),
        ));

        let journal = Arc::new(JournalStore::new(
            Arc::clone(&session_store),
            Arc::clone(&journal_blob),
            Arc::clone(&vector_store),
            Arc::clone(&journal_embedder),
            &config,
        ));

        let context_assembler = Arc::new(ContextAssembler::new(
            Arc::clone(&vector_store),
            Arc::clone(&library_embedder),
            Arc::clone(&journal),
            config.clone(),
        ));

        Ok(Self {
            config,
            blob_store,
            session_store,
            journal_blob,
            job_queue,
            vector_store,
            library_embedder,
            journal_embedder,
            journal,
            context_assembler,
        })
    }
}
