//! C6 — Journal ingestion and retrieval: export a session, re-chunk,
//! re-embed, replace its chunks in the Journal vector collection, retrieve.

use crate::chunking::chunk_conversation;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::IngestError;
use crate::journal_blob::{format_conversation, ExportedMessage, JournalBlobStore};
use crate::session_store::SessionStore;
use crate::vector_store::{match_filter, FieldFilter, VectorStoreDriver};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct JournalIngestOutcome {
    pub session_id: String,
    pub chunks_created: usize,
    pub blob_path: String,
    pub ingested_at: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub role: String,
    pub content: String,
    pub session_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct IngestionStatus {
    pub session_id: String,
    pub ingested: bool,
    pub ingested_at: Option<String>,
    pub has_new_messages: bool,
    pub chunk_count: u64,
    pub has_blob: bool,
}

pub struct JournalStore {
    session_store: std::sync::Arc<SessionStore>,
    journal_blob: std::sync::Arc<JournalBlobStore>,
    vector_store: std::sync::Arc<VectorStoreDriver>,
    embedder: std::sync::Arc<EmbeddingClient>,
    collection: String,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl JournalStore {
    pub fn new(
        session_store: std::sync::Arc<SessionStore>,
        journal_blob: std::sync::Arc<JournalBlobStore>,
        vector_store: std::sync::Arc<VectorStoreDriver>,
        embedder: std::sync::Arc<EmbeddingClient>,
        config: &Config,
    ) -> Self {
        Self {
            session_store,
            journal_blob,
            vector_store,
            embedder,
            collection: config.journal_collection_name.clone(),
            chunk_size: config.journal_chunk_size,
            chunk_overlap: config.journal_chunk_overlap,
        }
    }

    /// Exactly-once in effect: export -> delete existing chunks -> re-chunk
    /// -> embed -> upsert -> watermark. A failure between delete and
    /// watermark leaves the session marked stale so the next run retries
    /// the whole pipeline (compensation, not a cross-store transaction).
    pub async fn ingest_session(&self, session_id: &str) -> Result<JournalIngestOutcome, IngestError> {
        let with_messages = self
            .session_store
            .get_session_with_messages(session_id)
            .await
            .map_err(|_| IngestError::SessionNotFound(session_id.to_string()))?;

        if with_messages.messages.is_empty() {
            return Err(IngestError::EmptySession(session_id.to_string()));
        }

        let blob_path = self
            .journal_blob
            .export_session(&with_messages.session, &with_messages.messages)
            .await
            .map_err(|e| IngestError::ValidationFailure(e.to_string()))?;
        info!(session_id, blob_path, "exported session to journal blob store");

        self.vector_store
            .delete_by_filter(&self.collection, match_filter("session_id", session_id))
            .await?;

        let exported: Vec<ExportedMessage> = with_messages
            .messages
            .iter()
            .map(ExportedMessage::from)
            .collect();
        let text = format_conversation(with_messages.session.name.as_deref(), &exported);

        let chunks = chunk_conversation(&text, self.chunk_size, self.chunk_overlap);
        let total_chunks = chunks.len();
        let ingested_at = Utc::now().to_rfc3339();

        if total_chunks == 0 {
            return Ok(JournalIngestOutcome {
                session_id: session_id.to_string(),
                chunks_created: 0,
                blob_path,
                ingested_at,
                message_count: with_messages.messages.len(),
            });
        }

        let embeddings = self
            .embedder
            .embed_batch(&chunks)
            .await
            .map_err(|e| IngestError::EmbeddingFailure(e.to_string()))?;

        let points = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (text, embedding))| {
                let mut payload = std::collections::HashMap::new();
                payload.insert("text".to_string(), serde_json::json!(text));
                payload.insert("session_id".to_string(), serde_json::json!(session_id));
                payload.insert(
                    "session_name".to_string(),
                    serde_json::json!(with_messages.session.name),
                );
                payload.insert("chunk_index".to_string(), serde_json::json!(chunk_index));
                payload.insert("total_chunks".to_string(), serde_json::json!(total_chunks));
                payload.insert(
                    "message_count".to_string(),
                    serde_json::json!(with_messages.messages.len()),
                );
                payload.insert("ingested_at".to_string(), serde_json::json!(ingested_at));
                (embedding, payload)
            })
            .collect();

        let chunks_created = self.vector_store.add_points(&self.collection, points).await?;

        self.session_store
            .set_ingested_at(session_id, Some(&ingested_at))
            .await
            .map_err(|e| IngestError::ValidationFailure(e.to_string()))?;

        info!(session_id, chunks_created, "journal ingestion complete");

        Ok(JournalIngestOutcome {
            session_id: session_id.to_string(),
            chunks_created,
            blob_path,
            ingested_at,
            message_count: with_messages.messages.len(),
        })
    }

    /// Embeds the query with the Journal embedder, searches the Journal
    /// collection (optionally scoped to `session_id`; `None` searches all
    /// sessions), and returns hits with `score >= threshold` in the store's
    /// descending-score order.
    pub async fn get_context_for_chat(
        &self,
        query: &str,
        top_k: u64,
        threshold: f32,
        session_id: Option<&str>,
        log_output: bool,
    ) -> Result<Vec<(String, f32)>, IngestError> {
        if log_output {
            let preview: String = query.chars().take(60).collect();
            info!(query_preview = %preview, top_k, threshold, "journal search");
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| IngestError::EmbeddingFailure(e.to_string()))?;

        let filter = session_id.map(|s| match_filter("session_id", s));
        let results = self
            .vector_store
            .query_points(&self.collection, embedding, filter, top_k)
            .await?;

        let retrieved = results.len();
        if log_output {
            let top_scores: String = results
                .iter()
                .take(5)
                .map(|r| format!("{:.3}", r.score))
                .collect::<Vec<_>>()
                .join(", ");
            info!(top_scores, "journal search top scores");
        }
        let filtered: Vec<(String, f32)> = results
            .into_iter()
            .filter(|r| r.score >= threshold)
            .map(|r| (r.text, r.score))
            .collect();

        if filtered.is_empty() && retrieved > 0 {
            warn!(retrieved, threshold, "journal retrieval: all results below threshold");
        } else if log_output {
            info!(retrieved, kept = filtered.len(), "journal retrieval filtered");
        }

        Ok(filtered)
    }

    /// Legacy retrieval shape: reuses `get_context_for_chat` and adapts
    /// results to a richer entry with role/timestamp. New chunked payloads
    /// (identified by a `text` key) are reported as role=`assistant`,
    /// timestamp=`ingested_at`.
    pub async fn get_recent_context(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<JournalEntry>, IngestError> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| IngestError::EmbeddingFailure(e.to_string()))?;
        let filter = session_id.map(|s| match_filter("session_id", s));
        let results = self
            .vector_store
            .query_points(&self.collection, embedding, filter, limit)
            .await?;

        Ok(results
            .into_iter()
            .filter_map(|r| {
                let session_id = r.payload.get("session_id")?.as_str()?.to_string();
                let ingested_at = r
                    .payload
                    .get("ingested_at")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(JournalEntry {
                    role: "assistant".to_string(),
                    content: r.text,
                    session_id,
                    timestamp: ingested_at,
                })
            })
            .collect())
    }

    pub async fn delete_session_chunks(&self, session_id: &str) -> Result<u64, IngestError> {
        let deleted = self
            .vector_store
            .delete_by_filter(&self.collection, match_filter("session_id", session_id))
            .await?;
        Ok(deleted)
    }

    pub async fn get_session_chunk_count(&self, session_id: &str) -> Result<u64, IngestError> {
        Ok(self
            .vector_store
            .count(&self.collection, Some(match_filter("session_id", session_id)))
            .await?)
    }

    /// Composite status combining the session watermark, the vector chunk
    /// count, and whether a journal blob export exists.
    pub async fn get_ingestion_status(&self, session_id: &str) -> Result<IngestionStatus, IngestError> {
        let session = self
            .session_store
            .get_session(session_id)
            .await
            .map_err(|_| IngestError::SessionNotFound(session_id.to_string()))?;
        let has_new_messages = self
            .session_store
            .has_new_messages_since_ingest(session_id)
            .await
            .unwrap_or(false);
        let chunk_count = self.get_session_chunk_count(session_id).await.unwrap_or(0);
        let has_blob = self.journal_blob.exists(session_id).await;

        Ok(IngestionStatus {
            session_id: session_id.to_string(),
            ingested: session.ingested_at.is_some(),
            ingested_at: session.ingested_at,
            has_new_messages,
            chunk_count,
            has_blob,
        })
    }
}

/// Exposed for callers that want to build a raw session-id filter without
/// going through `get_context_for_chat`.
pub fn session_filter(session_id: &str) -> FieldFilter {
    match_filter("session_id", session_id)
}
