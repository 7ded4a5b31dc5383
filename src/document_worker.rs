//! C5 — document ingestion worker. Invoked by the job queue with a
//! `blob_id`; parses, chunks, embeds, and upserts into the Library
//! collection, deleting any prior chunks for the same blob first so retries
//! are idempotent in effect.

use crate::blob_store::BlobStore;
use crate::chunking::chunk_text;
use crate::config::Config;
use crate::document_parser;
use crate::embedding::EmbeddingClient;
use crate::error::IngestError;
use crate::vector_store::{match_filter, VectorStoreDriver};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct DocumentIngestOutcome {
    pub blob_id: String,
    pub chunks_indexed: usize,
    pub file_type: String,
    pub original_filename: String,
    pub page_count: usize,
}

/// Collapses runs of whitespace and strips control characters. Pure and
/// deterministic for a given input.
pub fn preprocess_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }
        let is_space = ch.is_whitespace() && ch != '\n';
        if is_space {
            if !last_was_space {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
        last_was_space = is_space;
    }
    out.trim().to_string()
}

pub async fn process_document(
    blob_id: &str,
    blob_store: &BlobStore,
    vector_store: &VectorStoreDriver,
    embedder: &EmbeddingClient,
    config: &Config,
) -> Result<DocumentIngestOutcome, IngestError> {
    info!(blob_id, "starting document ingestion");

    let path = blob_store
        .get(blob_id)
        .await
        .map_err(|_| IngestError::BlobNotFound(blob_id.to_string()))?;
    let info = blob_store
        .get_info(blob_id)
        .await
        .map_err(|_| IngestError::BlobNotFound(blob_id.to_string()))?;

    let parsed = document_parser::parse(&path, &info.original_filename)?;
    info!(
        blob_id,
        file_type = %parsed.file_type,
        chars = parsed.text.len(),
        pages = parsed.page_count,
        "parsed document"
    );

    let processed_text = preprocess_text(&parsed.text);

    let chunks = chunk_text(
        &processed_text,
        config.library_chunk_size,
        config.library_chunk_overlap,
        true,
    );
    info!(blob_id, chunks = chunks.len(), "chunked document");

    if chunks.is_empty() {
        return Ok(DocumentIngestOutcome {
            blob_id: blob_id.to_string(),
            chunks_indexed: 0,
            file_type: parsed.file_type,
            original_filename: parsed.original_filename,
            page_count: parsed.page_count,
        });
    }

    let embeddings = embedder
        .embed_batch(&chunks)
        .await
        .map_err(|e| IngestError::EmbeddingFailure(e.to_string()))?;

    // Delete any vectors from a prior ingestion of this blob before
    // upserting the new set, so a retry doesn't duplicate chunks.
    let deleted = vector_store
        .delete_by_filter(
            &config.library_collection_name,
            match_filter("blob_id", blob_id),
        )
        .await?;
    if deleted > 0 {
        info!(blob_id, deleted, "removed prior chunks before re-ingest");
    }

    let now = Utc::now().to_rfc3339();
    let points = chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(chunk_id, (text, embedding))| {
            let mut payload = std::collections::HashMap::new();
            payload.insert("text".to_string(), serde_json::json!(text));
            payload.insert("doc_id".to_string(), serde_json::json!(blob_id));
            payload.insert("chunk_id".to_string(), serde_json::json!(chunk_id));
            payload.insert("blob_id".to_string(), serde_json::json!(blob_id));
            payload.insert(
                "original_filename".to_string(),
                serde_json::json!(info.original_filename),
            );
            payload.insert("ingested_at".to_string(), serde_json::json!(now));
            (embedding, payload)
        })
        .collect();

    let indexed = vector_store
        .add_points(&config.library_collection_name, points)
        .await?;

    info!(blob_id, indexed, "document ingestion complete");

    Ok(DocumentIngestOutcome {
        blob_id: blob_id.to_string(),
        chunks_indexed: indexed,
        file_type: parsed.file_type,
        original_filename: parsed.original_filename,
        page_count: parsed.page_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_collapses_whitespace_and_strips_control_chars() {
        let input = "hello   world\x07\tfoo";
        let out = preprocess_text(input);
        assert_eq!(out, "hello world foo");
    }

    #[test]
    fn preprocess_is_deterministic() {
        let input = "  repeat   me  ";
        assert_eq!(preprocess_text(input), preprocess_text(input));
    }
}
