//! Typed configuration for the retrieval engine.
//!
//! Resolution order: CLI args > environment variables > `~/.home-assistant/config.toml`
//! > built-in defaults. No process-wide singleton: callers construct one
//! `Config` in `main` and thread it through `AppContext`.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // C1 / C3 storage roots
    pub blob_storage_path: String,
    pub journal_blob_storage_path: String,

    // C2 relational store
    pub database_url: String,

    // C8 vector store
    pub library_collection_name: String,
    pub journal_collection_name: String,
    pub storage_use_persistent: bool,
    pub qdrant_host: String,
    pub qdrant_port: u16,
    pub embedding_dim: usize,

    // C5 / C6 chunker parameters
    pub library_chunk_size: usize,
    pub library_chunk_overlap: usize,
    pub journal_chunk_size: usize,
    pub journal_chunk_overlap: usize,

    // C7 assembler
    pub chat_library_enabled: bool,
    pub chat_journal_enabled: bool,
    pub chat_context_enabled: bool,
    pub chat_library_top_k: usize,
    pub chat_journal_top_k: usize,
    pub chat_library_similarity_threshold: f32,
    pub chat_journal_similarity_threshold: f32,
    pub chat_library_use_cache: bool,
    pub chat_query_expansion_enabled: bool,

    // C4 job queue
    pub redis_host: String,
    pub redis_port: u16,
    pub worker_job_timeout: u64,
    pub worker_max_concurrent_jobs: usize,

    // embedding API
    pub embedding_api_key: Option<String>,
    pub embedding_api_url: String,

    // logging
    pub log_output: bool,

    // HTTP surface
    pub http_bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blob_storage_path: "data/preindex_blob".to_string(),
            journal_blob_storage_path: "data/journal_blob".to_string(),
            database_url: "sqlite://data/sessions.db".to_string(),
            library_collection_name: "library".to_string(),
            journal_collection_name: "journal".to_string(),
            storage_use_persistent: false,
            qdrant_host: "localhost".to_string(),
            qdrant_port: 6334,
            embedding_dim: 384,
            library_chunk_size: 1000,
            library_chunk_overlap: 100,
            journal_chunk_size: 1500,
            journal_chunk_overlap: 150,
            chat_library_enabled: true,
            chat_journal_enabled: true,
            chat_context_enabled: true,
            chat_library_top_k: 5,
            chat_journal_top_k: 5,
            chat_library_similarity_threshold: 0.2,
            chat_journal_similarity_threshold: 0.2,
            chat_library_use_cache: true,
            chat_query_expansion_enabled: false,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            worker_job_timeout: 300,
            worker_max_concurrent_jobs: 10,
            embedding_api_key: None,
            embedding_api_url: "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent".to_string(),
            log_output: false,
            http_bind: "127.0.0.1:8787".to_string(),
        }
    }
}

impl Config {
    /// Resolve config by layering a TOML file over defaults, then environment
    /// variables over the result. CLI overrides are applied by the caller
    /// (`main`) field-by-field after this returns, so CLI args win.
    pub fn load() -> Self {
        let mut config = Self::from_file().unwrap_or_default();
        config.apply_env();
        config
    }

    fn from_file() -> Option<Self> {
        let path = config_path();
        let content = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Warning: failed to parse {}: {e}", path.display());
                None
            }
        }
    }

    fn apply_env(&mut self) {
        macro_rules! env_str {
            ($field:expr, $var:literal) => {
                if let Ok(v) = std::env::var($var) {
                    $field = v;
                }
            };
        }
        macro_rules! env_parsed {
            ($field:expr, $var:literal) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        env_str!(self.blob_storage_path, "BLOB_STORAGE_PATH");
        env_str!(
            self.journal_blob_storage_path,
            "JOURNAL_BLOB_STORAGE_PATH"
        );
        env_str!(self.database_url, "DATABASE_URL");
        env_str!(self.library_collection_name, "LIBRARY_COLLECTION_NAME");
        env_str!(self.journal_collection_name, "JOURNAL_COLLECTION_NAME");
        env_parsed!(self.storage_use_persistent, "STORAGE_USE_PERSISTENT");
        env_str!(self.qdrant_host, "QDRANT_HOST");
        env_parsed!(self.qdrant_port, "QDRANT_PORT");
        env_parsed!(self.embedding_dim, "EMBEDDING_DIM");
        env_parsed!(self.library_chunk_size, "LIBRARY_CHUNK_SIZE");
        env_parsed!(self.library_chunk_overlap, "LIBRARY_CHUNK_OVERLAP");
        env_parsed!(self.journal_chunk_size, "JOURNAL_CHUNK_SIZE");
        env_parsed!(self.journal_chunk_overlap, "JOURNAL_CHUNK_OVERLAP");
        env_parsed!(self.chat_library_enabled, "CHAT_LIBRARY_ENABLED");
        env_parsed!(self.chat_journal_enabled, "CHAT_JOURNAL_ENABLED");
        env_parsed!(self.chat_context_enabled, "CHAT_CONTEXT_ENABLED");
        env_parsed!(self.chat_library_top_k, "CHAT_LIBRARY_TOP_K");
        env_parsed!(self.chat_journal_top_k, "CHAT_JOURNAL_TOP_K");
        env_parsed!(
            self.chat_library_similarity_threshold,
            "CHAT_LIBRARY_SIMILARITY_THRESHOLD"
        );
        env_parsed!(
            self.chat_journal_similarity_threshold,
            "CHAT_JOURNAL_SIMILARITY_THRESHOLD"
        );
        env_parsed!(self.chat_library_use_cache, "CHAT_LIBRARY_USE_CACHE");
        env_parsed!(
            self.chat_query_expansion_enabled,
            "CHAT_QUERY_EXPANSION_ENABLED"
        );
        env_str!(self.redis_host, "REDIS_HOST");
        env_parsed!(self.redis_port, "REDIS_PORT");
        env_parsed!(self.worker_job_timeout, "WORKER_JOB_TIMEOUT");
        env_parsed!(
            self.worker_max_concurrent_jobs,
            "WORKER_MAX_CONCURRENT_JOBS"
        );
        if let Ok(v) = std::env::var("EMBEDDING_API_KEY") {
            self.embedding_api_key = Some(v);
        }
        env_str!(self.embedding_api_url, "EMBEDDING_API_URL");
        env_parsed!(self.log_output, "LOG_OUTPUT");
        env_str!(self.http_bind, "HTTP_BIND");
    }

    pub fn qdrant_url(&self) -> String {
        format!("http://{}:{}", self.qdrant_host, self.qdrant_port)
    }
}

/// `~/.home-assistant/config.toml`
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".home-assistant")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.library_chunk_size, 1000);
        assert_eq!(config.journal_chunk_size, 1500);
        assert!(config.chat_library_enabled);
    }

    #[test]
    fn test_config_path() {
        let path = config_path();
        assert!(path.to_string_lossy().contains(".home-assistant"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_env_override() {
        // SAFETY: test-only, no other thread reads this var concurrently.
        unsafe {
            std::env::set_var("LIBRARY_CHUNK_SIZE", "2000");
        }
        let mut config = Config::default();
        config.apply_env();
        assert_eq!(config.library_chunk_size, 2000);
        unsafe {
            std::env::remove_var("LIBRARY_CHUNK_SIZE");
        }
    }
}
