//! C7 — at chat time, query the Library and Journal collections
//! concurrently, apply a near-duplicate query cache on the Library side,
//! and merge results into a single prompt envelope.

use crate::chat_client::ChatClient;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::IngestError;
use crate::journal::JournalStore;
use crate::vector_store::VectorStoreDriver;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const QUERY_EXPANSION_PROMPT: &str = "Rewrite this search query to be more specific and detailed for document retrieval. Add relevant synonyms and related terms. Output ONLY the expanded query, nothing else.\n\nOriginal query: {query}\n\nExpanded query:";
const MIN_EXPANSION_QUERY_LEN: usize = 5;

const K_RECENT: usize = 5;
const N_CACHE: usize = 20;
const CACHE_SIMILARITY_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
struct CacheEntry {
    normalized_query: String,
    tokens: HashSet<String>,
    results: Vec<(String, f32)>,
}

/// LRU over `N_CACHE` entries; candidate comparison looks only at the last
/// `K_RECENT` entries (most-recently-used order).
struct QueryCache {
    entries: VecDeque<CacheEntry>,
}

impl QueryCache {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn find(&mut self, query: &str) -> Option<Vec<(String, f32)>> {
        let normalized = normalize(query);
        let tokens = tokenize(query);
        let window = self.entries.len().min(K_RECENT);

        let hit_index = self.entries.iter().take(window).position(|entry| {
            entry.normalized_query == normalized
                || jaccard_similarity(&tokens, &entry.tokens) > CACHE_SIMILARITY_THRESHOLD
        })?;

        let entry = self.entries.remove(hit_index).unwrap();
        let results = entry.results.clone();
        self.entries.push_front(entry);
        Some(results)
    }

    fn insert(&mut self, query: &str, results: Vec<(String, f32)>) {
        if results.is_empty() {
            return;
        }
        let tokens = tokenize(query);
        self.entries.push_front(CacheEntry {
            normalized_query: normalize(query),
            tokens,
            results,
        });
        while self.entries.len() > N_CACHE {
            self.entries.pop_back();
        }
    }
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

fn tokenize(query: &str) -> HashSet<String> {
    normalize(query)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Formats the first 5 scores as `"0.812, 0.744, 0.701"` for a compact
/// `log_output`-gated debug line.
fn score_preview<T>(hits: &[T], score_of: impl Fn(&T) -> f32) -> String {
    hits.iter()
        .take(5)
        .map(|h| format!("{:.3}", score_of(h)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssembledContext {
    pub formatted_message: String,
    pub library_results: Vec<(String, f32)>,
    pub library_context_text: Option<String>,
    pub journal_results: Vec<(String, f32)>,
    pub journal_context_text: Option<String>,
}

pub struct ContextAssembler {
    vector_store: Arc<VectorStoreDriver>,
    embedder: Arc<EmbeddingClient>,
    journal: Arc<JournalStore>,
    query_expander: Arc<ChatClient>,
    cache: Mutex<QueryCache>,
    config: Config,
}

impl ContextAssembler {
    pub fn new(
        vector_store: Arc<VectorStoreDriver>,
        embedder: Arc<EmbeddingClient>,
        journal: Arc<JournalStore>,
        config: Config,
    ) -> Self {
        Self {
            vector_store,
            embedder,
            journal,
            query_expander: Arc::new(ChatClient::new()),
            cache: Mutex::new(QueryCache::new()),
            config,
        }
    }

    /// Optional pre-retrieval query rewrite for the Library search only:
    /// expands short, ambiguous queries with synonyms before embedding.
    /// Journal search always uses the raw user message. Gated behind
    /// `chat_query_expansion_enabled`; must never be required for a correct
    /// answer, so any failure or a non-improving rewrite falls back to the
    /// original query untouched.
    async fn expand_query(&self, query: &str) -> String {
        expand_query_with(
            &self.query_expander,
            query,
            self.config.chat_query_expansion_enabled,
        )
        .await
    }

    pub async fn assemble(
        &self,
        user_message: &str,
        prompt_template: Option<&str>,
        session_id: Option<&str>,
    ) -> AssembledContext {
        if !self.config.chat_context_enabled {
            return AssembledContext {
                formatted_message: user_message.to_string(),
                library_results: Vec::new(),
                library_context_text: None,
                journal_results: Vec::new(),
                journal_context_text: None,
            };
        }

        let library_query = self.expand_query(user_message).await;

        let (library_results, journal_results) = tokio::join!(
            self.search_library(&library_query),
            self.search_journal(user_message, session_id),
        );

        let library_results = library_results.unwrap_or_else(|e| {
            warn!(error = %e, "library search failed, continuing with journal only");
            Vec::new()
        });
        let journal_results = journal_results.unwrap_or_else(|e| {
            warn!(error = %e, "journal search failed, continuing with library only");
            Vec::new()
        });

        let library_context_text = (!library_results.is_empty()).then(|| {
            library_results
                .iter()
                .map(|(t, _)| t.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });
        let journal_context_text = (!journal_results.is_empty()).then(|| {
            journal_results
                .iter()
                .map(|(t, _)| t.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        let formatted_message = merge_and_format(
            user_message,
            library_context_text.as_deref(),
            journal_context_text.as_deref(),
            prompt_template,
        );

        AssembledContext {
            formatted_message,
            library_results,
            library_context_text,
            journal_results,
            journal_context_text,
        }
    }

    async fn search_library(&self, query: &str) -> Result<Vec<(String, f32)>, IngestError> {
        if !self.config.chat_library_enabled {
            return Ok(Vec::new());
        }

        if self.config.log_output {
            let preview: String = query.chars().take(60).collect();
            tracing::debug!(query_preview = %preview, "library search");
        }

        if self.config.chat_library_use_cache {
            let mut cache = self.cache.lock().await;
            if let Some(cached) = cache.find(query) {
                if self.config.log_output {
                    tracing::debug!(hits = cached.len(), "library cache hit");
                }
                return Ok(cached);
            }
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| IngestError::EmbeddingFailure(e.to_string()))?;

        let results = self
            .vector_store
            .query_points(
                &self.config.library_collection_name,
                embedding,
                None,
                self.config.chat_library_top_k as u64,
            )
            .await?;

        let threshold = self.config.chat_library_similarity_threshold;
        let retrieved = results.len();
        if self.config.log_output {
            let top_scores = score_preview(&results, |r| r.score);
            tracing::debug!(top_scores, "library search top scores");
        }
        let filtered: Vec<(String, f32)> = results
            .into_iter()
            .filter(|r| r.score >= threshold)
            .map(|r| (r.text, r.score))
            .collect();

        if self.config.chat_library_use_cache {
            let mut cache = self.cache.lock().await;
            cache.insert(query, filtered.clone());
        }

        if self.config.log_output {
            tracing::debug!(retrieved, kept = filtered.len(), threshold, "library search filtered");
        }

        Ok(filtered)
    }

    async fn search_journal(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<(String, f32)>, IngestError> {
        if !self.config.chat_journal_enabled {
            return Ok(Vec::new());
        }
        self.journal
            .get_context_for_chat(
                query,
                self.config.chat_journal_top_k as u64,
                self.config.chat_journal_similarity_threshold,
                session_id,
                self.config.log_output,
            )
            .await
    }
}

async fn expand_query_with(chat_client: &ChatClient, query: &str, enabled: bool) -> String {
    if !enabled || query.trim().len() < MIN_EXPANSION_QUERY_LEN {
        return query.to_string();
    }

    let prompt = QUERY_EXPANSION_PROMPT.replace("{query}", query);
    let reply = chat_client.complete(&prompt).await;
    let expanded = reply.content.trim();

    if !expanded.is_empty() && expanded.len() > query.len() {
        expanded.to_string()
    } else {
        query.to_string()
    }
}

fn merge_and_format(
    user_message: &str,
    library: Option<&str>,
    journal: Option<&str>,
    prompt_template: Option<&str>,
) -> String {
    if library.is_none() && journal.is_none() {
        return user_message.to_string();
    }

    let mut sections = Vec::new();
    if let Some(library) = library {
        sections.push(format!(
            "[KNOWLEDGE BASE - Documents from your personal library]\n{library}"
        ));
    }
    if let Some(journal) = journal {
        sections.push(format!(
            "[PAST CONVERSATIONS - Previous chat history that may be relevant]\n{journal}"
        ));
    }
    let context = sections.join("\n\n");

    match prompt_template {
        Some(template) => template
            .replace("{rag_context}", &context)
            .replace("{user_message}", user_message),
        None => format!(
            "<CONTEXT_FOR_REFERENCE>\n…may or may not be relevant…\n{context}\n</CONTEXT_FOR_REFERENCE>\n\nUSER'S ACTUAL QUESTION (ANSWER THIS):\n{user_message}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expand_query_is_noop_when_disabled() {
        let client = ChatClient::new();
        let expanded = expand_query_with(&client, "tell me about pears", false).await;
        assert_eq!(expanded, "tell me about pears");
    }

    #[tokio::test]
    async fn expand_query_skips_very_short_queries() {
        let client = ChatClient::new();
        let expanded = expand_query_with(&client, "hi", true).await;
        assert_eq!(expanded, "hi");
    }

    #[test]
    fn score_preview_truncates_to_five_and_formats_scores() {
        let scores = [0.9123_f32, 0.8, 0.75, 0.6, 0.5, 0.1];
        assert_eq!(
            score_preview(&scores, |s| *s),
            "0.912, 0.800, 0.750, 0.600, 0.500"
        );
    }

    #[test]
    fn jaccard_similarity_of_near_duplicate_queries_exceeds_threshold() {
        let a = tokenize("what color are bananas");
        let b = tokenize("what color are the bananas");
        assert!(jaccard_similarity(&a, &b) > CACHE_SIMILARITY_THRESHOLD);
    }

    #[test]
    fn cache_hit_returns_identical_results_and_promotes_entry() {
        let mut cache = QueryCache::new();
        cache.insert(
            "what color are bananas",
            vec![("bananas are yellow".to_string(), 0.9)],
        );
        let hit = cache.find("what color are the bananas");
        assert_eq!(hit, Some(vec![("bananas are yellow".to_string(), 0.9)]));
    }

    #[test]
    fn cache_miss_for_dissimilar_query() {
        let mut cache = QueryCache::new();
        cache.insert("what color are bananas", vec![("x".to_string(), 0.9)]);
        assert!(cache.find("tell me about rust ownership").is_none());
    }

    #[test]
    fn cache_evicts_oldest_beyond_capacity() {
        let mut cache = QueryCache::new();
        for i in 0..N_CACHE + 5 {
            cache.insert(&format!("unique query number {i}"), vec![(i.to_string(), 1.0)]);
        }
        assert_eq!(cache.entries.len(), N_CACHE);
    }

    #[test]
    fn merge_includes_both_sections_in_fixed_order() {
        let formatted = merge_and_format(
            "tell me about pears",
            Some("Pears are sweet fruits."),
            Some("earlier pears chat"),
            None,
        );
        let lib_pos = formatted.find("[KNOWLEDGE BASE").unwrap();
        let journal_pos = formatted.find("[PAST CONVERSATIONS").unwrap();
        assert!(lib_pos < journal_pos);
        assert!(formatted.contains("Pears are sweet fruits."));
        assert!(formatted.contains("earlier pears chat"));
    }

    #[test]
    fn merge_with_no_results_returns_raw_message() {
        let formatted = merge_and_format("hello", None, None, None);
        assert_eq!(formatted, "hello");
    }

    #[test]
    fn merge_with_template_substitutes_placeholders() {
        let formatted = merge_and_format(
            "hi",
            Some("ctx"),
            None,
            Some("CONTEXT:{rag_context}\nQ:{user_message}"),
        );
        assert_eq!(
            formatted,
            "CONTEXT:[KNOWLEDGE BASE - Documents from your personal library]\nctx\nQ:hi"
        );
    }
}
