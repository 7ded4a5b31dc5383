//! C8 — thin Vector Store driver: collection management, upsert, filtered
//! search, count, delete-by-filter. Two modes: in-process embedded and
//! remote server, with graceful startup fallback from remote to embedded on
//! a connection-class health-probe failure.

use crate::error::VectorStoreError;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A retrieved hit: payload text plus similarity score, descending order.
#[derive(Debug, Clone)]
pub struct ScoredText {
    pub text: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
}

/// Single-field exact-match filter — the only shape every caller in this
/// codebase needs, and the one both backends below can interpret directly.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub key: String,
    pub value: String,
}

pub fn match_filter(key: &str, value: &str) -> FieldFilter {
    FieldFilter {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn to_qdrant_filter(filter: &FieldFilter) -> Filter {
    Filter::must([Condition::matches(filter.key.clone(), filter.value.clone())])
}

enum Backend {
    Remote(Qdrant),
    Embedded(EmbeddedIndex),
}

pub struct VectorStoreDriver {
    backend: Backend,
}

/// Connection-class errors degrade a remote-mode startup to embedded mode;
/// anything else is fatal.
fn is_connection_class_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["connection", "refused", "timeout", "unreachable"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl VectorStoreDriver {
    /// `use_persistent = true` attempts a remote connection at
    /// `remote_url` and health-probes it via `list_collections`. A
    /// connection-class failure falls back to an embedded (in-memory)
    /// driver; any other error is fatal.
    pub async fn new(use_persistent: bool, remote_url: &str) -> Result<Self, VectorStoreError> {
        if !use_persistent {
            return Ok(Self::embedded());
        }

        let client = Qdrant::from_url(remote_url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| VectorStoreError::Client(e.to_string()))?;

        match client.list_collections().await {
            Ok(_) => {
                info!(url = remote_url, "connected to remote vector store");
                Ok(Self {
                    backend: Backend::Remote(client),
                })
            }
            Err(e) => {
                let message = e.to_string();
                if is_connection_class_error(&message) {
                    warn!(error = %message, "remote vector store unreachable, falling back to embedded mode");
                    Ok(Self::embedded())
                } else {
                    Err(VectorStoreError::Client(message))
                }
            }
        }
    }

    fn embedded() -> Self {
        info!("using in-process embedded vector index");
        Self {
            backend: Backend::Embedded(EmbeddedIndex::new()),
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.backend, Backend::Embedded(_))
    }

    /// Idempotent create: tolerates a benign "already exists" race between
    /// the existence check and the create call.
    pub async fn setup_collection(&self, name: &str, dim: u64) -> Result<(), VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let exists = client
                    .collection_exists(name)
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;

                if exists {
                    return Ok(());
                }

                info!(collection = name, "creating vector collection");
                match client
                    .create_collection(
                        CreateCollectionBuilder::new(name)
                            .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
                    )
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        let message = e.to_string();
                        if message.contains("already exists") {
                            debug!(collection = name, "collection created concurrently");
                            Ok(())
                        } else {
                            Err(VectorStoreError::Client(message))
                        }
                    }
                }
            }
            Backend::Embedded(index) => {
                index.setup_collection(name).await;
                Ok(())
            }
        }
    }

    pub async fn add_points(
        &self,
        collection: &str,
        points: Vec<(Vec<f32>, HashMap<String, serde_json::Value>)>,
    ) -> Result<usize, VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let count = points.len();
                let structs: Vec<PointStruct> = points
                    .into_iter()
                    .map(|(vector, payload)| {
                        let payload: HashMap<String, qdrant_client::qdrant::Value> = payload
                            .into_iter()
                            .map(|(k, v)| (k, json_to_qdrant_value(v)))
                            .collect();
                        PointStruct::new(Uuid::new_v4().to_string(), vector, payload)
                    })
                    .collect();

                client
                    .upsert_points(UpsertPointsBuilder::new(collection, structs).wait(true))
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;

                Ok(count)
            }
            Backend::Embedded(index) => Ok(index.add_points(collection, points).await),
        }
    }

    pub async fn query_points(
        &self,
        collection: &str,
        vector: Vec<f32>,
        filter: Option<FieldFilter>,
        limit: u64,
    ) -> Result<Vec<ScoredText>, VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let mut builder =
                    SearchPointsBuilder::new(collection, vector, limit).with_payload(true);
                if let Some(filter) = &filter {
                    builder = builder.filter(to_qdrant_filter(filter));
                }

                let response = client
                    .search_points(builder)
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;

                Ok(response
                    .result
                    .into_iter()
                    .map(|point| {
                        let payload: HashMap<String, serde_json::Value> = point
                            .payload
                            .into_iter()
                            .map(|(k, v)| (k, qdrant_value_to_json(v)))
                            .collect();
                        let text = payload
                            .get("text")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        ScoredText {
                            text,
                            score: point.score,
                            payload,
                        }
                    })
                    .collect())
            }
            Backend::Embedded(index) => {
                Ok(index.query_points(collection, vector, filter.as_ref(), limit).await)
            }
        }
    }

    pub async fn count(
        &self,
        collection: &str,
        filter: Option<FieldFilter>,
    ) -> Result<u64, VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let mut builder = CountPointsBuilder::new(collection).exact(true);
                if let Some(filter) = &filter {
                    builder = builder.filter(to_qdrant_filter(filter));
                }
                let response = client
                    .count(builder)
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;
                Ok(response.result.map(|r| r.count).unwrap_or(0))
            }
            Backend::Embedded(index) => Ok(index.count(collection, filter.as_ref()).await),
        }
    }

    /// Returns the number of points removed. Qdrant's delete call does not
    /// itself report a count, so the caller counts before deleting.
    pub async fn delete_by_filter(
        &self,
        collection: &str,
        filter: FieldFilter,
    ) -> Result<u64, VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let deleted_count = self
                    .count(collection, Some(filter.clone()))
                    .await?;

                client
                    .delete_points(
                        DeletePointsBuilder::new(collection).points(to_qdrant_filter(&filter)),
                    )
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;

                Ok(deleted_count)
            }
            Backend::Embedded(index) => Ok(index.delete_by_filter(collection, &filter).await),
        }
    }

    pub async fn delete_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                client
                    .delete_collection(collection)
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;
                Ok(())
            }
            Backend::Embedded(index) => {
                index.delete_collection(collection).await;
                Ok(())
            }
        }
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let response = client
                    .list_collections()
                    .await
                    .map_err(|e| VectorStoreError::Client(e.to_string()))?;
                Ok(response.collections.into_iter().map(|c| c.name).collect())
            }
            Backend::Embedded(index) => Ok(index.list_collections().await),
        }
    }

    /// Paginated scroll over all point ids in a collection.
    pub async fn scroll_all_point_ids(
        &self,
        collection: &str,
    ) -> Result<Vec<String>, VectorStoreError> {
        match &self.backend {
            Backend::Remote(client) => {
                let mut ids = Vec::new();
                let mut offset = None;

                loop {
                    let mut builder = ScrollPointsBuilder::new(collection).limit(256);
                    if let Some(offset) = offset.clone() {
                        builder = builder.offset(offset);
                    }
                    let response = client
                        .scroll(builder)
                        .await
                        .map_err(|e| VectorStoreError::Client(e.to_string()))?;

                    if response.result.is_empty() {
                        break;
                    }

                    offset = response.result.last().and_then(|p| p.id.clone());
                    for point in response.result {
                        if let Some(id) = point.id {
                            ids.push(format!("{:?}", id));
                        }
                    }
                    if response.next_page_offset.is_none() {
                        break;
                    }
                }

                Ok(ids)
            }
            Backend::Embedded(index) => Ok(index.scroll_all_point_ids(collection).await),
        }
    }
}

/// A genuine in-process index (no gRPC, no external daemon): brute-force
/// cosine similarity over an in-memory point list per collection. This is
/// what backs `storage_use_persistent = false` and the remote-unreachable
/// fallback, so both keep working with no Qdrant process anywhere.
struct EmbeddedPoint {
    id: String,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Default)]
struct EmbeddedCollection {
    points: Vec<EmbeddedPoint>,
}

struct EmbeddedIndex {
    collections: RwLock<HashMap<String, EmbeddedCollection>>,
}

impl EmbeddedIndex {
    fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    async fn setup_collection(&self, name: &str) {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();
    }

    async fn add_points(
        &self,
        collection: &str,
        points: Vec<(Vec<f32>, HashMap<String, serde_json::Value>)>,
    ) -> usize {
        let count = points.len();
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        for (vector, payload) in points {
            entry.points.push(EmbeddedPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload,
            });
        }
        count
    }

    async fn query_points(
        &self,
        collection: &str,
        vector: Vec<f32>,
        filter: Option<&FieldFilter>,
        limit: u64,
    ) -> Vec<ScoredText> {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return Vec::new();
        };

        let mut scored: Vec<ScoredText> = coll
            .points
            .iter()
            .filter(|p| point_matches(filter, &p.payload))
            .map(|p| {
                let text = p
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                ScoredText {
                    text,
                    score: cosine_similarity(&vector, &p.vector),
                    payload: p.payload.clone(),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit as usize);
        scored
    }

    async fn count(&self, collection: &str, filter: Option<&FieldFilter>) -> u64 {
        let collections = self.collections.read().await;
        let Some(coll) = collections.get(collection) else {
            return 0;
        };
        coll.points
            .iter()
            .filter(|p| point_matches(filter, &p.payload))
            .count() as u64
    }

    async fn delete_by_filter(&self, collection: &str, filter: &FieldFilter) -> u64 {
        let mut collections = self.collections.write().await;
        let Some(coll) = collections.get_mut(collection) else {
            return 0;
        };
        let before = coll.points.len();
        coll.points.retain(|p| !point_matches(Some(filter), &p.payload));
        (before - coll.points.len()) as u64
    }

    async fn delete_collection(&self, collection: &str) {
        self.collections.write().await.remove(collection);
    }

    async fn list_collections(&self) -> Vec<String> {
        self.collections.read().await.keys().cloned().collect()
    }

    async fn scroll_all_point_ids(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.points.iter().map(|p| p.id.clone()).collect())
            .unwrap_or_default()
    }
}

fn point_matches(filter: Option<&FieldFilter>, payload: &HashMap<String, serde_json::Value>) -> bool {
    match filter {
        None => true,
        Some(f) => payload.get(&f.key).and_then(|v| v.as_str()) == Some(f.value.as_str()),
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn json_to_qdrant_value(value: serde_json::Value) -> qdrant_client::qdrant::Value {
    use qdrant_client::qdrant::value::Kind;
    use qdrant_client::qdrant::Value as QdrantValue;

    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Kind::StringValue(s),
        other => Kind::StringValue(other.to_string()),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;

    match value.kind {
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::json!(d),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_class_errors_are_classified() {
        assert!(is_connection_class_error("Connection refused (os error 111)"));
        assert!(is_connection_class_error("operation timed out"));
        assert!(is_connection_class_error("host unreachable"));
        assert!(!is_connection_class_error("invalid API key"));
        assert!(!is_connection_class_error("collection already exists"));
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embedded_driver_round_trips_without_a_qdrant_process() {
        let driver = VectorStoreDriver::new(false, "http://unused:6334")
            .await
            .unwrap();
        assert!(driver.is_embedded());

        driver.setup_collection("docs", 3).await.unwrap();

        let mut payload_a = HashMap::new();
        payload_a.insert("text".to_string(), serde_json::json!("alpha"));
        payload_a.insert("session_id".to_string(), serde_json::json!("s1"));
        let mut payload_b = HashMap::new();
        payload_b.insert("text".to_string(), serde_json::json!("beta"));
        payload_b.insert("session_id".to_string(), serde_json::json!("s2"));

        driver
            .add_points(
                "docs",
                vec![
                    (vec![1.0, 0.0, 0.0], payload_a),
                    (vec![0.0, 1.0, 0.0], payload_b),
                ],
            )
            .await
            .unwrap();

        let hits = driver
            .query_points("docs", vec![1.0, 0.0, 0.0], None, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "alpha");
        assert!(hits[0].score > hits[1].score);

        let scoped = driver
            .query_points("docs", vec![1.0, 0.0, 0.0], Some(match_filter("session_id", "s2")), 5)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].text, "beta");

        assert_eq!(driver.count("docs", None).await.unwrap(), 2);
        assert_eq!(
            driver
                .count("docs", Some(match_filter("session_id", "s1")))
                .await
                .unwrap(),
            1
        );

        let deleted = driver
            .delete_by_filter("docs", match_filter("session_id", "s1"))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(driver.count("docs", None).await.unwrap(), 1);
    }
}
