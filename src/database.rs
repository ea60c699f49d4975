use crate::chunking::{estimate_token_count, TextChunk};
use crate::config::mask_secret;
use crate::embeddings::Embedding;
use crate::index::ScoredChunk;
use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;

const DEFAULT_COLLECTION: &str = "sharebite";

/// Configuration for Qdrant
#[derive(Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl QdrantConfig {
    /// Read the configuration through `lookup`; `None` when `QDRANT_URL` is unset
    pub fn from_lookup<F>(lookup: &F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("QDRANT_URL").filter(|url| !url.trim().is_empty())?;
        Some(QdrantConfig {
            url,
            api_key: lookup("QDRANT_API_KEY"),
            collection: lookup("QDRANT_COLLECTION")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        })
    }
}

impl fmt::Debug for QdrantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QdrantConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("collection", &self.collection)
            .finish()
    }
}

/// Model that produced the vectors of a stored index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredModel {
    pub embedding_model: String,
    pub dimension: usize,
}

/// A remote collection holding an indexed corpus
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    async fn collection_exists(&self) -> Result<bool>;

    /// Create the collection for vectors of `dimension` values
    async fn create_collection(&self, dimension: usize) -> Result<()>;

    async fn delete_collection(&self) -> Result<()>;

    /// Store chunks in corpus order, tagging every point with `model`
    async fn store_chunks(
        &self,
        chunks: &[TextChunk],
        embeddings: Vec<Embedding>,
        model: &StoredModel,
    ) -> Result<()>;

    /// The model recorded on the stored points; `None` for an empty collection
    async fn stored_model(&self) -> Result<Option<StoredModel>>;

    /// Search for the `limit` most similar chunks
    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>>;
}

/// A corpus index kept in a Qdrant collection
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    /// Create a new Qdrant client
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .with_context(|| format!("Failed to connect to Qdrant at {}", config.url))?;

        Ok(QdrantStore {
            client,
            collection: config.collection,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool> {
        self.client
            .collection_exists(self.collection.as_str())
            .await
            .with_context(|| format!("Failed to check collection {}", self.collection))
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        let create_collection = CreateCollectionBuilder::new(self.collection.clone())
            .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection))?;

        Ok(())
    }

    async fn delete_collection(&self) -> Result<()> {
        self.client
            .delete_collection(self.collection.as_str())
            .await
            .with_context(|| format!("Failed to delete collection {}", self.collection))?;

        Ok(())
    }

    async fn store_chunks(
        &self,
        chunks: &[TextChunk],
        embeddings: Vec<Embedding>,
        model: &StoredModel,
    ) -> Result<()> {
        let points = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(idx, (chunk, embedding))| {
                let payload = Payload::try_from(point_payload(idx, chunk, model))
                    .context("Failed to build point payload")?;

                Ok(PointStruct::new(idx as u64, embedding.values, payload))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
            .await
            .with_context(|| {
                format!("Failed to upsert points in collection {}", self.collection)
            })?;

        Ok(())
    }

    async fn stored_model(&self) -> Result<Option<StoredModel>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(self.collection.clone())
                    .limit(1)
                    .with_payload(true),
            )
            .await
            .with_context(|| format!("Failed to read collection {}", self.collection))?;

        Ok(response
            .result
            .first()
            .and_then(|point| decode_stored_model(&point.payload)))
    }

    async fn search(&self, query: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>> {
        let search_request =
            SearchPointsBuilder::new(self.collection.clone(), query.values.clone(), limit as u64)
                .with_payload(true);

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection))?;

        // Convert search results back to chunks
        Ok(search_response
            .result
            .into_iter()
            .filter_map(|point| decode_scored_chunk(&point.payload, point.score, &self.collection))
            .collect())
    }
}

fn point_payload(idx: usize, chunk: &TextChunk, model: &StoredModel) -> serde_json::Value {
    json!({
        "text": chunk.text,
        "document_id": chunk.document_id,
        "start_position": chunk.start_position,
        "token_count": chunk.token_count,
        "chunk_index": idx,
        "embedding_model": model.embedding_model,
        "dimension": model.dimension,
    })
}

fn payload_usize(payload: &HashMap<String, Value>, key: &str) -> Option<usize> {
    payload
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
}

/// Rebuild a chunk from a point payload; points without text are skipped
fn decode_scored_chunk(
    payload: &HashMap<String, Value>,
    score: f32,
    collection: &str,
) -> Option<ScoredChunk> {
    let text = payload.get("text")?.as_str()?.to_string();
    let document_id = payload
        .get("document_id")
        .and_then(|v| v.as_str())
        .cloned()
        .unwrap_or_else(|| collection.to_string());
    let start_position = payload_usize(payload, "start_position").unwrap_or(0);
    let token_count = payload_usize(payload, "token_count")
        .unwrap_or_else(|| estimate_token_count(&text));
    let id = payload_usize(payload, "chunk_index").unwrap_or(0);

    Some(ScoredChunk {
        id,
        chunk: TextChunk {
            text,
            token_count,
            document_id,
            start_position,
        },
        score,
    })
}

fn decode_stored_model(payload: &HashMap<String, Value>) -> Option<StoredModel> {
    Some(StoredModel {
        embedding_model: payload.get("embedding_model")?.as_str()?.clone(),
        dimension: payload_usize(payload, "dimension")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_lookup() {
        let vars = HashMap::from([
            ("QDRANT_URL", "http://localhost:6334"),
            ("QDRANT_API_KEY", "qdrant-secret-key-123"),
        ]);
        let config =
            QdrantConfig::from_lookup(&|key: &str| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.collection, "sharebite");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-key-123"));
    }

    #[test]
    fn test_config_absent_without_url() {
        let vars: HashMap<&str, &str> = HashMap::from([("QDRANT_API_KEY", "key")]);
        assert!(QdrantConfig::from_lookup(&|key: &str| vars.get(key).map(|v| v.to_string())).is_none());
    }

    fn payload(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_decode_full_payload() {
        let payload = payload(&[
            ("text", Value::from("ShareBite helps donate surplus food.")),
            ("document_id", Value::from("sharebite_info.txt")),
            ("start_position", Value::from(120i64)),
            ("token_count", Value::from(9i64)),
            ("chunk_index", Value::from(2i64)),
        ]);

        let hit = decode_scored_chunk(&payload, 0.75, "sharebite").unwrap();
        assert_eq!(hit.id, 2);
        assert_eq!(hit.score, 0.75);
        assert_eq!(hit.chunk.text, "ShareBite helps donate surplus food.");
        assert_eq!(hit.chunk.document_id, "sharebite_info.txt");
        assert_eq!(hit.chunk.start_position, 120);
        assert_eq!(hit.chunk.token_count, 9);
    }

    #[test]
    fn test_decode_fills_missing_fields() {
        let payload = payload(&[("text", Value::from("Volunteers drive pickups daily."))]);

        let hit = decode_scored_chunk(&payload, 0.5, "sharebite").unwrap();
        assert_eq!(hit.id, 0);
        assert_eq!(hit.chunk.document_id, "sharebite");
        assert_eq!(hit.chunk.start_position, 0);
        assert_eq!(
            hit.chunk.token_count,
            estimate_token_count("Volunteers drive pickups daily.")
        );
    }

    #[test]
    fn test_decode_rejects_odd_types() {
        let numeric_text = payload(&[("text", Value::from(42i64))]);
        assert!(decode_scored_chunk(&numeric_text, 0.5, "sharebite").is_none());
        assert!(decode_scored_chunk(&HashMap::new(), 0.5, "sharebite").is_none());

        let payload = payload(&[
            ("text", Value::from("Donors get tax receipts.")),
            ("start_position", Value::from(-5i64)),
            ("chunk_index", Value::from("three")),
            ("document_id", Value::from(7i64)),
        ]);
        let hit = decode_scored_chunk(&payload, 0.1, "sharebite").unwrap();
        assert_eq!(hit.chunk.start_position, 0);
        assert_eq!(hit.id, 0);
        assert_eq!(hit.chunk.document_id, "sharebite");
    }

    #[test]
    fn test_decode_stored_model() {
        let stored = payload(&[
            ("embedding_model", Value::from("sentence-transformers/all-MiniLM-L6-v2")),
            ("dimension", Value::from(384i64)),
        ]);
        assert_eq!(
            decode_stored_model(&stored),
            Some(StoredModel {
                embedding_model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
                dimension: 384,
            })
        );

        let legacy = payload(&[("text", Value::from("ShareBite"))]);
        assert_eq!(decode_stored_model(&legacy), None);
    }

    #[test]
    fn test_point_payload_records_model() {
        let chunk = TextChunk {
            text: "ShareBite".to_string(),
            token_count: 1,
            document_id: "sharebite_info.txt".to_string(),
            start_position: 0,
        };
        let model = StoredModel {
            embedding_model: "hashing-sha256-384".to_string(),
            dimension: 384,
        };
        let payload = point_payload(4, &chunk, &model);
        assert_eq!(payload["chunk_index"], 4);
        assert_eq!(payload["embedding_model"], "hashing-sha256-384");
        assert_eq!(payload["dimension"], 384);
    }
}
