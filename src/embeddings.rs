use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tokio::task;

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Turns text into vectors. The same embedder must be used to build an index
/// and to query it.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier persisted with an index so a mismatched model is refused on load
    fn model_id(&self) -> &str;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Generate an embedding for a text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for multiple texts, in order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

/// all-MiniLM-L6-v2 sentence embeddings computed in-process with fastembed
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    pub const MODEL_ID: &'static str = "sentence-transformers/all-MiniLM-L6-v2";
    pub const DIMENSION: usize = 384;

    /// Load the model, downloading it into the fastembed cache on first use
    pub fn try_new() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .context("Failed to load all-MiniLM-L6-v2")?;
        info!("Loaded local embedding model {}", Self::MODEL_ID);

        Ok(LocalEmbedder {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .context("Embedding model returned no vector")
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        let texts: Vec<String> = texts.iter().map(|text| text.to_string()).collect();
        // Inference is CPU bound
        let vectors = task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("Embedding model lock poisoned"))?;
            model.embed(texts, None).context("Failed to embed texts")
        })
        .await
        .context("Embedding task failed")??;

        Ok(vectors
            .into_iter()
            .map(|values| Embedding { values })
            .collect())
    }
}

/// Signed feature-hashing bag of lowercase words. Test and stub use only:
/// it matches words, not meaning.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        HashingEmbedder {
            dimension,
            model_id: format!("hashing-sha256-{}", dimension),
        }
    }

    fn embed_sync(&self, text: &str) -> Embedding {
        let mut values = vec![0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            values.iter_mut().for_each(|v| *v /= norm);
        }

        Embedding { values }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        HashingEmbedder::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

/// Cosine similarity of two vectors; 0.0 when either is all zeros or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (dot / denom) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("ShareBite donates food").await.unwrap();
        let b = embedder.embed("sharebite DONATES food!").await.unwrap();
        assert_eq!(a.dimension(), 384);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_related_text_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("What does ShareBite do with surplus food?").await.unwrap();
        let related = embedder
            .embed("ShareBite helps donate surplus food to shelters.")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("The volunteer handbook covers parking rules.")
            .await
            .unwrap();

        let related_score = cosine_similarity(&query.values, &related.values);
        let unrelated_score = cosine_similarity(&query.values, &unrelated.values);
        assert!(related_score > unrelated_score);
    }

    #[tokio::test]
    async fn test_embed_batch_keeps_order() {
        let embedder = HashingEmbedder::new(16);
        let batch = embedder.embed_batch(&["alpha", "beta"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(embedder.model_id(), "hashing-sha256-16");
    }

    #[test]
    fn test_cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    async fn test_local_embedder_captures_meaning() {
        let embedder = LocalEmbedder::try_new().unwrap();
        let query = embedder.embed("Who brings the food to shelters?").await.unwrap();
        let related = embedder
            .embed("Volunteer drivers deliver donations to shelters.")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("Donors receive a monthly tax receipt.")
            .await
            .unwrap();

        assert_eq!(query.dimension(), LocalEmbedder::DIMENSION);
        assert!(
            cosine_similarity(&query.values, &related.values)
                > cosine_similarity(&query.values, &unrelated.values)
        );
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
