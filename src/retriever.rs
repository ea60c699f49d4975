use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::index::{IndexHandle, ScoredChunk};
use log::debug;
use std::sync::Arc;

/// Finds the chunks most relevant to a query.
///
/// Holds the same embedder that built the index; vectors from different
/// models are not comparable.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Retriever { embedder }
    }

    /// Return the `k` most similar chunks, best first
    pub async fn retrieve(&self, index: &IndexHandle, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(RagError::Embedding)?;

        let hits = index.search(&embedding, k).await?;
        debug!(
            "Retrieved {} chunks (scores: {:?})",
            hits.len(),
            hits.iter().map(|hit| hit.score).collect::<Vec<f32>>()
        );
        Ok(hits)
    }
}
