//! Vector index bootstrap: build the index from the corpus when its location
//! is absent, otherwise load it as-is.
//!
//! The local backend persists to a directory holding `meta.json` and
//! `index.json`. A build writes into a sibling `<name>.tmp` directory and
//! renames it into place, so an interrupted build never leaves a directory
//! that would later be mistaken for a finished index.

use crate::chunking::{split_into_chunks, ChunkingConfig, TextChunk};
use crate::corpus::{self, Corpus};
use crate::database::{QdrantConfig, QdrantStore, StoredModel, VectorStore};
use crate::embeddings::{cosine_similarity, Embedder, Embedding};
use crate::error::{RagError, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

pub const INDEX_FORMAT_VERSION: u32 = 1;
const META_FILE: &str = "meta.json";
const DATA_FILE: &str = "index.json";

/// Where the persisted index lives
#[derive(Debug, Clone)]
pub enum IndexLocation {
    Directory(PathBuf),
    Qdrant(QdrantConfig),
}

/// Whether `ensure` built a fresh index or loaded an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Built,
    Loaded,
}

/// Describes how a persisted index was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunking: ChunkingConfig,
    pub document_id: String,
    pub corpus_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Position of the chunk in the corpus
    pub id: usize,
    pub chunk: TextChunk,
    pub embedding: Embedding,
}

/// A chunk returned by a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: usize,
    pub chunk: TextChunk,
    pub score: f32,
}

#[derive(Serialize, Deserialize)]
struct IndexData {
    chunks: Vec<IndexedChunk>,
}

/// In-memory flat index with cosine similarity search
#[derive(Debug, Clone)]
pub struct LocalIndex {
    metadata: IndexMetadata,
    chunks: Vec<IndexedChunk>,
}

impl LocalIndex {
    pub fn new(metadata: IndexMetadata, chunks: Vec<TextChunk>, embeddings: Vec<Embedding>) -> Self {
        let chunks = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(id, (chunk, embedding))| IndexedChunk {
                id,
                chunk,
                embedding,
            })
            .collect();

        LocalIndex { metadata, chunks }
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Return the `k` chunks most similar to `query`, best first. Equal scores
    /// keep corpus order.
    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredChunk>> {
        if query.dimension() != self.metadata.dimension {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} dimensions", self.metadata.dimension),
                actual: format!("{} dimensions", query.dimension()),
            });
        }

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .map(|entry| ScoredChunk {
                id: entry.id,
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&query.values, &entry.embedding.values),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Persist the index to the directory `path`, which must not exist yet
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let staging = staging_path(path);
        if fs::try_exists(&staging).await? {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        let metadata = serde_json::to_vec_pretty(&self.metadata)?;
        fs::write(staging.join(META_FILE), metadata).await?;

        let data = serde_json::to_vec(&IndexData {
            chunks: self.chunks.clone(),
        })?;
        fs::write(staging.join(DATA_FILE), data).await?;

        fs::rename(&staging, path).await?;
        debug!("Persisted {} chunks to {}", self.chunks.len(), path.display());
        Ok(())
    }

    /// Load a persisted index from the directory `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let metadata: IndexMetadata =
            serde_json::from_slice(&fs::read(path.join(META_FILE)).await?)?;
        if metadata.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::IncompatibleIndex(format!(
                "format version {} (expected {})",
                metadata.format_version, INDEX_FORMAT_VERSION
            )));
        }

        let data: IndexData = serde_json::from_slice(&fs::read(path.join(DATA_FILE)).await?)?;
        if let Some(bad) = data
            .chunks
            .iter()
            .find(|entry| entry.embedding.dimension() != metadata.dimension)
        {
            return Err(RagError::IncompatibleIndex(format!(
                "chunk {} has {} dimensions, metadata says {}",
                bad.id,
                bad.embedding.dimension(),
                metadata.dimension
            )));
        }

        Ok(LocalIndex {
            metadata,
            chunks: data.chunks,
        })
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("index"));
    name.push(".tmp");
    path.with_file_name(name)
}

enum Backend {
    Local(LocalIndex),
    Remote(Arc<dyn VectorStore>),
}

/// A ready-to-query index, local or remote
pub struct IndexHandle {
    backend: Backend,
    source: IndexSource,
}

impl IndexHandle {
    pub fn source(&self) -> IndexSource {
        self.source
    }

    /// The local index, when this handle is backed by one
    pub fn as_local(&self) -> Option<&LocalIndex> {
        match &self.backend {
            Backend::Local(index) => Some(index),
            Backend::Remote(_) => None,
        }
    }

    pub async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        match &self.backend {
            Backend::Local(index) => index.search(query, k),
            Backend::Remote(store) => store.search(query, k).await.map_err(RagError::VectorStore),
        }
    }
}

/// Builds or loads the corpus index
#[derive(Clone)]
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, chunking: ChunkingConfig) -> Self {
        IndexBuilder { embedder, chunking }
    }

    /// Build-or-load against any supported location
    pub async fn ensure(&self, corpus_path: &Path, location: &IndexLocation) -> Result<IndexHandle> {
        match location {
            IndexLocation::Directory(path) => self.ensure_index(corpus_path, path).await,
            IndexLocation::Qdrant(config) => {
                let store = QdrantStore::new(config.clone()).map_err(RagError::VectorStore)?;
                self.ensure_store(corpus_path, Arc::new(store)).await
            }
        }
    }

    /// Load the index at `index_path` if it exists, otherwise build it from
    /// the corpus and persist it there.
    pub async fn ensure_index(&self, corpus_path: &Path, index_path: &Path) -> Result<IndexHandle> {
        if fs::try_exists(index_path).await? {
            info!("Loading existing vector store from {}", index_path.display());
            let index = LocalIndex::load(index_path).await?;
            self.check_model(&index.metadata().embedding_model, index.metadata().dimension)?;
            warn_if_stale(corpus_path, index_path, index.metadata()).await;
            info!("Loaded {} chunks", index.len());
            return Ok(IndexHandle {
                backend: Backend::Local(index),
                source: IndexSource::Loaded,
            });
        }

        info!(
            "Creating new vector store from {}...",
            corpus_path.display()
        );
        let corpus = Corpus::load(corpus_path).await?;
        let index = self.build_local(&corpus).await?;
        index.save(index_path).await?;
        info!(
            "Vector store with {} chunks saved to {}",
            index.len(),
            index_path.display()
        );

        Ok(IndexHandle {
            backend: Backend::Local(index),
            source: IndexSource::Built,
        })
    }

    /// Chunk and embed a corpus into an in-memory index
    pub async fn build_local(&self, corpus: &Corpus) -> Result<LocalIndex> {
        let (chunks, embeddings) = self.embed_corpus(corpus).await?;
        let dimension = embeddings
            .first()
            .map(Embedding::dimension)
            .unwrap_or_else(|| self.embedder.dimension());

        let metadata = IndexMetadata {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: self.embedder.model_id().to_string(),
            dimension,
            chunking: self.chunking,
            document_id: corpus.document_id.clone(),
            corpus_hash: corpus.content_hash.clone(),
        };

        Ok(LocalIndex::new(metadata, chunks, embeddings))
    }

    /// Build-or-load against a remote collection. A build that fails after
    /// the collection was created deletes it again, so a partial collection
    /// is never loaded later.
    pub async fn ensure_store(
        &self,
        corpus_path: &Path,
        store: Arc<dyn VectorStore>,
    ) -> Result<IndexHandle> {
        if store.collection_exists().await.map_err(RagError::VectorStore)? {
            info!("Using existing collection: {}", store.collection());
            match store.stored_model().await.map_err(RagError::VectorStore)? {
                Some(model) => self.check_model(&model.embedding_model, model.dimension)?,
                None => warn!("Collection {} is empty", store.collection()),
            }
            return Ok(IndexHandle {
                backend: Backend::Remote(store),
                source: IndexSource::Loaded,
            });
        }

        info!(
            "Creating collection {} from {}...",
            store.collection(),
            corpus_path.display()
        );
        let corpus = Corpus::load(corpus_path).await?;
        let (chunks, embeddings) = self.embed_corpus(&corpus).await?;
        let model = StoredModel {
            embedding_model: self.embedder.model_id().to_string(),
            dimension: embeddings
                .first()
                .map(Embedding::dimension)
                .unwrap_or_else(|| self.embedder.dimension()),
        };

        store
            .create_collection(model.dimension)
            .await
            .map_err(RagError::VectorStore)?;
        if let Err(e) = store.store_chunks(&chunks, embeddings, &model).await {
            if let Err(cleanup) = store.delete_collection().await {
                warn!(
                    "Failed to delete partial collection {}: {}",
                    store.collection(),
                    cleanup
                );
            }
            return Err(RagError::VectorStore(e));
        }
        info!("Stored {} chunks in {}", chunks.len(), store.collection());

        Ok(IndexHandle {
            backend: Backend::Remote(store),
            source: IndexSource::Built,
        })
    }

    /// Remove a persisted index so the next `ensure` rebuilds it
    pub async fn remove(&self, location: &IndexLocation) -> Result<bool> {
        match location {
            IndexLocation::Directory(path) => {
                if !fs::try_exists(path).await? {
                    return Ok(false);
                }
                fs::remove_dir_all(path).await?;
                info!("Removed vector store at {}", path.display());
                Ok(true)
            }
            IndexLocation::Qdrant(config) => {
                let store = QdrantStore::new(config.clone()).map_err(RagError::VectorStore)?;
                remove_store(&store).await
            }
        }
    }

    async fn embed_corpus(&self, corpus: &Corpus) -> Result<(Vec<TextChunk>, Vec<Embedding>)> {
        let chunks = split_into_chunks(&corpus.content, &corpus.document_id, &self.chunking);
        info!("Split into {} chunks", chunks.len());
        if chunks.is_empty() {
            warn!("Corpus {} has no text to index", corpus.document_id);
        }

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(RagError::Embedding)?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} vectors", chunks.len()),
                actual: format!("{} vectors", embeddings.len()),
            });
        }

        if let Some(first) = embeddings.first() {
            if let Some(odd) = embeddings.iter().find(|e| e.dimension() != first.dimension()) {
                return Err(RagError::EmbeddingMismatch {
                    expected: format!("{} dimensions", first.dimension()),
                    actual: format!("{} dimensions", odd.dimension()),
                });
            }
        }

        Ok((chunks, embeddings))
    }

    fn check_model(&self, embedding_model: &str, dimension: usize) -> Result<()> {
        if embedding_model != self.embedder.model_id() {
            return Err(RagError::EmbeddingMismatch {
                expected: embedding_model.to_string(),
                actual: self.embedder.model_id().to_string(),
            });
        }
        if dimension != self.embedder.dimension() {
            return Err(RagError::EmbeddingMismatch {
                expected: format!("{} dimensions", dimension),
                actual: format!("{} dimensions", self.embedder.dimension()),
            });
        }
        Ok(())
    }
}

async fn remove_store(store: &dyn VectorStore) -> Result<bool> {
    if !store.collection_exists().await.map_err(RagError::VectorStore)? {
        return Ok(false);
    }
    store.delete_collection().await.map_err(RagError::VectorStore)?;
    info!("Deleted collection {}", store.collection());
    Ok(true)
}

/// Log when the corpus no longer matches the snapshot the index was built from
async fn warn_if_stale(corpus_path: &Path, index_path: &Path, metadata: &IndexMetadata) {
    match corpus::hash_file(corpus_path).await {
        Ok(hash) if hash != metadata.corpus_hash => warn!(
            "Corpus {} changed since the index was built; remove {} to rebuild it",
            corpus_path.display(),
            index_path.display()
        ),
        Ok(_) => {}
        Err(e) => debug!("Skipping staleness check: {}", e),
    }
}
