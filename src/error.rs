use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Errors raised inside the retrieval/generation engine.
///
/// Callers outside the engine only ever see the sentinel answer text, so every
/// variant carries a stable [`RagError::code`] that is logged and kept on the
/// answer outcome for diagnosis.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Missing query")]
    MissingQuery,

    #[error("Corpus file not found: {}", .0.display())]
    CorpusNotFound(PathBuf),

    #[error("Failed to read corpus {}: {message}", .path.display())]
    CorpusRead { path: PathBuf, message: String },

    #[error("Unsupported corpus format: {0}. Only text and PDF files are supported.")]
    UnsupportedCorpus(String),

    #[error("Index IO error: {0}")]
    IndexIo(#[from] std::io::Error),

    #[error("Index format error: {0}")]
    IndexFormat(#[from] serde_json::Error),

    #[error("Incompatible index: {0}")]
    IncompatibleIndex(String),

    #[error("Embedding mismatch: index expects {expected}, got {actual}")]
    EmbeddingMismatch { expected: String, actual: String },

    #[error("Embedding error: {0:#}")]
    Embedding(anyhow::Error),

    #[error("Generation error: {0:#}")]
    Generation(anyhow::Error),

    #[error("Vector store error: {0:#}")]
    VectorStore(anyhow::Error),
}

impl RagError {
    /// Stable machine-readable code for logs and answer outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::MissingQuery => "missing_query",
            RagError::CorpusNotFound(_) => "corpus_not_found",
            RagError::CorpusRead { .. } => "corpus_read",
            RagError::UnsupportedCorpus(_) => "unsupported_corpus",
            RagError::IndexIo(_) => "index_io",
            RagError::IndexFormat(_) => "index_format",
            RagError::IncompatibleIndex(_) => "index_incompatible",
            RagError::EmbeddingMismatch { .. } => "embedding_mismatch",
            RagError::Embedding(_) => "embedding",
            RagError::Generation(_) => "generation",
            RagError::VectorStore(_) => "vector_store",
        }
    }
}
