use crate::chunking::ChunkingConfig;
use crate::database::QdrantConfig;
use crate::gemini::GeminiConfig;
use crate::index::IndexLocation;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CORPUS_PATH: &str = "sharebite_info.txt";
pub const DEFAULT_INDEX_PATH: &str = "vectorStore";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TOP_K: usize = 3;

/// Which embedding model turns chunks and queries into vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// all-MiniLM-L6-v2 run in-process
    Local,
    /// Gemini `embedContent` endpoint
    Gemini,
    /// Feature-hashing stub, for smoke runs without a model
    Hashing,
}

impl FromStr for EmbeddingProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" | "minilm" => Ok(EmbeddingProvider::Local),
            "gemini" => Ok(EmbeddingProvider::Gemini),
            "hashing" | "stub" => Ok(EmbeddingProvider::Hashing),
            other => bail!("Unknown embedding provider: {}", other),
        }
    }
}

/// Process-wide configuration, built once at startup and passed to components
#[derive(Clone)]
pub struct AppConfig {
    pub corpus_path: PathBuf,
    pub index_path: PathBuf,
    pub top_k: usize,
    pub chunking: ChunkingConfig,
    pub host: String,
    pub port: u16,
    pub embedding_provider: EmbeddingProvider,
    /// Present only when `GEMINI_API_KEY` is set
    pub gemini: Option<GeminiConfig>,
    /// Present only when `QDRANT_URL` is set; selects the remote index backend
    pub qdrant: Option<QdrantConfig>,
}

impl AppConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let chunking = ChunkingConfig {
            chunk_size: parse_or(&lookup, "RAG_CHUNK_SIZE", ChunkingConfig::default().chunk_size)?,
            chunk_overlap: parse_or(
                &lookup,
                "RAG_CHUNK_OVERLAP",
                ChunkingConfig::default().chunk_overlap,
            )?,
        };
        if chunking.chunk_size == 0 {
            bail!("RAG_CHUNK_SIZE must be greater than zero");
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            bail!(
                "RAG_CHUNK_OVERLAP ({}) must be smaller than RAG_CHUNK_SIZE ({})",
                chunking.chunk_overlap,
                chunking.chunk_size
            );
        }

        let embedding_provider = match lookup("EMBEDDING_PROVIDER") {
            Some(value) => value.parse()?,
            None => EmbeddingProvider::Local,
        };

        Ok(AppConfig {
            corpus_path: lookup("RAG_CORPUS_PATH")
                .unwrap_or_else(|| DEFAULT_CORPUS_PATH.to_string())
                .into(),
            index_path: lookup("RAG_INDEX_PATH")
                .unwrap_or_else(|| DEFAULT_INDEX_PATH.to_string())
                .into(),
            top_k: parse_or(&lookup, "RAG_TOP_K", DEFAULT_TOP_K)?,
            chunking,
            host: lookup("RAG_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            embedding_provider,
            gemini: GeminiConfig::from_lookup(&lookup),
            qdrant: QdrantConfig::from_lookup(&lookup),
        })
    }

    /// The Qdrant collection when configured, otherwise the local index directory
    pub fn index_location(&self) -> IndexLocation {
        match &self.qdrant {
            Some(qdrant) => IndexLocation::Qdrant(qdrant.clone()),
            None => IndexLocation::Directory(self.index_path.clone()),
        }
    }

    /// Gemini settings, failing when no API token was configured
    pub fn require_gemini(&self) -> Result<&GeminiConfig> {
        self.gemini.as_ref().context("Missing GEMINI_API_KEY")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        None => Ok(default),
    }
}

/// Show only the head of a secret so it can be logged
pub fn mask_secret(secret: &str) -> String {
    let head: String = secret.chars().take(10).collect();
    format!("{}...", head)
}
