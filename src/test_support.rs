use crate::chunking::ChunkingConfig;
use crate::embeddings::HashingEmbedder;
use crate::generator::{GenerationParams, LanguageModel};
use crate::index::IndexLocation;
use crate::rag::QueryService;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const SHAREBITE: &str = "ShareBite helps donate surplus food to shelters.";

/// Answers with a fixed text and remembers every prompt it saw
#[derive(Default)]
pub struct RecordingModel {
    prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("ShareBite redistributes surplus food to shelters.".to_string())
    }
}

pub struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        Err(anyhow::anyhow!("model failed to load"))
    }
}

pub struct Fixture {
    _dir: TempDir,
    pub corpus_path: PathBuf,
    pub index_path: PathBuf,
}

impl Fixture {
    pub fn new(corpus: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let corpus_path = dir.path().join("sharebite_info.txt");
        std::fs::write(&corpus_path, corpus).unwrap();
        let index_path = dir.path().join("vectorStore");
        Fixture {
            _dir: dir,
            corpus_path,
            index_path,
        }
    }

    pub fn service(&self, model: Arc<dyn LanguageModel>) -> QueryService {
        QueryService::new(
            self.corpus_path.clone(),
            IndexLocation::Directory(self.index_path.clone()),
            3,
            Arc::new(HashingEmbedder::default()),
            ChunkingConfig::default(),
            model,
        )
    }
}
