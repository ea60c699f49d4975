use crate::chunking::{ChunkingConfig, TextChunk};
use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::generator::{Answer, AnswerGenerator, LanguageModel};
use crate::index::{IndexBuilder, IndexHandle, IndexLocation};
use crate::retriever::Retriever;
use log::{error, info};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A validated, trimmed user question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    /// Reject empty or whitespace-only input
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RagError::MissingQuery);
        }
        Ok(Query(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Answers questions about the corpus: retrieve context, then generate.
///
/// The index is loaded (or built) on first use and kept for the life of the
/// service. Concurrent first callers wait on the same guard.
pub struct QueryService {
    corpus_path: PathBuf,
    location: IndexLocation,
    top_k: usize,
    builder: IndexBuilder,
    retriever: Retriever,
    generator: AnswerGenerator,
    index: Mutex<Option<Arc<IndexHandle>>>,
}

impl QueryService {
    pub fn new(
        corpus_path: PathBuf,
        location: IndexLocation,
        top_k: usize,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        QueryService {
            corpus_path,
            location,
            top_k,
            builder: IndexBuilder::new(embedder.clone(), chunking),
            retriever: Retriever::new(embedder),
            generator: AnswerGenerator::new(model),
            index: Mutex::new(None),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        QueryService::new(
            config.corpus_path.clone(),
            config.index_location(),
            config.top_k,
            embedder,
            config.chunking,
            model,
        )
    }

    /// The cached index, loading or building it on first use
    pub async fn index(&self) -> Result<Arc<IndexHandle>> {
        let mut cached = self.index.lock().await;
        if let Some(index) = cached.as_ref() {
            return Ok(index.clone());
        }

        let index = Arc::new(self.builder.ensure(&self.corpus_path, &self.location).await?);
        *cached = Some(index.clone());
        Ok(index)
    }

    /// Drop the cached index; the next query loads it again
    pub async fn invalidate(&self) {
        self.index.lock().await.take();
    }

    /// Delete the persisted index and build a fresh one from the corpus
    pub async fn rebuild_index(&self) -> Result<Arc<IndexHandle>> {
        let mut cached = self.index.lock().await;
        cached.take();
        self.builder.remove(&self.location).await?;

        let index = Arc::new(self.builder.ensure(&self.corpus_path, &self.location).await?);
        *cached = Some(index.clone());
        Ok(index)
    }

    /// Answer a question. Never fails: engine errors are logged with their
    /// code and turned into the generic error answer.
    pub async fn answer_query(&self, query: &Query) -> Answer {
        info!("Answering query: {}", query);

        let context = match self.retrieve_context(query).await {
            Ok(context) => context,
            Err(e) => {
                error!("[{}] Failed to retrieve context: {}", e.code(), e);
                return Answer::failed(&e);
            }
        };

        let answer = self.generator.generate(query.as_str(), &context).await;
        if !answer.is_failure() {
            info!("Query executed successfully");
        }
        answer
    }

    async fn retrieve_context(&self, query: &Query) -> Result<Vec<TextChunk>> {
        let index = self.index().await?;
        let hits = self
            .retriever
            .retrieve(&index, query.as_str(), self.top_k)
            .await?;
        Ok(hits.into_iter().map(|hit| hit.chunk).collect())
    }

    /// Run the interactive question loop until `exit`, `quit` or end of input
    pub async fn run_query_loop<R, W>(&self, mut input: R, output: &mut W, prompt: &str) -> anyhow::Result<()>
    where
        R: BufRead,
        W: Write,
    {
        let mut buffer = String::new();

        loop {
            write!(output, "\n{}", prompt)?;
            output.flush()?;

            buffer.clear();
            if input.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if is_exit_command(question) {
                break;
            }

            let query = match Query::parse(question) {
                Ok(query) => query,
                Err(_) => {
                    writeln!(output, "Please enter a question.")?;
                    continue;
                }
            };

            let answer = self.answer_query(&query).await;
            writeln!(output, "\n🤖 {}", answer.text)?;
        }

        info!("Goodbye!");
        Ok(())
    }
}

fn is_exit_command(input: &str) -> bool {
    matches!(input.to_lowercase().as_str(), "exit" | "quit")
}
