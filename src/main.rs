use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use sharebite_rag::config::{mask_secret, AppConfig, EmbeddingProvider};
use sharebite_rag::embeddings::{Embedder, HashingEmbedder, LocalEmbedder};
use sharebite_rag::gemini::GeminiClient;
use sharebite_rag::index::{IndexBuilder, IndexSource};
use sharebite_rag::rag::QueryService;
use sharebite_rag::server;

/// Question answering over the ShareBite knowledge base
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Corpus text file (overrides RAG_CORPUS_PATH)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Vector index directory (overrides RAG_INDEX_PATH)
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Address to bind (overrides RAG_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Ask questions interactively
    Ask {
        #[arg(long, default_value = "Ask ShareBite AI: ")]
        prompt: String,
    },
    /// Build the vector index ahead of time
    BuildIndex {
        /// Delete an existing index first
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(corpus) = args.corpus {
        config.corpus_path = corpus;
    }
    if let Some(index) = args.index {
        config.index_path = index;
    }
    if let Some(gemini) = &config.gemini {
        info!("Loaded Gemini API key: {}", mask_secret(&gemini.api_key));
    }

    let embedder = build_embedder(&config).await?;

    match args.command {
        Command::BuildIndex { force } => {
            let builder = IndexBuilder::new(embedder, config.chunking);
            let location = config.index_location();
            if force {
                builder
                    .remove(&location)
                    .await
                    .context("Failed to remove existing index")?;
            }

            let index = builder
                .ensure(&config.corpus_path, &location)
                .await
                .context("Failed to build index")?;
            match index.source() {
                IndexSource::Built => info!("VectorStore created successfully!"),
                IndexSource::Loaded => {
                    info!("VectorStore already exists; pass --force to rebuild it")
                }
            }
        }

        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.host.clone());
            let port = port.unwrap_or(config.port);
            let service = Arc::new(build_service(&config, embedder)?);

            // Warm the cache; a failure here is retried on the first request
            if let Err(e) = service.index().await {
                error!("[{}] Index not ready: {}", e.code(), e);
            }

            server::serve(service, &host, port).await?;
        }

        Command::Ask { prompt } => {
            let service = build_service(&config, embedder)?;
            let stdin = io::stdin();
            service
                .run_query_loop(stdin.lock(), &mut io::stdout(), &prompt)
                .await
                .context("Error in query loop")?;
        }
    }

    Ok(())
}

async fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match config.embedding_provider {
        EmbeddingProvider::Local => {
            // The first run downloads the model
            let embedder = tokio::task::spawn_blocking(LocalEmbedder::try_new)
                .await
                .context("Embedding model loader panicked")??;
            Ok(Arc::new(embedder))
        }
        EmbeddingProvider::Gemini => {
            let gemini = config.require_gemini()?;
            Ok(Arc::new(GeminiClient::new(gemini.clone())))
        }
        EmbeddingProvider::Hashing => {
            warn!("Using the hashing stub embedder; retrieval matches words, not meaning");
            Ok(Arc::new(HashingEmbedder::default()))
        }
    }
}

fn build_service(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<QueryService> {
    let model = GeminiClient::new(config.require_gemini()?.clone());
    Ok(QueryService::from_config(config, embedder, Arc::new(model)))
}
