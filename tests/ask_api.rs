use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sharebite_rag::chunking::ChunkingConfig;
use sharebite_rag::embeddings::HashingEmbedder;
use sharebite_rag::generator::{GenerationParams, LanguageModel};
use sharebite_rag::index::{IndexLocation, IndexSource};
use sharebite_rag::rag::QueryService;
use sharebite_rag::server::build_router;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const CORPUS: &str = "ShareBite helps donate surplus food to shelters.\n\n\
Restaurants and grocery stores list leftover meals in the ShareBite app.\n\n\
Volunteer drivers pick up donations and deliver them within two hours.\n\n\
Donors receive a monthly impact report and tax receipts.";

/// Echoes the context it was given so tests can see what was retrieved
#[derive(Default)]
struct ContextEchoModel {
    calls: Mutex<usize>,
}

#[async_trait]
impl LanguageModel for ContextEchoModel {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> anyhow::Result<String> {
        assert!((params.temperature - 0.3).abs() < f32::EPSILON);
        *self.calls.lock().unwrap() += 1;
        let context = prompt
            .split("\n\nQuestion:")
            .next()
            .unwrap_or_default()
            .lines()
            .last()
            .unwrap_or_default();
        Ok(format!("Based on: {}", context))
    }
}

fn service(dir: &Path, model: Arc<ContextEchoModel>) -> QueryService {
    QueryService::new(
        dir.join("sharebite_info.txt"),
        IndexLocation::Directory(dir.join("vectorStore")),
        3,
        Arc::new(HashingEmbedder::default()),
        ChunkingConfig {
            chunk_size: 80,
            chunk_overlap: 0,
        },
        model,
    )
}

async fn ask(service: Arc<QueryService>, query: &str) -> (StatusCode, serde_json::Value) {
    let response = build_router(service)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/ask")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({ "query": query }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn index_survives_restart_and_answers_match() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("sharebite_info.txt"), CORPUS).unwrap();

    let first_model = Arc::new(ContextEchoModel::default());
    let first = Arc::new(service(dir.path(), first_model.clone()));
    let (status, before) = ask(first.clone(), "Who delivers the donations?").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first.index().await.unwrap().source(), IndexSource::Built);

    let second_model = Arc::new(ContextEchoModel::default());
    let second = Arc::new(service(dir.path(), second_model.clone()));
    let (status, after) = ask(second.clone(), "Who delivers the donations?").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second.index().await.unwrap().source(), IndexSource::Loaded);

    assert_eq!(before, after);
    assert_eq!(*first_model.calls.lock().unwrap(), 1);
    assert_eq!(*second_model.calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn blank_query_never_reaches_the_engine() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ContextEchoModel::default());

    // No corpus on disk: any engine call would fail loudly
    let (status, body) = ask(Arc::new(service(dir.path(), model.clone())), "   ").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing query");
    assert_eq!(*model.calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn missing_corpus_degrades_to_error_answer() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ContextEchoModel::default());

    let (status, body) = ask(Arc::new(service(dir.path(), model.clone())), "What is ShareBite?").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "Error while generating answer.");
    assert_eq!(*model.calls.lock().unwrap(), 0);
    assert!(!dir.path().join("vectorStore").exists());
}
