//! HTTP front end: `POST /ask` answers one question per request.

use crate::rag::{Query, QueryService};
use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Build the application router
pub fn build_router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/health", get(health))
        .with_state(service)
}

/// Bind `host:port` and serve until the process is stopped
pub async fn serve(service: Arc<QueryService>, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(service))
        .await
        .context("HTTP server failed")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// The body is parsed as JSON whatever its content type.
async fn ask(
    State(service): State<Arc<QueryService>>,
    body: Bytes,
) -> std::result::Result<Json<AskResponse>, ApiError> {
    let request: AskRequest = serde_json::from_slice(&body).map_err(|e| {
        error!("Error: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let query = Query::parse(request.query.as_deref().unwrap_or_default())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    info!("User Query: {}", query);
    let answer = service.answer_query(&query).await;
    info!("AI Answer: {}", answer.text);

    Ok(Json(AskResponse {
        answer: answer.text,
    }))
}
