//! HTTP API over the answering pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/answer` | Grounded answer with citations and critique |
//! | `POST` | `/search` | Fused, re-ranked chunks without generation |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Both `POST` endpoints take an [`AnswerRequest`] body:
//!
//! ```json
//! { "query": "What is the notice period?", "document_id": "msa-2024" }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: query is empty" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | Query failed validation |
//! | `retrieval_failed` | 502 | Embedding, vector, or lexical backend failed |
//! | `generation_failed` | 502 | The first answer pass failed |
//! | `internal` | 500 | Anything else |

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docqa_core::models::{AnswerRequest, AnswerResponse, SearchResult};
use docqa_core::{Pipeline, PipelineError};

use crate::app::build_pipeline;
use crate::config::Config;

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(build_pipeline(config).await?);
    let app = router(pipeline);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "docqa server listening");
    println!("docqa server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/answer", post(handle_answer))
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(pipeline)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            PipelineError::Retrieval { .. } => (StatusCode::BAD_GATEWAY, "retrieval_failed"),
            PipelineError::Generation { .. } => (StatusCode::BAD_GATEWAY, "generation_failed"),
            PipelineError::DegradedEnhancement { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            tracing::error!(stage = err.stage_name(), error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_answer(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    Ok(Json(pipeline.answer(&request).await?))
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = pipeline.search(&request).await?;
    Ok(Json(SearchResponse { results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use docqa_core::error::RetrievalStage;

    #[test]
    fn test_error_mapping() {
        let e = AppError::from(PipelineError::Validation("query is empty".into()));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, "bad_request");
        assert!(e.message.contains("query is empty"));

        let e = AppError::from(PipelineError::retrieval(
            RetrievalStage::Lexical,
            anyhow!("fts down"),
        ));
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.code, "retrieval_failed");

        let e = AppError::from(PipelineError::generation(anyhow!("llm down")));
        assert_eq!(e.code, "generation_failed");
    }
}
