//! HTTP API routes.

use crate::error::ApiError;
use crate::runner::InferenceRunner;
use crate::scratch::ScratchDir;
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use csm_common::Config;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::Instrument;

/// Multipart field carrying the audio upload.
pub const UPLOAD_FIELD: &str = "file";

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runner: Arc<InferenceRunner>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let runner = InferenceRunner::from_config(&config.inference);
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: Config, runner: InferenceRunner) -> Self {
        Self {
            config: Arc::new(config),
            runner: Arc::new(runner),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/infer", post(infer))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}

// ============ Health Check ============

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub inference_cmd: String,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        inference_cmd: state.runner.template().to_string(),
    })
}

// ============ Inference ============

async fn infer(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        return handle_upload(&state, field).await.map(Json);
    }

    Err(ApiError::BadRequest(format!(
        "Missing '{UPLOAD_FIELD}' field in form data"
    )))
}

async fn handle_upload(state: &AppState, field: Field<'_>) -> Result<Value, ApiError> {
    let filename = field
        .file_name()
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::BadRequest("No filename provided".into()))?;

    if let Some(content_type) = field.content_type() {
        if !content_type.starts_with("audio") {
            tracing::warn!(content_type = %content_type, "Unexpected content-type");
        }
    }

    let scratch = ScratchDir::create(&state.config.storage.work_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create scratch directory: {e}")))?;

    let span = tracing::info_span!("infer", request_id = %scratch.id());
    let result = process_upload(state, &scratch, field, &filename)
        .instrument(span)
        .await;

    scratch.cleanup().await;
    result
}

async fn process_upload(
    state: &AppState,
    scratch: &ScratchDir,
    field: Field<'_>,
    filename: &str,
) -> Result<Value, ApiError> {
    let started = Instant::now();
    let input_path = scratch.input_path(filename);
    let size = persist_field(field, &input_path).await?;

    tracing::info!(filename = %filename, size_bytes = size, "Upload stored");

    if size == 0 {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }

    let output_path = scratch.output_path();
    match state.runner.run(&input_path, &output_path).await {
        Ok(result) => {
            tracing::info!(
                duration_ms = started.elapsed().as_millis() as u64,
                "Inference completed"
            );
            Ok(result)
        }
        Err(e) => {
            tracing::error!(error = %e, "Inference failed");
            Err(e.into())
        }
    }
}

/// Stream the field to `path` and return the size on disk.
async fn persist_field(mut field: Field<'_>, path: &Path) -> Result<u64, ApiError> {
    let store_error = |e: std::io::Error| ApiError::Internal(format!("Failed to store upload: {e}"));

    let mut file = tokio::fs::File::create(path).await.map_err(store_error)?;
    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await.map_err(store_error)?;
    }
    file.flush().await.map_err(store_error)?;
    drop(file);

    let metadata = tokio::fs::metadata(path).await.map_err(store_error)?;
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let mut config = Config::default();
        config.storage.work_dir = std::env::temp_dir().join("csm-api-route-tests");
        build_router(AppState::new(config))
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(
            json["inference_cmd"],
            csm_common::config::DEFAULT_INFERENCE_CMD
        );
    }

    #[tokio::test]
    async fn test_infer_requires_multipart() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/infer")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = test_app();

        let response = app
            .oneshot(Request::builder().uri("/transcribe").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_rejects_post() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
