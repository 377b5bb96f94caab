//! Batch routes.

use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ws::stream_events;
use crate::Error;
use crate::analysis::VideoDescriptor;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::batch::{BatchJob, BatchStatus, BatchSummary};

fn default_fps() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    /// Known videos. When absent the batch starts empty and waits for uploads.
    #[serde(default)]
    pub videos: Option<Vec<VideoDescriptor>>,
    pub model: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub expected_count: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total: usize,
    pub runner_started: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVideoRequest {
    pub path: String,
    #[serde(default)]
    pub original_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVideoResponse {
    pub queue_length: usize,
    pub total: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_batches).post(create_batch))
        .route("/{id}", get(get_batch))
        .route("/{id}/videos", post(add_video))
        .route("/{id}/uploads-complete", post(mark_uploads_complete))
        .route("/{id}/cancel", post(cancel_batch))
        .route("/{id}/ws", get(batch_ws))
}

fn validate_create(request: &CreateBatchRequest) -> Result<(), ApiError> {
    if request.model.trim().is_empty() {
        return Err(ApiError::validation("model must not be empty"));
    }
    if !request.fps.is_finite() || request.fps <= 0.0 {
        return Err(ApiError::validation("fps must be a positive number"));
    }
    if let Some(videos) = &request.videos
        && videos.iter().any(|v| v.path.trim().is_empty())
    {
        return Err(ApiError::validation("video paths must not be empty"));
    }
    Ok(())
}

/// 404 for unknown batches, 409 otherwise.
fn rejected(state: &AppState, id: &str, to: &str) -> ApiError {
    match state.engine.batches().status(id) {
        None => Error::not_found("Batch", id).into(),
        Some(status) => Error::InvalidStateTransition {
            from: status.to_string(),
            to: to.to_string(),
        }
        .into(),
    }
}

async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_create(&request)?;
    let batches = state.engine.batches();

    let batch_id = match request.videos {
        Some(videos) => batches.create_batch(videos, request.model, request.fps),
        None => batches.create_empty_batch(request.model, request.fps, request.expected_count),
    };

    let runner_started = match &state.runner {
        Some(runner) => {
            runner.spawn(batch_id.clone());
            true
        }
        None => false,
    };
    info!(batch_id = %batch_id, runner_started, "Batch created via API");

    let batch = batches
        .get(&batch_id)
        .ok_or_else(|| ApiError::internal("Batch vanished right after creation"))?;
    Ok((
        StatusCode::CREATED,
        Json(CreateBatchResponse {
            batch_id,
            status: batch.status,
            total: batch.total(),
            runner_started,
        }),
    ))
}

async fn list_batches(State(state): State<AppState>) -> Json<Vec<BatchSummary>> {
    Json(state.engine.batches().list())
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BatchJob>> {
    state
        .engine
        .batches()
        .get(&id)
        .map(Json)
        .ok_or_else(|| Error::not_found("Batch", &id).into())
}

async fn add_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddVideoRequest>,
) -> ApiResult<Json<AddVideoResponse>> {
    if request.path.trim().is_empty() {
        return Err(ApiError::validation("path must not be empty"));
    }
    let original_name = request.original_name.unwrap_or_else(|| {
        std::path::Path::new(&request.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.path.clone())
    });

    let batches = state.engine.batches();
    if !batches.add_video(&id, request.path, original_name) {
        return Err(rejected(&state, &id, "video added"));
    }
    let batch = batches
        .get(&id)
        .ok_or_else(|| Error::not_found("Batch", &id))?;
    Ok(Json(AddVideoResponse {
        queue_length: batch.queue.len(),
        total: batch.total(),
    }))
}

async fn mark_uploads_complete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BatchSummary>> {
    let batches = state.engine.batches();
    if !batches.mark_uploads_complete(&id) {
        return Err(rejected(&state, &id, "uploads complete"));
    }
    batches
        .get(&id)
        .map(|batch| Json(batch.summary()))
        .ok_or_else(|| Error::not_found("Batch", &id).into())
}

async fn cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BatchSummary>> {
    let batches = state.engine.batches();
    if !batches.cancel_batch(&id) {
        return Err(rejected(&state, &id, BatchStatus::Cancelled.to_string().as_str()));
    }
    batches
        .get(&id)
        .map(|batch| Json(batch.summary()))
        .ok_or_else(|| Error::not_found("Batch", &id).into())
}

async fn batch_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subscription = state.engine.subscribe_batch(&id);
    let snapshot = state
        .engine
        .batches()
        .get(&id)
        .ok_or_else(|| Error::not_found("Batch", &id))?;
    Ok(ws.on_upgrade(move |socket| stream_events(socket, snapshot, subscription)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::AppState;
    use crate::config::EngineConfig;
    use crate::engine::Engine;

    fn app() -> (axum::Router, Arc<Engine>) {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        (create_router(AppState::new(engine.clone())), engine)
    }

    async fn send(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (axum::http::StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_create_prepopulated_batch() {
        let (app, engine) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/batches",
            Some(serde_json::json!({
                "videos": [{"path": "/v/a.mp4", "originalName": "a.mp4"}],
                "model": "vision-1"
            })),
        )
        .await;

        assert_eq!(status, 201);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["total"], 1);
        assert_eq!(body["runnerStarted"], false);

        let id = body["batchId"].as_str().unwrap();
        let batch = engine.batches().get(id).unwrap();
        assert!(batch.uploads_complete);
        assert_eq!(batch.fps, 1.0);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/batches",
            Some(serde_json::json!({"model": "m", "fps": 0})),
        )
        .await;
        assert_eq!(status, 422);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, _) = send(
            &app,
            "POST",
            "/api/batches",
            Some(serde_json::json!({"model": "  "})),
        )
        .await;
        assert_eq!(status, 422);
    }

    #[tokio::test]
    async fn test_incremental_upload_flow() {
        let (app, engine) = app();
        let (_, body) = send(
            &app,
            "POST",
            "/api/batches",
            Some(serde_json::json!({"model": "m", "expectedCount": 2})),
        )
        .await;
        let id = body["batchId"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/batches/{id}/videos"),
            Some(serde_json::json!({"path": "/uploads/fox.mp4"})),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["queueLength"], 1);
        assert_eq!(
            engine.batches().get(&id).unwrap().display_name("/uploads/fox.mp4"),
            "fox.mp4"
        );

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/batches/{id}/uploads-complete"),
            None,
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["uploadsComplete"], true);

        let (status, list) = send(&app, "GET", "/api/batches", None).await;
        assert_eq!(status, 200);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_404() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/api/batches/nope", None).await;
        assert_eq!(status, 404);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, _) = send(
            &app,
            "POST",
            "/api/batches/nope/videos",
            Some(serde_json::json!({"path": "/a"})),
        )
        .await;
        assert_eq!(status, 404);

        let (status, _) = send(&app, "POST", "/api/batches/nope/cancel", None).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_cancel_conflicts() {
        let (app, engine) = app();
        let id = engine.batches().create_empty_batch("m", 1.0, None);

        // pending batches cannot be cancelled
        let (status, body) = send(&app, "POST", &format!("/api/batches/{id}/cancel"), None).await;
        assert_eq!(status, 409);
        assert_eq!(body["details"]["from"], "pending");

        engine.batches().add_video(&id, "/a", "a");
        engine.batches().next_queued(&id);
        engine.batches().start_video(&id, "/a", "j1");

        let (status, body) = send(&app, "POST", &format!("/api/batches/{id}/cancel"), None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "cancelled");

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/batches/{id}/videos"),
            Some(serde_json::json!({"path": "/b"})),
        )
        .await;
        assert_eq!(status, 409);
    }
}
