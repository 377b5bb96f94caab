//! Job routes.

use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use super::ws::stream_events;
use crate::Error;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::jobs::Job;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_job))
        .route("/{id}/ws", get(job_ws))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    state
        .engine
        .jobs()
        .get(&id)
        .map(Json)
        .ok_or_else(|| Error::not_found("Job", &id).into())
}

async fn job_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let subscription = state.engine.subscribe_job(&id);
    let snapshot = state
        .engine
        .jobs()
        .get(&id)
        .ok_or_else(|| Error::not_found("Job", &id))?;
    Ok(ws.on_upgrade(move |socket| stream_events(socket, snapshot, subscription)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::server::AppState;
    use crate::config::EngineConfig;
    use crate::engine::Engine;

    #[tokio::test]
    async fn test_get_job() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        engine.jobs().create("job-1");
        engine.jobs().fail("job-1", "timed out");
        let app = create_router(AppState::new(engine));

        let response = app
            .clone()
            .oneshot(Request::get("/api/jobs/job-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let job: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(job["status"], "failed");
        assert_eq!(job["error"], "timed out");

        let response = app
            .oneshot(Request::get("/api/jobs/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
