//! Health check route.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub engine_running: bool,
    pub jobs: usize,
    pub batches: usize,
    pub cached_results: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = &state.engine;
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine_running: engine.is_running(),
        jobs: engine.jobs().len(),
        batches: engine.batches().len(),
        cached_results: engine.results().len(),
    })
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
    async fn test_health_reports_record_counts() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        engine.jobs().create("j1");
        engine.batches().create_empty_batch("m", 1.0, None);
        let app = create_router(AppState::new(engine));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["jobs"], 1);
        assert_eq!(body["batches"], 1);
        assert_eq!(body["engineRunning"], false);
    }
}
