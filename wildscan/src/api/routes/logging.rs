//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct LogFilter {
    pub filter: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_filter).put(update_filter))
}

async fn get_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilter>> {
    let logging = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))?;
    Ok(Json(LogFilter {
        filter: logging.get_filter(),
    }))
}

async fn update_filter(
    State(state): State<AppState>,
    Json(request): Json<LogFilter>,
) -> ApiResult<Json<LogFilter>> {
    let logging = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))?;
    logging.set_filter(&request.filter)?;
    Ok(Json(LogFilter {
        filter: logging.get_filter(),
    }))
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
    async fn test_unconfigured_logging_is_unavailable() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let app = create_router(AppState::new(engine));

        let response = app
            .oneshot(Request::get("/api/logging").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
