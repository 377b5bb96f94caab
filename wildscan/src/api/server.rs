//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::{env_parse, env_string};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::runner::BatchRunner;

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12580,
            enable_cors: true,
        }
    }
}

impl ApiServerConfig {
    /// Load from `API_BIND_ADDRESS` and `API_PORT`, falling back to defaults.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Some(bind_address) = env_string("API_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = env_parse("API_PORT") {
            config.port = port;
        }
        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub engine: Arc<Engine>,
    /// Drives newly created batches. Batches are only tracked when unset.
    pub runner: Option<Arc<BatchRunner>>,
    /// Logging configuration for runtime filter changes
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            start_time: Instant::now(),
            engine,
            runner: None,
            logging_config: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<BatchRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_logging_config(mut self, logging_config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(logging_config);
        self
    }
}

/// HTTP server exposing the engine.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        // Health probes stay out of the request log.
        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path() == "/health" {
                        Span::none()
                    } else {
                        use tower_http::trace::MakeSpan;
                        tower_http::trace::DefaultMakeSpan::new()
                            .level(tracing::Level::INFO)
                            .make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        use tower_http::trace::OnResponse;
                        tower_http::trace::DefaultOnResponse::new()
                            .level(tracing::Level::INFO)
                            .on_response(res, latency, span);
                    },
                ),
        )
    }

    /// Serve until [`ApiServer::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::ApiError(format!("Invalid address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::ApiError(format!("Server error: {e}")))?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_config_defaults() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 12580);
        assert!(config.enable_cors);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let config = ApiServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
            enable_cors: false,
        };
        let server = Arc::new(ApiServer::new(config, AppState::new(engine)));

        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        server.shutdown();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
