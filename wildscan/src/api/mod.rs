//! REST and WebSocket surface over an [`Engine`](crate::engine::Engine).

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
