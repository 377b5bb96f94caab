//! wildscan library crate.
//!
//! Batch orchestration for per-video wildlife analysis: a job registry, a
//! batch coordinator with a growable FIFO queue, an event bus, and a sweeper
//! that ages records out. The binary wraps it in an HTTP/WebSocket API.

pub mod analysis;
pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frames;
pub mod gc;
pub mod jobs;
pub mod logging;
pub mod runner;
pub mod utils;

pub use engine::Engine;
pub use error::{Error, Result};
