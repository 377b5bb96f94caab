//! Configuration.
//!
//! Every component has its own serde-derived config struct with defaults.
//! [`AppConfig::from_env`] assembles them for the binary from environment
//! variables (after `.env` has been loaded).

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analysis::AnalyzerConfig;
use crate::api::ApiServerConfig;
use crate::events::EventBusConfig;
use crate::gc::GcConfig;
use crate::runner::RunnerConfig;

/// Configuration of an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub bus: EventBusConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl EngineConfig {
    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    pub fn with_bus(mut self, bus: EventBusConfig) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_dir: PathBuf,
    pub engine: EngineConfig,
    pub api: ApiServerConfig,
    /// `None` when `ANALYZER_ENDPOINT` is unset.
    pub analyzer: Option<AnalyzerConfig>,
    /// Where species frames are written. Frame extraction is off when unset.
    pub frames_dir: Option<PathBuf>,
    pub ffmpeg_path: String,
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `WILDSCAN_LOG_DIR` (default `logs`)
    /// - `API_BIND_ADDRESS`, `API_PORT`
    /// - `GC_RETENTION_SECS`, `GC_SWEEP_INTERVAL_SECS`
    /// - `RUNNER_WAIT_INTERVAL_MS`
    /// - `ANALYZER_ENDPOINT`, `ANALYZER_API_KEY`, `ANALYZER_TIMEOUT_SECS`
    /// - `WILDSCAN_FRAMES_DIR`
    /// - `FFMPEG_PATH` (default `ffmpeg`)
    pub fn from_env() -> Self {
        let mut engine = EngineConfig::default();
        if let Some(secs) = env_parse("GC_RETENTION_SECS") {
            engine.gc.retention_secs = secs;
        }
        if let Some(secs) = env_parse("GC_SWEEP_INTERVAL_SECS") {
            engine.gc.sweep_interval_secs = secs;
        }
        if let Some(ms) = env_parse("RUNNER_WAIT_INTERVAL_MS") {
            engine.runner.wait_interval_ms = ms;
        }

        let analyzer = env_string("ANALYZER_ENDPOINT").map(|endpoint| {
            let mut config = AnalyzerConfig::new(endpoint);
            config.api_key = env_string("ANALYZER_API_KEY");
            if let Some(secs) = env_parse("ANALYZER_TIMEOUT_SECS") {
                config.timeout_secs = secs;
            }
            config
        });

        Self {
            log_dir: env_string("WILDSCAN_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("logs")),
            engine,
            api: ApiServerConfig::from_env_or_default(),
            analyzer,
            frames_dir: env_string("WILDSCAN_FRAMES_DIR").map(PathBuf::from),
            ffmpeg_path: process_utils::resolve_tool("FFMPEG_PATH", "ffmpeg"),
        }
    }
}

/// Non-empty, trimmed value of `key`.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parsed value of `key`. Unparseable values are logged and ignored.
pub(crate) fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.gc.retention_secs, 3600);
        assert_eq!(config.gc.sweep_interval_secs, 600);
        assert_eq!(config.bus.channel_capacity, 256);
        assert_eq!(config.runner.wait_interval_ms, 500);
    }

    #[test]
    fn test_engine_config_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"gc": {"retention_secs": 60}}"#).unwrap();
        assert_eq!(config.gc.retention_secs, 60);
        assert_eq!(config.gc.sweep_interval_secs, 600);
        assert_eq!(config.runner.wait_interval_ms, 500);
    }

    #[test]
    fn test_env_helpers_ignore_missing_keys() {
        assert_eq!(env_string("WILDSCAN_TEST_SURELY_UNSET"), None);
        assert_eq!(env_parse::<u64>("WILDSCAN_TEST_SURELY_UNSET"), None);
    }
}
