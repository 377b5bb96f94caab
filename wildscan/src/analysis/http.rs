//! Analyzer backed by a remote HTTP analysis service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{AnalysisResult, Analyzer, ModelConfig, VideoDescriptor};
use crate::jobs::{ProgressReporter, Stage};
use crate::utils::http_client;
use crate::{Error, Result};

/// Longest upstream error body echoed into a failure message.
const MAX_ERROR_BODY: usize = 512;

/// Configuration for [`HttpAnalyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// URL the analysis request is POSTed to.
    pub endpoint: String,
    /// Bearer token, if the service requires one.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds. 0 means no timeout.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl AnalyzerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout_secs: 0,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    video_path: &'a str,
    original_name: &'a str,
    model: &'a str,
    fps: f64,
}

/// Posts the video descriptor as JSON and expects an [`AnalysisResult`] back.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    config: AnalyzerConfig,
}

impl HttpAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::config("analyzer endpoint is empty"));
        }
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        Ok(Self {
            client: http_client::build_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn analyze(
        &self,
        video: &VideoDescriptor,
        model: &ModelConfig,
        fps: f64,
        progress: &ProgressReporter,
    ) -> Result<AnalysisResult> {
        progress.stage(
            Stage::Uploading,
            0.0,
            format!("Sending {}", video.original_name),
        );

        let body = AnalyzeRequest {
            video_path: &video.path,
            original_name: &video.original_name,
            model: &model.name,
            fps,
        };
        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        progress.stage(Stage::Analyzing, 50.0, "Waiting for analysis");

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::analysis(format!(
                "analysis service rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(Error::analysis(format!(
                "analysis service returned {status}: {text}"
            )));
        }

        let bytes = response.bytes().await?;
        let result: AnalysisResult = serde_json::from_slice(&bytes)
            .map_err(|e| Error::analysis(format!("malformed analysis response: {e}")))?;

        debug!(path = %video.path, species = result.species.len(), "Analysis response received");
        progress.stage(Stage::Processing, 100.0, "Analysis received");
        Ok(result)
    }
}
