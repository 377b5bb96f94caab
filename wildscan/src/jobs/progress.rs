use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Stage of a single video's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Uploading,
    Processing,
    Analyzing,
    Extracting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Uploading => write!(f, "uploading"),
            Stage::Processing => write!(f, "processing"),
            Stage::Analyzing => write!(f, "analyzing"),
            Stage::Extracting => write!(f, "extracting"),
        }
    }
}

/// Latest known progress of a job. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub stage: Stage,
    pub percent: f32,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Create a snapshot; `percent` is clamped into `0..=100`.
    pub fn new(stage: Stage, percent: f32, message: impl Into<String>) -> Self {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        Self {
            stage,
            percent,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Handle given to the analysis collaborator for streaming progress.
///
/// Reports never block. The channel holds only the newest snapshot: a consumer
/// that falls behind skips intermediate reports but always sees the latest.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: String,
    tx: Arc<watch::Sender<Option<ProgressSnapshot>>>,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, tx: watch::Sender<Option<ProgressSnapshot>>) -> Self {
        Self {
            job_id: job_id.into(),
            tx: Arc::new(tx),
        }
    }

    /// Reporter plus the receiving end of its channel.
    pub fn channel(job_id: impl Into<String>) -> (Self, watch::Receiver<Option<ProgressSnapshot>>) {
        let (tx, rx) = watch::channel(None);
        (Self::new(job_id, tx), rx)
    }

    pub fn noop(job_id: impl Into<String>) -> Self {
        Self::channel(job_id).0
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn report(&self, mut snapshot: ProgressSnapshot) {
        snapshot.updated_at = Utc::now();
        self.tx.send_replace(Some(snapshot));
    }

    pub fn stage(&self, stage: Stage, percent: f32, message: impl Into<String>) {
        self.report(ProgressSnapshot::new(stage, percent, message));
    }
}
