//! Batch data model.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{AnalysisResult, VideoDescriptor};
use crate::jobs::ProgressSnapshot;

/// Batch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Created; no video has been started yet.
    Pending,
    /// At least one video was started or skipped.
    Running,
    /// Finished normally. Terminal.
    Completed,
    /// Cancelled while running. Terminal.
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A video whose analysis failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedVideo {
    pub path: String,
    pub error: String,
}

/// A batch of videos analysed one at a time under shared parameters.
///
/// `queue` is always a suffix of `videos`: both are appended together and the
/// queue is only ever popped from the front.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: String,
    /// Every video ever accepted, in acceptance order.
    pub videos: Vec<String>,
    /// Videos not started yet.
    pub queue: VecDeque<VideoDescriptor>,
    /// Path to display name.
    pub names: HashMap<String, String>,
    pub model: String,
    pub fps: f64,
    pub current_job_id: Option<String>,
    pub current_index: Option<usize>,
    pub current_video: Option<String>,
    pub current_progress: Option<ProgressSnapshot>,
    pub completed: Vec<String>,
    pub failed: Vec<FailedVideo>,
    pub results: HashMap<String, AnalysisResult>,
    pub status: BatchStatus,
    pub uploads_complete: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) last_dequeued: Option<usize>,
}

impl BatchJob {
    pub(crate) fn new(id: String, model: String, fps: f64) -> Self {
        Self {
            id,
            videos: Vec::new(),
            queue: VecDeque::new(),
            names: HashMap::new(),
            model,
            fps,
            current_job_id: None,
            current_index: None,
            current_video: None,
            current_progress: None,
            completed: Vec::new(),
            failed: Vec::new(),
            results: HashMap::new(),
            status: BatchStatus::Pending,
            uploads_complete: false,
            started_at: Utc::now(),
            completed_at: None,
            last_dequeued: None,
        }
    }

    pub(crate) fn push(&mut self, video: VideoDescriptor) {
        self.videos.push(video.path.clone());
        self.names
            .insert(video.path.clone(), video.original_name.clone());
        self.queue.push_back(video);
    }

    /// Number of videos ever accepted.
    pub fn total(&self) -> usize {
        self.videos.len()
    }

    /// Display name for `path`, falling back to the path itself.
    pub fn display_name<'a>(&'a self, path: &'a str) -> &'a str {
        self.names.get(path).map(String::as_str).unwrap_or(path)
    }

    pub fn should_wait(&self) -> bool {
        !self.uploads_complete && self.queue.is_empty()
    }

    pub fn is_done(&self) -> bool {
        self.uploads_complete && self.queue.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            id: self.id.clone(),
            status: self.status,
            model: self.model.clone(),
            total: self.total(),
            queued: self.queue.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            uploads_complete: self.uploads_complete,
            current_video: self.current_video.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    pub(crate) fn record_completed(&mut self, path: &str) {
        self.failed.retain(|f| f.path != path);
        if !self.completed.iter().any(|p| p == path) {
            self.completed.push(path.to_string());
        }
    }

    pub(crate) fn record_failed(&mut self, path: &str, error: String) {
        self.completed.retain(|p| p != path);
        self.results.remove(path);
        match self.failed.iter_mut().find(|f| f.path == path) {
            Some(entry) => entry.error = error,
            None => self.failed.push(FailedVideo {
                path: path.to_string(),
                error,
            }),
        }
    }

    /// Release the current slot if `path` is the video occupying it.
    pub(crate) fn clear_current(&mut self, path: &str) {
        if self.current_video.as_deref() == Some(path) {
            self.current_job_id = None;
            self.current_video = None;
            self.current_index = None;
            self.current_progress = None;
        }
    }
}

/// Compact view of a batch for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub id: String,
    pub status: BatchStatus,
    pub model: String,
    pub total: usize,
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
    pub uploads_complete: bool,
    pub current_video: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
