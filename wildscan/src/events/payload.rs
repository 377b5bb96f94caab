//! Event kinds, topics and payloads carried by the event bus.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::analysis::AnalysisResult;
use crate::batch::FailedVideo;
use crate::jobs::{ProgressSnapshot, Stage};

/// Kind of event; the first half of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Complete,
    Error,
    BatchCreated,
    BatchVideoAdded,
    BatchUploadsComplete,
    BatchVideoStart,
    BatchVideoProgress,
    BatchProgress,
    BatchVideoComplete,
    BatchVideoError,
    BatchVideoSkipped,
    BatchComplete,
    BatchCancelled,
}

impl EventKind {
    /// Wire name of the kind, e.g. `batch:video_added`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::BatchCreated => "batch:created",
            Self::BatchVideoAdded => "batch:video_added",
            Self::BatchUploadsComplete => "batch:uploads_complete",
            Self::BatchVideoStart => "batch:video_start",
            Self::BatchVideoProgress => "batch:video_progress",
            Self::BatchProgress => "batch:progress",
            Self::BatchVideoComplete => "batch:video_complete",
            Self::BatchVideoError => "batch:video_error",
            Self::BatchVideoSkipped => "batch:video_skipped",
            Self::BatchComplete => "batch:complete",
            Self::BatchCancelled => "batch:cancelled",
        }
    }

    /// Kinds published for a single job.
    pub const JOB: [EventKind; 3] = [Self::Progress, Self::Complete, Self::Error];

    /// Kinds published for a batch.
    pub const BATCH: [EventKind; 11] = [
        Self::BatchCreated,
        Self::BatchVideoAdded,
        Self::BatchUploadsComplete,
        Self::BatchVideoStart,
        Self::BatchVideoProgress,
        Self::BatchProgress,
        Self::BatchVideoComplete,
        Self::BatchVideoError,
        Self::BatchVideoSkipped,
        Self::BatchComplete,
        Self::BatchCancelled,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic: event kind plus the id of the job or batch it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: EventKind,
    pub id: String,
}

impl Topic {
    pub fn new(kind: EventKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Event payloads, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum EventPayload {
    #[serde(rename = "progress")]
    Progress(ProgressSnapshot),
    #[serde(rename = "complete")]
    Complete(AnalysisResult),
    #[serde(rename = "error")]
    Error { error: String },
    #[serde(rename = "batch:created")]
    BatchCreated {
        batch_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_count: Option<usize>,
    },
    #[serde(rename = "batch:video_added")]
    BatchVideoAdded {
        path: String,
        original_name: String,
        queue_length: usize,
        total: usize,
    },
    #[serde(rename = "batch:uploads_complete")]
    BatchUploadsComplete { total: usize },
    #[serde(rename = "batch:video_start")]
    BatchVideoStart {
        path: String,
        index: usize,
        total: usize,
    },
    #[serde(rename = "batch:video_progress")]
    BatchVideoProgress {
        path: String,
        stage: Stage,
        percent: f32,
        message: String,
    },
    #[serde(rename = "batch:progress")]
    BatchProgress {
        total: usize,
        completed: usize,
        failed: usize,
        current_index: Option<usize>,
        current_video: Option<String>,
        current_progress: Option<ProgressSnapshot>,
    },
    #[serde(rename = "batch:video_complete")]
    BatchVideoComplete {
        path: String,
        result: AnalysisResult,
        completed_count: usize,
        total: usize,
    },
    #[serde(rename = "batch:video_error")]
    BatchVideoError {
        path: String,
        error: String,
        failed_count: usize,
        total: usize,
    },
    #[serde(rename = "batch:video_skipped")]
    BatchVideoSkipped {
        path: String,
        reason: String,
        completed_count: usize,
        total: usize,
    },
    #[serde(rename = "batch:complete")]
    BatchComplete {
        completed: Vec<String>,
        failed: Vec<FailedVideo>,
        total: usize,
    },
    #[serde(rename = "batch:cancelled")]
    BatchCancelled {
        completed: Vec<String>,
        failed: Vec<FailedVideo>,
        remaining: usize,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Progress(_) => EventKind::Progress,
            Self::Complete(_) => EventKind::Complete,
            Self::Error { .. } => EventKind::Error,
            Self::BatchCreated { .. } => EventKind::BatchCreated,
            Self::BatchVideoAdded { .. } => EventKind::BatchVideoAdded,
            Self::BatchUploadsComplete { .. } => EventKind::BatchUploadsComplete,
            Self::BatchVideoStart { .. } => EventKind::BatchVideoStart,
            Self::BatchVideoProgress { .. } => EventKind::BatchVideoProgress,
            Self::BatchProgress { .. } => EventKind::BatchProgress,
            Self::BatchVideoComplete { .. } => EventKind::BatchVideoComplete,
            Self::BatchVideoError { .. } => EventKind::BatchVideoError,
            Self::BatchVideoSkipped { .. } => EventKind::BatchVideoSkipped,
            Self::BatchComplete { .. } => EventKind::BatchComplete,
            Self::BatchCancelled { .. } => EventKind::BatchCancelled,
        }
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub topic: Topic,
    pub published_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        self.topic.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_display() {
        let topic = Topic::new(EventKind::BatchVideoAdded, "b1");
        assert_eq!(topic.to_string(), "batch:video_added:b1");
        assert_eq!(Topic::new(EventKind::Progress, "j1").to_string(), "progress:j1");
    }

    #[test]
    fn test_payload_kind_matches_serialized_tag() {
        let payload = EventPayload::BatchVideoAdded {
            path: "/a".into(),
            original_name: "a.mp4".into(),
            queue_length: 1,
            total: 1,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], payload.kind().as_str());
        assert_eq!(json["data"]["originalName"], "a.mp4");
        assert_eq!(json["data"]["queueLength"], 1);
    }

    #[test]
    fn test_bus_event_serializes_topic_as_string() {
        let event = BusEvent {
            topic: Topic::new(EventKind::BatchUploadsComplete, "b9"),
            published_at: Utc::now(),
            payload: EventPayload::BatchUploadsComplete { total: 3 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "batch:uploads_complete:b9");
        assert_eq!(json["payload"]["data"]["total"], 3);
    }

    #[test]
    fn test_kind_groups_are_disjoint() {
        for kind in EventKind::JOB {
            assert!(!EventKind::BATCH.contains(&kind));
        }
    }
}
