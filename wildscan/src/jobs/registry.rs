//! In-memory registry of per-video analysis jobs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::progress::ProgressSnapshot;
use crate::analysis::AnalysisResult;
use crate::events::{EventBus, EventPayload};

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, no progress reported yet.
    Pending,
    /// At least one progress update was received.
    Running,
    /// Job completed successfully.
    Completed,
    /// Job failed.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work: the analysis of one video.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: Option<ProgressSnapshot>,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: None,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Tracks job lifecycle independently of batching.
///
/// Unknown ids are absorbed silently everywhere: the sweeper may purge a job
/// while its analysis is still reporting.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<String, Job>,
    bus: EventBus,
}

impl JobRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            jobs: DashMap::new(),
            bus,
        }
    }

    /// Create a pending job, replacing any record with the same id.
    pub fn create(&self, id: impl Into<String>) -> Job {
        let job = Job::new(id.into());
        debug!(job_id = %job.id, "Job created");
        self.jobs.insert(job.id.clone(), job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|job| job.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Store the latest snapshot and force the job into `Running`.
    pub fn update_progress(&self, id: &str, snapshot: ProgressSnapshot) {
        let Some(mut job) = self.jobs.get_mut(id) else {
            trace!(job_id = %id, "Progress for unknown job ignored");
            return;
        };
        job.status = JobStatus::Running;
        job.progress = Some(snapshot.clone());
        self.bus.publish(id, EventPayload::Progress(snapshot));
    }

    /// Mark the job completed. Repeated terminal calls overwrite each other.
    pub fn complete(&self, id: &str, result: AnalysisResult) {
        let Some(mut job) = self.jobs.get_mut(id) else {
            trace!(job_id = %id, "Completion for unknown job ignored");
            return;
        };
        job.status = JobStatus::Completed;
        job.result = Some(result.clone());
        job.error = None;
        job.completed_at = Some(Utc::now());
        debug!(job_id = %id, "Job completed");
        self.bus.publish(id, EventPayload::Complete(result));
    }

    /// Mark the job failed. Repeated terminal calls overwrite each other.
    pub fn fail(&self, id: &str, error: impl Into<String>) {
        let Some(mut job) = self.jobs.get_mut(id) else {
            trace!(job_id = %id, "Failure for unknown job ignored");
            return;
        };
        let error = error.into();
        job.status = JobStatus::Failed;
        job.result = None;
        job.error = Some(error.clone());
        job.completed_at = Some(Utc::now());
        debug!(job_id = %id, error = %error, "Job failed");
        self.bus.publish(id, EventPayload::Error { error });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove every job started strictly before `cutoff`. Returns the count.
    pub fn purge_started_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| job.started_at >= cutoff);
        before.saturating_sub(self.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Topic, TryRecvError};
    use crate::jobs::Stage;

    fn result(summary: &str) -> AnalysisResult {
        AnalysisResult {
            species: vec![],
            summary: summary.to_string(),
            duration_seconds: 1.0,
        }
    }

    #[test]
    fn test_create_and_get() {
        let registry = JobRegistry::new(EventBus::new());
        let job = registry.create("j1");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.progress.is_none());
        assert!(job.completed_at.is_none());
        assert_eq!(registry.get("j1").unwrap().id, "j1");
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_progress_forces_running_and_publishes() {
        let bus = EventBus::new();
        let registry = JobRegistry::new(bus.clone());
        registry.create("j1");
        let mut sub = bus.subscribe(&Topic::new(EventKind::Progress, "j1"));

        let snapshot = ProgressSnapshot::new(Stage::Analyzing, 40.0, "thinking");
        registry.update_progress("j1", snapshot.clone());

        let job = registry.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, Some(snapshot.clone()));
        assert_eq!(sub.recv().await.unwrap().payload, EventPayload::Progress(snapshot));
    }

    #[test]
    fn test_progress_replaces_snapshot_wholesale() {
        let registry = JobRegistry::new(EventBus::new());
        registry.create("j1");
        registry.update_progress("j1", ProgressSnapshot::new(Stage::Uploading, 90.0, "up"));
        registry.update_progress("j1", ProgressSnapshot::new(Stage::Analyzing, 5.0, "an"));

        let progress = registry.get("j1").unwrap().progress.unwrap();
        assert_eq!(progress.stage, Stage::Analyzing);
        assert_eq!(progress.percent, 5.0);
        assert_eq!(progress.message, "an");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_ignored() {
        let bus = EventBus::new();
        let registry = JobRegistry::new(bus.clone());
        let mut sub = bus.subscribe_entity("ghost");

        registry.update_progress("ghost", ProgressSnapshot::new(Stage::Processing, 1.0, ""));
        registry.complete("ghost", result("x"));
        registry.fail("ghost", "boom");

        assert!(registry.get("ghost").is_none());
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_complete_and_fail_publish() {
        let bus = EventBus::new();
        let registry = JobRegistry::new(bus.clone());
        registry.create("ok");
        registry.create("bad");
        let mut ok = bus.subscribe(&Topic::new(EventKind::Complete, "ok"));
        let mut bad = bus.subscribe(&Topic::new(EventKind::Error, "bad"));

        registry.complete("ok", result("fine"));
        registry.fail("bad", "network unreachable");

        assert_eq!(
            ok.recv().await.unwrap().payload,
            EventPayload::Complete(result("fine"))
        );
        assert_eq!(
            bad.recv().await.unwrap().payload,
            EventPayload::Error {
                error: "network unreachable".into()
            }
        );
        let job = registry.get("bad").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_terminal_transitions_are_last_write_wins() {
        let registry = JobRegistry::new(EventBus::new());
        registry.create("j1");

        registry.complete("j1", result("first"));
        registry.fail("j1", "late failure");
        let job = registry.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("late failure"));
        assert!(job.result.is_none());

        registry.complete("j1", result("second"));
        let job = registry.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap().summary, "second");
        assert!(job.error.is_none());
    }

    #[test]
    fn test_purge_started_before() {
        let registry = JobRegistry::new(EventBus::new());
        registry.create("a");
        registry.create("b");

        assert_eq!(registry.purge_started_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.purge_started_before(Utc::now() + chrono::Duration::seconds(1)), 2);
        assert!(registry.is_empty());
    }
}
