//! Batch coordinator: the per-batch state machine.
//!
//! Each batch owns a FIFO queue that producers append to (possibly while the
//! batch is being drained) and a single consumer pops from. At most one job is
//! current per batch. Every mutating call publishes exactly one event, except
//! [`BatchCoordinator::update_video_progress`] which publishes the per-video
//! event and its aggregate back to back.
//!
//! Batches live in a `DashMap`; each call holds the batch's entry lock for its
//! whole duration, including the publish, so events for one batch leave in call
//! order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::model::{BatchJob, BatchStatus, BatchSummary};
use crate::analysis::{AnalysisResult, VideoDescriptor};
use crate::events::{EventBus, EventPayload};
use crate::jobs::ProgressSnapshot;

/// Owns all batches.
#[derive(Debug)]
pub struct BatchCoordinator {
    batches: DashMap<String, BatchJob>,
    bus: EventBus,
}

impl BatchCoordinator {
    pub fn new(bus: EventBus) -> Self {
        Self {
            batches: DashMap::new(),
            bus,
        }
    }

    /// Create a batch whose full video list is known upfront.
    ///
    /// Uploads are complete immediately, so the batch is done once its queue
    /// drains.
    pub fn create_batch(
        &self,
        videos: Vec<VideoDescriptor>,
        model: impl Into<String>,
        fps: f64,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let mut batch = BatchJob::new(id.clone(), model.into(), fps);
        for video in videos {
            batch.push(video);
        }
        batch.uploads_complete = true;
        let expected = batch.total();

        info!(batch_id = %id, videos = expected, model = %batch.model, "Batch created");
        let entry = self.batches.entry(id.clone()).insert(batch);
        self.bus.publish(
            &id,
            EventPayload::BatchCreated {
                batch_id: id.clone(),
                expected_count: Some(expected),
            },
        );
        drop(entry);
        id
    }

    /// Create a batch that will be filled incrementally through
    /// [`BatchCoordinator::add_video`].
    pub fn create_empty_batch(
        &self,
        model: impl Into<String>,
        fps: f64,
        expected_count: Option<usize>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let batch = BatchJob::new(id.clone(), model.into(), fps);

        info!(batch_id = %id, model = %batch.model, ?expected_count, "Empty batch created");
        let entry = self.batches.entry(id.clone()).insert(batch);
        self.bus.publish(
            &id,
            EventPayload::BatchCreated {
                batch_id: id.clone(),
                expected_count,
            },
        );
        drop(entry);
        id
    }

    /// Append a video to the tail of the queue.
    ///
    /// Returns `false` for unknown or finished batches.
    pub fn add_video(
        &self,
        batch_id: &str,
        path: impl Into<String>,
        original_name: impl Into<String>,
    ) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            trace!(batch_id = %batch_id, "add_video on unknown batch");
            return false;
        };
        let path = path.into();
        if batch.status.is_terminal() {
            debug!(batch_id = %batch_id, path = %path, status = %batch.status, "Rejected video for finished batch");
            return false;
        }

        let original_name = original_name.into();
        batch.push(VideoDescriptor::new(path.clone(), original_name.clone()));
        debug!(batch_id = %batch_id, path = %path, queued = batch.queue.len(), "Video added");
        self.bus.publish(
            batch_id,
            EventPayload::BatchVideoAdded {
                path,
                original_name,
                queue_length: batch.queue.len(),
                total: batch.total(),
            },
        );
        true
    }

    /// Declare that no more videos will be added.
    ///
    /// From here on the consumer detects drain-to-completion through
    /// [`BatchCoordinator::is_done`].
    pub fn mark_uploads_complete(&self, batch_id: &str) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        if batch.status.is_terminal() {
            return false;
        }
        batch.uploads_complete = true;
        debug!(batch_id = %batch_id, total = batch.total(), "Uploads complete");
        self.bus.publish(
            batch_id,
            EventPayload::BatchUploadsComplete {
                total: batch.total(),
            },
        );
        true
    }

    /// Pop the head of the queue.
    ///
    /// Returns `None` when the queue is empty, the batch is finished, or
    /// unknown.
    pub fn next_queued(&self, batch_id: &str) -> Option<VideoDescriptor> {
        let mut batch = self.batches.get_mut(batch_id)?;
        if batch.status.is_terminal() {
            return None;
        }
        let index = batch.total() - batch.queue.len();
        let video = batch.queue.pop_front()?;
        batch.last_dequeued = Some(index);
        trace!(batch_id = %batch_id, path = %video.path, index, "Dequeued video");
        Some(video)
    }

    /// True while uploads are still arriving and the queue is momentarily empty.
    pub fn should_wait(&self, batch_id: &str) -> bool {
        self.batches
            .get(batch_id)
            .map(|batch| batch.should_wait())
            .unwrap_or(false)
    }

    /// True once uploads are complete and the queue is empty.
    ///
    /// A job may still be running; check [`BatchCoordinator::current_job_id`]
    /// before finalizing.
    pub fn is_done(&self, batch_id: &str) -> bool {
        self.batches
            .get(batch_id)
            .map(|batch| batch.is_done())
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self, batch_id: &str) -> bool {
        self.batches
            .get(batch_id)
            .map(|batch| batch.status == BatchStatus::Cancelled)
            .unwrap_or(false)
    }

    /// Make `job_id` the batch's current job.
    ///
    /// Rejected when another job is still current or the batch is finished.
    pub fn start_video(&self, batch_id: &str, path: &str, job_id: &str) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        if batch.status.is_terminal() {
            return false;
        }
        if let Some(current) = &batch.current_job_id {
            warn!(batch_id = %batch_id, current_job = %current, job_id = %job_id, "Batch already has a running job");
            return false;
        }

        let index = batch
            .last_dequeued
            .filter(|&i| batch.videos.get(i).map(String::as_str) == Some(path))
            .or_else(|| batch.videos.iter().position(|p| p == path))
            .unwrap_or(batch.total());

        batch.status = BatchStatus::Running;
        batch.current_job_id = Some(job_id.to_string());
        batch.current_index = Some(index);
        batch.current_video = Some(path.to_string());
        batch.current_progress = None;

        info!(batch_id = %batch_id, job_id = %job_id, path = %path, index, total = batch.total(), "Video started");
        self.bus.publish(
            batch_id,
            EventPayload::BatchVideoStart {
                path: path.to_string(),
                index,
                total: batch.total(),
            },
        );
        true
    }

    /// Publish a per-video progress event and the batch aggregate right after it.
    pub fn update_video_progress(&self, batch_id: &str, path: &str, snapshot: ProgressSnapshot) {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return;
        };
        if batch.current_video.as_deref() == Some(path) {
            batch.current_progress = Some(snapshot.clone());
        }

        self.bus.publish(
            batch_id,
            EventPayload::BatchVideoProgress {
                path: path.to_string(),
                stage: snapshot.stage,
                percent: snapshot.percent,
                message: snapshot.message.clone(),
            },
        );
        self.bus.publish(
            batch_id,
            EventPayload::BatchProgress {
                total: batch.total(),
                completed: batch.completed.len(),
                failed: batch.failed.len(),
                current_index: batch.current_index,
                current_video: batch.current_video.clone(),
                current_progress: batch.current_progress.clone(),
            },
        );
    }

    /// Record a successful analysis.
    ///
    /// Accepted on cancelled batches too, so work already in flight when the
    /// batch was cancelled is kept.
    pub fn complete_video(&self, batch_id: &str, path: &str, result: AnalysisResult) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        batch.record_completed(path);
        batch.results.insert(path.to_string(), result.clone());
        batch.clear_current(path);

        info!(batch_id = %batch_id, path = %path, species = result.species.len(), "Video analysed");
        self.bus.publish(
            batch_id,
            EventPayload::BatchVideoComplete {
                path: path.to_string(),
                result,
                completed_count: batch.completed.len(),
                total: batch.total(),
            },
        );
        true
    }

    /// Record a failed analysis. The batch carries on with the next video.
    pub fn fail_video(&self, batch_id: &str, path: &str, error: impl Into<String>) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        let error = error.into();
        batch.record_failed(path, error.clone());
        batch.clear_current(path);

        warn!(batch_id = %batch_id, path = %path, error = %error, "Video failed");
        self.bus.publish(
            batch_id,
            EventPayload::BatchVideoError {
                path: path.to_string(),
                error,
                failed_count: batch.failed.len(),
                total: batch.total(),
            },
        );
        true
    }

    /// Record a video as completed without analysing it, e.g. when a result
    /// from an earlier run is being reused.
    pub fn skip_video(&self, batch_id: &str, path: &str, reason: impl Into<String>) -> bool {
        self.skip_video_with_result(batch_id, path, reason, None)
    }

    /// [`BatchCoordinator::skip_video`], also storing the reused result.
    pub fn skip_video_with_result(
        &self,
        batch_id: &str,
        path: &str,
        reason: impl Into<String>,
        result: Option<AnalysisResult>,
    ) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        if batch.status.is_terminal() {
            return false;
        }
        let reason = reason.into();
        batch.status = BatchStatus::Running;
        batch.record_completed(path);
        if let Some(result) = result {
            batch.results.insert(path.to_string(), result);
        }

        debug!(batch_id = %batch_id, path = %path, reason = %reason, "Video skipped");
        self.bus.publish(
            batch_id,
            EventPayload::BatchVideoSkipped {
                path: path.to_string(),
                reason,
                completed_count: batch.completed.len(),
                total: batch.total(),
            },
        );
        true
    }

    /// Finish a running batch. Returns whether the transition was accepted.
    pub fn complete_batch(&self, batch_id: &str) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        if batch.status != BatchStatus::Running {
            debug!(batch_id = %batch_id, status = %batch.status, "complete_batch ignored");
            return false;
        }
        batch.status = BatchStatus::Completed;
        batch.current_job_id = None;
        batch.completed_at = Some(Utc::now());

        info!(
            batch_id = %batch_id,
            completed = batch.completed.len(),
            failed = batch.failed.len(),
            "Batch completed"
        );
        self.bus.publish(
            batch_id,
            EventPayload::BatchComplete {
                completed: batch.completed.clone(),
                failed: batch.failed.clone(),
                total: batch.total(),
            },
        );
        true
    }

    /// Cancel a running batch.
    ///
    /// Only flips state; the driving loop notices through
    /// [`BatchCoordinator::is_cancelled`] and stops pulling work. Returns
    /// `true` only for the first call on a running batch.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        let Some(mut batch) = self.batches.get_mut(batch_id) else {
            return false;
        };
        if batch.status != BatchStatus::Running {
            debug!(batch_id = %batch_id, status = %batch.status, "cancel_batch ignored");
            return false;
        }
        batch.status = BatchStatus::Cancelled;
        batch.current_job_id = None;
        batch.completed_at = Some(Utc::now());

        info!(batch_id = %batch_id, remaining = batch.queue.len(), "Batch cancelled");
        self.bus.publish(
            batch_id,
            EventPayload::BatchCancelled {
                completed: batch.completed.clone(),
                failed: batch.failed.clone(),
                remaining: batch.queue.len(),
            },
        );
        true
    }

    /// Cloned snapshot of a batch.
    pub fn get(&self, batch_id: &str) -> Option<BatchJob> {
        self.batches.get(batch_id).map(|batch| batch.clone())
    }

    pub fn status(&self, batch_id: &str) -> Option<BatchStatus> {
        self.batches.get(batch_id).map(|batch| batch.status)
    }

    pub fn current_job_id(&self, batch_id: &str) -> Option<String> {
        self.batches
            .get(batch_id)
            .and_then(|batch| batch.current_job_id.clone())
    }

    /// Summaries of every batch, oldest first.
    pub fn list(&self) -> Vec<BatchSummary> {
        let mut summaries: Vec<_> = self.batches.iter().map(|b| b.summary()).collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Remove every batch started strictly before `cutoff`, whatever its
    /// status. Returns the count.
    pub fn purge_started_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, batch| batch.started_at >= cutoff);
        before.saturating_sub(self.batches.len())
    }
}
