//! Driving loop that drains a batch through an [`Analyzer`].
//!
//! One runner task per batch pulls videos strictly one at a time, forwards the
//! analyzer's progress into the job registry and the batch coordinator, and
//! records every outcome. It stops when the batch is cancelled, drained after
//! uploads completed, purged, or when the engine shuts down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{Analyzer, ModelConfig, VideoDescriptor};
use crate::batch::{BatchCoordinator, BatchStatus};
use crate::cache::ResultCache;
use crate::frames::{FrameExtractor, extract_species_frames};
use crate::jobs::{JobRegistry, ProgressReporter, ProgressSnapshot};
use crate::utils::fs::sanitize_file_stem;

/// Configuration for [`BatchRunner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Delay before re-checking a batch that is waiting for uploads.
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
}

fn default_wait_interval_ms() -> u64 {
    500
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            wait_interval_ms: default_wait_interval_ms(),
        }
    }
}

impl RunnerConfig {
    pub fn with_wait_interval_ms(mut self, ms: u64) -> Self {
        self.wait_interval_ms = ms;
        self
    }

    fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms.max(1))
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Uploads completed, the queue drained and the batch was finalized.
    Completed,
    /// The batch was cancelled.
    Cancelled,
    /// Uploads completed without a single video; the batch stays pending.
    Empty,
    /// The batch disappeared, either swept or never created.
    Missing,
    /// The engine is shutting down.
    Shutdown,
}

/// Tally of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub batch_id: String,
    pub outcome: RunOutcome,
    pub analysed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum VideoOutcome {
    Analysed,
    Skipped,
    Failed,
    Rejected,
}

/// Drains batches through an analyzer.
pub struct BatchRunner {
    config: RunnerConfig,
    jobs: Arc<JobRegistry>,
    batches: Arc<BatchCoordinator>,
    analyzer: Arc<dyn Analyzer>,
    results: Option<Arc<ResultCache>>,
    frames: Option<(Arc<dyn FrameExtractor>, PathBuf)>,
    shutdown: CancellationToken,
}

impl BatchRunner {
    pub fn new(
        config: RunnerConfig,
        jobs: Arc<JobRegistry>,
        batches: Arc<BatchCoordinator>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            config,
            jobs,
            batches,
            analyzer,
            results: None,
            frames: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reuse and remember results per `(model, path)`.
    pub fn with_result_cache(mut self, results: Arc<ResultCache>) -> Self {
        self.results = Some(results);
        self
    }

    /// Save a frame per sighted species under `output_dir/{batch_id}` after
    /// each successful analysis.
    pub fn with_frame_extractor(
        mut self,
        extractor: Arc<dyn FrameExtractor>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        self.frames = Some((extractor, output_dir.into()));
        self
    }

    /// Stop pulling new videos once `token` fires.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run [`BatchRunner::run`] on a new task.
    pub fn spawn(self: &Arc<Self>, batch_id: impl Into<String>) -> JoinHandle<RunSummary> {
        let runner = Arc::clone(self);
        let batch_id = batch_id.into();
        tokio::spawn(async move { runner.run(&batch_id).await })
    }

    /// Drain `batch_id` until it is cancelled or done.
    ///
    /// A video already being analysed when the batch is cancelled is awaited
    /// and its outcome recorded; nothing is dequeued afterwards.
    pub async fn run(&self, batch_id: &str) -> RunSummary {
        let mut summary = RunSummary {
            batch_id: batch_id.to_string(),
            outcome: RunOutcome::Missing,
            analysed: 0,
            skipped: 0,
            failed: 0,
        };
        let Some(batch) = self.batches.get(batch_id) else {
            warn!(batch_id = %batch_id, "Cannot run unknown batch");
            return summary;
        };
        let model = ModelConfig::from(batch.model.as_str());
        let fps = batch.fps;
        drop(batch);

        info!(batch_id = %batch_id, analyzer = self.analyzer.name(), "Batch runner started");

        summary.outcome = loop {
            if self.shutdown.is_cancelled() {
                break RunOutcome::Shutdown;
            }
            match self.batches.status(batch_id) {
                None => break RunOutcome::Missing,
                Some(BatchStatus::Cancelled) => break RunOutcome::Cancelled,
                Some(BatchStatus::Completed) => break RunOutcome::Completed,
                Some(_) => {}
            }

            if let Some(video) = self.batches.next_queued(batch_id) {
                match self.process(batch_id, &video, &model, fps).await {
                    VideoOutcome::Analysed => summary.analysed += 1,
                    VideoOutcome::Skipped => summary.skipped += 1,
                    VideoOutcome::Failed => summary.failed += 1,
                    VideoOutcome::Rejected => {}
                }
                continue;
            }

            if self.batches.should_wait(batch_id) {
                self.wait().await;
                continue;
            }

            if self.batches.is_done(batch_id) {
                if self.batches.current_job_id(batch_id).is_some() {
                    self.wait().await;
                    continue;
                }
                if self.batches.complete_batch(batch_id) {
                    break RunOutcome::Completed;
                }
                if self.batches.status(batch_id) == Some(BatchStatus::Pending) {
                    break RunOutcome::Empty;
                }
            }
        };

        info!(
            batch_id = %batch_id,
            outcome = ?summary.outcome,
            analysed = summary.analysed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Batch runner finished"
        );
        summary
    }

    async fn wait(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.wait_interval()) => {}
        }
    }

    async fn process(
        &self,
        batch_id: &str,
        video: &VideoDescriptor,
        model: &ModelConfig,
        fps: f64,
    ) -> VideoOutcome {
        if let Some(result) = self
            .results
            .as_ref()
            .and_then(|results| results.get(&model.name, &video.path))
        {
            return if self.batches.skip_video_with_result(
                batch_id,
                &video.path,
                "already analysed with this model",
                Some(result),
            ) {
                VideoOutcome::Skipped
            } else {
                VideoOutcome::Rejected
            };
        }

        let job_id = Uuid::new_v4().to_string();
        self.jobs.create(job_id.as_str());
        if !self.batches.start_video(batch_id, &video.path, &job_id) {
            self.jobs.fail(&job_id, "batch did not accept the video");
            return VideoOutcome::Rejected;
        }

        let (reporter, mut rx) = ProgressReporter::channel(job_id.as_str());

        // Intermediate snapshots may be coalesced, the latest one is always forwarded.
        let analysis = self.analyzer.analyze(video, model, fps, &reporter);
        tokio::pin!(analysis);
        let outcome = loop {
            tokio::select! {
                biased;
                Ok(()) = rx.changed() => {
                    let snapshot = rx.borrow_and_update().clone();
                    if let Some(snapshot) = snapshot {
                        self.forward_progress(batch_id, &video.path, &job_id, snapshot);
                    }
                }
                outcome = &mut analysis => break outcome,
            }
        };
        if rx.has_changed().unwrap_or(false) {
            let snapshot = rx.borrow_and_update().clone();
            if let Some(snapshot) = snapshot {
                self.forward_progress(batch_id, &video.path, &job_id, snapshot);
            }
        }

        match outcome {
            Ok(result) => {
                self.jobs.complete(&job_id, result.clone());
                self.batches
                    .complete_video(batch_id, &video.path, result.clone());
                if let Some(results) = &self.results {
                    results.insert(&model.name, &video.path, result.clone());
                }
                if let Some((extractor, dir)) = &self.frames {
                    let output_dir = dir.join(sanitize_file_stem(batch_id));
                    extract_species_frames(
                        extractor.as_ref(),
                        Path::new(&video.path),
                        &result,
                        &output_dir,
                    )
                    .await;
                }
                VideoOutcome::Analysed
            }
            Err(e) => {
                let error = e.to_string();
                debug!(batch_id = %batch_id, job_id = %job_id, error = %error, "Analysis failed");
                self.jobs.fail(&job_id, error.as_str());
                self.batches.fail_video(batch_id, &video.path, error);
                VideoOutcome::Failed
            }
        }
    }

    fn forward_progress(
        &self,
        batch_id: &str,
        path: &str,
        job_id: &str,
        snapshot: ProgressSnapshot,
    ) {
        self.jobs.update_progress(job_id, snapshot.clone());
        self.batches.update_video_progress(batch_id, path, snapshot);
    }
}
