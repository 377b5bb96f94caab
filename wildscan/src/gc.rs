//! Periodic sweep of aged job and batch records.
//!
//! Records are purged once they are older than the retention window, measured
//! from their start time, whatever their status. A batch that runs longer than
//! the window is dropped mid-run; callers must fetch results before then.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchCoordinator;
use crate::cache::ResultCache;
use crate::jobs::JobRegistry;

/// Configuration for the sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Maximum record age in seconds. 0 disables purging.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval between sweeps in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_retention_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval_secs() -> u64 {
    600 // 10 minutes
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    fn retention(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_seconds(i64::try_from(self.retention_secs).ok()?)
    }
}

/// Number of records removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub jobs: usize,
    pub batches: usize,
    pub cached_results: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.jobs + self.batches + self.cached_results
    }
}

/// Removes jobs and batches older than the retention window.
pub struct GcSweeper {
    config: GcConfig,
    jobs: Arc<JobRegistry>,
    batches: Arc<BatchCoordinator>,
    results: Option<Arc<ResultCache>>,
}

impl GcSweeper {
    pub fn new(config: GcConfig, jobs: Arc<JobRegistry>, batches: Arc<BatchCoordinator>) -> Self {
        Self {
            config,
            jobs,
            batches,
            results: None,
        }
    }

    /// Also age out cached analysis results.
    pub fn with_result_cache(mut self, results: Arc<ResultCache>) -> Self {
        self.results = Some(results);
        self
    }

    /// Sweep as if the current time were `now`.
    ///
    /// A record is purged iff `now - started_at > retention`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        if self.config.retention_secs == 0 {
            debug!("Sweeping disabled (retention_secs = 0)");
            return SweepStats::default();
        }

        let Some(cutoff) = self
            .config
            .retention()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return SweepStats::default();
        };
        let stats = SweepStats {
            jobs: self.jobs.purge_started_before(cutoff),
            batches: self.batches.purge_started_before(cutoff),
            cached_results: self
                .results
                .as_ref()
                .map_or(0, |results| results.purge_cached_before(cutoff)),
        };

        if stats.total() > 0 {
            info!(
                jobs = stats.jobs,
                batches = stats.batches,
                cached_results = stats.cached_results,
                retention_secs = self.config.retention_secs,
                "Purged aged records"
            );
        } else {
            debug!("No records to purge");
        }
        stats
    }

    /// Run one sweep against the wall clock.
    pub fn run_sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now())
    }

    /// Start the periodic sweep. The task ends when `cancellation_token` fires.
    pub fn start_background_task(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let sweeper = GcSweeper {
            config: self.config.clone(),
            jobs: self.jobs.clone(),
            batches: self.batches.clone(),
            results: self.results.clone(),
        };

        tokio::spawn(async move {
            let period = Duration::from_secs(sweeper.config.sweep_interval_secs.max(1));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Record sweeper started (retention: {}s, interval: {}s)",
                sweeper.config.retention_secs,
                period.as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Record sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let stats = sweeper.run_sweep();
                        if stats.total() > 0 {
                            debug!("Sweep cycle completed: {} records purged", stats.total());
                        }
                    }
                }
            }
        })
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::VideoDescriptor;
    use crate::events::EventBus;

    fn sweeper(config: GcConfig) -> (GcSweeper, Arc<JobRegistry>, Arc<BatchCoordinator>) {
        let bus = EventBus::new();
        let jobs = Arc::new(JobRegistry::new(bus.clone()));
        let batches = Arc::new(BatchCoordinator::new(bus));
        (
            GcSweeper::new(config, jobs.clone(), batches.clone()),
            jobs,
            batches,
        )
    }

    #[test]
    fn test_gc_config_default() {
        let config = GcConfig::default();
        assert_eq!(config.retention_secs, 3600);
        assert_eq!(config.sweep_interval_secs, 600);
    }

    #[test]
    fn test_gc_config_builder() {
        let config = GcConfig::new()
            .with_retention_secs(60)
            .with_sweep_interval_secs(5);
        assert_eq!(config.retention_secs, 60);
        assert_eq!(config.sweep_interval_secs, 5);
    }

    #[test]
    fn test_records_within_window_survive_many_sweeps() {
        let (sweeper, jobs, batches) = sweeper(GcConfig::default());
        jobs.create("j1");
        batches.create_empty_batch("m", 1.0, None);

        for _ in 0..100 {
            assert_eq!(sweeper.run_sweep(), SweepStats::default());
        }
        let near_edge = Utc::now() + chrono::Duration::minutes(59);
        assert_eq!(sweeper.sweep_at(near_edge).total(), 0);
        assert_eq!(jobs.len(), 1);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_aged_records_are_purged_regardless_of_status() {
        let (sweeper, jobs, batches) = sweeper(GcConfig::default());
        jobs.create("j1");
        let id = batches.create_batch(vec![VideoDescriptor::new("/a", "a")], "m", 1.0);
        batches.next_queued(&id);
        batches.start_video(&id, "/a", "j1");

        let later = Utc::now() + chrono::Duration::minutes(61);
        assert_eq!(
            sweeper.sweep_at(later),
            SweepStats {
                jobs: 1,
                batches: 1,
                cached_results: 0,
            }
        );
        assert!(jobs.get("j1").is_none());
        assert!(batches.get(&id).is_none());
    }

    #[test]
    fn test_purge_boundary_is_strict() {
        let (sweeper, jobs, _) = sweeper(GcConfig::default().with_retention_secs(60));
        let started_at = jobs.create("j1").started_at;

        assert_eq!(sweeper.sweep_at(started_at + chrono::Duration::seconds(60)).jobs, 0);
        assert_eq!(
            sweeper
                .sweep_at(started_at + chrono::Duration::milliseconds(60_001))
                .jobs,
            1
        );
    }

    #[test]
    fn test_result_cache_is_swept() {
        let (sweeper, _, _) = sweeper(GcConfig::default());
        let cache = Arc::new(ResultCache::new());
        let sweeper = sweeper.with_result_cache(cache.clone());
        cache.insert(
            "m",
            "/a",
            crate::analysis::AnalysisResult {
                species: vec![],
                summary: String::new(),
                duration_seconds: 1.0,
            },
        );

        assert_eq!(sweeper.run_sweep().cached_results, 0);
        let later = Utc::now() + chrono::Duration::minutes(61);
        assert_eq!(sweeper.sweep_at(later).cached_results, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_retention_disables_purge() {
        let (sweeper, jobs, _) = sweeper(GcConfig::default().with_retention_secs(0));
        jobs.create("j1");
        let far_future = Utc::now() + chrono::Duration::days(365);
        assert_eq!(sweeper.sweep_at(far_future).total(), 0);
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_background_task_stops_on_cancel() {
        let (sweeper, _, _) = sweeper(GcConfig::default().with_sweep_interval_secs(1));
        let token = CancellationToken::new();
        let handle = sweeper.start_background_task(token.clone());

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
