//! The orchestration engine: owns the bus, the registries and the sweeper.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::Analyzer;
use crate::batch::BatchCoordinator;
use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::events::{EventBus, EventKind, Subscription};
use crate::gc::GcSweeper;
use crate::jobs::JobRegistry;
use crate::runner::BatchRunner;

/// One self-contained orchestration instance.
///
/// Nothing is global: tests and the server each build their own engine.
/// [`Engine::start`] spawns the sweeper and [`Engine::stop`] tears it down
/// together with every runner built from this engine.
pub struct Engine {
    config: EngineConfig,
    bus: EventBus,
    jobs: Arc<JobRegistry>,
    batches: Arc<BatchCoordinator>,
    results: Arc<ResultCache>,
    sweeper: GcSweeper,
    cancellation_token: CancellationToken,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::with_config(config.bus.clone());
        let jobs = Arc::new(JobRegistry::new(bus.clone()));
        let batches = Arc::new(BatchCoordinator::new(bus.clone()));
        let results = Arc::new(ResultCache::new());
        let sweeper = GcSweeper::new(config.gc.clone(), jobs.clone(), batches.clone())
            .with_result_cache(results.clone());

        Self {
            config,
            bus,
            jobs,
            batches,
            results,
            sweeper,
            cancellation_token: CancellationToken::new(),
            sweeper_handle: Mutex::new(None),
        }
    }

    /// Start the periodic sweep. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut handle = self.sweeper_handle.lock();
        if handle.is_some() {
            warn!("Engine already started");
            return;
        }
        *handle = Some(
            self.sweeper
                .start_background_task(self.cancellation_token.child_token()),
        );
        info!("Engine started");
    }

    /// Stop the sweeper and signal runners to stop pulling work.
    pub async fn stop(&self) {
        info!("Stopping engine");
        self.cancellation_token.cancel();

        let handle = self.sweeper_handle.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
        info!("Engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper_handle.lock().is_some() && !self.cancellation_token.is_cancelled()
    }

    /// A runner bound to this engine's registries, result cache and shutdown.
    pub fn runner(&self, analyzer: Arc<dyn Analyzer>) -> BatchRunner {
        BatchRunner::new(
            self.config.runner.clone(),
            self.jobs.clone(),
            self.batches.clone(),
            analyzer,
        )
        .with_result_cache(self.results.clone())
        .with_shutdown_token(self.cancellation_token.child_token())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    pub fn batches(&self) -> &Arc<BatchCoordinator> {
        &self.batches
    }

    pub fn results(&self) -> &Arc<ResultCache> {
        &self.results
    }

    pub fn sweeper(&self) -> &GcSweeper {
        &self.sweeper
    }

    /// Subscribe to every event of one job.
    pub fn subscribe_job(&self, job_id: &str) -> Subscription {
        self.bus.subscribe_kinds(job_id, &EventKind::JOB)
    }

    /// Subscribe to every event of one batch.
    pub fn subscribe_batch(&self, batch_id: &str) -> Subscription {
        self.bus.subscribe_kinds(batch_id, &EventKind::BATCH)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("jobs", &self.jobs.len())
            .field("batches", &self.batches.len())
            .field("running", &self.is_running())
            .finish()
    }
}
