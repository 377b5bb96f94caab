use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wildscan::analysis::HttpAnalyzer;
use wildscan::api::{ApiServer, AppState};
use wildscan::config::AppConfig;
use wildscan::engine::Engine;
use wildscan::frames::FfmpegFrameExtractor;
use wildscan::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    let (logging_config, _guard) =
        logging::init_logging(&config.log_dir).context("initializing logging")?;
    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.child_token());

    info!(version = env!("CARGO_PKG_VERSION"), "wildscan starting");

    let analyzer_config = config
        .analyzer
        .clone()
        .context("ANALYZER_ENDPOINT must be set")?;
    let analyzer = Arc::new(HttpAnalyzer::new(analyzer_config).context("building analyzer")?);

    let engine = Arc::new(Engine::new(config.engine.clone()));
    engine.start();

    let mut runner = engine.runner(analyzer);
    if let Some(frames_dir) = &config.frames_dir {
        info!(dir = %frames_dir.display(), "Species frame extraction enabled");
        runner = runner.with_frame_extractor(
            Arc::new(FfmpegFrameExtractor::with_ffmpeg_path(&config.ffmpeg_path)),
            frames_dir.clone(),
        );
    }

    let state = AppState::new(engine.clone())
        .with_runner(Arc::new(runner))
        .with_logging_config(logging_config);
    let server = Arc::new(ApiServer::new(config.api.clone(), state));

    let mut server_task = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    let finished_early = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            None
        }
        joined = &mut server_task => Some(joined),
    };

    server.shutdown();
    shutdown.cancel();
    engine.stop().await;

    let joined = match finished_early {
        Some(joined) => joined,
        None => server_task.await,
    };
    joined
        .context("API server task panicked")?
        .context("API server failed")?;

    info!("wildscan stopped");
    Ok(())
}
