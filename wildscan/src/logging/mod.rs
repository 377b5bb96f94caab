//! Logging setup: console plus daily-rolling file output, a filter that can be
//! changed at runtime, and retention of old log files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "wildscan=info,tower_http=info";

/// Rolling log files are named `{LOG_FILE_PREFIX}.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "wildscan.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle on the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    /// Current filter directive.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the filter, e.g. with `"wildscan=debug"`.
    pub fn set_filter(&self, directive: &str) -> Result<()> {
        let filter = parse_filter(directive)?;
        self.handle
            .reload(filter)
            .map_err(|e| Error::Other(format!("Failed to reload filter: {e}")))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Delete log files older than 7 days, once a day until `cancel_token` fires.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);
            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS, Utc::now()).await {
                    warn!(error = %e, "Failed to clean up old logs");
                }
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {}
                }
            }
        });
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    if directive.trim().is_empty() {
        return Err(Error::config("log filter directive is empty"));
    }
    EnvFilter::try_new(directive)
        .map_err(|e| Error::config(format!("Invalid filter directive: {e}")))
}

/// Date encoded in a rolling log file name, if it is one of ours.
fn log_file_date(file_name: &str) -> Option<NaiveDate> {
    let date = file_name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete rolling log files dated more than `retention_days` before `now`.
/// Returns how many were deleted.
async fn cleanup_old_logs(
    log_dir: &Path,
    retention_days: i64,
    now: DateTime<Utc>,
) -> std::io::Result<usize> {
    let cutoff = (now - chrono::Duration::days(retention_days)).date_naive();
    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(log_file_date)
        else {
            continue;
        };
        if date >= cutoff || !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                deleted += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]. Keep the returned guard alive
/// for the lifetime of the process or buffered file output is lost.
pub fn init_logging(log_dir: &Path) -> Result<(Arc<LoggingConfig>, WorkerGuard)> {
    fs::ensure_dir_all_sync_with_op("creating log directory", log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_dir.to_path_buf(),
    });
    Ok((config, guard))
}
