//! Copy job callbacks.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::ArchiveError;

/// Identifies one running job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Index of the pool thread running the job
    pub worker: usize,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [worker {}]",
            self.source.display(),
            self.destination.display(),
            self.worker
        )
    }
}

/// Receives job events from copy workers. Called concurrently from every
/// worker thread, so implementations synchronize their own state.
pub trait CopyListener: Sync {
    fn on_start(&self, _key: &JobKey, _total_bytes: u64) {}

    /// Called whenever the whole-number percentage changes.
    fn on_progress(&self, _key: &JobKey, _percent: u8, _bytes_per_second: f64) {}

    fn on_skip(&self, _key: &JobKey, _reason: &str) {}

    fn on_failure(&self, _key: &JobKey, _error: &ArchiveError) {}

    fn on_finish(&self, _key: &JobKey, _bytes: u64) {}
}

/// Listener that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl CopyListener for LoggingListener {
    fn on_start(&self, key: &JobKey, total_bytes: u64) {
        debug!("Copying {} ({} bytes)", key, total_bytes);
    }

    fn on_progress(&self, key: &JobKey, percent: u8, bytes_per_second: f64) {
        debug!(
            "{}: {}% ({:.1} MB/s)",
            key.destination.display(),
            percent,
            bytes_per_second / 1_000_000.0
        );
    }

    fn on_skip(&self, key: &JobKey, reason: &str) {
        info!("Skipped {}: {}", key.destination.display(), reason);
    }

    fn on_finish(&self, key: &JobKey, bytes: u64) {
        info!("Wrote {} ({} bytes)", key.destination.display(), bytes);
    }
}
