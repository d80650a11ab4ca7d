//! Byte pumping with progress, and loose-file output that never leaves a
//! truncated file behind.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, warn};

use super::listener::{CopyListener, JobKey};
use crate::archive::FileTimes;
use crate::error::ArchiveError;
use crate::paths;

/// Per-job progress. Reports only when the whole-number percentage moves;
/// throughput covers the bytes since the previous report.
pub(crate) struct Progress<'a> {
    listener: &'a dyn CopyListener,
    key: &'a JobKey,
    total: u64,
    done: u64,
    since_report: u64,
    last_percent: Option<u8>,
    last_report: Instant,
}

impl<'a> Progress<'a> {
    pub fn new(listener: &'a dyn CopyListener, key: &'a JobKey, total: u64) -> Self {
        Progress {
            listener,
            key,
            total,
            done: 0,
            since_report: 0,
            last_percent: None,
            last_report: Instant::now(),
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.done += bytes;
        self.since_report += bytes;
        let percent = percent(self.done, self.total);
        if self.last_percent != Some(percent) {
            self.report(percent);
        }
    }

    /// Report 100% if the byte count never got there (empty jobs, sizes
    /// that were estimates).
    pub fn complete(&mut self) {
        if self.last_percent != Some(100) {
            self.report(100);
        }
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    fn report(&mut self, percent: u8) {
        let elapsed = self.last_report.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.since_report as f64 / elapsed
        } else {
            0.0
        };
        self.listener.on_progress(self.key, percent, rate);
        self.last_percent = Some(percent);
        self.last_report = Instant::now();
        self.since_report = 0;
    }
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as u128 * 100 / total as u128).min(100)) as u8
}

/// Copy `reader` into `writer` through `buf`.
pub(crate) fn pump(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    buf: &mut [u8],
    progress: &mut Progress<'_>,
) -> io::Result<u64> {
    let mut copied = 0u64;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        progress.advance(n as u64);
    }
    Ok(copied)
}

/// Write `reader` to a new file at `path` and stamp it with `times`.
/// On any failure the partial file is removed before the error returns.
pub(crate) fn write_file(
    reader: &mut dyn Read,
    path: &Path,
    times: &FileTimes,
    buf: &mut [u8],
    progress: &mut Progress<'_>,
) -> Result<u64, ArchiveError> {
    paths::ensure_parent_dirs(path)?;
    let result = File::create(path).and_then(|mut file| {
        let n = pump(reader, &mut file, buf, progress)?;
        file.flush()?;
        Ok(n)
    });
    match result {
        Ok(n) => {
            restore_times(path, times);
            Ok(n)
        }
        Err(e) => {
            remove_partial(path);
            Err(e.into())
        }
    }
}

/// Duplicate an already written output, for a member requested under two names.
pub(crate) fn duplicate_file(from: &Path, to: &Path, times: &FileTimes) -> Result<u64, ArchiveError> {
    paths::ensure_parent_dirs(to)?;
    match fs::copy(from, to) {
        Ok(n) => {
            restore_times(to, times);
            Ok(n)
        }
        Err(e) => {
            remove_partial(to);
            Err(e.into())
        }
    }
}

fn restore_times(path: &Path, times: &FileTimes) {
    if times.is_empty() {
        return;
    }
    if let Err(e) = times.apply_to(path) {
        warn!("Failed to set times on {}: {}", path.display(), e);
    }
}

pub(crate) fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}
