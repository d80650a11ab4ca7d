//! Directory scanning and digesting.
//!
//! Every regular file under the root is one content unit, unless its name
//! marks it as an archive, in which case each file member is one unit.
//! Units are digested on a dedicated rayon pool; each worker reads through
//! its own reusable buffer.
//!
//! Files and archives that cannot be read are logged and skipped. The scan
//! as a whole never fails because of one bad file.

use std::fs::File;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::archive::{ArchiveKind, ArchiveSource};
use crate::buffer::with_scratch;
use crate::config::ScanConfig;
use crate::error::{panic_message, ArchiveError};
use crate::hash::{digest_reader, Digest};

/// Identity of one content unit.
///
/// Unique by `(container, member)`; `member` is `None` for a loose file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScanRecord {
    pub container: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    pub size: u64,
    pub digest: Digest,
}

impl ScanRecord {
    /// Container format; `None` for loose files.
    pub fn kind(&self) -> ArchiveKind {
        match self.member {
            Some(_) => ArchiveKind::from_path(&self.container),
            None => ArchiveKind::None,
        }
    }

    pub fn is_loose(&self) -> bool {
        self.member.is_none()
    }

    /// File name of the content itself, member name for archive members.
    pub fn file_name(&self) -> String {
        match &self.member {
            Some(member) => crate::paths::file_name(member).to_string(),
            None => self
                .container
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ScanRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.member {
            Some(member) => write!(f, "{}#{}", self.container.display(), member),
            None => write!(f, "{}", self.container.display()),
        }
    }
}

/// Scanner bound to one configuration and worker pool.
pub struct Scanner {
    config: ScanConfig,
    pool: rayon::ThreadPool,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("romshift-scan-{}", i))
            .panic_handler(|payload| {
                error!("Scan worker panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .context("Failed to create scan thread pool")?;
        Ok(Scanner { config, pool })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn scan(&self, root: &Path) -> Vec<ScanRecord> {
        self.scan_with_progress(root, &|_| {})
    }

    /// Scan `root`, calling `on_file` after each file (loose or archive) is done.
    pub fn scan_with_progress(
        &self,
        root: &Path,
        on_file: &(dyn Fn(&Path) + Sync),
    ) -> Vec<ScanRecord> {
        let files = collect_files(root);
        info!(
            "Scanning {} files under {} ({} threads, {} byte buffer{})",
            files.len(),
            root.display(),
            self.config.threads,
            self.config.buffer_size,
            if self.config.lazy_header_detection { ", lazy headers" } else { "" }
        );

        let skipped = AtomicUsize::new(0);
        let buffer_size = self.config.buffer_size;
        let records: Vec<ScanRecord> = self.pool.install(|| {
            files
                .par_iter()
                .flat_map_iter(|path| {
                    let result = isolate(path, || scan_file(path, ArchiveKind::from_path(path), buffer_size));
                    on_file(path);
                    match result {
                        Ok(records) => records,
                        Err(e) => {
                            warn!("Skipping {}: {}", path.display(), e);
                            skipped.fetch_add(1, Ordering::Relaxed);
                            Vec::new()
                        }
                    }
                })
                .collect()
        });

        info!(
            "Scan complete: {} content units, {} files skipped",
            records.len(),
            skipped.load(Ordering::Relaxed)
        );
        records
    }
}

/// Scan `root` with `config`.
pub fn scan(root: &Path, config: &ScanConfig) -> Result<Vec<ScanRecord>> {
    Ok(Scanner::new(config.clone())?.scan(root))
}

/// Regular files under `root`, sorted. Unreadable directories are logged
/// and their subtree skipped.
fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Run `f`, turning a panic from a format crate into an error for `path`.
fn isolate<T>(path: &Path, f: impl FnOnce() -> Result<T, ArchiveError>) -> Result<T, ArchiveError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ArchiveError::other(format!(
            "reading {} panicked: {}",
            path.display(),
            panic_message(payload.as_ref())
        )))
    })
}

/// Digest one file: the whole file when `kind` is `None`, otherwise every
/// file member of the archive.
pub fn scan_file(path: &Path, kind: ArchiveKind, buffer_size: usize) -> Result<Vec<ScanRecord>, ArchiveError> {
    if !kind.is_archive() {
        let mut file = File::open(path)?;
        let (digest, size) = with_scratch(buffer_size, |buf| digest_reader(&mut file, buf))?;
        return Ok(vec![ScanRecord {
            container: path.to_path_buf(),
            member: None,
            size,
            digest,
        }]);
    }

    let mut records = Vec::new();
    let mut source = ArchiveSource::open(path, kind)?;
    source.for_each_entry(|entry, reader| {
        let (digest, size) = with_scratch(buffer_size, |buf| digest_reader(reader, buf))?;
        debug!("Digested {}#{} ({} bytes)", path.display(), entry.name, size);
        records.push(ScanRecord {
            container: path.to_path_buf(),
            member: Some(entry.name.clone()),
            size,
            digest,
        });
        Ok(())
    })?;
    Ok(records)
}
