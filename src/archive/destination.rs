//! Uniform write access to new archives.
//!
//! Entries are written strictly one after another: `create_entry` hands out
//! an [`EntryWriter`] that mutably borrows the destination, so a second
//! entry cannot be opened while the first is still being written.
//!
//! An archive is only left on disk after a successful [`ArchiveDestination::close`].
//! A failed entry write, an entry writer dropped without `finish`, or a
//! destination dropped without `close` all delete the partial file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::sevenzip::SevenZipDestination;
use super::tar::TarDestination;
use super::times::FileTimes;
use super::zip::ZipDestination;
use super::{codec, ArchiveKind};
use crate::error::ArchiveError;
use crate::paths;

enum DestInner {
    Zip(ZipDestination),
    Tar(TarDestination),
    SevenZip(SevenZipDestination),
}

impl DestInner {
    fn start_entry(&mut self, name: &str, size: u64, times: &FileTimes) -> Result<(), ArchiveError> {
        match self {
            DestInner::Zip(d) => d.start_entry(name, size, times),
            DestInner::Tar(d) => d.start_entry(name, size, times),
            DestInner::SevenZip(d) => d.start_entry(name, size, times),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DestInner::Zip(d) => d.write(buf),
            DestInner::Tar(d) => d.write(buf),
            DestInner::SevenZip(d) => d.write(buf),
        }
    }

    fn finish_entry(&mut self) -> Result<(), ArchiveError> {
        match self {
            // The zip writer closes an entry when the next one starts
            DestInner::Zip(_) => Ok(()),
            DestInner::Tar(d) => d.finish_entry(),
            DestInner::SevenZip(d) => d.finish_entry(),
        }
    }

    fn finish(self) -> Result<(), ArchiveError> {
        match self {
            DestInner::Zip(d) => d.finish(),
            DestInner::Tar(d) => d.finish(),
            DestInner::SevenZip(d) => d.finish(),
        }
    }
}

/// A new archive being written.
pub struct ArchiveDestination {
    path: PathBuf,
    kind: ArchiveKind,
    inner: Option<DestInner>,
    failed: bool,
    closed: bool,
}

impl ArchiveDestination {
    /// Create `path` as a new archive of `kind`, replacing any existing file.
    pub fn create(path: &Path, kind: ArchiveKind) -> Result<Self, ArchiveError> {
        match kind {
            ArchiveKind::None => {
                return Err(ArchiveError::UnsupportedOperation(format!(
                    "{} is not an archive",
                    path.display()
                )))
            }
            ArchiveKind::Rar => {
                return Err(ArchiveError::UnsupportedOperation(
                    "writing RAR archives is not supported".to_string(),
                ))
            }
            _ => {}
        }
        codec::ensure_available(kind)?;
        paths::ensure_parent_dirs(path)?;

        let file = File::create(path)?;
        let inner = match kind {
            ArchiveKind::Zip => Ok(DestInner::Zip(ZipDestination::create(file))),
            ArchiveKind::SevenZip => SevenZipDestination::create(file).map(DestInner::SevenZip),
            tar_kind => TarDestination::create(file, tar_kind).map(DestInner::Tar),
        };
        let inner = match inner {
            Ok(inner) => inner,
            Err(e) => {
                let _ = fs::remove_file(path);
                return Err(e);
            }
        };

        debug!("Created {} archive {}", kind, path.display());
        Ok(ArchiveDestination {
            path: path.to_path_buf(),
            kind,
            inner: Some(inner),
            failed: false,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// Start a new entry. The returned writer must be `finish`ed before the
    /// next entry is created.
    pub fn create_entry(
        &mut self,
        name: &str,
        size: u64,
        times: &FileTimes,
    ) -> Result<EntryWriter<'_>, ArchiveError> {
        if self.failed {
            return Err(ArchiveError::other(format!(
                "{} already had a failed entry",
                self.path.display()
            )));
        }
        let inner = self.inner.as_mut().ok_or_else(|| {
            ArchiveError::other(format!("{} is already closed", self.path.display()))
        })?;

        let name = paths::normalize_entry_name(name);
        if name.is_empty() {
            return Err(ArchiveError::other("empty entry name"));
        }
        if let Err(e) = inner.start_entry(&name, size, times) {
            self.failed = true;
            return Err(e);
        }
        Ok(EntryWriter {
            dest: self,
            written: 0,
            finished: false,
        })
    }

    /// Write the archive trailer and flush to disk. Idempotent.
    ///
    /// Fails, and removes the file, if any entry failed.
    pub fn close(&mut self) -> Result<(), ArchiveError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let inner = self.inner.take();

        if self.failed {
            drop(inner);
            self.remove_output();
            return Err(ArchiveError::other(format!(
                "discarded {} after a failed entry",
                self.path.display()
            )));
        }

        let result = match inner {
            Some(inner) => inner.finish(),
            None => Ok(()),
        };
        if result.is_err() {
            self.remove_output();
        }
        result
    }

    /// Drop everything written so far and delete the file.
    pub fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        drop(self.inner.take());
        self.remove_output();
    }

    fn remove_output(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial archive {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial archive {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for ArchiveDestination {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Archive {} dropped without close, discarding", self.path.display());
            self.abort();
        }
    }
}

/// Write handle for one archive entry.
pub struct EntryWriter<'a> {
    dest: &'a mut ArchiveDestination,
    written: u64,
    finished: bool,
}

impl EntryWriter<'_> {
    /// Finalize the entry and return the number of bytes written to it.
    pub fn finish(mut self) -> Result<u64, ArchiveError> {
        self.finished = true;
        let result = match self.dest.inner.as_mut() {
            Some(inner) => inner.finish_entry(),
            None => Err(ArchiveError::other("archive closed while writing an entry")),
        };
        if result.is_err() {
            self.dest.failed = true;
        }
        result.map(|_| self.written)
    }

    /// Mark the entry, and with it the whole archive, as failed.
    pub fn fail(mut self) {
        self.finished = true;
        self.dest.failed = true;
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(inner) = self.dest.inner.as_mut() else {
            return Err(io::Error::other("archive is closed"));
        };
        match inner.write(buf) {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.dest.failed = true;
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EntryWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.dest.failed = true;
        }
    }
}
