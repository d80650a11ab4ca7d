//! Uniform read access to archive members.
//!
//! Every format is read strictly forward, in physical order: solid 7z and
//! RAR archives cannot seek back cheaply, so even a filtered read walks the
//! archive front to back and stops once the requested names are exhausted.

use std::collections::BTreeSet;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::rar::RarSource;
use super::sevenzip::SevenZipSource;
use super::tar::TarSource;
use super::times::FileTimes;
use super::zip::ZipSource;
use super::{codec, ArchiveKind};
use crate::error::ArchiveError;

/// Metadata of one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Member name with `/` separators
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Best-effort timestamps; some formats only carry modification time
    pub times: FileTimes,
}

/// Callback interface the format readers drive.
pub(crate) trait EntryVisitor {
    /// Whether the reader should decode this member at all.
    fn wants(&self, name: &str) -> bool;

    fn visit(
        &mut self,
        entry: &EntryInfo,
        reader: &mut dyn Read,
    ) -> Result<ControlFlow<()>, ArchiveError>;
}

enum SourceInner {
    Zip(ZipSource),
    Tar(TarSource),
    SevenZip(SevenZipSource),
    Rar(RarSource),
}

/// An open archive, read once front to back.
pub struct ArchiveSource {
    path: PathBuf,
    kind: ArchiveKind,
    wanted: Option<BTreeSet<String>>,
    inner: Option<SourceInner>,
}

impl std::fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSource")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("wanted", &self.wanted)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl ArchiveSource {
    /// Open an archive for reading every member.
    pub fn open(path: &Path, kind: ArchiveKind) -> Result<Self, ArchiveError> {
        let inner = match kind {
            ArchiveKind::None => {
                return Err(ArchiveError::UnsupportedOperation(format!(
                    "{} is not an archive",
                    path.display()
                )))
            }
            ArchiveKind::Zip => SourceInner::Zip(ZipSource::open(path)?),
            ArchiveKind::SevenZip => SourceInner::SevenZip(SevenZipSource::open(path)?),
            ArchiveKind::Rar => SourceInner::Rar(RarSource::open(path)?),
            tar_kind => {
                codec::ensure_available(tar_kind)?;
                SourceInner::Tar(TarSource::open(path, tar_kind)?)
            }
        };
        debug!("Opened {} archive {}", kind, path.display());
        Ok(ArchiveSource {
            path: path.to_path_buf(),
            kind,
            wanted: None,
            inner: Some(inner),
        })
    }

    /// Open an archive for reading only the named members.
    ///
    /// Names are compared after `\` -> `/` normalization. If the pass ends
    /// with names still outstanding, it fails with `EntryNotFound`.
    pub fn open_filtered<I, S>(path: &Path, kind: ArchiveKind, names: I) -> Result<Self, ArchiveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut source = Self::open(path, kind)?;
        source.wanted = Some(
            names
                .into_iter()
                .map(|n| crate::paths::normalize_entry_name(n.as_ref()))
                .collect(),
        );
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// Visit each file member in physical order. Directories and links are
    /// skipped. The reader handed to `f` is only valid during that call.
    ///
    /// This is a single pass: the source is closed afterwards.
    pub fn for_each_entry<F>(&mut self, f: F) -> Result<(), ArchiveError>
    where
        F: FnMut(&EntryInfo, &mut dyn Read) -> Result<(), ArchiveError>,
    {
        let mut inner = self.inner.take().ok_or_else(|| {
            ArchiveError::other(format!("archive {} is already closed", self.path.display()))
        })?;

        let mut visitor = Filter {
            remaining: self.wanted.clone(),
            f,
        };
        if visitor.is_done() {
            return Ok(());
        }

        match &mut inner {
            SourceInner::Zip(s) => s.visit(&mut visitor)?,
            SourceInner::Tar(s) => s.visit(&mut visitor)?,
            SourceInner::SevenZip(s) => s.visit(&mut visitor)?,
            SourceInner::Rar(s) => s.visit(&mut visitor)?,
        }

        match visitor.remaining {
            Some(missing) if !missing.is_empty() => Err(ArchiveError::EntryNotFound {
                archive: self.path.clone(),
                missing: missing.into_iter().collect(),
            }),
            _ => Ok(()),
        }
    }

    /// Release the underlying handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("Closed archive {}", self.path.display());
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

/// Applies the optional name filter around the caller's closure.
struct Filter<F> {
    remaining: Option<BTreeSet<String>>,
    f: F,
}

impl<F> Filter<F> {
    fn is_done(&self) -> bool {
        self.remaining.as_ref().is_some_and(|r| r.is_empty())
    }
}

impl<F> EntryVisitor for Filter<F>
where
    F: FnMut(&EntryInfo, &mut dyn Read) -> Result<(), ArchiveError>,
{
    fn wants(&self, name: &str) -> bool {
        self.remaining.as_ref().is_none_or(|r| r.contains(name))
    }

    fn visit(
        &mut self,
        entry: &EntryInfo,
        reader: &mut dyn Read,
    ) -> Result<ControlFlow<()>, ArchiveError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if !remaining.remove(&entry.name) {
                return Ok(ControlFlow::Continue(()));
            }
        }
        (self.f)(entry, reader)?;
        if self.is_done() {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(()))
        }
    }
}

/// Test visitor that buffers every member.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct CollectAll {
    pub entries: Vec<(EntryInfo, Vec<u8>)>,
}

#[cfg(test)]
impl EntryVisitor for CollectAll {
    fn wants(&self, _name: &str) -> bool {
        true
    }

    fn visit(
        &mut self,
        entry: &EntryInfo,
        reader: &mut dyn Read,
    ) -> Result<ControlFlow<()>, ArchiveError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.entries.push((entry.clone(), data));
        Ok(ControlFlow::Continue(()))
    }
}
