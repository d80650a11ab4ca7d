//! 7z reading and writing through `sevenz-rust2`.
//!
//! 7z archives are usually solid: members share one compressed stream, so
//! a member can only be reached by decoding everything in front of it.
//! Reads therefore walk the archive once and drain members nobody asked for.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sevenz_rust2::{ArchiveEntry, ArchiveReader, ArchiveWriter, NtTime, Password};
use tempfile::SpooledTempFile;
use tracing::debug;

use super::source::{EntryInfo, EntryVisitor};
use super::tar::SPOOL_LIMIT;
use super::times::{from_nt_ticks, to_nt_ticks, FileTimes};
use crate::error::ArchiveError;
use crate::paths;

pub(crate) struct SevenZipSource {
    path: PathBuf,
    reader: ArchiveReader<File>,
}

impl SevenZipSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let reader = ArchiveReader::open(path, Password::empty())
            .map_err(|e| ArchiveError::open(path, e))?;
        Ok(SevenZipSource {
            path: path.to_path_buf(),
            reader,
        })
    }

    pub fn visit(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        // The callback can only return the crate's error type, so our own
        // errors are parked here and the walk is stopped with `Ok(false)`.
        let mut failure: Option<ArchiveError> = None;

        let walk = self.reader.for_each_entries(|entry, reader| {
            if entry.is_directory {
                return Ok(true);
            }
            let name = paths::normalize_entry_name(&entry.name);
            if !visitor.wants(&name) {
                io::copy(reader, &mut io::sink())?;
                return Ok(true);
            }

            let info = EntryInfo {
                name,
                size: entry.size,
                times: entry_times(entry),
            };
            match visitor.visit(&info, reader) {
                Ok(flow) if flow.is_break() => Ok(false),
                Ok(_) => {
                    io::copy(reader, &mut io::sink())?;
                    Ok(true)
                }
                Err(e) => {
                    failure = Some(e);
                    Ok(false)
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        walk.map_err(|e| ArchiveError::other(format!("{}: {}", self.path.display(), e)))
    }
}

fn entry_times(entry: &ArchiveEntry) -> FileTimes {
    let read = |has: bool, t: NtTime| has.then(|| from_nt_ticks(u64::from(t)));
    FileTimes {
        modified: read(entry.has_last_modified_date, entry.last_modified_date),
        accessed: read(entry.has_access_date, entry.access_date),
        created: read(entry.has_creation_date, entry.creation_date),
    }
}

struct PendingEntry {
    name: String,
    times: FileTimes,
    data: SpooledTempFile,
}

pub(crate) struct SevenZipDestination {
    writer: ArchiveWriter<File>,
    pending: Option<PendingEntry>,
}

impl SevenZipDestination {
    pub fn create(file: File) -> Result<Self, ArchiveError> {
        let writer = ArchiveWriter::new(file).map_err(ArchiveError::other)?;
        Ok(SevenZipDestination {
            writer,
            pending: None,
        })
    }

    pub fn start_entry(&mut self, name: &str, _size: u64, times: &FileTimes) -> Result<(), ArchiveError> {
        if self.pending.is_some() {
            return Err(ArchiveError::other("previous 7z entry was not finished"));
        }
        self.pending = Some(PendingEntry {
            name: name.to_string(),
            times: *times,
            data: tempfile::spooled_tempfile(SPOOL_LIMIT),
        });
        Ok(())
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.pending.as_mut() {
            Some(p) => p.data.write(buf),
            None => Err(io::Error::other("no 7z entry is open")),
        }
    }

    pub fn finish_entry(&mut self) -> Result<(), ArchiveError> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        pending.data.seek(SeekFrom::Start(0))?;

        let mut entry = ArchiveEntry::new_file(&pending.name);
        if let Some(ticks) = pending.times.modified.and_then(to_nt_ticks) {
            entry.has_last_modified_date = true;
            entry.last_modified_date = NtTime::from(ticks);
        }
        if let Some(ticks) = pending.times.accessed.and_then(to_nt_ticks) {
            entry.has_access_date = true;
            entry.access_date = NtTime::from(ticks);
        }
        if let Some(ticks) = pending.times.created.and_then(to_nt_ticks) {
            entry.has_creation_date = true;
            entry.creation_date = NtTime::from(ticks);
        }

        debug!("7z: adding {}", pending.name);
        self.writer
            .push_archive_entry(entry, Some(&mut pending.data))
            .map_err(ArchiveError::other)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), ArchiveError> {
        self.finish_entry()?;
        let mut file = self.writer.finish().map_err(ArchiveError::other)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}
