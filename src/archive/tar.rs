//! tar family: plain tar plus gz, bz2, xz, lzma and lz4 streams.
//!
//! Writes use ustar headers. Times that ustar cannot carry (sub-second,
//! pre-1970, past the 11-digit octal field, access and change times) go into
//! a pax extended header in front of the entry.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tar::{Builder, EntryType, Header};
use tempfile::SpooledTempFile;
use tracing::{debug, trace};

use super::codec::{self, Encoder};
use super::source::{EntryInfo, EntryVisitor};
use super::times::{from_unix_parts, from_unix_seconds, subsec_nanos, unix_seconds, FileTimes};
use super::ArchiveKind;
use crate::error::ArchiveError;
use crate::paths;

/// Largest mtime an 11-digit octal ustar field holds.
const USTAR_MAX_MTIME: i64 = 0o77777777777;

/// Entries larger than this spill from memory to a temp file while buffered.
pub(crate) const SPOOL_LIMIT: usize = 16 * 1024 * 1024;

pub(crate) struct TarSource {
    path: PathBuf,
    reader: Option<Box<dyn Read + Send>>,
}

impl TarSource {
    pub fn open(path: &Path, kind: ArchiveKind) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|e| ArchiveError::open(path, e))?;
        let reader = codec::decoder(kind, file)?;
        Ok(TarSource {
            path: path.to_path_buf(),
            reader: Some(reader),
        })
    }

    pub fn visit(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| ArchiveError::other("tar stream already consumed"))?;
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| ArchiveError::open(&self.path, e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| ArchiveError::open(&self.path, e))?;
            let entry_type = entry.header().entry_type();
            if !(entry_type.is_file() || entry_type.is_contiguous()) {
                continue;
            }
            let name = paths::normalize_entry_name(&String::from_utf8_lossy(&entry.path_bytes()));
            if name.is_empty() || !visitor.wants(&name) {
                continue;
            }

            let times = entry_times(&mut entry)?;
            let info = EntryInfo {
                name,
                size: entry.size(),
                times,
            };
            trace!("tar: visiting {}", info.name);
            if visitor.visit(&info, &mut entry)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

fn entry_times<R: Read>(entry: &mut tar::Entry<'_, R>) -> Result<FileTimes, ArchiveError> {
    let mut times = FileTimes {
        modified: entry
            .header()
            .mtime()
            .ok()
            .and_then(|m| i64::try_from(m).ok())
            .map(from_unix_seconds),
        ..Default::default()
    };

    if let Some(extensions) = entry.pax_extensions()? {
        for ext in extensions {
            let ext = ext?;
            let (Ok(key), Ok(value)) = (ext.key(), ext.value()) else {
                continue;
            };
            let slot = match key {
                "mtime" => &mut times.modified,
                "atime" => &mut times.accessed,
                "ctime" => &mut times.created,
                _ => continue,
            };
            if let Some(t) = parse_pax_time(value) {
                *slot = Some(t);
            }
        }
    }
    Ok(times)
}

/// Parse a pax time value: decimal seconds with an optional fraction,
/// negative for times before 1970.
pub(crate) fn parse_pax_time(value: &str) -> Option<SystemTime> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let secs: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut nanos: u32 = 0;
    for (i, c) in fraction.chars().take(9).enumerate() {
        nanos += c.to_digit(10)? * 10u32.pow(8 - i as u32);
    }

    Some(match (negative, nanos) {
        (false, _) => from_unix_parts(secs, nanos),
        (true, 0) => from_unix_seconds(-secs),
        (true, n) => from_unix_parts(-secs - 1, 1_000_000_000 - n),
    })
}

pub(crate) fn format_pax_time(t: SystemTime) -> String {
    let secs = unix_seconds(t);
    let nanos = subsec_nanos(t);
    let (sign, whole, frac) = if secs < 0 && nanos > 0 {
        ("-", -(secs + 1), 1_000_000_000 - nanos)
    } else if secs < 0 {
        ("-", -secs, 0)
    } else {
        ("", secs, nanos)
    };
    if frac == 0 {
        format!("{}{}", sign, whole)
    } else {
        let frac = format!("{:09}", frac);
        format!("{}{}.{}", sign, whole, frac.trim_end_matches('0'))
    }
}

/// pax records needed to carry `times` without loss, empty when ustar suffices.
fn pax_records(times: &FileTimes) -> Vec<(&'static str, String)> {
    let fits_ustar = |t: SystemTime| {
        let secs = unix_seconds(t);
        subsec_nanos(t) == 0 && (0..=USTAR_MAX_MTIME).contains(&secs)
    };
    let needs_pax = times.accessed.is_some()
        || times.created.is_some()
        || times.modified.is_some_and(|t| !fits_ustar(t));
    if !needs_pax {
        return Vec::new();
    }
    [("mtime", times.modified), ("atime", times.accessed), ("ctime", times.created)]
        .into_iter()
        .filter_map(|(key, t)| t.map(|t| (key, format_pax_time(t))))
        .collect()
}

struct PendingEntry {
    name: String,
    times: FileTimes,
    data: SpooledTempFile,
}

pub(crate) struct TarDestination {
    builder: Builder<Encoder>,
    pending: Option<PendingEntry>,
}

impl TarDestination {
    pub fn create(file: File, kind: ArchiveKind) -> Result<Self, ArchiveError> {
        let encoder = Encoder::new(kind, file)?;
        Ok(TarDestination {
            builder: Builder::new(encoder),
            pending: None,
        })
    }

    pub fn start_entry(&mut self, name: &str, _size: u64, times: &FileTimes) -> Result<(), ArchiveError> {
        if self.pending.is_some() {
            return Err(ArchiveError::other("previous tar entry was not finished"));
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
            None => Err(io::Error::other("no tar entry is open")),
        }
    }

    pub fn finish_entry(&mut self) -> Result<(), ArchiveError> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        let len = pending.data.seek(SeekFrom::End(0))?;
        pending.data.seek(SeekFrom::Start(0))?;

        let records = pax_records(&pending.times);
        if !records.is_empty() {
            self.builder.append_pax_extensions(
                records.iter().map(|(k, v)| (*k, v.as_bytes())),
            )?;
        }

        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(len);
        header.set_mode(0o644);
        let mtime = pending.times.modified.map(unix_seconds).unwrap_or(0);
        header.set_mtime(mtime.clamp(0, USTAR_MAX_MTIME) as u64);

        debug!("tar: adding {} ({} bytes)", pending.name, len);
        self.builder
            .append_data(&mut header, &pending.name, &mut pending.data)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), ArchiveError> {
        self.finish_entry()?;
        let encoder = self.builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }
}
