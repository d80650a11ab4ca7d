//! RAR reading through libunrar, with the 7z binary as fallback.
//!
//! libunrar builds in the wild lag behind the format; when it refuses a
//! RAR5 (or newer) archive the read is retried through the external 7z
//! binary. Without one, the failure is reported as `UnsupportedRarFormat`
//! so callers can tell "install 7-Zip" apart from "the file is corrupt".

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::helper;
use super::source::{EntryInfo, EntryVisitor};
use super::times::{from_packed_dos, FileTimes};
use crate::error::ArchiveError;
use crate::paths;

const RAR4_SIGNATURE: &[u8] = b"Rar!\x1A\x07\x00";
const RAR5_SIGNATURE: &[u8] = b"Rar!\x1A\x07\x01\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RarVersion {
    Rar4,
    /// RAR5 or a later revision of the same header family
    Rar5,
}

/// Classify by the signature at offset 0. Self-extracting stubs are not
/// recognized.
pub(crate) fn sniff_version(path: &Path) -> Result<Option<RarVersion>, ArchiveError> {
    let mut head = [0u8; 8];
    let mut file = File::open(path).map_err(|e| ArchiveError::open(path, e))?;
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    let head = &head[..filled];
    Ok(if head.starts_with(RAR5_SIGNATURE) {
        Some(RarVersion::Rar5)
    } else if head.starts_with(RAR4_SIGNATURE) {
        Some(RarVersion::Rar4)
    } else if head.starts_with(b"Rar!\x1A\x07") && head.len() == 8 && head[6] >= 1 {
        Some(RarVersion::Rar5)
    } else {
        None
    })
}

enum Backend {
    Native,
    External(PathBuf),
}

pub(crate) struct RarSource {
    path: PathBuf,
    backend: Backend,
}

impl RarSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let version = sniff_version(path)?
            .ok_or_else(|| ArchiveError::open(path, "missing RAR signature"))?;

        let native = unrar::Archive::new(path).open_for_processing();
        let backend = match (native, version) {
            (Ok(_), _) => Backend::Native,
            (Err(e), RarVersion::Rar4) => return Err(ArchiveError::open(path, e)),
            (Err(e), RarVersion::Rar5) => match helper::external_helper() {
                Some(bin) => {
                    debug!(
                        "libunrar refused {} ({}), using {}",
                        path.display(),
                        e,
                        bin.display()
                    );
                    Backend::External(bin)
                }
                None => {
                    return Err(ArchiveError::UnsupportedRarFormat {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
            },
        };
        Ok(RarSource {
            path: path.to_path_buf(),
            backend,
        })
    }

    pub fn visit(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        match &self.backend {
            Backend::Native => self.visit_native(visitor),
            Backend::External(bin) => visit_external(bin, &self.path, visitor),
        }
    }

    fn visit_native(&self, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        let archive = unrar::Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| ArchiveError::open(&self.path, e))?;

        let mut cursor = Some(archive);
        while let Some(archive) = cursor.take() {
            let Some(entry) = archive
                .read_header()
                .map_err(|e| ArchiveError::open(&self.path, e))?
            else {
                break;
            };

            let header = entry.entry();
            let name = paths::normalize_entry_name(&header.filename.to_string_lossy());
            if !header.is_file() || !visitor.wants(&name) {
                cursor = Some(entry.skip().map_err(ArchiveError::other)?);
                continue;
            }

            let info = EntryInfo {
                name,
                size: header.unpacked_size,
                times: FileTimes {
                    modified: from_packed_dos(header.file_time),
                    ..Default::default()
                },
            };
            let (data, next) = entry.read().map_err(|e| {
                ArchiveError::other(format!("{}: {}: {}", self.path.display(), info.name, e))
            })?;
            if visitor.visit(&info, &mut data.as_slice())?.is_break() {
                break;
            }
            cursor = Some(next);
        }
        Ok(())
    }
}

fn visit_external(bin: &Path, archive: &Path, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
    for entry in helper::list(bin, archive)? {
        if !visitor.wants(&entry.name) {
            continue;
        }
        let info = EntryInfo {
            name: entry.name.clone(),
            size: entry.size,
            times: FileTimes {
                modified: entry.modified,
                ..Default::default()
            },
        };
        let flow = helper::with_entry(bin, archive, &entry.name, |reader| visitor.visit(&info, reader))?;
        if flow.is_break() {
            break;
        }
    }
    Ok(())
}
