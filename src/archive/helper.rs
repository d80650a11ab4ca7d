//! External 7-Zip binary, used to read RAR variants libunrar rejects.
//!
//! The binary is looked up once per process and cached; the CLI can force
//! a fresh lookup. Lookup order:
//!
//! 1. `ROMSHIFT_7Z` environment variable
//! 2. `bin/7zz` next to the executable
//! 3. `7zz`, `7z`, `7za` on `PATH`
//!
//! # 7z Commands Reference
//!
//! - List members: `7z l -slt -ba archive.rar`
//!   - `-slt`: technical listing (key = value)
//!   - `-ba`: bare output (no headers)
//! - Stream one member: `7z e -so -spd archive.rar "path/in/archive"`
//!   - `-spd`: disable wildcard matching

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::error::ArchiveError;
use crate::paths;

pub const HELPER_ENV: &str = "ROMSHIFT_7Z";

static HELPER: OnceLock<RwLock<Option<PathBuf>>> = OnceLock::new();

fn cell() -> &'static RwLock<Option<PathBuf>> {
    HELPER.get_or_init(|| RwLock::new(probe()))
}

/// Cached path of the 7z binary, if one was found.
pub fn external_helper() -> Option<PathBuf> {
    let guard = cell().read().unwrap_or_else(|e| e.into_inner());
    guard.clone()
}

/// Look for the binary again, e.g. after the user installed it.
pub fn recheck_external_helper() -> Option<PathBuf> {
    let found = probe();
    let mut guard = cell().write().unwrap_or_else(|e| e.into_inner());
    *guard = found.clone();
    found
}

fn probe() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(HELPER_ENV).map(PathBuf::from) {
        if path.is_file() {
            info!("Using 7z helper from {}: {}", HELPER_ENV, path.display());
            return Some(path);
        }
        debug!("{} points at missing file {}", HELPER_ENV, path.display());
    }

    if let Some(bundled) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("bin").join("7zz")))
        .filter(|p| p.is_file())
    {
        return Some(bundled);
    }

    ["7zz", "7z", "7za"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
}

/// One member from a technical listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// List the file members of an archive.
pub fn list(helper: &Path, archive: &Path) -> Result<Vec<HelperEntry>, ArchiveError> {
    let output = Command::new(helper)
        .arg("l")
        .arg("-slt")
        .arg("-ba")
        .arg("-scsUTF-8")
        .arg(archive)
        .output()
        .map_err(|e| ArchiveError::open(archive, format!("failed to run 7z: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ArchiveError::open(archive, format!("7z list failed: {}", stderr.trim())));
    }
    Ok(parse_list(&output.stdout))
}

/// Parse `7z l -slt -ba` output. Folders are dropped.
pub fn parse_list(output: &[u8]) -> Vec<HelperEntry> {
    let mut entries = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();

    let mut flush = |current: &mut HashMap<String, String>| {
        if let Some(path) = current.get("Path").filter(|p| !p.is_empty()) {
            let is_dir = current.get("Folder").is_some_and(|v| v == "+")
                || current
                    .get("Attributes")
                    .is_some_and(|a| a.starts_with('D'));
            if !is_dir {
                entries.push(HelperEntry {
                    name: paths::normalize_entry_name(path),
                    size: current
                        .get("Size")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    modified: current.get("Modified").and_then(|m| parse_modified(m)),
                });
            }
        }
        current.clear();
    };

    for line in BufReader::new(output).lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut current);
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.to_string(), value.to_string());
        } else if let Some(key) = line.strip_suffix(" =") {
            current.insert(key.to_string(), String::new());
        }
    }
    flush(&mut current);
    entries
}

/// `2020-06-15 12:30:44` with an optional fraction, in local time.
fn parse_modified(value: &str) -> Option<SystemTime> {
    let dt = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(match dt.and_local_timezone(Local).earliest() {
        Some(local) => local.into(),
        None => dt.and_utc().into(),
    })
}

/// Stream one member to `f` through `7z e -so`.
pub fn with_entry<T>(
    helper: &Path,
    archive: &Path,
    name: &str,
    f: impl FnOnce(&mut dyn Read) -> Result<T, ArchiveError>,
) -> Result<T, ArchiveError> {
    let mut child = Command::new(helper)
        .arg("e")
        .arg("-so")
        .arg("-bd")
        .arg("-y")
        .arg("-spd")
        .arg("-scsUTF-8")
        .arg(archive)
        .arg(name)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ArchiveError::other(format!("failed to spawn 7z: {}", e)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ArchiveError::other("7z stdout was not captured"))?;
    let result = f(&mut stdout);
    // Drain so the child is not blocked on a full pipe before we wait.
    let _ = std::io::copy(&mut stdout, &mut std::io::sink());
    let status = child.wait()?;

    let value = result?;
    if !status.success() {
        return Err(ArchiveError::other(format!(
            "7z extraction of '{}' from {} failed ({})",
            name,
            archive.display(),
            status
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::times::to_dos_parts;

    #[test]
    fn test_parse_list() {
        let output = b"Path = Disc 1\\track01.bin\nFolder = -\nSize = 1234\nModified = 2020-06-15 12:30:44\n\nPath = Disc 1\nFolder = +\nSize = 0\n\nPath = readme.txt\nSize = 5\nModified = 2021-01-02 03:04:05.1234567\nAttributes = A\n";
        let entries = parse_list(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Disc 1/track01.bin");
        assert_eq!(entries[0].size, 1234);
        let parts = to_dos_parts(entries[0].modified.unwrap()).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (2020, 6, 15));
        assert_eq!(entries[1].name, "readme.txt");
        assert!(entries[1].modified.is_some());
    }

    #[test]
    fn test_parse_list_skips_dir_attribute_and_empty_path() {
        let output = b"Path = \nSize = 0\n\nPath = sub\nAttributes = D....\n\nPath = a.bin\nSize = 1\n";
        let entries = parse_list(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.bin");
        assert_eq!(entries[0].modified, None);
    }
}
