//! Entry-name and output-path helpers.
//!
//! Archive entry names come from every platform: RAR and old ZIP tools
//! write `\` separators. Names are normalized to `/` so the same member is
//! the same string whichever format it came from.

use std::path::{Component, Path, PathBuf};

/// Convert Windows path separators and strip leading `./` and `/`.
/// `Roms\Disc 1\track.bin` -> `Roms/Disc 1/track.bin`
pub fn normalize_entry_name(name: &str) -> String {
    let name = name.replace('\\', "/");
    let mut trimmed = name.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

/// Join an entry name under `base`, refusing names that would escape it.
pub fn join_entry_name(base: &Path, name: &str) -> Option<PathBuf> {
    let normalized = normalize_entry_name(name);
    let relative = Path::new(&normalized);
    let mut out = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (out != base).then_some(out)
}

/// Get the filename from an entry name (handles both / and \)
pub fn file_name(name: &str) -> &str {
    name.rfind(['\\', '/'])
        .map(|idx| &name[idx + 1..])
        .unwrap_or(name)
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Make a game or ROM name safe to use as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        other => other.to_string(),
    }
}
