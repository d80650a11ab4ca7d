//! Archive kind detection by file name suffix.

use std::fmt;
use std::path::Path;

/// Container format of a file, derived from its name.
///
/// `None` means a plain file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ArchiveKind {
    #[default]
    None,
    Zip,
    Rar,
    SevenZip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarLzma,
    TarLz4,
}

/// Suffix table, longest suffixes first so `.tar.gz` wins over `.gz`-less `.tar`.
const SUFFIXES: &[(&str, ArchiveKind)] = &[
    (".tar.lzma", ArchiveKind::TarLzma),
    (".tar.bz2", ArchiveKind::TarBz2),
    (".tar.lz4", ArchiveKind::TarLz4),
    (".tar.gz", ArchiveKind::TarGz),
    (".tar.xz", ArchiveKind::TarXz),
    (".tbz2", ArchiveKind::TarBz2),
    (".tlz4", ArchiveKind::TarLz4),
    (".tar", ArchiveKind::Tar),
    (".tgz", ArchiveKind::TarGz),
    (".tbz", ArchiveKind::TarBz2),
    (".txz", ArchiveKind::TarXz),
    (".tlz", ArchiveKind::TarLzma),
    (".zip", ArchiveKind::Zip),
    (".rar", ArchiveKind::Rar),
    (".7z", ArchiveKind::SevenZip),
];

impl ArchiveKind {
    /// Every archive kind, for CLI parsing and tests.
    pub const ARCHIVES: [ArchiveKind; 9] = [
        ArchiveKind::Zip,
        ArchiveKind::Rar,
        ArchiveKind::SevenZip,
        ArchiveKind::Tar,
        ArchiveKind::TarGz,
        ArchiveKind::TarBz2,
        ArchiveKind::TarXz,
        ArchiveKind::TarLzma,
        ArchiveKind::TarLz4,
    ];

    /// Classify a file name (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.ends_with(suffix) && lower.len() > suffix.len())
            .map(|(_, kind)| *kind)
            .unwrap_or(ArchiveKind::None)
    }

    /// Classify a path by its final component.
    pub fn from_path(path: &Path) -> Self {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(Self::from_name)
            .unwrap_or(ArchiveKind::None)
    }

    /// Canonical suffix, without the leading dot.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ArchiveKind::None => None,
            ArchiveKind::Zip => Some("zip"),
            ArchiveKind::Rar => Some("rar"),
            ArchiveKind::SevenZip => Some("7z"),
            ArchiveKind::Tar => Some("tar"),
            ArchiveKind::TarGz => Some("tar.gz"),
            ArchiveKind::TarBz2 => Some("tar.bz2"),
            ArchiveKind::TarXz => Some("tar.xz"),
            ArchiveKind::TarLzma => Some("tar.lzma"),
            ArchiveKind::TarLz4 => Some("tar.lz4"),
        }
    }

    /// Parse a user-supplied format name such as `zip` or `tar.gz`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        if ext == "none" || ext.is_empty() {
            return Some(ArchiveKind::None);
        }
        Self::ARCHIVES
            .into_iter()
            .find(|kind| kind.extension() == Some(ext.as_str()))
            .or_else(|| match Self::from_name(&format!("x.{}", ext)) {
                ArchiveKind::None => None,
                kind => Some(kind),
            })
    }

    pub fn is_archive(&self) -> bool {
        *self != ArchiveKind::None
    }

    pub fn is_tar(&self) -> bool {
        matches!(
            self,
            ArchiveKind::Tar
                | ArchiveKind::TarGz
                | ArchiveKind::TarBz2
                | ArchiveKind::TarXz
                | ArchiveKind::TarLzma
                | ArchiveKind::TarLz4
        )
    }

    /// RAR is read-only.
    pub fn can_write(&self) -> bool {
        self.is_archive() && *self != ArchiveKind::Rar
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::None => f.write_str("plain file"),
            ArchiveKind::SevenZip => f.write_str("7z"),
            other => f.write_str(other.extension().unwrap_or("?")),
        }
    }
}
