//! Error types shared by the archive, scan and copy layers.
//!
//! Each variant maps to one failure class callers need to tell apart:
//! a corrupt container is not a missing codec, and neither is a disk fault.

use std::io;
use std::path::PathBuf;

use crate::archive::ArchiveKind;

/// Errors raised while reading or writing archives.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Failed to open archive {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("{kind} support is not available in this build")]
    UnsupportedCodec { kind: ArchiveKind },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported RAR format in {path} (install 7-Zip to read it): {reason}")]
    UnsupportedRarFormat { path: PathBuf, reason: String },

    #[error("Entries not found in {archive}: {}", missing.join(", "))]
    EntryNotFound { archive: PathBuf, missing: Vec<String> },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ArchiveError {
    pub(crate) fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ArchiveError::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a format crate error raised mid-stream.
    pub(crate) fn other(reason: impl ToString) -> Self {
        ArchiveError::Io(io::Error::other(reason.to_string()))
    }

    /// Whether this failure is tied to the build or to an unimplemented path
    /// rather than to the file being read.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ArchiveError::UnsupportedCodec { .. }
                | ArchiveError::UnsupportedOperation(_)
                | ArchiveError::UnsupportedRarFormat { .. }
        )
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A catalog game that could not be fully resolved against a scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{game}: {reason}")]
pub struct MatchFailure {
    pub game: String,
    pub reason: MatchFailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchFailureReason {
    #[error("missing ROM {}", .0.join(", "))]
    MissingRom(Vec<String>),

    #[error("could not find all ROMs in a single archive")]
    NoSingleArchive,

    #[error("game lists no ROMs")]
    NoRoms,
}

/// Configuration errors, fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Thread count must be at least 1")]
    ZeroThreads,

    #[error("Buffer size {0} is outside the supported range (1 KiB to 256 MiB)")]
    BufferSize(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_not_found_lists_names() {
        let err = ArchiveError::EntryNotFound {
            archive: PathBuf::from("game.zip"),
            missing: vec!["a.bin".to_string(), "b.bin".to_string()],
        };
        assert_eq!(err.to_string(), "Entries not found in game.zip: a.bin, b.bin");
        assert!(!err.is_unsupported());
    }

    #[test]
    fn test_match_failure_message() {
        let failure = MatchFailure {
            game: "Game (USA)".to_string(),
            reason: MatchFailureReason::MissingRom(vec!["a.bin".to_string()]),
        };
        assert_eq!(failure.to_string(), "Game (USA): missing ROM a.bin");
    }

    #[test]
    fn test_unsupported_classes() {
        assert!(ArchiveError::UnsupportedOperation("rar write".into()).is_unsupported());
        assert!(ArchiveError::UnsupportedCodec { kind: ArchiveKind::TarXz }.is_unsupported());
        assert!(!ArchiveError::from(io::Error::other("disk")).is_unsupported());
    }
}
