//! romshift - ROM collection scanner, verifier and repackager
//!
//! Scans directories of loose files and archives, identifies every file by
//! CRC-32, MD5 and SHA-1, matches the results against a DAT catalog and
//! rebuilds matched games as loose files or archives.

pub mod archive;
pub mod buffer;
pub mod catalog;
pub mod config;
pub mod copier;
pub mod error;
pub mod hash;
pub mod index;
pub mod matcher;
pub mod paths;
pub mod plan;
pub mod scanner;

pub use archive::{ArchiveDestination, ArchiveKind, ArchiveSource, EntryInfo, FileTimes};
pub use catalog::{Catalog, CatalogGame, CatalogRom};
pub use config::{CopyConfig, ScanConfig};
pub use copier::{CopyDefinition, CopyEntry, CopyListener, CopyReport, Copier, JobKey};
pub use error::{ArchiveError, ConfigError, MatchFailure, MatchFailureReason};
pub use hash::Digest;
pub use index::ScanResultIndex;
pub use matcher::{match_game, GameMatch, RomMatch};
pub use scanner::{scan, ScanRecord, Scanner};
