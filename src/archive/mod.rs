//! Archive handling.
//!
//! One reader (`ArchiveSource`) and one writer (`ArchiveDestination`) front
//! every supported container. Dispatch is by `ArchiveKind`:
//!
//! - ZIP: `zip` crate, read/write, timestamps in NTFS and Info-ZIP extra fields
//! - 7z: `sevenz-rust2`, read/write
//! - RAR: `unrar` (libunrar), read-only, 7z binary fallback for newer formats
//! - tar, tar.gz, tar.bz2, tar.xz, tar.lzma, tar.lz4: `tar` over a stream codec

mod codec;
mod destination;
pub mod helper;
mod kind;
mod rar;
mod sevenzip;
mod source;
mod tar;
pub mod times;
mod zip;
mod zip_extra;

pub use codec::ensure_available as ensure_codec_available;
pub use destination::{ArchiveDestination, EntryWriter};
pub use helper::{external_helper, recheck_external_helper};
pub use kind::ArchiveKind;
pub use source::{ArchiveSource, EntryInfo};
pub use times::FileTimes;
