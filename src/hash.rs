//! Content digests for ROM identification.
//!
//! DAT catalogs identify a ROM by size plus any of CRC-32, MD5 and SHA-1.
//! All three are computed in one pass over the bytes, so a content unit is
//! only ever read once.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};

/// Lowercase hex digests of one content unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    /// 8 hex digits, zero padded
    pub crc32: String,
    pub md5: String,
    pub sha1: String,
}

/// Running CRC-32 + MD5 + SHA-1.
pub struct MultiHasher {
    crc: crc32fast::Hasher,
    md5: md5::Context,
    sha1: Sha1,
    len: u64,
}

impl Default for MultiHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiHasher {
    pub fn new() -> Self {
        MultiHasher {
            crc: crc32fast::Hasher::new(),
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.md5.consume(data);
        self.sha1.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize(self) -> Digest {
        Digest {
            crc32: format!("{:08x}", self.crc.finalize()),
            md5: format!("{:x}", self.md5.compute()),
            sha1: to_hex(&self.sha1.finalize()),
        }
    }
}

/// Digest everything `reader` yields, reading through `buf`.
///
/// Returns the digest and the number of bytes read.
pub fn digest_reader(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<(Digest, u64)> {
    let mut hasher = MultiHasher::new();
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let len = hasher.len();
    Ok((hasher.finalize(), len))
}

/// Digest a file on disk with a read buffer of `buffer_size` bytes.
pub fn digest_file(path: &Path, buffer_size: usize) -> io::Result<(Digest, u64)> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; buffer_size.max(1)];
    digest_reader(&mut file, &mut buf)
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Canonical form of a catalog-supplied digest: trimmed, lowercase, and for
/// CRC-32 left-padded to 8 digits. Returns `None` for empty or non-hex input.
pub fn normalize_hex(value: &str, width: usize) -> Option<String> {
    let value = value.trim().trim_start_matches("0x");
    if value.is_empty() || value.len() > width || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("{:0>width$}", value.to_ascii_lowercase(), width = width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_values() {
        let mut hasher = MultiHasher::new();
        hasher.update(b"abc");
        let digest = hasher.finalize();
        assert_eq!(digest.crc32, "352441c2");
        assert_eq!(digest.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(digest.sha1, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_empty_input() -> anyhow::Result<()> {
        let (digest, len) = digest_reader(&mut io::empty(), &mut [0u8; 16])?;
        assert_eq!(len, 0);
        assert_eq!(digest.crc32, "00000000");
        assert_eq!(digest.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(digest.sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        Ok(())
    }

    #[test]
    fn test_buffer_size_does_not_change_digest() -> anyhow::Result<()> {
        let mut tmp = NamedTempFile::new()?;
        let payload: Vec<u8> = (0..3_000_000u32).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect();
        tmp.write_all(&payload)?;
        tmp.flush()?;

        let (small, small_len) = digest_file(tmp.path(), 1024)?;
        let (large, large_len) = digest_file(tmp.path(), 1024 * 1024)?;
        assert_eq!(small, large);
        assert_eq!(small_len, payload.len() as u64);
        assert_eq!(large_len, small_len);
        Ok(())
    }

    #[test]
    fn test_normalize_hex() {
        assert_eq!(normalize_hex("3B0A1A2B", 8).as_deref(), Some("3b0a1a2b"));
        assert_eq!(normalize_hex(" a1b2 ", 8).as_deref(), Some("0000a1b2"));
        assert_eq!(normalize_hex("0x1234", 8).as_deref(), Some("00001234"));
        assert_eq!(normalize_hex("", 8), None);
        assert_eq!(normalize_hex("xyz", 8), None);
        assert_eq!(normalize_hex("123456789", 8), None);
    }
}
