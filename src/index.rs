//! Digest lookup tables over one scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::CatalogRom;
use crate::scanner::ScanRecord;

/// Scan records keyed by SHA-1, MD5 and CRC-32. Built once, then shared
/// read-only between matcher threads.
#[derive(Debug, Default)]
pub struct ScanResultIndex {
    records: Vec<Arc<ScanRecord>>,
    by_sha1: HashMap<String, Vec<Arc<ScanRecord>>>,
    by_md5: HashMap<String, Vec<Arc<ScanRecord>>>,
    by_crc: HashMap<String, Vec<Arc<ScanRecord>>>,
    members: HashMap<PathBuf, usize>,
}

impl ScanResultIndex {
    pub fn build(records: impl IntoIterator<Item = ScanRecord>) -> Self {
        let mut index = ScanResultIndex::default();
        for record in records {
            let record = Arc::new(record);
            index
                .by_sha1
                .entry(record.digest.sha1.clone())
                .or_default()
                .push(Arc::clone(&record));
            index
                .by_md5
                .entry(record.digest.md5.clone())
                .or_default()
                .push(Arc::clone(&record));
            index
                .by_crc
                .entry(record.digest.crc32.clone())
                .or_default()
                .push(Arc::clone(&record));
            if !record.is_loose() {
                *index.members.entry(record.container.clone()).or_default() += 1;
            }
            index.records.push(record);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Arc<ScanRecord>] {
        &self.records
    }

    /// Number of scanned members in the archive `container`; 0 for loose
    /// files and unknown paths.
    pub fn member_count(&self, container: &Path) -> usize {
        self.members.get(container).copied().unwrap_or(0)
    }

    /// Records that satisfy `rom`: same size and equal digest, tried
    /// SHA-1 first, then MD5, then CRC-32. The first digest with any hit
    /// wins. Results are sorted by location so lookups are deterministic.
    pub fn lookup(&self, rom: &CatalogRom) -> Vec<Arc<ScanRecord>> {
        let tables = [
            (rom.sha1(), &self.by_sha1),
            (rom.md5(), &self.by_md5),
            (rom.crc32(), &self.by_crc),
        ];
        for (digest, table) in tables {
            let Some(hits) = digest.and_then(|d| table.get(&d)) else {
                continue;
            };
            let mut hits: Vec<Arc<ScanRecord>> = hits
                .iter()
                .filter(|r| r.size == rom.size)
                .cloned()
                .collect();
            if hits.is_empty() {
                continue;
            }
            hits.sort_by(|a, b| {
                (&a.container, &a.member).cmp(&(&b.container, &b.member))
            });
            hits.dedup_by(|a, b| a.container == b.container && a.member == b.member);
            return hits;
        }
        Vec::new()
    }
}
