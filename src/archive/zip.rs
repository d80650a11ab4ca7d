//! ZIP reading and writing through the `zip` crate.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::FullFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::source::{EntryInfo, EntryVisitor};
use super::times::{from_dos_parts, to_dos_parts, DosParts, FileTimes};
use super::zip_extra;
use crate::error::ArchiveError;
use crate::paths;

pub(crate) struct ZipSource {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl ZipSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|e| ArchiveError::open(path, e))?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::open(path, e))?;
        Ok(ZipSource {
            path: path.to_path_buf(),
            archive,
        })
    }

    /// Entry indices sorted by local header offset, i.e. physical order.
    fn physical_order(&mut self) -> Result<Vec<usize>, ArchiveError> {
        let mut order = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            let raw = self.archive.by_index_raw(i).map_err(|e| ArchiveError::open(&self.path, e))?;
            order.push((raw.header_start(), i));
        }
        order.sort_unstable();
        Ok(order.into_iter().map(|(_, i)| i).collect())
    }

    pub fn visit(&mut self, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        for i in self.physical_order()? {
            let mut file = self.archive.by_index(i).map_err(ArchiveError::other)?;
            if file.is_dir() || file.is_symlink() {
                continue;
            }
            let name = paths::normalize_entry_name(file.name());
            if !visitor.wants(&name) {
                continue;
            }

            let dos = file.last_modified().and_then(|dt| {
                from_dos_parts(DosParts {
                    year: dt.year(),
                    month: dt.month(),
                    day: dt.day(),
                    hour: dt.hour(),
                    minute: dt.minute(),
                    second: dt.second(),
                })
            });
            let times = file
                .extra_data()
                .and_then(zip_extra::decode_times)
                .map(|mut t| {
                    t.modified = t.modified.or(dos);
                    t
                })
                .unwrap_or(FileTimes {
                    modified: dos,
                    ..Default::default()
                });

            let info = EntryInfo {
                name,
                size: file.size(),
                times,
            };
            if visitor.visit(&info, &mut file)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

pub(crate) struct ZipDestination {
    writer: ZipWriter<BufWriter<File>>,
}

impl ZipDestination {
    pub fn create(file: File) -> Self {
        ZipDestination {
            writer: ZipWriter::new(BufWriter::new(file)),
        }
    }

    pub fn start_entry(&mut self, name: &str, size: u64, times: &FileTimes) -> Result<(), ArchiveError> {
        let mut options = FullFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX));

        // DOS time is mandatory; out-of-range times keep the 1980 default and
        // rely on the extra fields below.
        if let Some(parts) = times.modified.and_then(to_dos_parts) {
            if let Ok(dt) = zip::DateTime::from_date_and_time(
                parts.year,
                parts.month,
                parts.day,
                parts.hour,
                parts.minute,
                parts.second,
            ) {
                options = options.last_modified_time(dt);
            }
        }
        for (id, data) in zip_extra::timestamp_fields(times) {
            options
                .add_extra_data(id, data.into_boxed_slice(), false)
                .map_err(ArchiveError::other)?;
        }

        debug!("zip: adding {} ({} bytes)", name, size);
        self.writer
            .start_file(name, options)
            .map_err(ArchiveError::other)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    pub fn finish(self) -> Result<(), ArchiveError> {
        let mut inner = self.writer.finish().map_err(ArchiveError::other)?;
        inner.flush()?;
        inner.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::source::CollectAll;
    use crate::archive::times::from_unix_seconds;
    use chrono::{Local, TimeZone};
    use std::time::SystemTime;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_reads_foreign_zip_in_physical_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("test.zip");
        {
            let file = File::create(&zip_path)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = SimpleFileOptions::default();

            zip.add_directory("Data/", options)?;
            zip.start_file("Data\\b.bin", options)?;
            zip.write_all(b"second")?;
            zip.start_file("a.bin", options)?;
            zip.write_all(b"third")?;
            zip.finish()?;
        }

        let mut source = ZipSource::open(&zip_path)?;
        let mut all = CollectAll::default();
        source.visit(&mut all)?;

        let names: Vec<&str> = all.entries.iter().map(|(e, _)| e.name.as_str()).collect();
        assert_eq!(names, vec!["Data/b.bin", "a.bin"]);
        assert_eq!(all.entries[0].1, b"second");
        assert!(all.entries[1].0.times.modified.is_some());
        Ok(())
    }

    #[test]
    fn test_dos_time_is_local() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("dos.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&zip_path)?);
            let stamp = zip::DateTime::from_date_and_time(2010, 1, 2, 3, 4, 6)?;
            zip.start_file("rom.bin", SimpleFileOptions::default().last_modified_time(stamp))?;
            zip.write_all(b"dos")?;
            zip.finish()?;
        }

        let mut source = ZipSource::open(&zip_path)?;
        let mut all = CollectAll::default();
        source.visit(&mut all)?;
        let expected = Local.with_ymd_and_hms(2010, 1, 2, 3, 4, 6).unwrap();
        assert_eq!(all.entries[0].0.times.modified, Some(SystemTime::from(expected)));
        Ok(())
    }

    #[test]
    fn test_writer_extra_fields_survive_read() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let zip_path = dir.path().join("times.zip");
        let times = FileTimes {
            modified: Some(from_unix_seconds(1_234_567_890)),
            accessed: Some(from_unix_seconds(1_234_567_900)),
            created: Some(from_unix_seconds(1_234_000_000)),
        };

        let mut dest = ZipDestination::create(File::create(&zip_path)?);
        dest.start_entry("rom.bin", 4, &times)?;
        dest.write(b"abcd")?;
        dest.finish()?;

        let mut source = ZipSource::open(&zip_path)?;
        let mut all = CollectAll::default();
        source.visit(&mut all)?;
        assert_eq!(all.entries.len(), 1);
        assert_eq!(all.entries[0].0.times, times);
        Ok(())
    }

    #[test]
    fn test_open_rejects_garbage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"definitely not a zip file")?;
        let err = ZipSource::open(&path).err().expect("open should fail");
        assert!(matches!(err, ArchiveError::Open { .. }));
        Ok(())
    }
}
