//! Concurrent copy, extract and compress jobs.
//!
//! Each `CopyDefinition` is one job. Jobs run on a dedicated rayon pool and
//! are independent: a failed or panicking job is reported and the rest
//! carry on. Loose outputs are written in place and deleted again if the
//! job fails partway; archive outputs are discarded by their destination.

mod listener;
mod transfer;

pub use listener::{CopyListener, JobKey, LoggingListener};

use std::collections::BTreeMap;
use std::fs::File;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{error, info};

use crate::archive::{ArchiveDestination, ArchiveKind, ArchiveSource, FileTimes};
use crate::buffer::with_scratch;
use crate::config::CopyConfig;
use crate::error::{panic_message, ArchiveError};
use crate::paths;
use transfer::{duplicate_file, pump, write_file, Progress};

/// One file to move within a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyEntry {
    /// Member name in a source archive, or a path relative to the source
    /// directory for loose sources
    pub from: String,
    /// Member name in a destination archive, or a path relative to the
    /// destination directory for loose output
    pub to: String,
    /// Expected size, used for progress
    pub size: u64,
}

impl CopyEntry {
    pub fn new(from: impl Into<String>, to: impl Into<String>, size: u64) -> Self {
        CopyEntry {
            from: from.into(),
            to: to.into(),
            size,
        }
    }
}

/// One copy job.
///
/// | source    | destination | entries | action                                  |
/// |-----------|-------------|---------|-----------------------------------------|
/// | loose     | loose       | empty   | copy the file `source` to `destination` |
/// | loose     | loose       | N       | copy N files between two directories    |
/// | archive   | loose       | N       | extract N members into a directory      |
/// | loose     | archive     | N       | compress N files into a new archive     |
/// | archive K | archive K   | empty   | copy the archive file unchanged         |
///
/// Any other archive to archive job is unsupported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyDefinition {
    pub source: PathBuf,
    pub source_kind: ArchiveKind,
    pub destination: PathBuf,
    pub destination_kind: ArchiveKind,
    pub entries: Vec<CopyEntry>,
}

impl CopyDefinition {
    /// Whole-file copy. Archives are copied as opaque files.
    pub fn file(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        CopyDefinition {
            source: source.into(),
            source_kind: ArchiveKind::None,
            destination: destination.into(),
            destination_kind: ArchiveKind::None,
            entries: Vec::new(),
        }
    }

    pub fn extract(
        archive: impl Into<PathBuf>,
        kind: ArchiveKind,
        directory: impl Into<PathBuf>,
        entries: Vec<CopyEntry>,
    ) -> Self {
        CopyDefinition {
            source: archive.into(),
            source_kind: kind,
            destination: directory.into(),
            destination_kind: ArchiveKind::None,
            entries,
        }
    }

    pub fn compress(
        directory: impl Into<PathBuf>,
        archive: impl Into<PathBuf>,
        kind: ArchiveKind,
        entries: Vec<CopyEntry>,
    ) -> Self {
        CopyDefinition {
            source: directory.into(),
            source_kind: ArchiveKind::None,
            destination: archive.into(),
            destination_kind: kind,
            entries,
        }
    }
}

#[derive(Debug)]
pub struct CopyFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub error: ArchiveError,
}

#[derive(Debug, Default)]
pub struct CopyReport {
    pub copied: usize,
    pub skipped: usize,
    pub bytes: u64,
    pub failed: Vec<CopyFailure>,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum JobOutcome {
    Copied(u64),
    Skipped(&'static str),
}

/// Copy runner bound to one configuration and worker pool.
pub struct Copier {
    config: CopyConfig,
    pool: rayon::ThreadPool,
}

impl Copier {
    pub fn new(config: CopyConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("romshift-copy-{}", i))
            .panic_handler(|payload| {
                error!("Copy worker panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .context("Failed to create copy thread pool")?;
        Ok(Copier { config, pool })
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Run every job and wait for all of them.
    pub fn copy(&self, jobs: &[CopyDefinition], listener: &dyn CopyListener) -> CopyReport {
        info!("Running {} copy jobs on {} threads", jobs.len(), self.config.threads);

        let outcomes: Vec<(JobKey, Result<JobOutcome, ArchiveError>)> = self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let key = JobKey {
                        source: job.source.clone(),
                        destination: job.destination.clone(),
                        worker: rayon::current_thread_index().unwrap_or(0),
                    };
                    let result = catch_unwind(AssertUnwindSafe(|| self.run_job(job, &key, listener)))
                        .unwrap_or_else(|payload| {
                            Err(ArchiveError::other(format!(
                                "copy job panicked: {}",
                                panic_message(payload.as_ref())
                            )))
                        });
                    match &result {
                        Ok(JobOutcome::Copied(bytes)) => listener.on_finish(&key, *bytes),
                        Ok(JobOutcome::Skipped(reason)) => listener.on_skip(&key, reason),
                        Err(e) => {
                            error!("Copy failed {}: {}", key, e);
                            listener.on_failure(&key, e);
                        }
                    }
                    (key, result)
                })
                .collect()
        });

        let mut report = CopyReport::default();
        for (key, result) in outcomes {
            match result {
                Ok(JobOutcome::Copied(bytes)) => {
                    report.copied += 1;
                    report.bytes += bytes;
                }
                Ok(JobOutcome::Skipped(_)) => report.skipped += 1,
                Err(error) => report.failed.push(CopyFailure {
                    source: key.source,
                    destination: key.destination,
                    error,
                }),
            }
        }
        info!(
            "Copy complete: {} copied, {} skipped, {} failed ({} bytes)",
            report.copied,
            report.skipped,
            report.failed.len(),
            report.bytes
        );
        report
    }

    fn run_job(
        &self,
        job: &CopyDefinition,
        key: &JobKey,
        listener: &dyn CopyListener,
    ) -> Result<JobOutcome, ArchiveError> {
        match (job.source_kind.is_archive(), job.destination_kind.is_archive()) {
            (false, false) => self.copy_files(job, key, listener),
            (true, false) => self.extract(job, key, listener),
            (false, true) => self.compress(job, key, listener),
            (true, true) if job.source_kind == job.destination_kind && job.entries.is_empty() => {
                self.copy_files(job, key, listener)
            }
            (true, true) => Err(ArchiveError::UnsupportedOperation(format!(
                "converting {} to {} is not supported",
                job.source_kind, job.destination_kind
            ))),
        }
    }

    /// Loose outputs under the job destination that still need writing.
    fn pending_outputs<'a>(
        &self,
        job: &'a CopyDefinition,
    ) -> Result<Vec<(&'a CopyEntry, PathBuf)>, ArchiveError> {
        let mut pending = Vec::with_capacity(job.entries.len());
        for entry in &job.entries {
            let out = paths::join_entry_name(&job.destination, &entry.to).ok_or_else(|| {
                ArchiveError::other(format!("output name {:?} escapes {}", entry.to, job.destination.display()))
            })?;
            if self.config.overwrite || !out.exists() {
                pending.push((entry, out));
            }
        }
        Ok(pending)
    }

    fn copy_files(
        &self,
        job: &CopyDefinition,
        key: &JobKey,
        listener: &dyn CopyListener,
    ) -> Result<JobOutcome, ArchiveError> {
        let pending: Vec<(PathBuf, PathBuf)> = if job.entries.is_empty() {
            if !self.config.overwrite && job.destination.exists() {
                return Ok(JobOutcome::Skipped("destination exists"));
            }
            vec![(job.source.clone(), job.destination.clone())]
        } else {
            self.pending_outputs(job)?
                .into_iter()
                .map(|(entry, out)| (job.source.join(&entry.from), out))
                .collect()
        };
        if pending.is_empty() {
            return Ok(JobOutcome::Skipped("all outputs exist"));
        }

        let mut opened = Vec::with_capacity(pending.len());
        let mut total = 0u64;
        for (from, to) in pending {
            let file = File::open(&from)?;
            let meta = file.metadata()?;
            total += meta.len();
            opened.push((file, FileTimes::from_metadata(&meta), to));
        }

        listener.on_start(key, total);
        let mut progress = Progress::new(listener, key, total);
        let mut written: Vec<PathBuf> = Vec::new();
        for (mut file, times, to) in opened {
            let result = with_scratch(self.config.buffer_size, |buf| {
                write_file(&mut file, &to, &times, buf, &mut progress)
            });
            if let Err(e) = result {
                for path in &written {
                    transfer::remove_partial(path);
                }
                return Err(e);
            }
            written.push(to);
        }
        progress.complete();
        Ok(JobOutcome::Copied(progress.done()))
    }

    fn extract(
        &self,
        job: &CopyDefinition,
        key: &JobKey,
        listener: &dyn CopyListener,
    ) -> Result<JobOutcome, ArchiveError> {
        if job.entries.is_empty() {
            return Err(ArchiveError::UnsupportedOperation(format!(
                "extraction from {} names no members",
                job.source.display()
            )));
        }
        let pending = self.pending_outputs(job)?;
        if pending.is_empty() {
            return Ok(JobOutcome::Skipped("all outputs exist"));
        }

        // A member may be wanted under more than one output name
        let mut targets: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let mut total = 0u64;
        for (entry, out) in pending {
            targets
                .entry(paths::normalize_entry_name(&entry.from))
                .or_default()
                .push(out);
            total += entry.size;
        }

        let mut source = ArchiveSource::open_filtered(&job.source, job.source_kind, targets.keys())?;
        listener.on_start(key, total);
        let mut progress = Progress::new(listener, key, total);
        let mut written: Vec<PathBuf> = Vec::new();

        let result = source.for_each_entry(|entry, reader| {
            let Some(outputs) = targets.get(&entry.name) else {
                return Ok(());
            };
            let Some((first, rest)) = outputs.split_first() else {
                return Ok(());
            };
            let n = with_scratch(self.config.buffer_size, |buf| {
                write_file(reader, first, &entry.times, buf, &mut progress)
            })?;
            written.push(first.clone());
            for extra in rest {
                duplicate_file(first, extra, &entry.times)?;
                written.push(extra.clone());
                progress.advance(n);
            }
            Ok(())
        });

        if let Err(e) = result {
            // Outputs completed before the failure go too, so a failed job
            // leaves nothing behind
            for path in &written {
                transfer::remove_partial(path);
            }
            return Err(e);
        }
        progress.complete();
        Ok(JobOutcome::Copied(progress.done()))
    }

    fn compress(
        &self,
        job: &CopyDefinition,
        key: &JobKey,
        listener: &dyn CopyListener,
    ) -> Result<JobOutcome, ArchiveError> {
        if job.entries.is_empty() {
            return Err(ArchiveError::UnsupportedOperation(format!(
                "compression into {} names no files",
                job.destination.display()
            )));
        }
        if !self.config.overwrite && job.destination.exists() {
            return Ok(JobOutcome::Skipped("destination exists"));
        }

        let mut dest = ArchiveDestination::create(&job.destination, job.destination_kind)?;
        let total = job.entries.iter().map(|e| e.size).sum();
        listener.on_start(key, total);
        let mut progress = Progress::new(listener, key, total);

        match self.write_entries(job, &mut dest, &mut progress) {
            Ok(()) => {
                dest.close()?;
                progress.complete();
                Ok(JobOutcome::Copied(progress.done()))
            }
            Err(e) => {
                dest.abort();
                Err(e)
            }
        }
    }

    fn write_entries(
        &self,
        job: &CopyDefinition,
        dest: &mut ArchiveDestination,
        progress: &mut Progress<'_>,
    ) -> Result<(), ArchiveError> {
        for entry in &job.entries {
            let path = job.source.join(&entry.from);
            let mut file = File::open(&path)?;
            let meta = file.metadata()?;
            let mut writer = dest.create_entry(&entry.to, meta.len(), &FileTimes::from_metadata(&meta))?;
            with_scratch(self.config.buffer_size, |buf| pump(&mut file, &mut writer, buf, progress))?;
            writer.finish()?;
        }
        Ok(())
    }
}

/// Run `jobs` with a fresh copier.
pub fn copy(jobs: &[CopyDefinition], config: &CopyConfig, listener: &dyn CopyListener) -> Result<CopyReport> {
    Ok(Copier::new(config.clone())?.copy(jobs, listener))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::times::from_unix_seconds;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;
    use zip::write::SimpleFileOptions;

    fn config(overwrite: bool) -> CopyConfig {
        CopyConfig {
            threads: 2,
            buffer_size: 1024,
            overwrite,
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        percents: Mutex<Vec<u8>>,
    }

    impl CopyListener for Recorder {
        fn on_start(&self, key: &JobKey, _total_bytes: u64) {
            self.events.lock().unwrap().push(format!("start {}", key.destination.display()));
        }
        fn on_progress(&self, _key: &JobKey, percent: u8, _bytes_per_second: f64) {
            self.percents.lock().unwrap().push(percent);
        }
        fn on_skip(&self, key: &JobKey, _reason: &str) {
            self.events.lock().unwrap().push(format!("skip {}", key.destination.display()));
        }
        fn on_failure(&self, key: &JobKey, _error: &ArchiveError) {
            self.events.lock().unwrap().push(format!("fail {}", key.destination.display()));
        }
        fn on_finish(&self, key: &JobKey, _bytes: u64) {
            self.events.lock().unwrap().push(format!("finish {}", key.destination.display()));
        }
    }

    fn make_archive(path: &Path, kind: ArchiveKind, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let times = FileTimes::modified_only(from_unix_seconds(1_200_000_000));
        let mut dest = ArchiveDestination::create(path, kind)?;
        for (name, data) in entries {
            let mut writer = dest.create_entry(name, data.len() as u64, &times)?;
            writer.write_all(data)?;
            writer.finish()?;
        }
        dest.close()?;
        Ok(())
    }

    fn read_archive(path: &Path, kind: ArchiveKind) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        ArchiveSource::open(path, kind)?.for_each_entry(|entry, reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            out.push((entry.name.clone(), data));
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn test_plain_copy_and_skip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("in.bin");
        let dst = dir.path().join("out/copy.bin");
        std::fs::write(&src, b"plain data")?;
        let mtime = from_unix_seconds(1_300_000_000);
        filetime::set_file_mtime(&src, filetime::FileTime::from_system_time(mtime))?;

        let jobs = [CopyDefinition::file(&src, &dst)];
        let recorder = Recorder::default();
        let report = copy(&jobs, &config(false), &recorder)?;
        assert_eq!(report.copied, 1);
        assert_eq!(report.bytes, 10);
        assert_eq!(std::fs::read(&dst)?, b"plain data");
        assert_eq!(std::fs::metadata(&dst)?.modified()?, mtime);
        assert_eq!(recorder.percents.lock().unwrap().last(), Some(&100));

        std::fs::write(&src, b"changed")?;
        let report = copy(&jobs, &config(false), &recorder)?;
        assert_eq!(report.skipped, 1);
        assert_eq!(std::fs::read(&dst)?, b"plain data");

        let report = copy(&jobs, &config(true), &recorder)?;
        assert_eq!(report.copied, 1);
        assert_eq!(std::fs::read(&dst)?, b"changed");
        Ok(())
    }

    #[test]
    fn test_extract_members() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("game.zip");
        make_archive(
            &archive,
            ArchiveKind::Zip,
            &[("a.bin", &b"alpha"[..]), ("skip.bin", &b"unused"[..]), ("Disc\\b.bin", &b"beta"[..])],
        )?;
        let out = dir.path().join("out");

        let job = CopyDefinition::extract(
            &archive,
            ArchiveKind::Zip,
            &out,
            vec![
                CopyEntry::new("a.bin", "A.bin", 5),
                CopyEntry::new("Disc/b.bin", "b.bin", 4),
                CopyEntry::new("a.bin", "copy/a.bin", 5),
            ],
        );
        let report = copy(&[job], &config(false), &LoggingListener)?;
        assert!(report.is_success());
        assert_eq!(report.bytes, 14);
        assert_eq!(std::fs::read(out.join("A.bin"))?, b"alpha");
        assert_eq!(std::fs::read(out.join("b.bin"))?, b"beta");
        assert_eq!(std::fs::read(out.join("copy/a.bin"))?, b"alpha");
        assert!(!out.join("skip.bin").exists());
        assert_eq!(
            std::fs::metadata(out.join("A.bin"))?.modified()?,
            from_unix_seconds(1_200_000_000)
        );
        Ok(())
    }

    #[test]
    fn test_missing_member_fails_only_its_job() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("pack.tar.gz");
        make_archive(&archive, ArchiveKind::TarGz, &[("here.bin", &b"here"[..])])?;

        let jobs = [
            CopyDefinition::extract(
                &archive,
                ArchiveKind::TarGz,
                dir.path().join("bad"),
                vec![CopyEntry::new("here.bin", "here.bin", 4), CopyEntry::new("gone.bin", "gone.bin", 4)],
            ),
            CopyDefinition::extract(
                &archive,
                ArchiveKind::TarGz,
                dir.path().join("good"),
                vec![CopyEntry::new("here.bin", "here.bin", 4)],
            ),
        ];
        let report = copy(&jobs, &config(false), &LoggingListener)?;
        assert_eq!(report.copied, 1);
        assert_eq!(report.failed.len(), 1);
        match &report.failed[0].error {
            ArchiveError::EntryNotFound { missing, .. } => assert_eq!(missing, &vec!["gone.bin".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
        // Nothing left behind by the failed job
        assert!(!dir.path().join("bad/here.bin").exists());
        assert!(dir.path().join("good/here.bin").exists());
        Ok(())
    }

    #[test]
    fn test_failed_multi_file_copy_removes_finished_outputs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("src");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&src)?;
        std::fs::create_dir_all(&out)?;
        std::fs::write(src.join("a.bin"), b"first")?;
        std::fs::write(src.join("b.bin"), b"second")?;
        // A plain file where the second output needs a directory
        std::fs::write(out.join("blocked"), b"")?;

        let job = CopyDefinition {
            source: src.clone(),
            source_kind: ArchiveKind::None,
            destination: out.clone(),
            destination_kind: ArchiveKind::None,
            entries: vec![CopyEntry::new("a.bin", "a.bin", 5), CopyEntry::new("b.bin", "blocked/b.bin", 6)],
        };
        let report = copy(&[job], &config(false), &LoggingListener)?;
        assert_eq!(report.copied, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(!out.join("a.bin").exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_member_leaves_no_partial_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("game.zip");
        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive)?);
            zip.start_file(
                "rom.bin",
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored),
            )?;
            zip.write_all(&payload)?;
            zip.finish()?;
        }
        // Flip a byte in the stored data so the CRC check fails at the end
        let mut bytes = std::fs::read(&archive)?;
        let start = bytes
            .windows(payload.len())
            .position(|w| w == payload.as_slice())
            .unwrap();
        bytes[start + payload.len() - 10] ^= 0xFF;
        std::fs::write(&archive, bytes)?;

        let out = dir.path().join("out");
        let job = CopyDefinition::extract(
            &archive,
            ArchiveKind::Zip,
            &out,
            vec![CopyEntry::new("rom.bin", "rom.bin", payload.len() as u64)],
        );
        let report = copy(&[job], &config(false), &LoggingListener)?;
        assert_eq!(report.failed.len(), 1);
        assert!(!out.join("rom.bin").exists());
        Ok(())
    }

    #[test]
    fn test_compress_loose_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("sub"))?;
        std::fs::write(src.join("a.bin"), b"alpha")?;
        std::fs::write(src.join("sub/b.bin"), b"beta")?;

        for kind in [ArchiveKind::Zip, ArchiveKind::SevenZip, ArchiveKind::TarGz] {
            let dest = dir.path().join(format!("game.{}", kind.extension().unwrap_or("bin")));
            let job = CopyDefinition::compress(
                &src,
                &dest,
                kind,
                vec![CopyEntry::new("a.bin", "a.bin", 5), CopyEntry::new("sub/b.bin", "b.bin", 4)],
            );
            let report = copy(&[job], &config(false), &LoggingListener)?;
            assert!(report.is_success(), "{kind}: {:?}", report.failed);
            assert_eq!(
                read_archive(&dest, kind)?,
                vec![("a.bin".to_string(), b"alpha".to_vec()), ("b.bin".to_string(), b"beta".to_vec())]
            );
        }
        Ok(())
    }

    #[test]
    fn test_compress_missing_input_discards_archive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.bin"), b"alpha")?;
        let dest = dir.path().join("out.zip");
        let job = CopyDefinition::compress(
            dir.path(),
            &dest,
            ArchiveKind::Zip,
            vec![CopyEntry::new("a.bin", "a.bin", 5), CopyEntry::new("nope.bin", "nope.bin", 1)],
        );
        let report = copy(&[job], &config(false), &LoggingListener)?;
        assert_eq!(report.failed.len(), 1);
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_archive_to_archive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("game.zip");
        make_archive(&archive, ArchiveKind::Zip, &[("a.bin", &b"alpha"[..])])?;

        let transcode = CopyDefinition {
            source: archive.clone(),
            source_kind: ArchiveKind::Zip,
            destination: dir.path().join("game.7z"),
            destination_kind: ArchiveKind::SevenZip,
            entries: vec![CopyEntry::new("a.bin", "a.bin", 5)],
        };
        let same = CopyDefinition {
            source: archive.clone(),
            source_kind: ArchiveKind::Zip,
            destination: dir.path().join("out/game.zip"),
            destination_kind: ArchiveKind::Zip,
            entries: Vec::new(),
        };
        let rar = CopyDefinition::compress(
            dir.path(),
            dir.path().join("game.rar"),
            ArchiveKind::Rar,
            vec![CopyEntry::new("game.zip", "game.zip", 1)],
        );

        let report = copy(&[transcode, same, rar], &config(false), &LoggingListener)?;
        assert_eq!(report.copied, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .all(|f| matches!(f.error, ArchiveError::UnsupportedOperation(_))));
        assert_eq!(std::fs::read(dir.path().join("out/game.zip"))?, std::fs::read(&archive)?);
        assert!(!dir.path().join("game.7z").exists());
        assert!(!dir.path().join("game.rar").exists());
        Ok(())
    }

    struct PanicOn(&'static str);

    impl CopyListener for PanicOn {
        fn on_start(&self, key: &JobKey, _total_bytes: u64) {
            if key.destination.ends_with(self.0) {
                panic!("listener exploded");
            }
        }
    }

    #[test]
    fn test_panicking_job_is_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.bin"), b"a")?;
        let jobs = [
            CopyDefinition::file(dir.path().join("a.bin"), dir.path().join("boom.bin")),
            CopyDefinition::file(dir.path().join("a.bin"), dir.path().join("fine.bin")),
        ];
        let report = copy(&jobs, &config(false), &PanicOn("boom.bin"))?;
        assert_eq!(report.copied, 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.to_string().contains("listener exploded"));
        assert!(dir.path().join("fine.bin").exists());
        Ok(())
    }

    #[test]
    fn test_listener_sees_each_job() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.bin"), b"a")?;
        std::fs::write(dir.path().join("exists.bin"), b"old")?;
        let jobs = [
            CopyDefinition::file(dir.path().join("a.bin"), dir.path().join("new.bin")),
            CopyDefinition::file(dir.path().join("a.bin"), dir.path().join("exists.bin")),
            CopyDefinition::file(dir.path().join("missing.bin"), dir.path().join("never.bin")),
        ];
        let recorder = Recorder::default();
        copy(&jobs, &config(false), &recorder)?;

        let mut events = recorder.events.lock().unwrap().clone();
        events.sort();
        let expected: Vec<String> = vec![
            format!("fail {}", dir.path().join("never.bin").display()),
            format!("finish {}", dir.path().join("new.bin").display()),
            format!("skip {}", dir.path().join("exists.bin").display()),
            format!("start {}", dir.path().join("new.bin").display()),
        ];
        assert_eq!(events, expected);
        Ok(())
    }
}
