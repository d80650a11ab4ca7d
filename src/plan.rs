//! Turn matched games into copy jobs.
//!
//! Layout:
//! - loose output: `<output>/<game>/<rom name>`
//! - archive output: `<output>/<game>.<ext>`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::archive::ArchiveKind;
use crate::copier::{CopyDefinition, CopyEntry};
use crate::matcher::{GameMatch, RomMatch};
use crate::paths;
use crate::scanner::ScanRecord;

/// Plan the jobs that rebuild every game in `matches` under `output_dir`.
/// `format` set to an archive kind packs each game into one archive.
///
/// Games that cannot be laid out are logged and left out.
pub fn plan_copies(matches: &[GameMatch], output_dir: &Path, format: Option<ArchiveKind>) -> Vec<CopyDefinition> {
    let mut jobs = Vec::new();
    for game in matches {
        match format.filter(|k| k.is_archive()) {
            Some(kind) => {
                if let Some(job) = plan_archive(game, output_dir, kind) {
                    jobs.push(job);
                }
            }
            None => jobs.extend(plan_loose(game, output_dir)),
        }
    }
    jobs
}

/// Directory that receives the loose files of `game`.
pub fn game_dir(output_dir: &Path, game: &str) -> PathBuf {
    output_dir.join(paths::sanitize_component(game))
}

/// Archive that receives `game` packed as `kind`.
pub fn game_archive(output_dir: &Path, game: &str, kind: ArchiveKind) -> PathBuf {
    let name = paths::sanitize_component(game);
    match kind.extension() {
        Some(ext) => output_dir.join(format!("{}.{}", name, ext)),
        None => output_dir.join(name),
    }
}

fn plan_loose(game: &GameMatch, output_dir: &Path) -> Vec<CopyDefinition> {
    let dir = game_dir(output_dir, &game.game);
    let mut jobs = Vec::new();
    let mut by_archive: BTreeMap<&Path, Vec<CopyEntry>> = BTreeMap::new();

    for found in &game.roms {
        let record = &found.record;
        match &record.member {
            None => match paths::join_entry_name(&dir, &found.rom.name) {
                Some(out) => jobs.push(CopyDefinition::file(&record.container, out)),
                None => warn!("{}: ROM name {:?} escapes the game directory", game.game, found.rom.name),
            },
            Some(member) => by_archive
                .entry(record.container.as_path())
                .or_default()
                .push(CopyEntry::new(member.clone(), found.rom.name.clone(), record.size)),
        }
    }

    for (archive, entries) in by_archive {
        jobs.push(CopyDefinition::extract(
            archive,
            ArchiveKind::from_path(archive),
            &dir,
            entries,
        ));
    }
    jobs
}

fn plan_archive(game: &GameMatch, output_dir: &Path, kind: ArchiveKind) -> Option<CopyDefinition> {
    let dest = game_archive(output_dir, &game.game, kind);

    if game.is_all_loose() {
        let files: Vec<&Path> = game.roms.iter().map(|m| m.record.container.as_path()).collect();
        let base = common_dir(&files);
        let entries = game
            .roms
            .iter()
            .map(|m| {
                let relative = m.record.container.strip_prefix(&base).unwrap_or(&m.record.container);
                CopyEntry::new(relative.to_string_lossy(), m.rom.name.clone(), m.record.size)
            })
            .collect();
        return Some(CopyDefinition::compress(base, dest, kind, entries));
    }

    let containers = game.containers();
    if containers.len() != 1 || game.roms.iter().any(|m| m.record.is_loose()) {
        warn!(
            "{}: sources span {} containers, cannot pack into one {} archive",
            game.game,
            containers.len(),
            kind
        );
        return None;
    }

    let source: &Arc<ScanRecord> = &game.roms[0].record;
    let source_kind = source.kind();
    if source_kind == kind && names_match(&game.roms) && game.owns_container(&source.container) {
        // Same format, names and member set: the source archive is already the output
        return Some(CopyDefinition {
            source: source.container.clone(),
            source_kind,
            destination: dest,
            destination_kind: kind,
            entries: Vec::new(),
        });
    }

    // Needs re-encoding or dropping foreign members; the copier reports it
    // as unsupported
    Some(CopyDefinition {
        source: source.container.clone(),
        source_kind,
        destination: dest,
        destination_kind: kind,
        entries: game
            .roms
            .iter()
            .map(|m| {
                CopyEntry::new(
                    m.record.member.clone().unwrap_or_default(),
                    m.rom.name.clone(),
                    m.record.size,
                )
            })
            .collect(),
    })
}

fn names_match(roms: &[RomMatch]) -> bool {
    roms.iter().all(|m| {
        m.record.member.as_deref() == Some(paths::normalize_entry_name(&m.rom.name).as_str())
    })
}

/// Deepest directory containing every path in `files`.
fn common_dir(files: &[&Path]) -> PathBuf {
    let mut parents = files.iter().map(|f| f.parent().unwrap_or(Path::new("")));
    let Some(first) = parents.next() else {
        return PathBuf::new();
    };
    let mut common: Vec<_> = first.components().collect();
    for parent in parents {
        let shared = common
            .iter()
            .zip(parent.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        common.truncate(shared);
    }
    common.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveDestination, ArchiveSource, FileTimes};
    use crate::catalog::CatalogGame;
    use crate::config::{CopyConfig, ScanConfig};
    use crate::copier::{copy, LoggingListener};
    use crate::index::tests::{record, rom_for};
    use crate::index::ScanResultIndex;
    use crate::matcher::match_game;
    use crate::scanner::scan;
    use std::io::Write;

    fn rom_match(name: &str, rec: ScanRecord) -> RomMatch {
        RomMatch {
            rom: rom_for(name, b""),
            record: Arc::new(rec),
        }
    }

    /// Match whose archives hold exactly the matched members.
    fn game(name: &str, roms: Vec<RomMatch>) -> GameMatch {
        let mut archive_members = BTreeMap::new();
        for m in roms.iter().filter(|m| !m.record.is_loose()) {
            *archive_members.entry(m.record.container.clone()).or_insert(0) += 1;
        }
        GameMatch {
            game: name.to_string(),
            roms,
            archive_members,
        }
    }

    #[test]
    fn test_loose_layout() {
        let matched = game(
            "Game: Special",
            vec![
                rom_match("a.bin", record("/in/a.bin", None, b"a")),
                rom_match("b.bin", record("/in/pack.7z", Some("x/b.bin"), b"b")),
                rom_match("c.bin", record("/in/pack.7z", Some("c.bin"), b"c")),
            ],
        );
        let jobs = plan_copies(&[matched], Path::new("/out"), None);
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0], CopyDefinition::file("/in/a.bin", "/out/Game_ Special/a.bin"));
        assert_eq!(jobs[1].source_kind, ArchiveKind::SevenZip);
        assert_eq!(jobs[1].destination, PathBuf::from("/out/Game_ Special"));
        assert_eq!(
            jobs[1].entries,
            vec![CopyEntry::new("x/b.bin", "b.bin", 1), CopyEntry::new("c.bin", "c.bin", 1)]
        );
    }

    #[test]
    fn test_archive_layout() {
        let loose = game(
            "Loose",
            vec![
                rom_match("a.bin", record("/in/one/a.bin", None, b"a")),
                rom_match("b.bin", record("/in/two/b.bin", None, b"b")),
            ],
        );
        let same = game("Same", vec![rom_match("a.bin", record("/in/s.zip", Some("a.bin"), b"a"))]);
        let other = game("Other", vec![rom_match("a.bin", record("/in/o.7z", Some("a.bin"), b"a"))]);
        let split = game(
            "Split",
            vec![
                rom_match("a.bin", record("/in/s.zip", Some("a.bin"), b"a")),
                rom_match("b.bin", record("/in/t.zip", Some("b.bin"), b"b")),
            ],
        );

        let jobs = plan_copies(&[loose, same, other, split], Path::new("/out"), Some(ArchiveKind::Zip));
        assert_eq!(jobs.len(), 3);

        assert_eq!(jobs[0].source, PathBuf::from("/in"));
        assert_eq!(jobs[0].destination, PathBuf::from("/out/Loose.zip"));
        assert_eq!(jobs[0].entries[0].from, "one/a.bin");
        assert_eq!(jobs[0].entries[1].from, "two/b.bin");

        assert_eq!(jobs[1].source_kind, ArchiveKind::Zip);
        assert!(jobs[1].entries.is_empty());

        assert_eq!(jobs[2].source_kind, ArchiveKind::SevenZip);
        assert_eq!(jobs[2].entries.len(), 1);
    }

    #[test]
    fn test_common_dir() {
        assert_eq!(
            common_dir(&[Path::new("/a/b/c.bin"), Path::new("/a/b/d/e.bin")]),
            PathBuf::from("/a/b")
        );
        assert_eq!(common_dir(&[Path::new("/a/x.bin"), Path::new("/b/y.bin")]), PathBuf::from("/"));
        assert_eq!(common_dir(&[]), PathBuf::new());
    }

    #[test]
    fn test_scan_match_copy_end_to_end() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input)?;
        std::fs::write(input.join("first.bin"), b"first rom")?;
        let mut dest = ArchiveDestination::create(&input.join("pack.tar.gz"), ArchiveKind::TarGz)?;
        let mut writer = dest.create_entry("second.bin", 10, &FileTimes::default())?;
        writer.write_all(b"second rom")?;
        writer.finish()?;
        dest.close()?;

        let scan_config = ScanConfig {
            threads: 2,
            buffer_size: 4096,
            lazy_header_detection: true,
        };
        let index = ScanResultIndex::build(scan(&input, &scan_config)?);
        let wanted = CatalogGame {
            name: "Pair".to_string(),
            clone_of: None,
            roms: vec![rom_for("a.bin", b"first rom"), rom_for("b.bin", b"second rom")],
        };
        let found = match_game(&wanted, &index, None)?;

        let copy_config = CopyConfig {
            threads: 2,
            buffer_size: 4096,
            overwrite: false,
        };
        let jobs = plan_copies(std::slice::from_ref(&found), &output, None);
        let report = copy(&jobs, &copy_config, &LoggingListener)?;
        assert!(report.is_success());
        assert_eq!(std::fs::read(output.join("Pair/a.bin"))?, b"first rom");
        assert_eq!(std::fs::read(output.join("Pair/b.bin"))?, b"second rom");

        // Loose output can be repacked once everything is loose
        let repack_index = ScanResultIndex::build(scan(&output, &scan_config)?);
        let loose = match_game(&wanted, &repack_index, Some(ArchiveKind::Zip))?;
        let jobs = plan_copies(&[loose], &output, Some(ArchiveKind::Zip));
        let report = copy(&jobs, &copy_config, &LoggingListener)?;
        assert!(report.is_success());

        let mut names = Vec::new();
        ArchiveSource::open(&output.join("Pair.zip"), ArchiveKind::Zip)?.for_each_entry(|entry, reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            names.push((entry.name.clone(), data.len()));
            Ok(())
        })?;
        assert_eq!(names, vec![("a.bin".to_string(), 9), ("b.bin".to_string(), 10)]);
        Ok(())
    }

    #[test]
    fn test_same_kind_archive_with_other_members_is_not_copied_whole() {
        let mut shared = game("A", vec![rom_match("a.bin", record("/in/bundle.zip", Some("a.bin"), b"a"))]);
        shared.archive_members.insert(PathBuf::from("/in/bundle.zip"), 2);

        let jobs = plan_copies(&[shared], Path::new("/out"), Some(ArchiveKind::Zip));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].entries, vec![CopyEntry::new("a.bin", "a.bin", 1)]);
    }

    #[test]
    fn test_repack_keeps_only_game_members() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input)?;
        std::fs::create_dir_all(&output)?;
        let mut dest = ArchiveDestination::create(&input.join("bundle.zip"), ArchiveKind::Zip)?;
        for (name, data) in [("a.bin", &b"alpha rom"[..]), ("unrelated.txt", &b"notes"[..])] {
            let mut writer = dest.create_entry(name, data.len() as u64, &FileTimes::default())?;
            writer.write_all(data)?;
            writer.finish()?;
        }
        dest.close()?;

        let scan_config = ScanConfig {
            threads: 1,
            buffer_size: 4096,
            lazy_header_detection: true,
        };
        let index = ScanResultIndex::build(scan(&input, &scan_config)?);
        let wanted = CatalogGame {
            name: "A".to_string(),
            clone_of: None,
            roms: vec![rom_for("a.bin", b"alpha rom")],
        };
        let found = match_game(&wanted, &index, Some(ArchiveKind::Zip))?;
        assert!(!found.owns_container(&input.join("bundle.zip")));

        let jobs = plan_copies(&[found], &output, Some(ArchiveKind::Zip));
        let report = copy(&jobs, &CopyConfig::default(), &LoggingListener)?;
        assert_eq!(report.copied, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(!output.join("A.zip").exists());
        Ok(())
    }
}
