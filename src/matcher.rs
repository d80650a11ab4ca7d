//! Resolve catalog games against a scan.
//!
//! Loose files are preferred over archive members. When archive members
//! are needed, the fewest containers that cover the game are chosen, and a
//! caller asking for an archive destination gets either one container that
//! holds every ROM or a failure.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::archive::ArchiveKind;
use crate::catalog::{Catalog, CatalogGame, CatalogRom};
use crate::error::{MatchFailure, MatchFailureReason};
use crate::index::ScanResultIndex;
use crate::scanner::ScanRecord;

/// One required ROM bound to the content unit that satisfies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RomMatch {
    pub rom: CatalogRom,
    pub record: Arc<ScanRecord>,
}

/// Every ROM of one game, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameMatch {
    pub game: String,
    pub roms: Vec<RomMatch>,
    /// Scanned member count of each archive the ROMs come from
    #[serde(skip)]
    pub archive_members: BTreeMap<PathBuf, usize>,
}

impl GameMatch {
    /// Distinct source containers, sorted.
    pub fn containers(&self) -> BTreeSet<&PathBuf> {
        self.roms.iter().map(|m| &m.record.container).collect()
    }

    pub fn is_all_loose(&self) -> bool {
        self.roms.iter().all(|m| m.record.is_loose())
    }

    /// True when `container` holds the game's ROMs and nothing else.
    pub fn owns_container(&self, container: &Path) -> bool {
        let used: BTreeSet<&str> = self
            .roms
            .iter()
            .filter(|m| m.record.container == container)
            .filter_map(|m| m.record.member.as_deref())
            .collect();
        !used.is_empty() && self.archive_members.get(container) == Some(&used.len())
    }
}

/// Outcome of matching a whole catalog.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub matched: Vec<GameMatch>,
    pub failed: Vec<MatchFailure>,
}

fn fail(game: &CatalogGame, reason: MatchFailureReason) -> MatchFailure {
    MatchFailure {
        game: game.name.clone(),
        reason,
    }
}

/// Resolve one game. `desired` set to an archive kind requires a single
/// container that holds every ROM, unless all of them exist as loose files.
pub fn match_game(
    game: &CatalogGame,
    index: &ScanResultIndex,
    desired: Option<ArchiveKind>,
) -> Result<GameMatch, MatchFailure> {
    if game.roms.is_empty() {
        return Err(fail(game, MatchFailureReason::NoRoms));
    }

    let candidates: Vec<Vec<Arc<ScanRecord>>> =
        game.roms.iter().map(|rom| index.lookup(rom)).collect();

    let missing: Vec<String> = game
        .roms
        .iter()
        .zip(&candidates)
        .filter(|(_, found)| found.is_empty())
        .map(|(rom, _)| rom.name.clone())
        .collect();
    if !missing.is_empty() {
        warn!("{}: missing ROM {}", game.name, missing.join(", "));
        return Err(fail(game, MatchFailureReason::MissingRom(missing)));
    }

    let loose: Vec<Option<Arc<ScanRecord>>> = candidates
        .iter()
        .map(|found| found.iter().find(|r| r.is_loose()).cloned())
        .collect();
    if loose.iter().all(Option::is_some) {
        debug!("{}: all {} ROMs found as loose files", game.name, game.roms.len());
        return Ok(bind(game, index, loose.into_iter().flatten()));
    }

    let groups = group_by_container(&candidates);
    let single_archive = desired.is_some_and(|kind| kind.is_archive());

    if single_archive {
        let Some((container, members)) = groups
            .iter()
            .find(|(_, members)| members.len() == game.roms.len())
        else {
            warn!("{}: no single archive holds all {} ROMs", game.name, game.roms.len());
            return Err(fail(game, MatchFailureReason::NoSingleArchive));
        };
        debug!("{}: all ROMs in {}", game.name, container.display());
        let chosen = (0..game.roms.len()).filter_map(|i| members.get(&i).cloned());
        return Ok(bind(game, index, chosen));
    }

    let mut chosen = loose;
    let mut used: BTreeSet<&PathBuf> = BTreeSet::new();
    while chosen.iter().any(Option::is_none) {
        // Container covering most of what is still open; ties go to the path
        let best = groups
            .iter()
            .filter(|(container, _)| !used.contains(container))
            .map(|(container, members)| {
                let covered = members.keys().filter(|&&i| chosen[i].is_none()).count();
                (container, members, covered)
            })
            .filter(|(_, _, covered)| *covered > 0)
            .max_by(|a, b| a.2.cmp(&b.2).then_with(|| b.0.cmp(a.0)));
        let Some((container, members, _)) = best else {
            // Every ROM has a candidate, so some container always covers it
            let left: Vec<String> = chosen
                .iter()
                .zip(&game.roms)
                .filter(|(c, _)| c.is_none())
                .map(|(_, rom)| rom.name.clone())
                .collect();
            return Err(fail(game, MatchFailureReason::MissingRom(left)));
        };
        for (&i, record) in members {
            if chosen[i].is_none() {
                chosen[i] = Some(Arc::clone(record));
            }
        }
        used.insert(container);
    }

    debug!(
        "{}: resolved from {} archive(s) and loose files",
        game.name,
        used.len()
    );
    Ok(bind(game, index, chosen.into_iter().flatten()))
}

fn bind(
    game: &CatalogGame,
    index: &ScanResultIndex,
    records: impl Iterator<Item = Arc<ScanRecord>>,
) -> GameMatch {
    let roms: Vec<RomMatch> = game
        .roms
        .iter()
        .cloned()
        .zip(records)
        .map(|(rom, record)| RomMatch { rom, record })
        .collect();
    let archive_members = roms
        .iter()
        .filter(|m| !m.record.is_loose())
        .map(|m| {
            let container = m.record.container.clone();
            let count = index.member_count(&container);
            (container, count)
        })
        .collect();
    GameMatch {
        game: game.name.clone(),
        roms,
        archive_members,
    }
}

/// Archive candidates grouped by container: for each container, the ROM
/// indices it can satisfy and the member that satisfies each. Sorted by
/// coverage descending, then by container path.
fn group_by_container(
    candidates: &[Vec<Arc<ScanRecord>>],
) -> Vec<(PathBuf, BTreeMap<usize, Arc<ScanRecord>>)> {
    let mut groups: BTreeMap<PathBuf, BTreeMap<usize, Arc<ScanRecord>>> = BTreeMap::new();
    for (i, found) in candidates.iter().enumerate() {
        for record in found.iter().filter(|r| !r.is_loose()) {
            groups
                .entry(record.container.clone())
                .or_default()
                .entry(i)
                .or_insert_with(|| Arc::clone(record));
        }
    }
    let mut ranked: Vec<_> = groups.into_iter().collect();
    ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Match every game of `catalog`. Games are independent, so they are
/// resolved in parallel on the current rayon pool.
pub fn match_catalog(
    catalog: &Catalog,
    index: &ScanResultIndex,
    desired: Option<ArchiveKind>,
) -> MatchReport {
    let results: Vec<Result<GameMatch, MatchFailure>> = catalog
        .games
        .par_iter()
        .map(|game| match_game(game, index, desired))
        .collect();

    let mut report = MatchReport::default();
    for result in results {
        match result {
            Ok(found) => report.matched.push(found),
            Err(failure) => report.failed.push(failure),
        }
    }
    report
}

/// Successful matches keyed by parent set name. Clones sit next to their
/// parent; games without a known parent form their own set.
pub fn group_by_parent<'a>(
    catalog: &Catalog,
    matches: &'a [GameMatch],
) -> BTreeMap<String, Vec<&'a GameMatch>> {
    let mut sets: BTreeMap<String, Vec<&GameMatch>> = BTreeMap::new();
    for found in matches {
        let parent = match catalog.game(&found.game) {
            Some(game) => catalog.parent_of(game).to_string(),
            None => found.game.clone(),
        };
        sets.entry(parent).or_default().push(found);
    }
    sets
}
