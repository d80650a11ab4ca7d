//! DAT catalog model.
//!
//! JSON rendition of a ROM catalog: games, the files each game requires,
//! and an optional header detector describing a prepended copier header.
//!
//! ```json
//! {
//!   "name": "Console - Example",
//!   "games": [
//!     { "name": "Game (USA)", "roms": [ { "name": "game.bin", "size": 16, "crc": "3b0a1a2b" } ] },
//!     { "name": "Game (Europe)", "cloneOf": "Game (USA)", "roms": [ ... ] }
//!   ],
//!   "header": { "rules": [ { "startOffset": 16, "tests": [ { "offset": 1, "value": "4e4553" } ] } ] }
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hash::normalize_hex;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub games: Vec<CatalogGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderDetector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGame {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_of: Option<String>,
    #[serde(default)]
    pub roms: Vec<CatalogRom>,
}

/// One file a game requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRom {
    pub name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl CatalogRom {
    pub fn crc32(&self) -> Option<String> {
        self.crc.as_deref().and_then(|v| normalize_hex(v, 8))
    }

    pub fn md5(&self) -> Option<String> {
        self.md5.as_deref().and_then(|v| normalize_hex(v, 32))
    }

    pub fn sha1(&self) -> Option<String> {
        self.sha1.as_deref().and_then(|v| normalize_hex(v, 40))
    }

    /// Whether at least one usable digest is present.
    pub fn has_digest(&self) -> bool {
        self.crc32().is_some() || self.md5().is_some() || self.sha1().is_some()
    }
}

/// Rules recognizing a copier header in front of ROM data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderDetector {
    #[serde(default)]
    pub rules: Vec<HeaderRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRule {
    /// Where the headerless data starts when the rule matches
    #[serde(default)]
    pub start_offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u64>,
    #[serde(default)]
    pub tests: Vec<HeaderTest>,
    /// Transformation applied to matching data (`none`, `byteswap`, ...)
    #[serde(default = "default_operation")]
    pub operation: String,
}

fn default_operation() -> String {
    "none".to_string()
}

/// Fixed bytes expected at an offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderTest {
    pub offset: u64,
    /// Hex-encoded bytes
    pub value: String,
}

impl HeaderTest {
    pub fn value_bytes(&self) -> Option<Vec<u8>> {
        let hex = self.value.trim();
        if hex.len() % 2 != 0 {
            return None;
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect()
    }

    /// One past the last byte this test inspects.
    pub fn end(&self) -> Option<u64> {
        self.value_bytes()
            .map(|bytes| self.offset.saturating_add(bytes.len() as u64))
    }
}

impl Catalog {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse catalog JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid catalog: {}", path.display()))
    }

    /// Largest ROM size declared anywhere in the catalog.
    pub fn max_rom_size(&self) -> u64 {
        self.games
            .iter()
            .flat_map(|g| g.roms.iter())
            .map(|r| r.size)
            .max()
            .unwrap_or(0)
    }

    pub fn game(&self, name: &str) -> Option<&CatalogGame> {
        self.games.iter().find(|g| g.name == name)
    }

    /// Name of the parent set of `game`, or its own name when it has none.
    pub fn parent_of<'a>(&'a self, game: &'a CatalogGame) -> &'a str {
        game.clone_of
            .as_deref()
            .filter(|parent| self.game(parent).is_some())
            .unwrap_or(&game.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "Example",
        "games": [
            { "name": "Game (USA)", "roms": [ { "name": "game.bin", "size": 16, "crc": "3B0A1A2B" } ] },
            { "name": "Game (Europe)", "cloneOf": "Game (USA)",
              "roms": [ { "name": "game.bin", "size": 2048, "sha1": "A9993E364706816ABA3E25717850C26C9CD0D89D" } ] },
            { "name": "Orphan (Japan)", "cloneOf": "Missing Parent", "roms": [] }
        ],
        "header": { "rules": [ { "startOffset": 16, "tests": [ { "offset": 0, "value": "4e45531a" } ] } ] }
    }"#;

    #[test]
    fn test_parse_sample() -> Result<()> {
        let catalog = Catalog::from_json(SAMPLE)?;
        assert_eq!(catalog.games.len(), 3);
        assert_eq!(catalog.max_rom_size(), 2048);

        let rom = &catalog.games[0].roms[0];
        assert_eq!(rom.crc32().as_deref(), Some("3b0a1a2b"));
        assert!(rom.has_digest());
        assert_eq!(
            catalog.games[1].roms[0].sha1().as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );

        let header = catalog.header.as_ref().unwrap();
        assert_eq!(header.rules[0].operation, "none");
        assert_eq!(header.rules[0].tests[0].value_bytes(), Some(vec![0x4e, 0x45, 0x53, 0x1a]));
        assert_eq!(header.rules[0].tests[0].end(), Some(4));
        Ok(())
    }

    #[test]
    fn test_parent_of() -> Result<()> {
        let catalog = Catalog::from_json(SAMPLE)?;
        assert_eq!(catalog.parent_of(&catalog.games[0]), "Game (USA)");
        assert_eq!(catalog.parent_of(&catalog.games[1]), "Game (USA)");
        assert_eq!(catalog.parent_of(&catalog.games[2]), "Orphan (Japan)");
        Ok(())
    }

    #[test]
    fn test_bad_hex_value() {
        let test = HeaderTest {
            offset: 0,
            value: "abc".to_string(),
        };
        assert_eq!(test.value_bytes(), None);
        assert_eq!(test.end(), None);
    }
}
