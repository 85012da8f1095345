//! The persisted playlist index: `{ "version": 1, "tracks": [...] }`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::CatalogError;
use crate::track::Track;

pub const INDEX_VERSION: u32 = 1;

/// What the index remembers about one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub file_path: PathBuf,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    /// Milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub order_index: usize,
    #[serde(default, with = "iso_date")]
    pub date_added: Option<DateTime<Local>>,
    #[serde(default)]
    pub file_size: u64,
}

impl IndexEntry {
    pub fn from_track(track: &Track, order_index: usize) -> Self {
        Self {
            file_path: track.path.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            duration: track.duration_ms,
            order_index,
            date_added: track.date_added,
            file_size: track.file_size,
        }
    }

    /// Persisted values win where they carry information.
    pub fn overlay(&self, track: &mut Track) {
        if !self.title.is_empty() {
            track.title = self.title.clone();
        }
        if !self.artist.is_empty() {
            track.artist = self.artist.clone();
        }
        if !self.album.is_empty() {
            track.album = self.album.clone();
        }
        if self.date_added.is_some() {
            track.date_added = self.date_added;
        }
        if self.file_size > 0 {
            track.file_size = self.file_size;
        }
        track.order_index = self.order_index;
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    tracks: Vec<IndexEntry>,
}

fn default_version() -> u32 {
    INDEX_VERSION
}

/// Paths that `update_order` could not place as asked.
#[derive(Debug, Default, PartialEq)]
pub struct OrderReport {
    /// Listed but not in the index; ignored.
    pub unknown: Vec<PathBuf>,
    /// In the index but not listed; appended after the listed ones.
    pub omitted: Vec<PathBuf>,
}

impl OrderReport {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty() && self.omitted.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlaylistIndex {
    entries: HashMap<PathBuf, IndexEntry>,
}

impl PlaylistIndex {
    /// Reads `path`.  A missing file is an empty index; so is an unreadable
    /// one, with a warning, so a corrupt index never blocks the library.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_json_str(&content) {
                Ok(index) => {
                    debug!("catalog: loaded {} index entries from {}", index.len(), path.display());
                    index
                }
                Err(e) => {
                    warn!("catalog: ignoring unreadable index {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("catalog: cannot read index {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        let file: IndexFile = serde_json::from_str(content)?;
        if file.version != INDEX_VERSION {
            warn!("catalog: index version {} (expected {})", file.version, INDEX_VERSION);
        }
        let entries = file
            .tracks
            .into_iter()
            .filter(|e| !e.file_path.as_os_str().is_empty())
            .map(|e| (e.file_path.clone(), e))
            .collect();
        Ok(Self { entries })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let file = IndexFile {
            version: INDEX_VERSION,
            tracks: self.ordered().into_iter().cloned().collect(),
        };
        serde_json::to_string_pretty(&file)
    }

    /// Replace `path` atomically: write a sibling temp file, then rename it
    /// over the target.  Readers see the old file or the new one, never a
    /// partial write.
    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = self.to_json_string()?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        debug!("catalog: wrote {} entries to {}", self.len(), path.display());
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.file_path.clone(), entry);
    }

    pub fn remove(&mut self, path: &Path) -> Option<IndexEntry> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries by order index; equal indices fall back to path order.
    pub fn ordered(&self) -> Vec<&IndexEntry> {
        let mut entries: Vec<&IndexEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        entries
    }

    /// One past the largest order index, 0 when empty.
    pub fn next_order_index(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Renumber to `0..N`: listed known paths first in list order, then the
    /// known paths the list left out, keeping their previous relative order.
    pub fn update_order(&mut self, new_order: &[PathBuf]) -> OrderReport {
        let mut report = OrderReport::default();
        let mut sequence: Vec<PathBuf> = Vec::with_capacity(self.entries.len());
        let mut listed: HashSet<&Path> = HashSet::with_capacity(new_order.len());

        for path in new_order {
            if !self.entries.contains_key(path) {
                report.unknown.push(path.clone());
            } else if listed.insert(path.as_path()) {
                sequence.push(path.clone());
            }
        }

        let omitted: Vec<PathBuf> = self
            .ordered()
            .into_iter()
            .map(|e| e.file_path.clone())
            .filter(|p| !listed.contains(p.as_path()))
            .collect();
        sequence.extend(omitted.iter().cloned());
        report.omitted = omitted;

        for (idx, path) in sequence.iter().enumerate() {
            if let Some(entry) = self.entries.get_mut(path) {
                entry.order_index = idx;
            }
        }
        report
    }
}

/// ISO-8601 timestamps.  Reads RFC 3339 or a naive local
/// `YYYY-MM-DDTHH:MM:SS[.fff]`; anything else is treated as absent.  Writes
/// RFC 3339, or an empty string when absent.
mod iso_date {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Local>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Local>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Local>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Local));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
    }
}
