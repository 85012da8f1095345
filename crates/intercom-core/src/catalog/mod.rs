//! Track catalog: merges a library scan with the persisted playlist index.

pub mod index;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use index::{IndexEntry, OrderReport, PlaylistIndex};

use crate::events::{Notification, Notifier};
use crate::track::Track;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("index i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("index encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("index replace: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Result of merging one scan into the index.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub tracks: Vec<Track>,
    /// Scanned paths that were new to the index.
    pub added: Vec<PathBuf>,
    /// Indexed paths the scan did not find.  Left in the index.
    pub stale: Vec<PathBuf>,
}

/// Order the scanned tracks by the index and register unknown ones.
///
/// Known paths come first, by persisted order index, with persisted
/// metadata overriding the scan where the persisted value is set.  New
/// paths follow in scan order and are added to `index` at the end of the
/// order.  Indexed paths missing from the scan are reported, not removed.
pub fn reconcile(scanned: Vec<Track>, index: &mut PlaylistIndex) -> Reconciled {
    let mut scan_order = Vec::with_capacity(scanned.len());
    let mut pending: HashMap<PathBuf, Track> = HashMap::with_capacity(scanned.len());
    for track in scanned.into_iter().filter(Track::is_valid) {
        if !pending.contains_key(&track.path) {
            scan_order.push(track.path.clone());
            pending.insert(track.path.clone(), track);
        }
    }

    let mut out = Reconciled::default();

    for entry in index.ordered() {
        match pending.remove(&entry.file_path) {
            Some(mut track) => {
                entry.overlay(&mut track);
                out.tracks.push(track);
            }
            None => out.stale.push(entry.file_path.clone()),
        }
    }

    for path in scan_order {
        let Some(mut track) = pending.remove(&path) else {
            continue;
        };
        let order = index.next_order_index();
        track.order_index = order;
        index.insert(IndexEntry::from_track(&track, order));
        out.added.push(path);
        out.tracks.push(track);
    }

    out
}

/// Single owner of the index file.
pub struct CatalogStore {
    index: PlaylistIndex,
    index_path: PathBuf,
    notifier: Notifier,
}

impl CatalogStore {
    pub fn open(index_path: impl Into<PathBuf>, notifier: Notifier) -> Self {
        let index_path = index_path.into();
        let index = PlaylistIndex::load(&index_path);
        Self {
            index,
            index_path,
            notifier,
        }
    }

    pub fn index(&self) -> &PlaylistIndex {
        &self.index
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Merge a scan into the index and return the ordered library.  New
    /// paths are persisted right away; a failed write is reported and the
    /// in-memory index keeps the additions.
    pub fn reconcile(&mut self, scanned: Vec<Track>) -> Vec<Track> {
        let result = reconcile(scanned, &mut self.index);
        if !result.stale.is_empty() {
            debug!("catalog: {} indexed tracks not found on disk", result.stale.len());
        }
        if !result.added.is_empty() {
            info!("catalog: registered {} new tracks", result.added.len());
            let _ = self.persist();
        }
        let _ = self.notifier.send(Notification::LibraryChanged {
            tracks: result.tracks.len(),
        });
        result.tracks
    }

    /// Apply a full new ordering and persist it.  See
    /// [`PlaylistIndex::update_order`] for how omitted paths are placed.
    pub fn update_order(&mut self, new_order: &[PathBuf]) -> Result<OrderReport, CatalogError> {
        let report = self.index.update_order(new_order);
        if !report.unknown.is_empty() {
            warn!("catalog: reorder named {} unknown paths", report.unknown.len());
        }
        if !report.omitted.is_empty() {
            warn!(
                "catalog: reorder left out {} tracks; appended after the listed ones",
                report.omitted.len()
            );
        }
        self.persist()?;
        Ok(report)
    }

    /// Drop `path` from the index.  The file itself is not touched.
    pub fn remove_track(&mut self, path: &Path) -> Result<bool, CatalogError> {
        if self.index.remove(path).is_none() {
            debug!("catalog: remove of unknown path {}", path.display());
            return Ok(false);
        }
        info!("catalog: removed {}", path.display());
        self.persist()?;
        Ok(true)
    }

    /// Store `track`'s metadata under its path.  Known paths keep their
    /// order index; new ones go to the end.
    pub fn update_track_metadata(&mut self, track: &Track) -> Result<(), CatalogError> {
        let order = self
            .index
            .get(&track.path)
            .map(|e| e.order_index)
            .unwrap_or_else(|| self.index.next_order_index());
        self.index.insert(IndexEntry::from_track(track, order));
        self.persist()
    }

    fn persist(&self) -> Result<(), CatalogError> {
        self.index.save(&self.index_path).map_err(|e| {
            warn!("catalog: saving {} failed: {}", self.index_path.display(), e);
            let _ = self.notifier.send(Notification::Error {
                message: format!("Could not save playlist: {}", e),
            });
            e
        })
    }
}
