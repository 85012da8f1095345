//! Tag reading for library scans.

use lofty::prelude::*;
use lofty::tag::ItemKey;
use std::path::Path;
use tracing::debug;

use intercom_core::library::{fallback_track, MetadataExtractor};
use intercom_core::track::{AlbumArt, Track};

/// Reads title/artist/album, duration and embedded cover art with lofty.
/// Files without a title tag get the file-name fallback, keeping the
/// duration and art that were readable.
pub struct TagReader;

impl MetadataExtractor for TagReader {
    fn extract(&self, path: &Path) -> Option<Track> {
        let tagged = match lofty::read_from_path(path) {
            Ok(t) => t,
            Err(e) => {
                debug!("tags: {}: {}", path.display(), e);
                return None;
            }
        };

        let duration_ms = tagged.properties().duration().as_millis() as u64;
        let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
        let text = |key: ItemKey| -> String {
            tag.and_then(|t| t.get_string(&key))
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let title = text(ItemKey::TrackTitle);
        let mut track = if title.is_empty() {
            fallback_track(path)
        } else {
            Track::new(
                path,
                &title,
                &text(ItemKey::TrackArtist),
                &text(ItemKey::AlbumTitle),
                0,
            )
        };
        track.duration_ms = duration_ms;

        if let Some(picture) = tag.and_then(|t| t.pictures().first()) {
            track.album_art = Some(AlbumArt::Embedded(picture.data().to_vec()));
        }
        Some(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Band - Song.bin");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(TagReader.extract(&path).is_none());

        // the scanner then falls back to the file name
        let track = intercom_core::library::describe(&path, &TagReader);
        assert_eq!((track.artist.as_str(), track.title.as_str()), ("Band", "Song"));
    }
}
