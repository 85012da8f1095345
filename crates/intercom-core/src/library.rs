//! Filesystem side of the catalog: find audio files, describe each one.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::LibraryConfig;
use crate::track::{AlbumArt, Track, UNKNOWN_ALBUM, UNKNOWN_ARTIST};

const FOLDER_COVERS: [&str; 4] = ["cover.jpg", "cover.png", "folder.jpg", "folder.png"];

/// Reads tags from an audio file.  Returning `None` (or a track with an
/// empty title) makes the scanner fall back to the file name.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Option<Track>;
}

/// Extractor that never reads tags; every file is described by its name.
pub struct FileNameOnly;

impl MetadataExtractor for FileNameOnly {
    fn extract(&self, _path: &Path) -> Option<Track> {
        None
    }
}

pub struct LibraryScanner {
    root: PathBuf,
    extensions: Vec<String>,
}

impl LibraryScanner {
    pub fn new(config: &LibraryConfig) -> Self {
        Self::with_extensions(&config.music_dir, &config.extensions)
    }

    pub fn with_extensions(root: &Path, extensions: &[String]) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self {
            root: root.to_path_buf(),
            extensions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_audio_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    /// Audio files under the root, recursively, sorted by path within each
    /// directory.  A missing root is an empty library.
    pub fn audio_files(&self) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            debug!("library: {} does not exist yet", self.root.display());
            return Vec::new();
        }
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!("library: skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && self.is_audio_file(e.path()))
            .map(|e| e.into_path())
            .collect()
    }

    /// Describe every audio file, in scan order.
    pub fn scan(&self, extractor: &dyn MetadataExtractor) -> Vec<Track> {
        let tracks: Vec<Track> = self
            .audio_files()
            .into_iter()
            .map(|path| describe(&path, extractor))
            .collect();
        debug!("library: scanned {} tracks under {}", tracks.len(), self.root.display());
        tracks
    }
}

/// Track for one file: extractor output when usable, filename otherwise,
/// with size and modification time filled from the filesystem.
pub fn describe(path: &Path, extractor: &dyn MetadataExtractor) -> Track {
    let mut track = match extractor.extract(path) {
        Some(t) if !t.title.trim().is_empty() => Track {
            path: path.to_path_buf(),
            ..t
        },
        _ => fallback_track(path),
    };

    if let Ok(meta) = std::fs::metadata(path) {
        if track.file_size == 0 {
            track.file_size = meta.len();
        }
        if track.date_added.is_none() {
            track.date_added = meta.modified().ok().map(DateTime::<Local>::from);
        }
    }
    if track.album_art.is_none() {
        track.album_art = path.parent().and_then(find_folder_cover).map(AlbumArt::File);
    }
    track
}

/// "Artist - Title.ext" (hyphen or en dash) or just the stem as title.
pub fn fallback_track(path: &Path) -> Track {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let split = stem
        .split_once(" - ")
        .or_else(|| stem.split_once(" \u{2013} "));
    let (artist, title) = match split {
        Some((artist, rest)) => {
            let title = rest
                .split(" - ")
                .next()
                .and_then(|t| t.split(" \u{2013} ").next())
                .unwrap_or(rest);
            (artist.trim(), title.trim())
        }
        None => (UNKNOWN_ARTIST, stem),
    };

    let mut track = Track::new(path, title, artist, UNKNOWN_ALBUM, 0);
    track.album_art = path.parent().and_then(find_folder_cover).map(AlbumArt::File);
    track
}

/// First conventional cover image in `dir`.
pub fn find_folder_cover(dir: &Path) -> Option<PathBuf> {
    FOLDER_COVERS
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Tagged;

    impl MetadataExtractor for Tagged {
        fn extract(&self, path: &Path) -> Option<Track> {
            let name = path.file_name()?.to_str()?;
            if name.starts_with("tagged") {
                Some(Track::new(path, "Tag Title", "Tag Artist", "Tag Album", 1234))
            } else {
                None
            }
        }
    }

    fn scanner(root: &Path) -> LibraryScanner {
        let exts: Vec<String> = ["mp3", ".FLAC", "ogg"].iter().map(|s| s.to_string()).collect();
        LibraryScanner::with_extensions(root, &exts)
    }

    #[test]
    fn test_fallback_splits_artist_and_title() {
        let t = fallback_track(Path::new("/m/Band - Song.mp3"));
        assert_eq!((t.artist.as_str(), t.title.as_str()), ("Band", "Song"));
        assert_eq!(t.album, UNKNOWN_ALBUM);

        let t = fallback_track(Path::new("/m/Band \u{2013} Other.mp3"));
        assert_eq!((t.artist.as_str(), t.title.as_str()), ("Band", "Other"));

        let t = fallback_track(Path::new("/m/A - B - C.mp3"));
        assert_eq!((t.artist.as_str(), t.title.as_str()), ("A", "B"));
    }

    #[test]
    fn test_fallback_without_separator() {
        let t = fallback_track(Path::new("/m/just-a-name.ogg"));
        assert_eq!(t.title, "just-a-name");
        assert_eq!(t.artist, UNKNOWN_ARTIST);
    }

    #[test]
    fn test_scan_is_recursive_and_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("a.mp3"), b"x").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join("sub/b.flac"), b"xx").unwrap();
        fs::write(root.join("sub/deeper/c.OGG"), b"xxx").unwrap();

        let files = scanner(root).audio_files();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp3", "b.flac", "c.OGG"]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scanner(&dir.path().join("nope")).scan(&FileNameOnly).is_empty());
    }

    #[test]
    fn test_scan_prefers_extractor_and_fills_file_facts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("tagged.mp3"), b"12345").unwrap();
        fs::write(root.join("Band - Raw.mp3"), b"1").unwrap();
        fs::write(root.join("cover.png"), b"img").unwrap();

        let tracks = scanner(root).scan(&Tagged);
        assert_eq!(tracks.len(), 2);

        let raw = &tracks[0];
        assert_eq!(raw.title, "Raw");
        assert_eq!(raw.file_size, 1);
        assert_eq!(raw.album_art, Some(AlbumArt::File(root.join("cover.png"))));

        let tagged = &tracks[1];
        assert_eq!(tagged.title, "Tag Title");
        assert_eq!(tagged.duration_ms, 1234);
        assert_eq!(tagged.file_size, 5);
        assert!(tagged.date_added.is_some());
    }

    #[test]
    fn test_folder_cover_priority() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("folder.jpg"), b"x").unwrap();
        fs::write(dir.path().join("cover.png"), b"x").unwrap();
        assert_eq!(
            find_folder_cover(dir.path()),
            Some(dir.path().join("cover.png"))
        );
    }
}
