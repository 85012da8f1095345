use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Cover image for a track: bytes pulled out of the tags, or an image file
/// sitting next to the audio.
#[derive(Debug, Clone, PartialEq)]
pub enum AlbumArt {
    Embedded(Vec<u8>),
    File(PathBuf),
}

/// One playable local file.  The absolute path is the identity; everything
/// else is descriptive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Length in milliseconds.
    pub duration_ms: u64,
    #[serde(default)]
    pub liked: bool,
    #[serde(skip)]
    pub album_art: Option<AlbumArt>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub date_added: Option<DateTime<Local>>,
    /// Position in the persisted display order.
    #[serde(default)]
    pub order_index: usize,
}

impl Track {
    /// Build a track the way the library presents it: an empty title falls
    /// back to the file stem, empty artist/album to the "Unknown" labels.
    pub fn new(
        path: impl Into<PathBuf>,
        title: &str,
        artist: &str,
        album: &str,
        duration_ms: u64,
    ) -> Self {
        let path = path.into();
        let title = if title.trim().is_empty() {
            file_stem(&path)
        } else {
            title.to_string()
        };
        Self {
            title,
            artist: non_empty_or(artist, UNKNOWN_ARTIST),
            album: non_empty_or(album, UNKNOWN_ALBUM),
            duration_ms,
            path,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    /// What the audio backend is asked to load.
    pub fn uri(&self) -> String {
        self.path.display().to_string()
    }

    /// `m:ss`, minutes unpadded.
    pub fn formatted_duration(&self) -> String {
        let secs = self.duration_ms / 1000;
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_applies_fallbacks() {
        let t = Track::new("/music/Some Song.mp3", "", "", "  ", 0);
        assert_eq!(t.title, "Some Song");
        assert_eq!(t.artist, UNKNOWN_ARTIST);
        assert_eq!(t.album, UNKNOWN_ALBUM);
        assert!(t.is_valid());
    }

    #[test]
    fn test_default_is_invalid() {
        assert!(!Track::default().is_valid());
    }

    #[test]
    fn test_formatted_duration() {
        let t = Track::new("/a.mp3", "a", "b", "c", 185_400);
        assert_eq!(t.formatted_duration(), "3:05");
        let t = Track::new("/a.mp3", "a", "b", "c", 0);
        assert_eq!(t.formatted_duration(), "0:00");
    }
}
