use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_STATION_NAME: &str = "EKNM Intercom";
const UNKNOWN: &str = "Unknown";

/// One song as the station reports it.  For requestable songs `id` holds the
/// request id to submit, not the song id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_url: String,
    /// Seconds.
    pub duration: u32,
}

impl SongInfo {
    /// Songs are compared by title and artist only; ids and art urls churn
    /// between polls without the song changing.
    pub fn same_song(&self, other: &SongInfo) -> bool {
        self.title == other.title && self.artist == other.artist
    }

    pub fn is_blank(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty()
    }
}

/// True when both lists hold the same songs in the same order.
pub fn same_songs(a: &[SongInfo], b: &[SongInfo]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_song(y))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub station_name: String,
    pub is_online: bool,
    pub song: SongInfo,
    /// Seconds into the current song at poll time.
    pub elapsed: u32,
    pub duration: u32,
    pub listeners: u32,
}

// ── lineup ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineupSlot {
    Previous,
    NowPlaying,
    Next,
}

impl LineupSlot {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Previous => "PREVIOUS",
            Self::NowPlaying => "NOW PLAYING",
            Self::Next => "NEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineupEntry {
    pub slot: LineupSlot,
    pub song: SongInfo,
}

const LINEUP_PREVIOUS: usize = 2;

/// The short song list shown beside the player: the two most recent
/// history entries (history is newest first; the current song is skipped if
/// the station already lists it), the current song, then the next queued
/// one.  Blank entries are left out.
pub fn lineup(now: &NowPlaying, history: &[SongInfo], queue: &[SongInfo]) -> Vec<LineupEntry> {
    let mut out: Vec<LineupEntry> = history
        .iter()
        .filter(|s| !s.same_song(&now.song))
        .take(LINEUP_PREVIOUS)
        .map(|s| LineupEntry {
            slot: LineupSlot::Previous,
            song: s.clone(),
        })
        .collect();

    if !now.song.title.is_empty() {
        out.push(LineupEntry {
            slot: LineupSlot::NowPlaying,
            song: now.song.clone(),
        });
    }

    if let Some(next) = queue.first() {
        out.push(LineupEntry {
            slot: LineupSlot::Next,
            song: next.clone(),
        });
    }

    out.retain(|e| !e.song.is_blank());
    out
}

// ── wire payloads ─────────────────────────────────────────────────────────────
//
// Field names follow the station API.  Everything is optional so a partial
// payload still decodes; only structurally wrong JSON is an error.

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireSong {
    #[serde(default, deserialize_with = "lenient_string")]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    art: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl From<WireSong> for SongInfo {
    fn from(w: WireSong) -> Self {
        SongInfo {
            id: w.id,
            title: w.title.unwrap_or_else(|| UNKNOWN.to_string()),
            artist: w.artist.unwrap_or_else(|| UNKNOWN.to_string()),
            album: w.album.unwrap_or_default(),
            art_url: w.art.unwrap_or_default(),
            duration: secs(w.duration),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireSongEntry {
    #[serde(default)]
    song: WireSong,
    #[serde(default, deserialize_with = "lenient_string")]
    request_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireStation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_online: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WireCurrent {
    #[serde(default)]
    song: WireSong,
    #[serde(default)]
    elapsed: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireListeners {
    #[serde(default)]
    current: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireNowPlaying {
    #[serde(default)]
    station: WireStation,
    #[serde(default)]
    now_playing: WireCurrent,
    #[serde(default)]
    listeners: WireListeners,
}

impl From<WireNowPlaying> for NowPlaying {
    fn from(w: WireNowPlaying) -> Self {
        NowPlaying {
            station_name: w
                .station
                .name
                .unwrap_or_else(|| DEFAULT_STATION_NAME.to_string()),
            is_online: w.station.is_online,
            song: w.now_playing.song.into(),
            elapsed: secs(w.now_playing.elapsed),
            duration: secs(w.now_playing.duration),
            listeners: secs(w.listeners.current),
        }
    }
}

pub(crate) fn parse_now_playing(body: &[u8]) -> Result<NowPlaying, serde_json::Error> {
    let wire: WireNowPlaying = serde_json::from_slice(body)?;
    Ok(wire.into())
}

/// History and queue: arrays of `{ "song": {...} }`.
pub(crate) fn parse_song_list(body: &[u8]) -> Result<Vec<SongInfo>, serde_json::Error> {
    let wire: Vec<WireSongEntry> = serde_json::from_slice(body)?;
    Ok(wire.into_iter().map(|e| e.song.into()).collect())
}

/// Requestable songs: `{ "request_id": ..., "song": {...} }`; the request id
/// replaces the song id.
pub(crate) fn parse_requestable(body: &[u8]) -> Result<Vec<SongInfo>, serde_json::Error> {
    let wire: Vec<WireSongEntry> = serde_json::from_slice(body)?;
    Ok(wire
        .into_iter()
        .map(|e| {
            let mut song: SongInfo = e.song.into();
            song.id = e.request_id;
            song
        })
        .collect())
}

fn secs(value: Option<f64>) -> u32 {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str, artist: &str) -> SongInfo {
        SongInfo {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_now_playing() {
        let body = br#"{
            "station": { "name": "Intercom", "is_online": true },
            "now_playing": {
                "song": { "id": "abc", "title": "Song", "artist": "Band",
                          "album": "LP", "art": "https://x/art.jpg" },
                "elapsed": 42, "duration": 180
            },
            "listeners": { "current": 7 }
        }"#;
        let np = parse_now_playing(body).unwrap();
        assert_eq!(np.station_name, "Intercom");
        assert!(np.is_online);
        assert_eq!(np.song.title, "Song");
        assert_eq!(np.song.art_url, "https://x/art.jpg");
        assert_eq!((np.elapsed, np.duration, np.listeners), (42, 180, 7));
    }

    #[test]
    fn test_parse_now_playing_defaults() {
        let np = parse_now_playing(b"{}").unwrap();
        assert_eq!(np.station_name, DEFAULT_STATION_NAME);
        assert!(!np.is_online);
        assert_eq!(np.song.title, "Unknown");
        assert_eq!(np.song.artist, "Unknown");
        assert_eq!(np.song.album, "");
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(parse_now_playing(b"<html>").is_err());
        assert!(parse_song_list(b"{\"song\": 1}").is_err());
    }

    #[test]
    fn test_requestable_uses_request_id() {
        let body = br#"[{ "request_id": "r-9", "song": { "id": "s-1", "title": "T", "artist": "A" } },
                        { "request_id": 12, "song": { "title": "U" } }]"#;
        let songs = parse_requestable(body).unwrap();
        assert_eq!(songs[0].id, "r-9");
        assert_eq!(songs[1].id, "12");
        assert_eq!(songs[1].artist, "Unknown");
    }

    #[test]
    fn test_same_songs_ignores_ids() {
        let mut a = vec![song("x", "y")];
        let b = vec![song("x", "y")];
        a[0].id = "different".into();
        assert!(same_songs(&a, &b));
        assert!(!same_songs(&a, &[song("x", "z")]));
        assert!(!same_songs(&a, &[]));
    }

    #[test]
    fn test_lineup_skips_current_in_history() {
        let now = NowPlaying {
            song: song("Now", "Band"),
            ..Default::default()
        };
        let history = vec![song("Now", "Band"), song("P1", "a"), song("P2", "b"), song("P3", "c")];
        let queue = vec![song("N1", "d"), song("N2", "e")];
        let slots: Vec<(LineupSlot, String)> = lineup(&now, &history, &queue)
            .into_iter()
            .map(|e| (e.slot, e.song.title))
            .collect();
        assert_eq!(
            slots,
            vec![
                (LineupSlot::Previous, "P1".to_string()),
                (LineupSlot::Previous, "P2".to_string()),
                (LineupSlot::NowPlaying, "Now".to_string()),
                (LineupSlot::Next, "N1".to_string()),
            ]
        );
    }

    #[test]
    fn test_lineup_drops_blank_entries() {
        let now = NowPlaying::default();
        let history = vec![song("", "")];
        assert!(lineup(&now, &history, &[]).is_empty());
    }
}
