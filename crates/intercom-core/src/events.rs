//! Notifications published by the core services.
//!
//! Every service holds a clone of one `broadcast::Sender<Notification>`.
//! `send` enqueues synchronously, so receivers observe notifications in the
//! exact order the services emitted them.  Having no receivers is fine.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::arbiter::MediaSource;
use crate::playback::{PlaybackMode, PlaybackState};
use crate::station::model::{NowPlaying, SongInfo};
use crate::track::Track;

pub const CHANNEL_CAPACITY: usize = 256;

pub type Notifier = broadcast::Sender<Notification>;

pub fn channel() -> (Notifier, broadcast::Receiver<Notification>) {
    broadcast::channel(CHANNEL_CAPACITY)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// The arbiter told `source` to go quiet.  Always precedes the matching
    /// `ActiveSourceChanged`.
    StopRequested { source: MediaSource },
    ActiveSourceChanged { source: Option<MediaSource> },

    // ── local playback ───────────────────────────────────────────────────────
    TrackChanged { track: Track },
    PlaybackStateChanged { source: MediaSource, state: PlaybackState },
    PositionChanged { position_ms: u64 },
    VolumeChanged { source: MediaSource, volume: u8 },
    MutedChanged { source: MediaSource, muted: bool },
    PlaybackModeChanged { mode: PlaybackMode },
    PlaylistChanged { len: usize },

    // ── library ──────────────────────────────────────────────────────────────
    LibraryChanged { tracks: usize },

    // ── remote station ───────────────────────────────────────────────────────
    NowPlayingUpdated { info: NowPlaying },
    /// Title or artist of the current station song differs from the last poll.
    SongChanged { song: SongInfo },
    HistoryUpdated { history: Vec<SongInfo> },
    QueueUpdated { queue: Vec<SongInfo> },
    RequestableSongsUpdated { songs: Vec<SongInfo> },
    SongRequestSubmitted { success: bool, message: String },
    /// Locally extrapolated station progress, once per second while playing.
    StationProgress { elapsed_secs: u32, duration_secs: u32 },

    Error { message: String },
    /// WARN/ERROR log lines forwarded for display.
    Log { message: String },
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}
