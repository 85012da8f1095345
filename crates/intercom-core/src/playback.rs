//! Local playback engine: owns the active playlist, the cursor into it and
//! the transport state, and decides what plays next.
//!
//! The engine never talks to the arbiter.  The hub asks for the output
//! before calling anything here that starts sound, and reports back when
//! the engine says playback came to rest.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::arbiter::MediaSource;
use crate::events::{Notification, Notifier};
use crate::output::AudioOutput;
use crate::track::Track;

/// Within this many milliseconds of the start, "previous" moves to the
/// previous track; past it, "previous" restarts the current one.
pub const DEFAULT_RESTART_THRESHOLD_MS: u64 = 3000;
pub const DEFAULT_VOLUME: u8 = 70;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Stop after the last track.
    #[default]
    Sequential,
    /// Random track each time, never the one just played.
    Shuffle,
    /// Replay the current track when it ends.  Manual skips behave like
    /// `Sequential`.
    RepeatOne,
    /// Wrap around to the first track.
    RepeatAll,
}

impl PlaybackMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Shuffle => "shuffle",
            Self::RepeatOne => "repeat_one",
            Self::RepeatAll => "repeat_all",
        }
    }
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sequential" => Ok(Self::Sequential),
            "shuffle" => Ok(Self::Shuffle),
            "repeat_one" => Ok(Self::RepeatOne),
            "repeat_all" => Ok(Self::RepeatAll),
            other => Err(format!("unknown playback mode: {}", other)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// What the engine did when the current track ran out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackEnd {
    /// RepeatOne: same track from zero.
    Restarted,
    /// Moved on to another track.
    Advanced,
    /// Nothing left to play; transport is stopped.
    Finished,
}

/// Read-only view for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackSnapshot {
    pub playlist_len: usize,
    pub current_index: Option<usize>,
    pub current_track: Option<Track>,
    pub mode: PlaybackMode,
    pub state: PlaybackState,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub volume: u8,
    pub muted: bool,
}

pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    notifier: Notifier,
    playlist: Vec<Track>,
    current: Option<usize>,
    current_track: Option<Track>,
    mode: PlaybackMode,
    state: PlaybackState,
    position_ms: u64,
    duration_ms: u64,
    volume: u8,
    muted: bool,
    restart_threshold_ms: u64,
    /// Load failures in a row; reset once a track reports progress.
    failures: usize,
}

impl PlaybackEngine {
    pub fn new(mut output: Box<dyn AudioOutput>, notifier: Notifier, volume: u8) -> Self {
        let volume = volume.min(100);
        output.set_volume(volume);
        Self {
            output,
            notifier,
            playlist: Vec::new(),
            current: None,
            current_track: None,
            mode: PlaybackMode::default(),
            state: PlaybackState::Stopped,
            position_ms: 0,
            duration_ms: 0,
            volume,
            muted: false,
            restart_threshold_ms: DEFAULT_RESTART_THRESHOLD_MS,
            failures: 0,
        }
    }

    pub fn with_restart_threshold(mut self, threshold_ms: u64) -> Self {
        self.restart_threshold_ms = threshold_ms;
        self
    }

    // ── playlist ─────────────────────────────────────────────────────────────

    /// Replace the playlist and start the first track, if any.
    pub fn set_playlist(&mut self, tracks: Vec<Track>) {
        info!("playback: new playlist with {} tracks", tracks.len());
        self.playlist = tracks;
        self.current = None;
        let _ = self.notifier.send(Notification::PlaylistChanged {
            len: self.playlist.len(),
        });
        if !self.playlist.is_empty() {
            self.current = Some(0);
            self.play_track(0);
        }
    }

    pub fn add_to_playlist(&mut self, track: Track) {
        self.playlist.push(track);
        let _ = self.notifier.send(Notification::PlaylistChanged {
            len: self.playlist.len(),
        });
    }

    /// Swap in a re-ordered or extended playlist without interrupting
    /// playback.  The current index follows the current track's path.
    pub fn sync_playlist(&mut self, tracks: Vec<Track>) {
        let playing = self.current_track.as_ref().map(|t| t.path.clone());
        self.playlist = tracks;
        self.current = playing.and_then(|p| self.playlist.iter().position(|t| t.path == p));
        let _ = self.notifier.send(Notification::PlaylistChanged {
            len: self.playlist.len(),
        });
    }

    pub fn clear_playlist(&mut self) {
        self.playlist.clear();
        self.current = None;
        self.current_track = None;
        self.stop();
        let _ = self.notifier.send(Notification::PlaylistChanged { len: 0 });
    }

    // ── transport ────────────────────────────────────────────────────────────

    /// Resume or start the current track.  Returns `false` when there is
    /// nothing to play.  A stopped output has unloaded the file, so the
    /// track is loaded again from the top.
    pub fn play(&mut self) -> bool {
        if !self.has_current_track() {
            return false;
        }
        if self.state == PlaybackState::Stopped {
            self.reload_current();
        } else {
            self.output.play();
        }
        self.set_state(PlaybackState::Playing);
        true
    }

    pub fn pause(&mut self) {
        self.output.pause();
        if self.state == PlaybackState::Playing {
            self.set_state(PlaybackState::Paused);
        }
    }

    pub fn stop(&mut self) {
        self.output.stop();
        self.position_ms = 0;
        self.set_state(PlaybackState::Stopped);
    }

    pub fn toggle_play_pause(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to the track chosen by the playback mode.  Returns `false` when
    /// there is no next track.
    pub fn next(&mut self) -> bool {
        if self.playlist.is_empty() {
            return false;
        }
        match self.next_index() {
            Some(idx) => {
                self.current = Some(idx);
                self.play_track(idx);
                true
            }
            None => {
                debug!("playback: end of playlist");
                false
            }
        }
    }

    pub fn previous(&mut self) {
        if self.playlist.is_empty() {
            return;
        }
        if self.position_ms > self.restart_threshold_ms {
            self.seek(0);
            return;
        }
        if let Some(idx) = self.previous_index() {
            self.current = Some(idx);
            self.play_track(idx);
        }
    }

    /// Index `next()` would move to, without moving.  Shuffle draws afresh
    /// on every call.
    pub fn pick_next(&self) -> Option<usize> {
        self.next_index()
    }

    /// True when `previous()` would rewind the current track rather than
    /// change tracks.
    pub fn previous_restarts(&self) -> bool {
        !self.playlist.is_empty() && self.position_ms > self.restart_threshold_ms
    }

    /// Play the track at `idx` directly.
    pub fn play_index(&mut self, idx: usize) -> bool {
        if idx >= self.playlist.len() {
            return false;
        }
        self.current = Some(idx);
        self.play_track(idx);
        true
    }

    pub fn seek(&mut self, position_ms: u64) {
        self.output.seek(position_ms);
        self.position_ms = position_ms;
        let _ = self
            .notifier
            .send(Notification::PositionChanged { position_ms });
    }

    pub fn set_volume(&mut self, volume: i32) {
        let volume = volume.clamp(0, 100) as u8;
        self.output.set_volume(volume);
        self.volume = volume;
        let _ = self.notifier.send(Notification::VolumeChanged {
            source: MediaSource::LocalPlayer,
            volume,
        });
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.output.set_muted(muted);
        self.muted = muted;
        let _ = self.notifier.send(Notification::MutedChanged {
            source: MediaSource::LocalPlayer,
            muted,
        });
    }

    pub fn set_playback_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
        let _ = self
            .notifier
            .send(Notification::PlaybackModeChanged { mode });
    }

    // ── transport feedback ───────────────────────────────────────────────────

    pub fn on_position(&mut self, position_ms: u64) {
        self.position_ms = position_ms;
        if position_ms > 0 {
            self.failures = 0;
        }
    }

    pub fn on_duration(&mut self, duration_ms: u64) {
        self.duration_ms = duration_ms;
    }

    /// Natural completion of the current track.
    pub fn on_track_finished(&mut self) -> TrackEnd {
        if self.mode == PlaybackMode::RepeatOne && self.has_current_track() {
            // the output unloads a file at its end
            self.reload_current();
            self.set_state(PlaybackState::Playing);
            return TrackEnd::Restarted;
        }
        self.advance_or_finish()
    }

    /// The output could not play the current track.  Moves on even under
    /// RepeatOne, and gives up after a whole playlist's worth of failures
    /// in a row.
    pub fn on_track_failed(&mut self) -> TrackEnd {
        self.failures += 1;
        if self.failures >= self.playlist.len().max(1) {
            warn!("playback: {} tracks failed in a row, stopping", self.failures);
            self.failures = 0;
            self.stop();
            return TrackEnd::Finished;
        }
        self.advance_or_finish()
    }

    fn advance_or_finish(&mut self) -> TrackEnd {
        if self.next() {
            TrackEnd::Advanced
        } else {
            self.position_ms = 0;
            self.set_state(PlaybackState::Stopped);
            TrackEnd::Finished
        }
    }

    // ── queries ──────────────────────────────────────────────────────────────

    pub fn playlist(&self) -> &[Track] {
        &self.playlist
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_track.as_ref()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            playlist_len: self.playlist.len(),
            current_index: self.current,
            current_track: self.current_track.clone(),
            mode: self.mode,
            state: self.state,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            volume: self.volume,
            muted: self.muted,
        }
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn has_current_track(&self) -> bool {
        self.current_track.as_ref().is_some_and(Track::is_valid)
    }

    fn reload_current(&mut self) {
        let Some(track) = self.current_track.as_ref() else {
            return;
        };
        debug!("playback: reloading {}", track.uri());
        self.output.load(&track.uri());
        self.position_ms = 0;
    }

    fn play_track(&mut self, idx: usize) {
        let Some(track) = self.playlist.get(idx).cloned() else {
            return;
        };
        if !track.is_valid() {
            return;
        }
        info!("playback: playing [{}] {} - {}", idx, track.artist, track.title);
        self.output.load(&track.uri());
        self.position_ms = 0;
        self.duration_ms = track.duration_ms;
        self.current_track = Some(track.clone());
        let _ = self.notifier.send(Notification::TrackChanged { track });
        self.set_state(PlaybackState::Playing);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("playback: state {:?} → {:?}", self.state, state);
            self.state = state;
            let _ = self.notifier.send(Notification::PlaybackStateChanged {
                source: MediaSource::LocalPlayer,
                state,
            });
        }
    }

    fn next_index(&self) -> Option<usize> {
        let len = self.playlist.len();
        if len == 0 {
            return None;
        }
        match self.mode {
            PlaybackMode::Shuffle => {
                let mut rng = rand::thread_rng();
                let mut pick = rng.gen_range(0..len);
                if len > 1 {
                    while Some(pick) == self.current {
                        pick = rng.gen_range(0..len);
                    }
                }
                Some(pick)
            }
            _ => {
                let next = self.current.map_or(0, |i| i + 1);
                if next < len {
                    Some(next)
                } else if self.mode == PlaybackMode::RepeatAll {
                    Some(0)
                } else {
                    None
                }
            }
        }
    }

    fn previous_index(&self) -> Option<usize> {
        let len = self.playlist.len();
        if len == 0 {
            return None;
        }
        let wraps = matches!(self.mode, PlaybackMode::Shuffle | PlaybackMode::RepeatAll);
        Some(match self.current {
            Some(i) if i > 0 => i - 1,
            _ if wraps => len - 1,
            _ => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, drain};
    use crate::output::fake::{Call, RecordingOutput};
    use tokio::sync::broadcast;

    fn abc() -> Vec<Track> {
        ["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"]
            .iter()
            .map(|p| Track::new(*p, "", "x", "y", 200_000))
            .collect()
    }

    fn engine() -> (PlaybackEngine, RecordingOutput, broadcast::Receiver<Notification>) {
        let out = RecordingOutput::default();
        let (tx, rx) = channel();
        let engine = PlaybackEngine::new(Box::new(out.clone()), tx, DEFAULT_VOLUME);
        out.take();
        (engine, out, rx)
    }

    fn engine_at(mode: PlaybackMode, idx: usize) -> (PlaybackEngine, RecordingOutput) {
        let (mut e, out, _rx) = engine();
        e.set_playlist(abc());
        e.set_playback_mode(mode);
        e.play_index(idx);
        out.take();
        (e, out)
    }

    #[test]
    fn test_set_playlist_starts_first_track() {
        let (mut e, out, mut rx) = engine();
        e.set_playlist(abc());
        assert_eq!(e.current_index(), Some(0));
        assert_eq!(e.state(), PlaybackState::Playing);
        assert_eq!(out.take(), vec![Call::Load("/m/a.mp3".into())]);
        let events = drain(&mut rx);
        assert!(matches!(events[0], Notification::PlaylistChanged { len: 3 }));
        assert!(matches!(events[1], Notification::TrackChanged { .. }));
    }

    #[test]
    fn test_set_empty_playlist_resets_index() {
        let (mut e, out, _rx) = engine();
        e.set_playlist(abc());
        e.set_playlist(Vec::new());
        assert_eq!(e.current_index(), None);
        out.take();
        assert!(!e.next());
        assert!(out.take().is_empty());
    }

    #[test]
    fn test_add_does_not_touch_playback() {
        let (mut e, out, _rx) = engine();
        e.add_to_playlist(Track::new("/m/z.mp3", "z", "", "", 0));
        assert_eq!(e.current_index(), None);
        assert!(out.take().is_empty());
        assert!(!e.play());
    }

    #[test]
    fn test_clear_stops_and_forgets() {
        let (mut e, out, _rx) = engine();
        e.set_playlist(abc());
        out.take();
        e.clear_playlist();
        assert_eq!(e.current_index(), None);
        assert_eq!(e.state(), PlaybackState::Stopped);
        assert_eq!(out.take(), vec![Call::Stop]);
        assert!(!e.play());
    }

    #[test]
    fn test_sequential_next() {
        let (mut e, out) = engine_at(PlaybackMode::Sequential, 0);
        assert!(e.next());
        assert_eq!(e.current_index(), Some(1));
        assert_eq!(out.take(), vec![Call::Load("/m/b.mp3".into())]);
    }

    #[test]
    fn test_sequential_next_at_end_is_noop() {
        let (mut e, out) = engine_at(PlaybackMode::Sequential, 2);
        assert!(!e.next());
        assert_eq!(e.current_index(), Some(2));
        assert!(out.take().is_empty());
    }

    #[test]
    fn test_repeat_all_wraps() {
        let (mut e, _out) = engine_at(PlaybackMode::RepeatAll, 2);
        assert!(e.next());
        assert_eq!(e.current_index(), Some(0));
    }

    #[test]
    fn test_repeat_one_manual_next_is_sequential() {
        let (mut e, _out) = engine_at(PlaybackMode::RepeatOne, 1);
        assert!(e.next());
        assert_eq!(e.current_index(), Some(2));
        assert!(!e.next());
    }

    #[test]
    fn test_shuffle_never_repeats_immediately() {
        let (mut e, _out) = engine_at(PlaybackMode::Shuffle, 0);
        for _ in 0..200 {
            let before = e.current_index();
            assert!(e.next());
            assert_ne!(e.current_index(), before);
        }
    }

    #[test]
    fn test_shuffle_single_track_replays_it() {
        let (mut e, _out, _rx) = engine();
        e.set_playlist(vec![Track::new("/m/solo.mp3", "solo", "", "", 0)]);
        e.set_playback_mode(PlaybackMode::Shuffle);
        assert!(e.next());
        assert_eq!(e.current_index(), Some(0));
    }

    #[test]
    fn test_previous_restarts_late_in_track() {
        let (mut e, out) = engine_at(PlaybackMode::Sequential, 1);
        e.on_position(5000);
        e.previous();
        assert_eq!(e.current_index(), Some(1));
        assert_eq!(e.position_ms(), 0);
        assert_eq!(out.take(), vec![Call::Seek(0)]);
    }

    #[test]
    fn test_previous_moves_early_in_track() {
        let (mut e, out) = engine_at(PlaybackMode::Sequential, 1);
        e.on_position(1000);
        e.previous();
        assert_eq!(e.current_index(), Some(0));
        assert_eq!(out.take(), vec![Call::Load("/m/a.mp3".into())]);
    }

    #[test]
    fn test_previous_at_start_clamps_or_wraps() {
        let (mut e, _out) = engine_at(PlaybackMode::Sequential, 0);
        e.previous();
        assert_eq!(e.current_index(), Some(0));

        let (mut e, _out) = engine_at(PlaybackMode::RepeatAll, 0);
        e.previous();
        assert_eq!(e.current_index(), Some(2));

        let (mut e, _out) = engine_at(PlaybackMode::Shuffle, 2);
        e.previous();
        assert_eq!(e.current_index(), Some(1));
    }

    #[test]
    fn test_track_end_repeat_one_restarts() {
        let (mut e, out) = engine_at(PlaybackMode::RepeatOne, 1);
        e.on_position(199_000);
        assert_eq!(e.on_track_finished(), TrackEnd::Restarted);
        assert_eq!(e.current_index(), Some(1));
        assert_eq!(out.take(), vec![Call::Load("/m/b.mp3".into())]);
        assert_eq!(e.position_ms(), 0);
        assert_eq!(e.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_play_after_stop_reloads_the_track() {
        let (mut e, out) = engine_at(PlaybackMode::Sequential, 1);
        e.stop();
        assert!(e.play());
        assert_eq!(out.take(), vec![Call::Stop, Call::Load("/m/b.mp3".into())]);
        assert_eq!(e.state(), PlaybackState::Playing);

        // paused keeps the loaded file
        e.pause();
        assert!(e.play());
        assert_eq!(out.take(), vec![Call::Pause, Call::Play]);
    }

    #[test]
    fn test_failed_track_moves_on_under_repeat_one() {
        let (mut e, out) = engine_at(PlaybackMode::RepeatOne, 0);
        assert_eq!(e.on_track_failed(), TrackEnd::Advanced);
        assert_eq!(e.current_index(), Some(1));
        assert_eq!(out.take(), vec![Call::Load("/m/b.mp3".into())]);
    }

    #[test]
    fn test_failures_stop_after_a_full_lap() {
        let (mut e, _out) = engine_at(PlaybackMode::RepeatAll, 0);
        assert_eq!(e.on_track_failed(), TrackEnd::Advanced);
        assert_eq!(e.on_track_failed(), TrackEnd::Advanced);
        assert_eq!(e.on_track_failed(), TrackEnd::Finished);
        assert_eq!(e.state(), PlaybackState::Stopped);

        // progress resets the count
        let (mut e, _out) = engine_at(PlaybackMode::RepeatAll, 0);
        e.on_track_failed();
        e.on_position(1500);
        e.on_track_failed();
        assert_eq!(e.on_track_failed(), TrackEnd::Advanced);
    }

    #[test]
    fn test_track_end_advances_then_finishes() {
        let (mut e, _out) = engine_at(PlaybackMode::Sequential, 1);
        assert_eq!(e.on_track_finished(), TrackEnd::Advanced);
        assert_eq!(e.current_index(), Some(2));
        assert_eq!(e.on_track_finished(), TrackEnd::Finished);
        assert_eq!(e.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_volume_is_clamped() {
        let (mut e, out, mut rx) = engine();
        e.set_volume(140);
        assert_eq!(e.volume(), 100);
        e.set_volume(-3);
        assert_eq!(e.volume(), 0);
        assert_eq!(out.take(), vec![Call::Volume(100), Call::Volume(0)]);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_toggle_and_mute() {
        let (mut e, out) = engine_at(PlaybackMode::Sequential, 0);
        e.toggle_play_pause();
        assert_eq!(e.state(), PlaybackState::Paused);
        e.toggle_play_pause();
        assert_eq!(e.state(), PlaybackState::Playing);
        e.set_muted(true);
        assert!(e.is_muted());
        assert_eq!(out.take(), vec![Call::Pause, Call::Play, Call::Muted(true)]);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("repeat-all".parse::<PlaybackMode>(), Ok(PlaybackMode::RepeatAll));
        assert_eq!("Shuffle".parse::<PlaybackMode>(), Ok(PlaybackMode::Shuffle));
        assert!("loop".parse::<PlaybackMode>().is_err());
    }
}
