//! The one place the arbiter, the local engine and the radio synchronizer
//! meet.  Every command that can start audio goes through here so the
//! stop-then-grant handover is never skipped.

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::arbiter::{Arbiter, MediaSource, SourceControl};
use crate::playback::{PlaybackEngine, PlaybackMode, PlaybackSnapshot, TrackEnd};
use crate::station::{Fetch, Reply, StationSnapshot, StationSync};
use crate::track::Track;

#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub active: Option<MediaSource>,
    pub local: PlaybackSnapshot,
    pub radio: StationSnapshot,
}

/// Executes the arbiter's stop order against the source being replaced.
struct Silencer<'a> {
    player: &'a mut PlaybackEngine,
    radio: &'a mut StationSync,
}

impl SourceControl for Silencer<'_> {
    fn stop_source(&mut self, source: MediaSource) {
        match source {
            MediaSource::LocalPlayer => self.player.stop(),
            MediaSource::RadioStream => self.radio.stop(),
        }
    }
}

pub struct MediaHub {
    arbiter: Arbiter,
    player: PlaybackEngine,
    radio: StationSync,
}

impl MediaHub {
    pub fn new(arbiter: Arbiter, player: PlaybackEngine, radio: StationSync) -> Self {
        Self {
            arbiter,
            player,
            radio,
        }
    }

    fn acquire(&mut self, source: MediaSource) {
        let mut silencer = Silencer {
            player: &mut self.player,
            radio: &mut self.radio,
        };
        self.arbiter.request_playback(source, &mut silencer);
    }

    // ── local player ─────────────────────────────────────────────────────────

    pub fn set_playlist(&mut self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            self.clear_playlist();
            return;
        }
        self.acquire(MediaSource::LocalPlayer);
        self.player.set_playlist(tracks);
    }

    /// Make the playlist the library: same tracks, library order.  The
    /// playing track keeps playing even when it left the library.  Returns
    /// how many tracks are new to the playlist.
    pub fn merge_library(&mut self, tracks: &[Track]) -> usize {
        let known: HashSet<&Path> = self
            .player
            .playlist()
            .iter()
            .map(|t| t.path.as_path())
            .collect();
        let added = tracks
            .iter()
            .filter(|t| !known.contains(t.path.as_path()))
            .count();
        self.player.sync_playlist(tracks.to_vec());
        added
    }

    pub fn clear_playlist(&mut self) {
        self.player.clear_playlist();
        self.arbiter.notify_stopped(MediaSource::LocalPlayer);
    }

    /// Resume the current track, or start the playlist from the top.
    pub fn play(&mut self) -> bool {
        if self.player.current_track().is_some_and(Track::is_valid) {
            self.acquire(MediaSource::LocalPlayer);
            self.player.play()
        } else {
            self.play_index(0)
        }
    }

    pub fn pause(&mut self) {
        self.player.pause();
    }

    pub fn stop(&mut self) {
        self.player.stop();
        self.arbiter.notify_stopped(MediaSource::LocalPlayer);
    }

    pub fn toggle_play_pause(&mut self) {
        if self.player.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn next(&mut self) -> bool {
        match self.player.pick_next() {
            Some(idx) => self.play_index(idx),
            None => false,
        }
    }

    pub fn previous(&mut self) {
        if self.player.playlist().is_empty() {
            return;
        }
        if !self.player.previous_restarts() {
            self.acquire(MediaSource::LocalPlayer);
        }
        self.player.previous();
    }

    pub fn play_index(&mut self, idx: usize) -> bool {
        if idx >= self.player.playlist().len() {
            return false;
        }
        self.acquire(MediaSource::LocalPlayer);
        self.player.play_index(idx)
    }

    pub fn seek(&mut self, position_ms: u64) {
        self.player.seek(position_ms);
    }

    pub fn set_playback_mode(&mut self, mode: PlaybackMode) {
        self.player.set_playback_mode(mode);
    }

    pub fn on_local_position(&mut self, position_ms: u64) {
        self.player.on_position(position_ms);
    }

    pub fn on_local_duration(&mut self, duration_ms: u64) {
        self.player.on_duration(duration_ms);
    }

    pub fn on_local_track_finished(&mut self) {
        if self.player.on_track_finished() == TrackEnd::Finished {
            debug!("hub: local playlist finished");
            self.arbiter.notify_stopped(MediaSource::LocalPlayer);
        }
    }

    pub fn on_local_track_failed(&mut self) {
        if self.player.on_track_failed() == TrackEnd::Finished {
            debug!("hub: local playback gave up");
            self.arbiter.notify_stopped(MediaSource::LocalPlayer);
        }
    }

    // ── radio ────────────────────────────────────────────────────────────────

    pub fn play_radio(&mut self) -> Vec<Fetch> {
        if !self.radio.has_stream() {
            // reports the error without touching the local player
            return self.radio.start();
        }
        self.acquire(MediaSource::RadioStream);
        self.radio.start()
    }

    pub fn stop_radio(&mut self) {
        self.radio.stop();
        self.arbiter.notify_stopped(MediaSource::RadioStream);
    }

    pub fn toggle_radio(&mut self) -> Vec<Fetch> {
        if self.radio.is_playing() {
            self.stop_radio();
            Vec::new()
        } else {
            self.play_radio()
        }
    }

    pub fn on_radio_ended(&mut self) {
        self.radio.on_stream_ended();
        self.arbiter.notify_stopped(MediaSource::RadioStream);
    }

    pub fn radio_tick(&mut self) -> Vec<Fetch> {
        self.radio.tick()
    }

    pub fn apply(&mut self, reply: Reply) {
        self.radio.apply(reply);
    }

    // ── per-source volume ────────────────────────────────────────────────────

    pub fn set_volume(&mut self, source: MediaSource, volume: i32) {
        match source {
            MediaSource::LocalPlayer => self.player.set_volume(volume),
            MediaSource::RadioStream => self.radio.set_volume(volume),
        }
    }

    pub fn set_muted(&mut self, source: MediaSource, muted: bool) {
        match source {
            MediaSource::LocalPlayer => self.player.set_muted(muted),
            MediaSource::RadioStream => self.radio.set_muted(muted),
        }
    }

    // ── queries ──────────────────────────────────────────────────────────────

    pub fn active(&self) -> Option<MediaSource> {
        self.arbiter.active()
    }

    pub fn player(&self) -> &PlaybackEngine {
        &self.player
    }

    pub fn radio(&self) -> &StationSync {
        &self.radio
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            active: self.arbiter.active(),
            local: self.player.snapshot(),
            radio: self.radio.snapshot(),
        }
    }
}
