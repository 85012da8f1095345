use serde::Serialize;
use tracing::{debug, info, warn};

use super::client::{Fetch, Reply, StationError, REQUEST_OK};
use super::model::{self, LineupEntry, NowPlaying, SongInfo};
use crate::arbiter::MediaSource;
use crate::config::StationConfig;
use crate::events::{Notification, Notifier};
use crate::output::AudioOutput;
use crate::playback::PlaybackState;

/// Presentation view of everything the synchronizer knows.
#[derive(Debug, Clone, Serialize)]
pub struct StationSnapshot {
    pub playing: bool,
    pub volume: u8,
    pub muted: bool,
    pub now_playing: Option<NowPlaying>,
    /// Locally extrapolated seconds into the current song.
    pub elapsed: u32,
    pub duration: u32,
    pub history: Vec<SongInfo>,
    pub queue: Vec<SongInfo>,
    pub requestable: Vec<SongInfo>,
    pub lineup: Vec<LineupEntry>,
}

/// Keeps a cached picture of the remote station and drives the radio stream
/// transport.
///
/// Network work is described, not performed: operations return the
/// [`Fetch`]es to run and the results come back through [`apply`].  A failed
/// fetch leaves the cache untouched.
///
/// [`apply`]: StationSync::apply
pub struct StationSync {
    output: Box<dyn AudioOutput>,
    notifier: Notifier,
    stream_url: String,
    history_limit: usize,
    lookahead_secs: u32,

    playing: bool,
    volume: u8,
    muted: bool,

    now_playing: Option<NowPlaying>,
    history: Vec<SongInfo>,
    queue: Vec<SongInfo>,
    requestable: Vec<SongInfo>,
    elapsed: u32,
    duration: u32,
    lookahead_fired: bool,
}

impl StationSync {
    pub fn new(mut output: Box<dyn AudioOutput>, notifier: Notifier, config: &StationConfig) -> Self {
        let volume = config.default_volume.min(100);
        output.set_volume(volume);
        Self {
            output,
            notifier,
            stream_url: config.stream_url.trim().to_string(),
            history_limit: config.history_limit,
            lookahead_secs: config.lookahead_secs,
            playing: false,
            volume,
            muted: false,
            now_playing: None,
            history: Vec::new(),
            queue: Vec::new(),
            requestable: Vec::new(),
            elapsed: 0,
            duration: 0,
            lookahead_fired: false,
        }
    }

    pub fn has_stream(&self) -> bool {
        !self.stream_url.is_empty()
    }

    // ── transport ────────────────────────────────────────────────────────────

    /// Start the stream.  The caller must already hold the arbiter grant.
    /// Returns the immediate now-playing fetch.
    pub fn start(&mut self) -> Vec<Fetch> {
        if !self.has_stream() {
            self.report_error("Radio stream URL is not configured");
            return Vec::new();
        }
        info!("radio: starting stream {}", self.stream_url);
        self.output.load(&self.stream_url);
        self.set_playing(true);
        vec![Fetch::NowPlaying]
    }

    /// Silence the stream.  Cached station data is kept.
    pub fn stop(&mut self) {
        self.output.stop();
        self.set_playing(false);
    }

    /// The transport lost the stream on its own.
    pub fn on_stream_ended(&mut self) {
        if self.playing {
            warn!("radio: stream ended");
            self.set_playing(false);
        }
    }

    pub fn set_volume(&mut self, volume: i32) {
        let volume = volume.clamp(0, 100) as u8;
        self.output.set_volume(volume);
        self.volume = volume;
        let _ = self.notifier.send(Notification::VolumeChanged {
            source: MediaSource::RadioStream,
            volume,
        });
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.output.set_muted(muted);
        self.muted = muted;
        let _ = self.notifier.send(Notification::MutedChanged {
            source: MediaSource::RadioStream,
            muted,
        });
    }

    // ── polling ──────────────────────────────────────────────────────────────

    /// Current song, recent history and upcoming queue.  Used for periodic
    /// polls and the look-ahead refresh alike; unchanged lists are not
    /// re-announced.
    pub fn refresh(&self) -> Vec<Fetch> {
        vec![
            Fetch::NowPlaying,
            Fetch::History {
                limit: self.history_limit,
            },
            Fetch::Queue,
        ]
    }

    pub fn search_requestable(&self, search: Option<String>) -> Vec<Fetch> {
        vec![Fetch::Requestable { search }]
    }

    pub fn request_song(&self, request_id: &str) -> Vec<Fetch> {
        vec![Fetch::SubmitRequest {
            request_id: request_id.to_string(),
        }]
    }

    /// One-second tick.  Advances the local progress counter while playing
    /// and, once per song, asks for a full refresh when the song is about to
    /// end.
    pub fn tick(&mut self) -> Vec<Fetch> {
        if self.playing && self.duration > 0 && self.elapsed < self.duration {
            self.elapsed += 1;
            let _ = self.notifier.send(Notification::StationProgress {
                elapsed_secs: self.elapsed,
                duration_secs: self.duration,
            });
        }

        let remaining = self.duration.saturating_sub(self.elapsed);
        let in_window = self.playing
            && self.duration > 0
            && remaining > 0
            && remaining <= self.lookahead_secs;
        if !in_window {
            self.lookahead_fired = false;
            return Vec::new();
        }
        if self.lookahead_fired {
            return Vec::new();
        }
        self.lookahead_fired = true;
        debug!("radio: {}s left, refreshing ahead of song change", remaining);
        self.refresh()
    }

    pub fn apply(&mut self, reply: Reply) {
        match reply {
            Reply::NowPlaying(Ok(info)) => self.apply_now_playing(info),
            Reply::History(Ok(history)) => {
                if !model::same_songs(&self.history, &history) {
                    self.history = history.clone();
                    let _ = self.notifier.send(Notification::HistoryUpdated { history });
                }
            }
            Reply::Queue(Ok(queue)) => {
                if !model::same_songs(&self.queue, &queue) {
                    self.queue = queue.clone();
                    let _ = self.notifier.send(Notification::QueueUpdated { queue });
                }
            }
            Reply::Requestable(Ok(songs)) => {
                self.requestable = songs.clone();
                let _ = self
                    .notifier
                    .send(Notification::RequestableSongsUpdated { songs });
            }
            Reply::RequestSubmitted(result) => self.apply_request_result(result),
            Reply::NowPlaying(Err(e)) => self.fetch_failed("now playing", &e),
            Reply::History(Err(e)) => self.fetch_failed("history", &e),
            Reply::Queue(Err(e)) => self.fetch_failed("queue", &e),
            Reply::Requestable(Err(e)) => self.fetch_failed("requestable songs", &e),
        }
    }

    fn apply_now_playing(&mut self, info: NowPlaying) {
        let changed = self
            .now_playing
            .as_ref()
            .map_or(true, |prev| !prev.song.same_song(&info.song));

        self.elapsed = info.elapsed;
        self.duration = info.duration;
        self.now_playing = Some(info.clone());

        let song = info.song.clone();
        let _ = self.notifier.send(Notification::NowPlayingUpdated { info });
        if changed {
            info!("radio: now playing {} - {}", song.artist, song.title);
            self.lookahead_fired = false;
            let _ = self.notifier.send(Notification::SongChanged { song });
        }
    }

    fn apply_request_result(&mut self, result: Result<(), StationError>) {
        let (success, message) = match result {
            Ok(()) => {
                info!("radio: song request accepted");
                (true, REQUEST_OK)
            }
            Err(e) => {
                warn!("radio: song request rejected: {}", e);
                (false, e.request_message())
            }
        };
        let _ = self.notifier.send(Notification::SongRequestSubmitted {
            success,
            message: message.to_string(),
        });
    }

    fn fetch_failed(&self, what: &str, err: &StationError) {
        warn!("radio: fetching {} failed: {}", what, err);
        self.report_error(&format!("Failed to fetch {}: {}", what, err));
    }

    pub fn report_error(&self, message: &str) {
        let _ = self.notifier.send(Notification::Error {
            message: message.to_string(),
        });
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing == playing {
            return;
        }
        self.playing = playing;
        let state = if playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        };
        let _ = self.notifier.send(Notification::PlaybackStateChanged {
            source: MediaSource::RadioStream,
            state,
        });
    }

    // ── queries ──────────────────────────────────────────────────────────────

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    pub fn history(&self) -> &[SongInfo] {
        &self.history
    }

    pub fn queue(&self) -> &[SongInfo] {
        &self.queue
    }

    pub fn requestable(&self) -> &[SongInfo] {
        &self.requestable
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn lineup(&self) -> Vec<LineupEntry> {
        match &self.now_playing {
            Some(now) => model::lineup(now, &self.history, &self.queue),
            None => model::lineup(&NowPlaying::default(), &self.history, &self.queue),
        }
    }

    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            playing: self.playing,
            volume: self.volume,
            muted: self.muted,
            now_playing: self.now_playing.clone(),
            elapsed: self.elapsed,
            duration: self.duration,
            history: self.history.clone(),
            queue: self.queue.clone(),
            requestable: self.requestable.clone(),
            lineup: self.lineup(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, drain};
    use crate::output::fake::{Call, RecordingOutput};

    fn sync() -> (StationSync, RecordingOutput, tokio::sync::broadcast::Receiver<Notification>) {
        let out = RecordingOutput::default();
        let (tx, rx) = events::channel();
        let sync = StationSync::new(Box::new(out.clone()), tx, &StationConfig::default());
        out.take();
        (sync, out, rx)
    }

    fn song(title: &str, artist: &str) -> SongInfo {
        SongInfo {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }

    fn now(title: &str, elapsed: u32, duration: u32) -> NowPlaying {
        NowPlaying {
            station_name: "Intercom".into(),
            is_online: true,
            song: song(title, "Band"),
            elapsed,
            duration,
            listeners: 1,
        }
    }

    #[test]
    fn test_start_loads_stream_and_fetches_now_playing() {
        let (mut sync, out, mut rx) = sync();
        let fetches = sync.start();
        assert_eq!(fetches, vec![Fetch::NowPlaying]);
        assert_eq!(
            out.take(),
            vec![Call::Load(StationConfig::default().stream_url)]
        );
        assert!(sync.is_playing());
        assert_eq!(
            drain(&mut rx),
            vec![Notification::PlaybackStateChanged {
                source: MediaSource::RadioStream,
                state: PlaybackState::Playing,
            }]
        );
    }

    #[test]
    fn test_start_without_stream_url_reports_error() {
        let out = RecordingOutput::default();
        let (tx, mut rx) = events::channel();
        let config = StationConfig {
            stream_url: "  ".into(),
            ..Default::default()
        };
        let mut sync = StationSync::new(Box::new(out.clone()), tx, &config);
        assert!(!sync.has_stream());
        assert!(sync.start().is_empty());
        assert!(!sync.is_playing());
        assert!(matches!(drain(&mut rx).as_slice(), [Notification::Error { .. }]));
    }

    #[test]
    fn test_song_changed_only_on_title_or_artist_change() {
        let (mut sync, _out, mut rx) = sync();
        sync.apply(Reply::NowPlaying(Ok(now("A", 0, 100))));
        sync.apply(Reply::NowPlaying(Ok(now("A", 15, 100))));
        sync.apply(Reply::NowPlaying(Ok(now("B", 0, 100))));

        let seen = drain(&mut rx);
        let updated = seen
            .iter()
            .filter(|n| matches!(n, Notification::NowPlayingUpdated { .. }))
            .count();
        let changed: Vec<&str> = seen
            .iter()
            .filter_map(|n| match n {
                Notification::SongChanged { song } => Some(song.title.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(updated, 3);
        assert_eq!(changed, vec!["A", "B"]);
    }

    #[test]
    fn test_identical_history_and_queue_are_not_renotified() {
        let (mut sync, _out, mut rx) = sync();
        let history = vec![song("h1", "a"), song("h2", "b")];
        let queue = vec![song("q1", "c")];

        for _ in 0..2 {
            sync.apply(Reply::NowPlaying(Ok(now("A", 0, 100))));
            sync.apply(Reply::History(Ok(history.clone())));
            sync.apply(Reply::Queue(Ok(queue.clone())));
        }

        let seen = drain(&mut rx);
        let history_updates = seen
            .iter()
            .filter(|n| matches!(n, Notification::HistoryUpdated { .. }))
            .count();
        let queue_updates = seen
            .iter()
            .filter(|n| matches!(n, Notification::QueueUpdated { .. }))
            .count();
        assert_eq!(history_updates, 1);
        assert_eq!(queue_updates, 1);
    }

    #[test]
    fn test_failed_fetch_keeps_cache() {
        let (mut sync, _out, mut rx) = sync();
        sync.apply(Reply::NowPlaying(Ok(now("A", 0, 100))));
        sync.apply(Reply::History(Ok(vec![song("h1", "a")])));
        drain(&mut rx);

        sync.apply(Reply::NowPlaying(Err(StationError::Status { status: 500 })));
        sync.apply(Reply::History(Err(StationError::Status { status: 502 })));

        assert_eq!(sync.now_playing().unwrap().song.title, "A");
        assert_eq!(sync.history().len(), 1);
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|n| matches!(n, Notification::Error { .. })));
    }

    #[test]
    fn test_tick_advances_elapsed_only_while_playing() {
        let (mut sync, _out, _rx) = sync();
        sync.apply(Reply::NowPlaying(Ok(now("A", 10, 100))));
        sync.tick();
        assert_eq!(sync.elapsed(), 10);

        sync.start();
        sync.tick();
        sync.tick();
        assert_eq!(sync.elapsed(), 12);
    }

    #[test]
    fn test_tick_never_exceeds_duration() {
        let (mut sync, _out, _rx) = sync();
        sync.start();
        sync.apply(Reply::NowPlaying(Ok(now("A", 99, 100))));
        for _ in 0..5 {
            sync.tick();
        }
        assert_eq!(sync.elapsed(), 100);
    }

    #[test]
    fn test_lookahead_fires_once_per_window() {
        let (mut sync, _out, _rx) = sync();
        sync.start();
        sync.apply(Reply::NowPlaying(Ok(now("A", 85, 100))));

        let mut refreshes = 0;
        for _ in 0..20 {
            if !sync.tick().is_empty() {
                refreshes += 1;
            }
        }
        assert_eq!(refreshes, 1);
    }

    #[test]
    fn test_no_lookahead_while_stopped() {
        let (mut sync, _out, _rx) = sync();
        sync.apply(Reply::NowPlaying(Ok(now("A", 95, 100))));
        for _ in 0..10 {
            assert!(sync.tick().is_empty());
        }

        sync.start();
        assert_eq!(sync.tick().len(), 3);
    }

    #[test]
    fn test_lookahead_rearms_on_song_change() {
        let (mut sync, _out, _rx) = sync();
        sync.start();
        sync.apply(Reply::NowPlaying(Ok(now("A", 95, 100))));
        assert_eq!(sync.tick().len(), 3);
        assert!(sync.tick().is_empty());

        // still inside the window, but a new song has started
        sync.apply(Reply::NowPlaying(Ok(now("B", 195, 200))));
        assert_eq!(
            sync.tick(),
            vec![
                Fetch::NowPlaying,
                Fetch::History { limit: 5 },
                Fetch::Queue
            ]
        );
    }

    #[test]
    fn test_no_lookahead_without_duration() {
        let (mut sync, _out, _rx) = sync();
        sync.start();
        sync.apply(Reply::NowPlaying(Ok(now("Live", 0, 0))));
        for _ in 0..30 {
            assert!(sync.tick().is_empty());
        }
    }

    #[test]
    fn test_request_results_map_to_messages() {
        let (mut sync, _out, mut rx) = sync();
        sync.apply(Reply::RequestSubmitted(Ok(())));
        sync.apply(Reply::RequestSubmitted(Err(StationError::Status { status: 404 })));
        sync.apply(Reply::RequestSubmitted(Err(StationError::Status { status: 429 })));
        sync.apply(Reply::RequestSubmitted(Err(StationError::Status { status: 500 })));

        let messages: Vec<(bool, String)> = drain(&mut rx)
            .into_iter()
            .filter_map(|n| match n {
                Notification::SongRequestSubmitted { success, message } => Some((success, message)),
                _ => None,
            })
            .collect();
        assert_eq!(
            messages,
            vec![
                (true, "Song requested successfully!".to_string()),
                (false, "Song not available for requests".to_string()),
                (
                    false,
                    "Too many requests. Please wait before requesting another song.".to_string()
                ),
                (false, "Failed to request song".to_string()),
            ]
        );
    }

    #[test]
    fn test_stop_keeps_station_data() {
        let (mut sync, out, _rx) = sync();
        sync.start();
        sync.apply(Reply::NowPlaying(Ok(now("A", 0, 100))));
        out.take();
        sync.stop();
        assert_eq!(out.take(), vec![Call::Stop]);
        assert!(!sync.is_playing());
        assert!(sync.now_playing().is_some());
    }

    #[test]
    fn test_volume_and_mute() {
        let (mut sync, out, _rx) = sync();
        assert_eq!(sync.volume(), 75);
        sync.set_volume(-4);
        sync.set_muted(true);
        assert_eq!(out.take(), vec![Call::Volume(0), Call::Muted(true)]);
        assert!(sync.is_muted());
    }
}
