/// DaemonCore — single-owner event loop for all mutable state.
///
/// The hub (arbiter, local engine, radio synchronizer) and the catalog live
/// here and nowhere else.  Everything that wants to change them sends a
/// `DaemonEvent`: HTTP handlers, the mpv transports, the library watcher,
/// finished network fetches and the tickers.  Work that would block (library
/// scans, station requests) runs on spawned tasks whose results come back
/// as events; a result that arrives after the loop has exited is dropped.
///
/// After every event that changed something the loop publishes a fresh
/// `DaemonSnapshot` for the HTTP API to read.  Position reports are folded
/// into at most one publish per second.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use intercom_core::arbiter::MediaSource;
use intercom_core::catalog::CatalogStore;
use intercom_core::events::{Notification, Notifier};
use intercom_core::hub::{HubSnapshot, MediaHub};
use intercom_core::library::{LibraryScanner, MetadataExtractor};
use intercom_core::playback::PlaybackMode;
use intercom_core::station::{Fetch, Reply, StationClient};
use intercom_core::track::Track;

use crate::mpv::TransportEvent;

const PROGRESS_TICK: Duration = Duration::from_secs(1);

// ── commands & events ─────────────────────────────────────────────────────────

/// Edited tags for one library track.  Absent fields stay as they are.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackEdit {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Requests from the HTTP API and the library watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    TogglePlayPause,
    Next,
    Previous,
    PlayIndex(usize),
    Seek(u64),
    SetMode(PlaybackMode),
    SetVolume { source: MediaSource, volume: i32 },
    SetMuted { source: MediaSource, muted: bool },
    RadioPlay,
    RadioStop,
    RadioToggle,
    RequestSong(String),
    SearchRequestable(Option<String>),
    RefreshLibrary,
    ReorderLibrary(Vec<PathBuf>),
    RemoveTrack(PathBuf),
    EditTrack(TrackEdit),
}

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    Command(Command),
    /// Feedback from one of the mpv transports.
    Transport {
        source: MediaSource,
        event: TransportEvent,
    },
    /// A station fetch finished.
    Station(Reply),
    /// A background library scan finished.
    LibraryScanned(Vec<Track>),
    ProgressTick,
    PollTick,
}

// ── shared snapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonSnapshot {
    pub hub: Option<HubSnapshot>,
    pub library: Vec<Track>,
    pub scanning: bool,
}

pub type SharedState = Arc<RwLock<DaemonSnapshot>>;

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    hub: MediaHub,
    catalog: CatalogStore,
    client: StationClient,
    scanner: Arc<LibraryScanner>,
    extractor: Arc<dyn MetadataExtractor>,
    library: Vec<Track>,
    scanning: bool,
    /// A refresh arrived mid-scan; scan again when this one lands.
    rescan_queued: bool,
    /// Station fetches produced by the current event, sent after it.
    outbox: Vec<Fetch>,
    /// Local position (whole seconds) in the last published snapshot.
    published_second: u64,
    poll_interval: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
    notifier: Notifier,
    shared: SharedState,
}

pub struct CoreParts {
    pub hub: MediaHub,
    pub catalog: CatalogStore,
    pub client: StationClient,
    pub scanner: LibraryScanner,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub poll_interval: Duration,
}

impl DaemonCore {
    pub fn new(
        parts: CoreParts,
        event_tx: mpsc::Sender<DaemonEvent>,
        notifier: Notifier,
        shared: SharedState,
    ) -> Self {
        Self {
            hub: parts.hub,
            catalog: parts.catalog,
            client: parts.client,
            scanner: Arc::new(parts.scanner),
            extractor: parts.extractor,
            library: Vec::new(),
            scanning: false,
            rescan_queued: false,
            outbox: Vec::new(),
            published_second: 0,
            poll_interval: parts.poll_interval,
            event_tx,
            notifier,
            shared,
        }
    }

    /// Run until `shutdown` fires or every event sender is gone.
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<DaemonEvent>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        spawn_ticker(self.event_tx.clone(), PROGRESS_TICK, || DaemonEvent::ProgressTick);
        spawn_ticker(self.event_tx.clone(), self.poll_interval, || DaemonEvent::PollTick);

        self.start_scan();
        self.outbox = self.hub.radio().refresh();
        self.flush_outbox();
        self.publish().await;

        loop {
            let evt = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                evt = event_rx.recv() => evt,
            };
            let Some(evt) = evt else {
                info!("DaemonCore: event channel closed, shutting down");
                break;
            };
            let changed = self.handle_event(evt);
            self.flush_outbox();
            if changed {
                self.publish().await;
            }
        }

        self.hub.stop();
        self.hub.stop_radio();
        Ok(())
    }

    /// Apply one event.  Returns whether the published snapshot is stale.
    fn handle_event(&mut self, evt: DaemonEvent) -> bool {
        match evt {
            DaemonEvent::Command(cmd) => {
                debug!("DaemonCore: command {:?}", cmd);
                self.handle_command(cmd);
            }
            DaemonEvent::Transport {
                source: MediaSource::LocalPlayer,
                event: TransportEvent::Position(ms),
            } => {
                self.hub.on_local_position(ms);
                return ms / 1000 != self.published_second;
            }
            DaemonEvent::Transport { source, event } => self.handle_transport(source, event),
            DaemonEvent::Station(reply) => self.hub.apply(reply),
            DaemonEvent::LibraryScanned(tracks) => self.finish_scan(tracks),
            DaemonEvent::ProgressTick => {
                let fetches = self.hub.radio_tick();
                self.outbox.extend(fetches);
                return self.hub.radio().is_playing();
            }
            DaemonEvent::PollTick => {
                if self.hub.radio().is_playing() {
                    let fetches = self.hub.radio().refresh();
                    self.outbox.extend(fetches);
                }
                return false;
            }
        }
        true
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play => {
                if !self.hub.play() {
                    debug!("DaemonCore: nothing to play");
                }
            }
            Command::Pause => self.hub.pause(),
            Command::Stop => self.hub.stop(),
            Command::TogglePlayPause => self.hub.toggle_play_pause(),
            Command::Next => {
                self.hub.next();
            }
            Command::Previous => self.hub.previous(),
            Command::PlayIndex(idx) => {
                if !self.hub.play_index(idx) {
                    warn!("DaemonCore: no track at index {}", idx);
                }
            }
            Command::Seek(ms) => self.hub.seek(ms),
            Command::SetMode(mode) => self.hub.set_playback_mode(mode),
            Command::SetVolume { source, volume } => self.hub.set_volume(source, volume),
            Command::SetMuted { source, muted } => self.hub.set_muted(source, muted),
            Command::RadioPlay => {
                let fetches = self.hub.play_radio();
                self.outbox.extend(fetches);
            }
            Command::RadioStop => self.hub.stop_radio(),
            Command::RadioToggle => {
                let fetches = self.hub.toggle_radio();
                self.outbox.extend(fetches);
            }
            Command::RequestSong(id) => {
                let fetches = self.hub.radio().request_song(&id);
                self.outbox.extend(fetches);
            }
            Command::SearchRequestable(term) => {
                let fetches = self.hub.radio().search_requestable(term);
                self.outbox.extend(fetches);
            }
            Command::RefreshLibrary => self.start_scan(),
            Command::ReorderLibrary(order) => {
                if let Err(e) = self.catalog.update_order(&order) {
                    warn!("DaemonCore: reorder not saved: {}", e);
                }
                self.reorder_library();
            }
            Command::RemoveTrack(path) => match self.catalog.remove_track(&path) {
                Ok(true) => {
                    self.library.retain(|t| t.path != path);
                    self.hub.merge_library(&self.library);
                    let _ = self.notifier.send(Notification::LibraryChanged {
                        tracks: self.library.len(),
                    });
                }
                Ok(false) => debug!("DaemonCore: {} not in library", path.display()),
                Err(e) => warn!("DaemonCore: removal not saved: {}", e),
            },
            Command::EditTrack(edit) => self.edit_track(edit),
        }
    }

    fn handle_transport(&mut self, source: MediaSource, event: TransportEvent) {
        match (source, event) {
            (MediaSource::LocalPlayer, TransportEvent::Position(ms)) => {
                self.hub.on_local_position(ms)
            }
            (MediaSource::LocalPlayer, TransportEvent::Duration(ms)) => {
                self.hub.on_local_duration(ms)
            }
            (MediaSource::LocalPlayer, TransportEvent::Finished) => {
                self.hub.on_local_track_finished()
            }
            (MediaSource::LocalPlayer, TransportEvent::Failed(reason)) => {
                warn!("DaemonCore: local track failed: {}", reason);
                let _ = self.notifier.send(Notification::Error {
                    message: format!("Cannot play track: {}", reason),
                });
                self.hub.on_local_track_failed();
            }
            (MediaSource::LocalPlayer, TransportEvent::Lost) => {
                if self.hub.player().is_playing() {
                    warn!("DaemonCore: local audio output lost");
                    self.hub.stop();
                }
            }
            (MediaSource::RadioStream, TransportEvent::Finished | TransportEvent::Lost) => {
                self.hub.on_radio_ended()
            }
            (MediaSource::RadioStream, TransportEvent::Failed(reason)) => {
                warn!("DaemonCore: radio stream failed: {}", reason);
                let _ = self.notifier.send(Notification::Error {
                    message: format!("Radio stream failed: {}", reason),
                });
                self.hub.on_radio_ended();
            }
            (MediaSource::RadioStream, _) => {}
        }
    }

    // ── station fetches ───────────────────────────────────────────────────────

    fn flush_outbox(&mut self) {
        for fetch in std::mem::take(&mut self.outbox) {
            let client = self.client.clone();
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let reply = client.perform(fetch).await;
                // closed channel: the core is gone, drop the reply
                let _ = tx.send(DaemonEvent::Station(reply)).await;
            });
        }
    }

    // ── library ───────────────────────────────────────────────────────────────

    fn start_scan(&mut self) {
        if self.scanning {
            self.rescan_queued = true;
            return;
        }
        self.scanning = true;
        let scanner = Arc::clone(&self.scanner);
        let extractor = Arc::clone(&self.extractor);
        let tx = self.event_tx.clone();
        info!("DaemonCore: scanning {}", scanner.root().display());
        tokio::spawn(async move {
            let scanned =
                tokio::task::spawn_blocking(move || scanner.scan(extractor.as_ref())).await;
            match scanned {
                Ok(tracks) => {
                    let _ = tx.send(DaemonEvent::LibraryScanned(tracks)).await;
                }
                Err(e) => {
                    warn!("DaemonCore: library scan panicked: {}", e);
                    let _ = tx.send(DaemonEvent::LibraryScanned(Vec::new())).await;
                }
            }
        });
    }

    fn finish_scan(&mut self, scanned: Vec<Track>) {
        self.scanning = false;
        self.library = self.catalog.reconcile(scanned);
        let added = self.hub.merge_library(&self.library);
        info!(
            "DaemonCore: library has {} tracks ({} new to the playlist)",
            self.library.len(),
            added
        );
        if self.rescan_queued {
            self.rescan_queued = false;
            self.start_scan();
        }
    }

    /// Re-sort the in-memory library after the index order changed.
    fn reorder_library(&mut self) {
        let index = self.catalog.index();
        for track in &mut self.library {
            if let Some(entry) = index.get(&track.path) {
                track.order_index = entry.order_index;
            }
        }
        self.library
            .sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.path.cmp(&b.path)));
        self.hub.merge_library(&self.library);
        let _ = self.notifier.send(Notification::LibraryChanged {
            tracks: self.library.len(),
        });
    }

    fn edit_track(&mut self, edit: TrackEdit) {
        let Some(track) = self.library.iter_mut().find(|t| t.path == edit.path) else {
            warn!("DaemonCore: edit of unknown track {}", edit.path.display());
            return;
        };
        if let Some(title) = edit.title {
            track.title = title;
        }
        if let Some(artist) = edit.artist {
            track.artist = artist;
        }
        if let Some(album) = edit.album {
            track.album = album;
        }
        if let Err(e) = self.catalog.update_track_metadata(track) {
            warn!("DaemonCore: track edit not saved: {}", e);
        }
        self.hub.merge_library(&self.library);
        let _ = self.notifier.send(Notification::LibraryChanged {
            tracks: self.library.len(),
        });
    }

    async fn publish(&mut self) {
        let hub = self.hub.snapshot();
        self.published_second = hub.local.position_ms / 1000;
        let snapshot = DaemonSnapshot {
            hub: Some(hub),
            library: self.library.clone(),
            scanning: self.scanning,
        };
        *self.shared.write().await = snapshot;
    }
}

fn spawn_ticker(
    tx: mpsc::Sender<DaemonEvent>,
    period: Duration,
    make: impl Fn() -> DaemonEvent + Send + 'static,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    });
}
