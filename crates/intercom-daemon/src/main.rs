mod core;
mod http;
mod mpv;
mod tags;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use intercom_core::arbiter::{Arbiter, MediaSource};
use intercom_core::catalog::CatalogStore;
use intercom_core::config::{Config, Credentials};
use intercom_core::events::{self, Notification, Notifier};
use intercom_core::hub::MediaHub;
use intercom_core::library::LibraryScanner;
use intercom_core::playback::PlaybackEngine;
use intercom_core::station::{StationClient, StationSync};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR records to the notification channel so API
/// clients see them next to the player events.
struct NotificationLayer {
    notifier: Notifier,
}

impl<S> tracing_subscriber::Layer<S> for NotificationLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no subscribers is fine
        let _ = self.notifier.send(Notification::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (notifier, _) = events::channel();

    let data_dir = intercom_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("intercomd.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(NotificationLayer {
            notifier: notifier.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,intercom_core=debug,intercomd=debug,hyper=warn,reqwest=warn",
                )
            }),
        )
        .init();

    eprintln!("intercomd log: {}", log_path.display());
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    let credentials = Credentials::load()?;
    if credentials.api_key.is_none() {
        info!("No station API key configured; song requests will be refused");
    }

    // Everything that changes player state funnels through this channel
    let (event_tx, event_rx) = mpsc::channel::<core::DaemonEvent>(256);
    let shutdown = CancellationToken::new();

    // ── Services ─────────────────────────────────────────────────────────────
    let client = StationClient::new(&config.station, credentials.api_key.clone())?;

    let local_out = mpv::MpvOutput::spawn(
        MediaSource::LocalPlayer,
        config.mpv.binary.clone(),
        event_tx.clone(),
    );
    let radio_out = mpv::MpvOutput::spawn(
        MediaSource::RadioStream,
        config.mpv.binary.clone(),
        event_tx.clone(),
    );

    let mut player = PlaybackEngine::new(
        Box::new(local_out),
        notifier.clone(),
        config.player.default_volume,
    )
    .with_restart_threshold(config.player.restart_threshold_ms);
    player.set_playback_mode(config.player.default_mode);

    let radio = StationSync::new(Box::new(radio_out), notifier.clone(), &config.station);
    let hub = MediaHub::new(Arbiter::new(notifier.clone()), player, radio);

    let catalog = CatalogStore::open(config.library.index_file.clone(), notifier.clone());
    let scanner = LibraryScanner::new(&config.library);

    // ── Library watcher ──────────────────────────────────────────────────────
    let _watcher = if config.library.watch {
        match watch::spawn(
            &config.library.music_dir,
            Duration::from_millis(config.library.rescan_debounce_ms),
            event_tx.clone(),
        ) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("Library watcher disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    // ── HTTP server ──────────────────────────────────────────────────────────
    let shared: core::SharedState = Arc::new(RwLock::new(core::DaemonSnapshot::default()));
    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState {
                shared: shared.clone(),
                event_tx: event_tx.clone(),
                notifier: notifier.clone(),
            },
            shutdown.clone(),
        );
    }

    // ── Signals ──────────────────────────────────────────────────────────────
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    // ── DaemonCore event loop ────────────────────────────────────────────────
    let daemon_core = core::DaemonCore::new(
        core::CoreParts {
            hub,
            catalog,
            client,
            scanner,
            extractor: Arc::new(tags::TagReader),
            poll_interval: Duration::from_secs(config.station.poll_interval_secs.max(1)),
        },
        event_tx,
        notifier,
        shared,
    );

    if let Err(e) = daemon_core.run(event_rx, shutdown.clone()).await {
        error!("DaemonCore exited with error: {}", e);
    }
    shutdown.cancel();

    // let the transports deliver the final stop to mpv
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("intercomd stopped");
    Ok(())
}
