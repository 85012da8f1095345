//! Re-scan the library when its directory changes on disk.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{Command, DaemonEvent};

/// Keeps the OS watch alive; dropping it stops watching.
pub struct LibraryWatcher {
    _watcher: RecommendedWatcher,
}

pub fn spawn(
    dir: &Path,
    debounce: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> anyhow::Result<LibraryWatcher> {
    std::fs::create_dir_all(dir)?;

    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) if is_relevant(&event.kind) => {
                let _ = raw_tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!("watch: {}", e),
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    info!("watch: watching {}", dir.display());

    tokio::spawn(debounce_loop(raw_rx, debounce, event_tx));
    Ok(LibraryWatcher { _watcher: watcher })
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_)
    )
}

/// One rescan per burst: wait for the first change, then until `quiet` has
/// passed without another.
async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<()>,
    quiet: Duration,
    event_tx: mpsc::Sender<DaemonEvent>,
) {
    while raw_rx.recv().await.is_some() {
        let mut burst = 1usize;
        loop {
            match tokio::time::timeout(quiet, raw_rx.recv()).await {
                Ok(Some(())) => burst += 1,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        debug!("watch: {} changes, rescanning", burst);
        let cmd = DaemonEvent::Command(Command::RefreshLibrary);
        if event_tx.send(cmd).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};

    #[test]
    fn test_access_events_are_ignored() {
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn test_burst_collapses_to_one_rescan() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::channel(8);
        tokio::spawn(debounce_loop(raw_rx, Duration::from_millis(50), event_tx));

        for _ in 0..5 {
            raw_tx.send(()).unwrap();
        }
        let first = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap();
        assert!(matches!(
            first,
            Some(DaemonEvent::Command(Command::RefreshLibrary))
        ));
        // nothing else queued after the burst
        assert!(tokio::time::timeout(Duration::from_millis(200), event_rx.recv())
            .await
            .is_err());
    }
}
