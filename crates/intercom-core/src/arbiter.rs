//! Exclusive source arbitration.
//!
//! At most one of the local player and the radio stream may emit audio.
//! Whoever wants to start playing asks the arbiter first; the arbiter stops
//! the previous owner synchronously and only then records the new one.
//!
//! ```text
//!   request_playback(new)
//!         │
//!         ├── new already active → no-op
//!         ├── StopRequested(old) → control.stop_source(old)
//!         └── active = new       → ActiveSourceChanged(new)
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    LocalPlayer,
    RadioStream,
}

impl MediaSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LocalPlayer => "local",
            Self::RadioStream => "radio",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "local" => Some(Self::LocalPlayer),
            "radio" => Some(Self::RadioStream),
            _ => None,
        }
    }
}

/// Receives the arbiter's stop order.  Implementors must silence `source`
/// before returning.
pub trait SourceControl {
    fn stop_source(&mut self, source: MediaSource);
}

impl<F: FnMut(MediaSource)> SourceControl for F {
    fn stop_source(&mut self, source: MediaSource) {
        self(source)
    }
}

pub struct Arbiter {
    active: Option<MediaSource>,
    notifier: Notifier,
}

impl Arbiter {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            active: None,
            notifier,
        }
    }

    pub fn active(&self) -> Option<MediaSource> {
        self.active
    }

    pub fn is_active(&self, source: MediaSource) -> bool {
        self.active == Some(source)
    }

    /// Grant `source` the output.  Returns `false` when it already held it.
    pub fn request_playback(
        &mut self,
        source: MediaSource,
        control: &mut dyn SourceControl,
    ) -> bool {
        if self.active == Some(source) {
            debug!("arbiter: {} already active", source.label());
            return false;
        }

        if let Some(previous) = self.active {
            info!("arbiter: stopping {} for {}", previous.label(), source.label());
            let _ = self
                .notifier
                .send(Notification::StopRequested { source: previous });
            control.stop_source(previous);
        }

        self.active = Some(source);
        let _ = self.notifier.send(Notification::ActiveSourceChanged {
            source: Some(source),
        });
        info!("arbiter: active source → {}", source.label());
        true
    }

    /// A source reports it went quiet on its own.  Ignored unless it is the
    /// one currently recorded as active.
    pub fn notify_stopped(&mut self, source: MediaSource) -> bool {
        if self.active != Some(source) {
            return false;
        }
        info!("arbiter: {} stopped", source.label());
        self.active = None;
        let _ = self
            .notifier
            .send(Notification::ActiveSourceChanged { source: None });
        true
    }
}
