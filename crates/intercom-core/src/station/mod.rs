//! Remote station synchronizer.
//!
//! - `model`  — song / now-playing types and the station API payloads
//! - `client` — HTTP access to the station API (reqwest)
//! - `sync`   — cached snapshot, change detection, progress ticker and the
//!              look-ahead refresh policy
//!
//! The synchronizer itself never awaits.  It hands out [`client::Fetch`]
//! descriptions; the owner of the event loop runs them on the client and
//! feeds each [`client::Reply`] back through `StationSync::apply`.

pub mod client;
pub mod model;
pub mod sync;

pub use client::{Fetch, Reply, StationClient, StationError};
pub use model::{LineupEntry, LineupSlot, NowPlaying, SongInfo};
pub use sync::{StationSnapshot, StationSync};
