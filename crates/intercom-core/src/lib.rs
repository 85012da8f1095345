//! Core services for the intercom player: exclusive source arbitration, the
//! local playback engine, the remote now-playing synchronizer and the
//! playlist catalog.  Nothing in here owns an event loop; the daemon wires
//! these services together and feeds them events.

pub mod arbiter;
pub mod catalog;
pub mod config;
pub mod events;
pub mod hub;
pub mod library;
pub mod output;
pub mod platform;
pub mod playback;
pub mod station;
pub mod track;
