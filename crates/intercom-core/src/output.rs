//! The seam between the player state machines and whatever actually makes
//! sound.  Calls are fire-and-forget and must be applied in call order;
//! outcomes (position, end of file) come back as events on the owner's loop.

pub trait AudioOutput: Send {
    /// Replace the current source and start playing it.
    fn load(&mut self, uri: &str);
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position_ms: u64);
    /// 0..=100
    fn set_volume(&mut self, volume: u8);
    fn set_muted(&mut self, muted: bool);
}
