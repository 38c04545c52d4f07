//! Consumer: polling playback client.
//!
//! - `poller`: tick → read state → dedup by id → fetch → verify → play
//! - `ticker`: injected tick sources (interval, manual)
//! - `player`: speaker and save-to-directory playback

pub mod player;
pub mod poller;
pub mod ticker;
