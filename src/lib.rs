//! voice-relay: voice notifications published through a ready flag.
//!
//! A generation server renders text to audio, stores it, and exposes it
//! through a single "latest notification" record. Playback clients poll
//! that record and fetch each new artifact once.

pub mod config;
pub mod consumer;
pub mod relay;
pub mod synth;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber (quiet hyper/reqwest internals).
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
