//! voice-poller: playback client for the voice-relay server.
//!
//! Polls `GET /state` at a fixed interval, downloads each new artifact once,
//! verifies its checksum, and plays it.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use voice_relay::config::Config;
use voice_relay::consumer::player;
use voice_relay::consumer::poller::{HttpSource, Poller};
use voice_relay::consumer::ticker::IntervalTicker;

#[derive(Parser, Debug)]
#[command(name = "voice-poller", about = "Poll a voice-relay server and play new notifications")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server base URL (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Poll interval in milliseconds (overrides config)
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Player: speaker or directory (overrides config)
    #[arg(short, long)]
    player: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    voice_relay::init_logging(args.verbose);

    let mut config = Config::load(args.config.as_deref()).poller;
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.interval_ms = interval_ms;
    }
    if let Some(player) = args.player {
        config.player = player;
    }

    let source = HttpSource::new(&config.server_url, Duration::from_millis(config.timeout_ms))?;
    let player = player::from_config(&config)?;
    let mut ticker = IntervalTicker::new(Duration::from_millis(config.interval_ms));
    let mut poller = Poller::new(source, player);

    info!(
        "Polling {} every {}ms (player: {})",
        config.server_url, config.interval_ms, config.player
    );

    tokio::select! {
        _ = poller.run(&mut ticker) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
