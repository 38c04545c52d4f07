//! voice-relay: notification generation server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use voice_relay::config::Config;
use voice_relay::relay::api::{self, ApiState};
use voice_relay::relay::artifact::ArtifactStore;
use voice_relay::relay::generator::Generator;
use voice_relay::relay::history::{self, History};
use voice_relay::relay::publish::PublishCell;
use voice_relay::synth::{self, VoiceSettings};

#[derive(Parser, Debug)]
#[command(name = "voice-relay", about = "Voice notification generation server")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the generation server (default)
    Serve {
        /// Listen port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Synthesis backend: say or tone (overrides config)
        #[arg(short, long)]
        backend: Option<String>,
    },
    /// Print the generation report for a date
    Report {
        /// 'today', 'list', or YYYY-MM-DD
        #[arg(short, long, default_value = "today")]
        date: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    voice_relay::init_logging(args.verbose);

    let mut config = Config::load(args.config.as_deref());

    match args.command.unwrap_or(Command::Serve {
        port: None,
        backend: None,
    }) {
        Command::Serve { port, backend } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(backend) = backend {
                config.synth.backend = backend;
            }
            serve(config).await
        }
        Command::Report { date } => {
            let history = History::new(history::default_dir());
            if date == "list" {
                for d in history.list_dates() {
                    println!("{d}");
                }
            } else {
                println!("{}", history.report(&date));
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("voice-relay starting");

    let backend: Arc<dyn synth::SynthesisBackend> = Arc::from(synth::from_config(&config.synth)?);
    let store = Arc::new(ArtifactStore::open(&config.server.artifact_dir)?);

    let mut generator = Generator::new(
        PublishCell::new(),
        backend,
        store,
        VoiceSettings::from_config(&config.synth),
    )
    .with_retention(Duration::from_secs(config.server.retention_secs));
    if config.server.history {
        generator = generator.with_history(History::new(history::default_dir()));
    }

    info!(
        "Backend: {} (voice: {}, rate: {}, pitch: {})",
        generator.backend_name(),
        config.synth.voice,
        config.synth.rate,
        config.synth.pitch
    );

    let state = ApiState {
        generator: Arc::new(generator),
    };
    let addr = format!("{}:{}", config.server.host, config.server.port);

    tokio::select! {
        result = api::serve(state, &addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
