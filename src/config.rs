//! Configuration management for voice-relay.
//!
//! Loads config from YAML files in standard locations. Every section falls
//! back to defaults, so an empty or missing file yields a working setup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory where generated artifacts are written.
    pub artifact_dir: PathBuf,
    /// Artifacts older than this are pruned (the most recent one is always kept).
    pub retention_secs: u64,
    /// Append generation events to the JSONL history.
    pub history: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            artifact_dir: std::env::temp_dir().join("voice-relay-artifacts"),
            retention_secs: 3600,
            history: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// `say` (macOS say + afconvert) or `tone` (built-in chime).
    pub backend: String,
    pub voice: String,
    pub rate: u32,
    pub pitch: u32,
    pub say_path: String,
    pub afconvert_path: String,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            backend: "say".into(),
            voice: "Kyoko".into(),
            rate: 200,
            pitch: 50,
            say_path: "say".into(),
            afconvert_path: "afconvert".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub server_url: String,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// `speaker` (default audio device) or `directory` (save WAV files).
    pub player: String,
    pub output_dir: PathBuf,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            interval_ms: 3000,
            timeout_ms: 5000,
            player: "speaker".into(),
            output_dir: std::env::temp_dir().join("voice-poller"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub synth: SynthConfig,
    pub poller: PollerConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/voice-relay/config.yaml
    /// 3. /etc/voice-relay/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/voice-relay/config.yaml")),
                Some(PathBuf::from("/etc/voice-relay/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}
