//! Speech synthesis backends.
//!
//! The generator only sees [`SynthesisBackend`]. Two implementations:
//! - `say`: macOS `say` renders AIFF, `afconvert` resamples to 16 kHz mono
//!   16-bit WAV, which small playback devices handle directly
//! - `tone`: a pure Rust chime, for hosts without `say`

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SynthConfig;

pub const OUTPUT_SAMPLE_RATE: u32 = 16000;

pub const MAX_RATE: u32 = 1000;
pub const MAX_PITCH: u32 = 127;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("synthesis I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("unknown synthesis backend: {0}")]
    UnknownBackend(String),
}

/// Voice parameters for one request, after merging with configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice: String,
    /// Words per minute.
    pub rate: u32,
    /// Base pitch, 0..=127.
    pub pitch: u32,
}

impl VoiceSettings {
    pub fn from_config(config: &SynthConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            rate: config.rate,
            pitch: config.pitch,
        }
    }

    /// Override defaults with whatever the request supplied.
    pub fn merged(&self, voice: Option<String>, rate: Option<u32>, pitch: Option<u32>) -> Self {
        Self {
            voice: voice.unwrap_or_else(|| self.voice.clone()),
            rate: rate.unwrap_or(self.rate),
            pitch: pitch.unwrap_or(self.pitch),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.voice.trim().is_empty() {
            return Err("voice must not be empty".into());
        }
        if self.voice.starts_with('-') {
            return Err(format!("invalid voice name: {}", self.voice));
        }
        if self.rate == 0 || self.rate > MAX_RATE {
            return Err(format!("rate must be between 1 and {MAX_RATE}"));
        }
        if self.pitch > MAX_PITCH {
            return Err(format!("pitch must be between 0 and {MAX_PITCH}"));
        }
        Ok(())
    }
}

#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Render `text` to WAV bytes.
    async fn synthesize(&self, text: &str, settings: &VoiceSettings) -> Result<Vec<u8>, SynthError>;
}

/// Build the backend named in config.
pub fn from_config(config: &SynthConfig) -> Result<Box<dyn SynthesisBackend>, SynthError> {
    match config.backend.as_str() {
        "say" => Ok(Box::new(CommandSynthesizer::new(
            &config.say_path,
            &config.afconvert_path,
        ))),
        "tone" => Ok(Box::new(ToneSynthesizer)),
        other => Err(SynthError::UnknownBackend(other.to_string())),
    }
}

// --- say + afconvert ---

static WORK_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct CommandSynthesizer {
    say_path: String,
    afconvert_path: String,
}

impl CommandSynthesizer {
    pub fn new(say_path: &str, afconvert_path: &str) -> Self {
        Self {
            say_path: say_path.to_string(),
            afconvert_path: afconvert_path.to_string(),
        }
    }

    async fn render(&self, work: &Path, text: &str, settings: &VoiceSettings) -> Result<Vec<u8>, SynthError> {
        let input = work.join("input.txt");
        let aiff = work.join("speech.aiff");
        let wav = work.join("speech.wav");

        // `say` reads embedded speech commands from the text itself.
        tokio::fs::write(&input, format!("[[pbas {}]] {text}", settings.pitch)).await?;

        let rate = settings.rate.to_string();
        run(
            &self.say_path,
            &[
                OsStr::new("-v"),
                OsStr::new(&settings.voice),
                OsStr::new("-r"),
                OsStr::new(&rate),
                OsStr::new("-o"),
                aiff.as_os_str(),
                OsStr::new("-f"),
                input.as_os_str(),
            ],
        )
        .await?;

        let format = format!("LEI16@{OUTPUT_SAMPLE_RATE}");
        run(
            &self.afconvert_path,
            &[
                OsStr::new("-f"),
                OsStr::new("WAVE"),
                OsStr::new("-d"),
                OsStr::new(&format),
                OsStr::new("-c"),
                OsStr::new("1"),
                aiff.as_os_str(),
                wav.as_os_str(),
            ],
        )
        .await?;

        Ok(tokio::fs::read(&wav).await?)
    }
}

async fn run(program: &str, args: &[&OsStr]) -> Result<(), SynthError> {
    debug!("Running {program} {args:?}");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| SynthError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SynthError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl SynthesisBackend for CommandSynthesizer {
    fn name(&self) -> &str {
        "say"
    }

    async fn synthesize(&self, text: &str, settings: &VoiceSettings) -> Result<Vec<u8>, SynthError> {
        let t0 = Instant::now();
        let seq = WORK_DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        let work: PathBuf =
            std::env::temp_dir().join(format!("voice-relay-{}-{seq}", std::process::id()));
        tokio::fs::create_dir_all(&work).await?;

        let result = self.render(&work, text, settings).await;
        let _ = tokio::fs::remove_dir_all(&work).await;

        if let Ok(bytes) = &result {
            info!(
                "say rendered {} chars with {} in {}ms ({} bytes)",
                text.chars().count(),
                settings.voice,
                t0.elapsed().as_millis(),
                bytes.len()
            );
        }
        result
    }
}

// --- built-in chime ---

pub struct ToneSynthesizer;

impl ToneSynthesizer {
    /// Chime length follows how long the text would take to say at `rate`.
    fn duration_secs(text: &str, rate: u32) -> f32 {
        let words = text.split_whitespace().count().max(1) as f32;
        (words * 60.0 / rate.max(1) as f32).clamp(0.2, 10.0)
    }

    fn frequency(pitch: u32) -> f32 {
        220.0 + pitch as f32 * 4.0
    }

    pub fn render(text: &str, settings: &VoiceSettings) -> Result<Vec<u8>, SynthError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: OUTPUT_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let n_samples = (Self::duration_secs(text, settings.rate) * OUTPUT_SAMPLE_RATE as f32) as usize;
        let freq = Self::frequency(settings.pitch);
        let fade = (OUTPUT_SAMPLE_RATE as usize / 50).min(n_samples / 2).max(1);

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for i in 0..n_samples {
                let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
                let envelope = (i.min(n_samples - 1 - i) as f32 / fade as f32).min(1.0);
                let sample = (t * freq * std::f32::consts::TAU).sin() * 0.3 * envelope;
                writer.write_sample((sample * 32767.0) as i16)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl SynthesisBackend for ToneSynthesizer {
    fn name(&self) -> &str {
        "tone"
    }

    async fn synthesize(&self, text: &str, settings: &VoiceSettings) -> Result<Vec<u8>, SynthError> {
        Self::render(text, settings)
    }
}
