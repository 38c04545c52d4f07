//! Playback sinks for fetched artifacts.
//!
//! - `speaker`: decode the WAV and play it on the default output device
//! - `directory`: save `{id}.wav` and refresh `latest.wav`, for headless hosts

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PollerConfig;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no audio output: {0}")]
    Device(String),

    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("playback I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("playback task failed: {0}")]
    Task(String),

    #[error("unknown player: {0}")]
    UnknownPlayer(String),
}

#[async_trait]
pub trait Player: Send + Sync {
    /// Play `audio` to completion.
    async fn play(&self, id: &str, audio: Vec<u8>) -> Result<(), PlaybackError>;
}

#[async_trait]
impl<P: Player + ?Sized> Player for Box<P> {
    async fn play(&self, id: &str, audio: Vec<u8>) -> Result<(), PlaybackError> {
        (**self).play(id, audio).await
    }
}

/// Build the player named in config.
pub fn from_config(config: &PollerConfig) -> Result<Box<dyn Player>, PlaybackError> {
    match config.player.as_str() {
        "speaker" => Ok(Box::new(SpeakerPlayer::open()?)),
        "directory" => Ok(Box::new(DirectoryPlayer::new(config.output_dir.clone())?)),
        other => Err(PlaybackError::UnknownPlayer(other.to_string())),
    }
}

pub struct SpeakerPlayer {
    // Kept alive for the process lifetime; dropping it silences every sink.
    stream: OutputStream,
}

impl SpeakerPlayer {
    pub fn open() -> Result<Self, PlaybackError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl Player for SpeakerPlayer {
    async fn play(&self, id: &str, audio: Vec<u8>) -> Result<(), PlaybackError> {
        let source =
            Decoder::new(Cursor::new(audio)).map_err(|e| PlaybackError::Decode(e.to_string()))?;

        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(source);
        info!("Playing {id}");

        tokio::task::spawn_blocking(move || sink.sleep_until_end())
            .await
            .map_err(|e| PlaybackError::Task(e.to_string()))?;

        debug!("Finished {id}");
        Ok(())
    }
}

pub struct DirectoryPlayer {
    dir: PathBuf,
}

impl DirectoryPlayer {
    pub fn new(dir: PathBuf) -> Result<Self, PlaybackError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl Player for DirectoryPlayer {
    async fn play(&self, id: &str, audio: Vec<u8>) -> Result<(), PlaybackError> {
        let path = self.dir.join(format!("{id}.wav"));
        tokio::fs::write(&path, &audio).await?;
        tokio::fs::write(self.dir.join("latest.wav"), &audio).await?;
        info!("Saved {id} to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_player_writes_artifact_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let player = DirectoryPlayer::new(dir.path().join("out")).unwrap();

        player.play("1-0123456789ab", b"first".to_vec()).await.unwrap();
        player.play("2-ba9876543210", b"second".to_vec()).await.unwrap();

        let out = dir.path().join("out");
        assert_eq!(fs::read(out.join("1-0123456789ab.wav")).unwrap(), b"first");
        assert_eq!(fs::read(out.join("latest.wav")).unwrap(), b"second");
    }

    #[test]
    fn unknown_player_is_rejected() {
        let config = PollerConfig {
            player: "bluetooth".into(),
            ..PollerConfig::default()
        };
        assert!(matches!(from_config(&config), Err(PlaybackError::UnknownPlayer(_))));
    }
}
