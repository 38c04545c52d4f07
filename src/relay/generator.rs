//! Generation pipeline: validate → begin publish → synthesize → store →
//! complete publish.
//!
//! Validation happens before the record is touched, so a malformed request
//! never clears the ready flag. Any failure after `begin_publish` leaves the
//! record not ready until the next successful generation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::artifact::{ArtifactError, ArtifactStore, StoredArtifact};
use super::history::{GenerationRecord, History};
use super::publish::{PublishCell, Published};
use crate::synth::{SynthError, SynthesisBackend, VoiceSettings};

pub const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub rate: Option<u32>,
    #[serde(default)]
    pub pitch: Option<u32>,
}

impl GenerateRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            rate: None,
            pitch: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOutcome {
    pub id: String,
    pub checksum: String,
    pub locator: String,
    pub settings: VoiceSettings,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("synthesis failed: {0}")]
    Synth(#[from] SynthError),

    #[error("synthesis produced no audio")]
    Empty,

    #[error("failed to store artifact: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("store task failed: {0}")]
    Task(String),
}

impl GenerateError {
    /// Rejected before any state change.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Path under which the HTTP API serves an artifact.
pub fn locator_for(id: &str) -> String {
    format!("/artifact/{id}")
}

pub struct Generator {
    cell: PublishCell,
    backend: Arc<dyn SynthesisBackend>,
    store: Arc<ArtifactStore>,
    defaults: VoiceSettings,
    retention: Duration,
    history: Option<History>,
}

impl Generator {
    pub fn new(
        cell: PublishCell,
        backend: Arc<dyn SynthesisBackend>,
        store: Arc<ArtifactStore>,
        defaults: VoiceSettings,
    ) -> Self {
        Self {
            cell,
            backend,
            store,
            defaults,
            retention: Duration::from_secs(3600),
            history: None,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cell(&self) -> &PublishCell {
        &self.cell
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<GenerateOutcome, GenerateError> {
        let t_total = Instant::now();

        let text = req.text.trim().to_string();
        if text.is_empty() {
            return Err(GenerateError::Invalid("empty text".into()));
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(GenerateError::Invalid(format!(
                "text longer than {MAX_TEXT_CHARS} characters"
            )));
        }
        let settings = self.defaults.merged(req.voice, req.rate, req.pitch);
        settings.validate().map_err(GenerateError::Invalid)?;

        let ticket = self.cell.begin_publish().await;

        let preview: String = text.chars().take(40).collect();
        info!(
            "Generating \"{}{}\" (voice={}, rate={}, pitch={})",
            preview.replace('\n', " "),
            if text.chars().count() > 40 { "..." } else { "" },
            settings.voice,
            settings.rate,
            settings.pitch,
        );

        let t_synth = Instant::now();
        let produced = self.produce(&text, &settings).await;
        let synth_ms = t_synth.elapsed().as_secs_f64() * 1000.0;

        let result = match produced {
            Ok(stored) => {
                let published = Published {
                    id: stored.id.clone(),
                    locator: locator_for(&stored.id),
                    checksum: stored.checksum.clone(),
                };
                self.cell.complete_publish(ticket, published.clone());
                self.prune(stored.id.clone()).await;

                info!(
                    "Published {} ({:.0}ms synth, {}ms total)",
                    stored.id,
                    synth_ms,
                    t_total.elapsed().as_millis()
                );
                Ok(GenerateOutcome {
                    id: published.id,
                    checksum: published.checksum,
                    locator: published.locator,
                    settings: settings.clone(),
                })
            }
            Err(e) => {
                drop(ticket);
                warn!("Generation failed, state left not ready: {e}");
                Err(e)
            }
        };

        if let Some(history) = self.history.clone() {
            let record = GenerationRecord {
                timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                id: result.as_ref().ok().map(|o| o.id.clone()),
                text_chars: text.chars().count(),
                voice: settings.voice,
                rate: settings.rate,
                pitch: settings.pitch,
                backend: self.backend.name().to_string(),
                success: result.is_ok(),
                error: result.as_ref().err().map(ToString::to_string),
                synth_latency_ms: synth_ms as i64,
                total_latency_ms: t_total.elapsed().as_millis() as i64,
            };
            if let Err(e) = tokio::task::spawn_blocking(move || history.save(&record)).await {
                warn!("History write task failed: {e}");
            }
        }

        result
    }

    async fn produce(&self, text: &str, settings: &VoiceSettings) -> Result<StoredArtifact, GenerateError> {
        let bytes = self.backend.synthesize(text, settings).await?;
        if bytes.is_empty() {
            return Err(GenerateError::Empty);
        }
        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.store(&bytes))
            .await
            .map_err(|e| GenerateError::Task(e.to_string()))??;
        Ok(stored)
    }

    async fn prune(&self, keep_id: String) {
        let store = self.store.clone();
        let retention = self.retention;
        if let Err(e) =
            tokio::task::spawn_blocking(move || store.prune(retention, Some(&keep_id))).await
        {
            warn!("Prune task failed: {e}");
        }
    }
}
