//! On-disk artifact store.
//!
//! Artifacts are WAV files named `{id}.wav` where the id is
//! `{unix_millis}-{first 12 hex of sha256}`. The millis part is strictly
//! increasing per store, so identical audio stored twice gets two ids. Files
//! are written to a temporary name, synced, then renamed, and the directory is
//! synced after the rename, so a published id always refers to a complete
//! file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

const ID_HASH_LEN: usize = 12;
const EXTENSION: &str = "wav";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub id: String,
    pub checksum: String,
    pub path: PathBuf,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Ids are `{digits}-{12 lowercase hex}`; anything else is never a file name.
pub fn is_valid_id(id: &str) -> bool {
    let Some((millis, hash)) = id.split_once('-') else {
        return false;
    };
    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && hash.len() == ID_HASH_LEN
        && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn id_millis(id: &str) -> Option<u64> {
    id.split_once('-')?.0.parse().ok()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub struct ArtifactStore {
    dir: PathBuf,
    /// Millis part of the newest id handed out.
    last_millis: AtomicU64,
}

impl ArtifactStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Artifact store at {}", dir.display());
        let store = Self {
            dir,
            last_millis: AtomicU64::new(0),
        };
        let newest = store.list().last().and_then(|id| id_millis(id)).unwrap_or(0);
        store.last_millis.store(newest, Ordering::SeqCst);
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Durably write `bytes` and return its id and checksum.
    pub fn store(&self, bytes: &[u8]) -> Result<StoredArtifact, ArtifactError> {
        self.store_at(bytes, now_millis())
    }

    /// `max(now, last + 1)`, so ids never repeat or go backwards.
    fn reserve_millis(&self, now: u64) -> u64 {
        let mut last = self.last_millis.load(Ordering::SeqCst);
        loop {
            let next = now.max(last.saturating_add(1));
            match self
                .last_millis
                .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn store_at(&self, bytes: &[u8], now: u64) -> Result<StoredArtifact, ArtifactError> {
        let millis = self.reserve_millis(now);
        let checksum = checksum(bytes);
        let id = format!("{millis}-{}", &checksum[..ID_HASH_LEN]);
        let path = self.path_of(&id);
        let tmp = self.dir.join(format!(".{id}.tmp"));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        #[cfg(unix)]
        fs::File::open(&self.dir)?.sync_all()?;

        debug!("Stored artifact {id} ({} bytes)", bytes.len());
        Ok(StoredArtifact { id, checksum, path })
    }

    pub fn load(&self, id: &str) -> Result<Vec<u8>, ArtifactError> {
        if !is_valid_id(id) {
            return Err(ArtifactError::NotFound(id.to_string()));
        }
        match fs::read(self.path_of(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ids currently on disk, oldest first.
    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let id = name.strip_suffix(".wav")?;
                is_valid_id(id).then(|| id.to_string())
            })
            .collect();
        ids.sort_by_key(|id| id_millis(id));
        ids
    }

    /// Delete artifacts older than `retention`, never `keep_id`.
    /// Returns the number removed.
    pub fn prune(&self, retention: Duration, keep_id: Option<&str>) -> usize {
        self.prune_at(retention, keep_id, now_millis())
    }

    fn prune_at(&self, retention: Duration, keep_id: Option<&str>, now: u64) -> usize {
        let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
        let mut removed = 0;

        for id in self.list() {
            if Some(id.as_str()) == keep_id {
                continue;
            }
            let Some(created) = id_millis(&id) else {
                continue;
            };
            if now.saturating_sub(created) <= retention_ms {
                continue;
            }
            match fs::remove_file(self.path_of(&id)) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to prune artifact {id}: {e}"),
            }
        }

        if removed > 0 {
            info!("Pruned {removed} expired artifacts");
        }
        removed
    }
}
