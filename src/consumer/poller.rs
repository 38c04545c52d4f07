//! Poll / fetch / dedup consumer.
//!
//! Each tick reads the published state. A ready record with an id different
//! from the cursor is fetched, checked against the checksum seen in that same
//! read, and played. The cursor only moves after playback succeeds, so every
//! failure is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::player::Player;
use super::ticker::Ticker;
use crate::relay::artifact::{self, ArtifactError, ArtifactStore};
use crate::relay::publish::{PublishCell, StateSnapshot};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("failed to read artifact: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Where the poller reads state and artifacts from.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn read_state(&self) -> Result<StateSnapshot, FetchError>;

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<T: StateSource + ?Sized> StateSource for Arc<T> {
    async fn read_state(&self) -> Result<StateSnapshot, FetchError> {
        (**self).read_state().await
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(locator).await
    }
}

/// Generation server over HTTP.
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StateSource for HttpSource {
    async fn read_state(&self) -> Result<StateSnapshot, FetchError> {
        let resp = self.client.get(format!("{}/state", self.base_url)).send().await?;
        match resp.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(resp.json::<StateSnapshot>().await?),
            status => Err(FetchError::Status(status)),
        }
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(format!("{}{locator}", self.base_url)).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound(locator.to_string())),
            status => Err(FetchError::Status(status)),
        }
    }
}

/// Same-process access to a publish cell and its artifact store.
pub struct LocalSource {
    cell: PublishCell,
    store: Arc<ArtifactStore>,
}

impl LocalSource {
    pub fn new(cell: PublishCell, store: Arc<ArtifactStore>) -> Self {
        Self { cell, store }
    }
}

#[async_trait]
impl StateSource for LocalSource {
    async fn read_state(&self) -> Result<StateSnapshot, FetchError> {
        Ok(self.cell.read_state())
    }

    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let id = locator.rsplit('/').next().unwrap_or(locator);
        match self.store.load(id) {
            Ok(bytes) => Ok(bytes),
            Err(ArtifactError::NotFound(_)) => Err(FetchError::NotFound(locator.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// State could not be read.
    Unavailable,
    NotReady,
    AlreadySeen,
    FetchFailed,
    ChecksumMismatch,
    PlaybackFailed,
    Played(String),
}

pub struct Poller<S, P> {
    source: S,
    player: P,
    last_seen_id: Option<String>,
}

impl<S: StateSource, P: Player> Poller<S, P> {
    pub fn new(source: S, player: P) -> Self {
        Self {
            source,
            player,
            last_seen_id: None,
        }
    }

    pub fn last_seen_id(&self) -> Option<&str> {
        self.last_seen_id.as_deref()
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub async fn poll_once(&mut self) -> PollOutcome {
        let snapshot = match self.source.read_state().await {
            Ok(s) => s,
            Err(e) => {
                warn!("State read failed: {e}");
                return PollOutcome::Unavailable;
            }
        };

        let published = match snapshot {
            StateSnapshot::NotReady => {
                debug!("Not ready, waiting for next tick");
                return PollOutcome::NotReady;
            }
            StateSnapshot::Ready(p) => p,
        };

        // The id names the played file, so it must never carry a path.
        if !artifact::is_valid_id(&published.id) {
            warn!("Ignoring state with malformed id {:?}", published.id);
            return PollOutcome::Unavailable;
        }

        if self.last_seen_id.as_deref() == Some(published.id.as_str()) {
            debug!("Already played {}", published.id);
            return PollOutcome::AlreadySeen;
        }

        let bytes = match self.source.fetch(&published.locator).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Fetch of {} failed, will retry: {e}", published.id);
                return PollOutcome::FetchFailed;
            }
        };

        let sum = artifact::checksum(&bytes);
        if sum != published.checksum {
            warn!(
                "Checksum mismatch for {} (expected {}, got {sum}), discarding",
                published.id, published.checksum
            );
            return PollOutcome::ChecksumMismatch;
        }

        match self.player.play(&published.id, bytes).await {
            Ok(()) => {
                info!("Played {}", published.id);
                self.last_seen_id = Some(published.id.clone());
                PollOutcome::Played(published.id)
            }
            Err(e) => {
                warn!("Playback of {} failed, will retry: {e}", published.id);
                PollOutcome::PlaybackFailed
            }
        }
    }

    /// Poll on every tick until the ticker ends.
    pub async fn run<T: Ticker>(&mut self, ticker: &mut T) {
        while ticker.tick().await {
            self.poll_once().await;
        }
        info!("Ticker stopped, poller exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::player::PlaybackError;
    use crate::consumer::ticker;
    use crate::relay::publish::Published;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Counts calls and can corrupt, fail, or hold fetches.
    struct TestSource {
        inner: LocalSource,
        reads: AtomicUsize,
        fetches: Mutex<Vec<String>>,
        corrupt: AtomicBool,
        fail_fetch: AtomicBool,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl TestSource {
        fn new(cell: &PublishCell, store: &Arc<ArtifactStore>) -> Self {
            Self {
                inner: LocalSource::new(cell.clone(), store.clone()),
                reads: AtomicUsize::new(0),
                fetches: Mutex::new(Vec::new()),
                corrupt: AtomicBool::new(false),
                fail_fetch: AtomicBool::new(false),
                gate: None,
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StateSource for TestSource {
        async fn read_state(&self) -> Result<StateSnapshot, FetchError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_state().await
        }

        async fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
            self.fetches.lock().unwrap().push(locator.to_string());
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(FetchError::NotFound(locator.to_string()));
            }
            let mut bytes = self.inner.fetch(locator).await?;
            if self.corrupt.load(Ordering::SeqCst) {
                bytes.push(0);
            }
            Ok(bytes)
        }
    }

    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<(String, Vec<u8>)>>,
        fail: AtomicBool,
    }

    impl RecordingPlayer {
        fn ids(&self) -> Vec<String> {
            self.played.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
        }
    }

    #[async_trait]
    impl Player for RecordingPlayer {
        async fn play(&self, id: &str, audio: Vec<u8>) -> Result<(), PlaybackError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PlaybackError::Device("unplugged".into()));
            }
            self.played.lock().unwrap().push((id.to_string(), audio));
            Ok(())
        }
    }

    async fn publish(cell: &PublishCell, store: &ArtifactStore, audio: &[u8]) -> Published {
        let ticket = cell.begin_publish().await;
        let stored = store.store(audio).unwrap();
        let published = Published {
            locator: format!("/artifact/{}", stored.id),
            id: stored.id,
            checksum: stored.checksum,
        };
        cell.complete_publish(ticket, published.clone());
        published
    }

    fn setup() -> (tempfile::TempDir, PublishCell, Arc<ArtifactStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        (dir, PublishCell::new(), store)
    }

    #[tokio::test]
    async fn fetches_each_id_once() {
        let (_dir, cell, store) = setup();
        let source = Arc::new(TestSource::new(&cell, &store));
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());

        let a = publish(&cell, &store, b"audio A").await;
        assert_eq!(poller.poll_once().await, PollOutcome::Played(a.id.clone()));
        assert_eq!(poller.poll_once().await, PollOutcome::AlreadySeen);
        assert_eq!(poller.poll_once().await, PollOutcome::AlreadySeen);

        assert_eq!(source.fetched(), vec![a.locator]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert_eq!(poller.last_seen_id(), Some(a.id.as_str()));
    }

    #[tokio::test]
    async fn polls_during_publish_gap_do_not_fetch() {
        let (_dir, cell, store) = setup();
        let source = Arc::new(TestSource::new(&cell, &store));
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());

        assert_eq!(poller.poll_once().await, PollOutcome::NotReady);

        publish(&cell, &store, b"audio A").await;
        let ticket = cell.begin_publish().await;
        assert_eq!(poller.poll_once().await, PollOutcome::NotReady);
        assert!(source.fetched().is_empty());
        drop(ticket);
    }

    #[tokio::test]
    async fn played_bytes_match_snapshot_checksum() {
        let (_dir, cell, store) = setup();
        let mut poller = Poller::new(LocalSource::new(cell.clone(), store.clone()), RecordingPlayer::default());

        let a = publish(&cell, &store, b"some wav bytes").await;
        poller.poll_once().await;

        let played = poller.player().played.lock().unwrap().clone();
        assert_eq!(played.len(), 1);
        assert_eq!(artifact::checksum(&played[0].1), a.checksum);
    }

    #[tokio::test]
    async fn publish_during_in_flight_fetch() {
        let (_dir, cell, store) = setup();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = Arc::new(TestSource {
            gate: Some((started.clone(), release.clone())),
            ..TestSource::new(&cell, &store)
        });
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());

        let a = publish(&cell, &store, b"audio A").await;

        let (outcome, b) = tokio::join!(poller.poll_once(), async {
            started.notified().await;
            let b = publish(&cell, &store, b"audio B").await;
            release.notify_one();
            b
        });
        assert_eq!(outcome, PollOutcome::Played(a.id.clone()));

        // Next fetch passes the gate straight through.
        release.notify_one();
        assert_eq!(poller.poll_once().await, PollOutcome::Played(b.id.clone()));
        assert_eq!(poller.poll_once().await, PollOutcome::AlreadySeen);

        assert_eq!(poller.player().ids(), vec![a.id, b.id.clone()]);
        assert_eq!(source.fetched().iter().filter(|l| **l == b.locator).count(), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_discarded_and_retried() {
        let (_dir, cell, store) = setup();
        let source = Arc::new(TestSource::new(&cell, &store));
        source.corrupt.store(true, Ordering::SeqCst);
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());

        let a = publish(&cell, &store, b"audio A").await;
        assert_eq!(poller.poll_once().await, PollOutcome::ChecksumMismatch);
        assert_eq!(poller.last_seen_id(), None);
        assert!(poller.player().ids().is_empty());

        source.corrupt.store(false, Ordering::SeqCst);
        assert_eq!(poller.poll_once().await, PollOutcome::Played(a.id));
    }

    #[tokio::test]
    async fn fetch_failure_keeps_cursor() {
        let (_dir, cell, store) = setup();
        let source = Arc::new(TestSource::new(&cell, &store));
        source.fail_fetch.store(true, Ordering::SeqCst);
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());

        let a = publish(&cell, &store, b"audio A").await;
        assert_eq!(poller.poll_once().await, PollOutcome::FetchFailed);
        assert_eq!(poller.poll_once().await, PollOutcome::FetchFailed);
        assert_eq!(poller.last_seen_id(), None);

        source.fail_fetch.store(false, Ordering::SeqCst);
        assert_eq!(poller.poll_once().await, PollOutcome::Played(a.id));
    }

    #[tokio::test]
    async fn playback_failure_keeps_cursor() {
        let (_dir, cell, store) = setup();
        let mut poller = Poller::new(
            LocalSource::new(cell.clone(), store.clone()),
            RecordingPlayer::default(),
        );
        poller.player().fail.store(true, Ordering::SeqCst);

        let a = publish(&cell, &store, b"audio A").await;
        assert_eq!(poller.poll_once().await, PollOutcome::PlaybackFailed);

        poller.player().fail.store(false, Ordering::SeqCst);
        assert_eq!(poller.poll_once().await, PollOutcome::Played(a.id));
    }

    #[tokio::test]
    async fn expired_artifact_is_skipped_until_next_publish() {
        let (_dir, cell, store) = setup();
        let mut poller = Poller::new(
            LocalSource::new(cell.clone(), store.clone()),
            RecordingPlayer::default(),
        );

        let a = publish(&cell, &store, b"audio A").await;
        std::fs::remove_file(store.dir().join(format!("{}.wav", a.id))).unwrap();
        assert_eq!(poller.poll_once().await, PollOutcome::FetchFailed);

        let b = publish(&cell, &store, b"audio B").await;
        assert_eq!(poller.poll_once().await, PollOutcome::Played(b.id));
    }

    /// Serves a fixed ready state.
    struct FixedSource(Published);

    #[async_trait]
    impl StateSource for FixedSource {
        async fn read_state(&self) -> Result<StateSnapshot, FetchError> {
            Ok(StateSnapshot::Ready(self.0.clone()))
        }

        async fn fetch(&self, _locator: &str) -> Result<Vec<u8>, FetchError> {
            Ok(b"audio".to_vec())
        }
    }

    #[tokio::test]
    async fn malformed_remote_id_is_never_played() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        for id in ["../escape", "1-0123456789ab/../../x", ""] {
            let published = Published {
                id: id.to_string(),
                locator: format!("/artifact/{id}"),
                checksum: artifact::checksum(b"audio"),
            };
            let mut poller = Poller::new(
                FixedSource(published),
                crate::consumer::player::DirectoryPlayer::new(out.clone()).unwrap(),
            );
            assert_eq!(poller.poll_once().await, PollOutcome::Unavailable);
            assert_eq!(poller.last_seen_id(), None);
        }
        assert!(!dir.path().join("escape.wav").exists());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn run_polls_once_per_tick() {
        let (_dir, cell, store) = setup();
        let source = Arc::new(TestSource::new(&cell, &store));
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());
        let (handle, mut ticker) = ticker::manual();

        let a = publish(&cell, &store, b"audio A").await;
        for _ in 0..3 {
            assert!(handle.tick().await);
        }
        drop(handle);
        poller.run(&mut ticker).await;

        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert_eq!(source.fetched().len(), 1);
        assert_eq!(poller.player().ids(), vec![a.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticker_drives_polls() {
        let (_dir, cell, store) = setup();
        let source = Arc::new(TestSource::new(&cell, &store));
        let mut poller = Poller::new(source.clone(), RecordingPlayer::default());
        let mut ticker = ticker::IntervalTicker::new(Duration::from_secs(3));

        publish(&cell, &store, b"audio A").await;
        let _ = tokio::time::timeout(Duration::from_millis(9500), poller.run(&mut ticker)).await;

        // Ticks at 0s, 3s, 6s and 9s.
        assert_eq!(source.reads.load(Ordering::SeqCst), 4);
        assert_eq!(source.fetched().len(), 1);
    }
}
