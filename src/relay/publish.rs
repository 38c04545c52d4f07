//! Ready-flag publishing of the latest notification.
//!
//! One record per server holds the most recent artifact and a ready flag.
//! A publish is two separate critical sections: `begin_publish` clears the
//! flag before any generation work starts, `complete_publish` writes the new
//! artifact triple and raises the flag once the artifact is on disk.
//! Readers never wait on generation, only on the short record lock.
//!
//! Publishers are serialized: a `PublishTicket` owns the publish lock until
//! it is completed or dropped. A dropped ticket leaves the record not ready.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// A fully stored artifact, as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub id: String,
    pub locator: String,
    pub checksum: String,
}

/// The single shared notification record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRecord {
    pub latest: Option<Published>,
    pub ready: bool,
}

/// Snapshot returned by [`PublishCell::read_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StateBody", try_from = "StateBody")]
pub enum StateSnapshot {
    NotReady,
    Ready(Published),
}

impl StateSnapshot {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Wire shape: `{ready:false}` or `{ready:true,id,locator,checksum}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateBody {
    ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl From<StateSnapshot> for StateBody {
    fn from(snapshot: StateSnapshot) -> Self {
        match snapshot {
            StateSnapshot::NotReady => Self {
                ready: false,
                id: None,
                locator: None,
                checksum: None,
            },
            StateSnapshot::Ready(p) => Self {
                ready: true,
                id: Some(p.id),
                locator: Some(p.locator),
                checksum: Some(p.checksum),
            },
        }
    }
}

impl TryFrom<StateBody> for StateSnapshot {
    type Error = String;

    fn try_from(body: StateBody) -> Result<Self, Self::Error> {
        if !body.ready {
            return Ok(Self::NotReady);
        }
        match (body.id, body.locator, body.checksum) {
            (Some(id), Some(locator), Some(checksum)) => Ok(Self::Ready(Published {
                id,
                locator,
                checksum,
            })),
            _ => Err("ready state is missing id, locator or checksum".into()),
        }
    }
}

/// Proof that `begin_publish` ran; holds the publish lock.
pub struct PublishTicket {
    _guard: OwnedMutexGuard<()>,
    record: Arc<Mutex<NotificationRecord>>,
}

/// Owned handle to the notification record. Cloning shares the record.
#[derive(Clone, Default)]
pub struct PublishCell {
    record: Arc<Mutex<NotificationRecord>>,
    publish_lock: Arc<AsyncMutex<()>>,
}

impl PublishCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the ready flag. Waits for any in-flight publish to finish first.
    pub async fn begin_publish(&self) -> PublishTicket {
        let guard = self.publish_lock.clone().lock_owned().await;
        self.start(guard)
    }

    /// Like [`begin_publish`](Self::begin_publish) but returns `None`
    /// instead of waiting when another publish is in flight.
    pub fn try_begin_publish(&self) -> Option<PublishTicket> {
        let guard = self.publish_lock.clone().try_lock_owned().ok()?;
        Some(self.start(guard))
    }

    fn start(&self, guard: OwnedMutexGuard<()>) -> PublishTicket {
        self.record.lock().unwrap().ready = false;
        debug!("Publish started, ready=false");
        PublishTicket {
            _guard: guard,
            record: self.record.clone(),
        }
    }

    /// Expose a stored artifact and raise the ready flag.
    ///
    /// Call only after the artifact is durably written.
    pub fn complete_publish(&self, ticket: PublishTicket, published: Published) {
        debug_assert!(
            Arc::ptr_eq(&ticket.record, &self.record),
            "ticket from a different cell"
        );
        {
            let mut record = self.record.lock().unwrap();
            record.latest = Some(published);
            record.ready = true;
        }
        debug!("Publish completed, ready=true");
        drop(ticket);
    }

    pub fn read_state(&self) -> StateSnapshot {
        let record = self.record.lock().unwrap();
        match (&record.latest, record.ready) {
            (Some(p), true) => StateSnapshot::Ready(p.clone()),
            _ => StateSnapshot::NotReady,
        }
    }

    /// Raw copy of the record, including a stale `latest` while not ready.
    pub fn record(&self) -> NotificationRecord {
        self.record.lock().unwrap().clone()
    }

    /// True while a ticket is outstanding.
    pub fn publishing(&self) -> bool {
        self.publish_lock.try_lock().is_err()
    }
}
