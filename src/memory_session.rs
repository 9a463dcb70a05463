//! Actor-style in-memory session storage.
//!
//! One spawned control loop exclusively owns the identifier-to-record map.
//! Every store call is turned into a message carrying its payload and a
//! private reply channel, pushed onto an operation-specific queue, and
//! answered by the loop. The map is never touched from anywhere else, so
//! access is race-free by construction and needs no locks.

use crate::config::validate_interval;
use crate::error::{SessionError, SessionResult};
use crate::traits::{SessionRecord, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

/// Depth of the fetch/commit/delete queues; absorbs bursts without
/// blocking callers. Sweep and shutdown queues hold a single message so
/// hand-off stays synchronous.
const OP_QUEUE_DEPTH: usize = 10;

struct FetchRequest {
    sid: String,
    reply: oneshot::Sender<SessionResult<SessionRecord>>,
}

struct CommitRequest {
    record: SessionRecord,
    reply: oneshot::Sender<SessionResult<()>>,
}

struct DeleteRequest {
    sid: String,
    reply: oneshot::Sender<SessionResult<()>>,
}

struct ControlRequest {
    reply: oneshot::Sender<SessionResult<()>>,
}

/// What the control loop stores per identifier. `touched` drives expiry
/// and uses the Tokio clock so it can be tested under paused time;
/// `stamp` is the wall-clock time reported back on fetch.
struct MemoryRecord {
    values: HashMap<String, String>,
    stamp: DateTime<Utc>,
    touched: Instant,
}

/// In-process session store.
///
/// Records live in process memory: a restart drops every session. Use one
/// of the persistent backends when sessions must outlive the process.
///
/// # Examples
///
/// ```no_run
/// use sesh::{MemorySessionStore, SessionStore};
/// use std::time::Duration;
///
/// # async fn example() -> sesh::SessionResult<()> {
/// let store = MemorySessionStore::new(Duration::from_secs(3600))?;
/// assert!(store.fetch("missing").await.is_err());
/// store.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemorySessionStore {
    fetch_tx: mpsc::Sender<FetchRequest>,
    commit_tx: mpsc::Sender<CommitRequest>,
    delete_tx: mpsc::Sender<DeleteRequest>,
    sweep_tx: mpsc::Sender<ControlRequest>,
    shutdown_tx: mpsc::Sender<ControlRequest>,
}

impl MemorySessionStore {
    /// Create the store and spawn its control loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `max_age` - Age since last use after which records expire;
    ///   at least five minutes
    pub fn new(max_age: Duration) -> SessionResult<Self> {
        validate_interval("max session age", max_age)?;

        let (fetch_tx, fetch_rx) = mpsc::channel(OP_QUEUE_DEPTH);
        let (commit_tx, commit_rx) = mpsc::channel(OP_QUEUE_DEPTH);
        let (delete_tx, delete_rx) = mpsc::channel(OP_QUEUE_DEPTH);
        let (sweep_tx, sweep_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(run(
            max_age,
            fetch_rx,
            commit_rx,
            delete_rx,
            sweep_rx,
            shutdown_rx,
        ));

        Ok(Self {
            fetch_tx,
            commit_tx,
            delete_tx,
            sweep_tx,
            shutdown_tx,
        })
    }
}

/// The owning control loop. Exits on shutdown or once every sender is
/// gone; after exit all queues are closed and further sends fail fast.
async fn run(
    max_age: Duration,
    mut fetch_rx: mpsc::Receiver<FetchRequest>,
    mut commit_rx: mpsc::Receiver<CommitRequest>,
    mut delete_rx: mpsc::Receiver<DeleteRequest>,
    mut sweep_rx: mpsc::Receiver<ControlRequest>,
    mut shutdown_rx: mpsc::Receiver<ControlRequest>,
) {
    let mut sessions: HashMap<String, MemoryRecord> = HashMap::new();

    loop {
        tokio::select! {
            Some(req) = fetch_rx.recv() => {
                let result = match sessions.get(&req.sid) {
                    Some(rec) if rec.touched.elapsed() <= max_age => Ok(SessionRecord {
                        sid: req.sid.clone(),
                        values: rec.values.clone(),
                        last_used: rec.stamp,
                    }),
                    _ => Err(SessionError::NotFound),
                };
                let _ = req.reply.send(result);
            }
            Some(req) = commit_rx.recv() => {
                sessions.insert(req.record.sid, MemoryRecord {
                    values: req.record.values,
                    stamp: Utc::now(),
                    touched: Instant::now(),
                });
                let _ = req.reply.send(Ok(()));
            }
            Some(req) = delete_rx.recv() => {
                sessions.remove(&req.sid);
                let _ = req.reply.send(Ok(()));
            }
            Some(req) = sweep_rx.recv() => {
                sessions.retain(|_, rec| rec.touched.elapsed() <= max_age);
                let _ = req.reply.send(Ok(()));
            }
            Some(req) = shutdown_rx.recv() => {
                sessions.clear();
                let _ = req.reply.send(Ok(()));
                break;
            }
            else => break,
        }
    }

    debug!("in-memory session store stopped");
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn fetch(&self, sid: &str) -> SessionResult<SessionRecord> {
        let (reply, rx) = oneshot::channel();
        self.fetch_tx
            .send(FetchRequest {
                sid: sid.to_string(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn commit(&self, record: SessionRecord) -> SessionResult<()> {
        if record.sid.is_empty() {
            return Ok(());
        }
        let (reply, rx) = oneshot::channel();
        self.commit_tx
            .send(CommitRequest { record, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn delete(&self, sid: &str) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.delete_tx
            .send(DeleteRequest {
                sid: sid.to_string(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn sweep(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.sweep_tx
            .send(ControlRequest { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    async fn shutdown(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.shutdown_tx
            .send(ControlRequest { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}
