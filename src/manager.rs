//! Session lifecycle orchestration.
//!
//! The manager binds a cookie name to a storage backend, hands out
//! per-request [`Session`] handles, serializes requests that present the
//! same identifier, and runs the background sweep loop.

use crate::config::{SHUTDOWN_TIMEOUT, SessionConfig, validate_interval};
use crate::cookie::{self, SessionTransport};
use crate::error::{SessionError, SessionResult};
use crate::session::Session;
use crate::traits::{SessionStore, generate_sid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, RwLock, oneshot};
use tracing::{debug, error, warn};

/// State shared between the manager, its sessions and the GC loop.
pub(crate) struct ManagerInner {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) config: RwLock<SessionConfig>,
    pub(crate) locks: SidLocks,
}

/// Per-identifier mutual exclusion table.
///
/// At most one request holds an identifier at a time; a second request
/// presenting the same identifier waits until the first releases it. The
/// outer mutex only guards table mutation and is never held across an
/// await.
#[derive(Clone, Default)]
pub(crate) struct SidLocks {
    table: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SidLocks {
    /// Wait until the identifier is free, then take it.
    pub(crate) async fn acquire(&self, sid: &str) -> SidGuard {
        let mutex = {
            let mut table = self.table.lock();
            table
                .entry(sid.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        SidGuard {
            sid: sid.to_string(),
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    /// Drop the table entry once nobody holds or waits on the identifier.
    fn remove_if_idle(&self, sid: &str) {
        let mut table = self.table.lock();
        if let Some(mutex) = table.get(sid) {
            // The table itself accounts for one reference; any more means
            // a holder or waiter is still alive.
            if Arc::strong_count(mutex) == 1 {
                table.remove(sid);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

/// Scoped hold on one session identifier.
///
/// Dropping the guard releases the identifier, so a request that fails or
/// panics mid-flight can never strand its session.
pub(crate) struct SidGuard {
    sid: String,
    locks: SidLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SidGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if_idle(&self.sid);
    }
}

struct GcHandle {
    stop_tx: oneshot::Sender<()>,
    ack_rx: oneshot::Receiver<()>,
}

/// Process-wide session orchestrator.
///
/// # Examples
///
/// ```no_run
/// use sesh::{MemorySessionStore, MemoryTransport, SessionManager};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> sesh::SessionResult<()> {
/// let store = Arc::new(MemorySessionStore::new(Duration::from_secs(3600))?);
/// let manager = SessionManager::new(store, "session")?;
///
/// // One request: resolve the session, use it, commit it back.
/// let transport = Arc::new(MemoryTransport::new());
/// let session = manager.begin(transport).await?;
/// session.set("user_id", "123").await;
/// session.commit().await?;
///
/// manager.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    inner: Arc<ManagerInner>,
    gc: tokio::sync::Mutex<Option<GcHandle>>,
}

impl SessionManager {
    /// Create a manager with default configuration and spawn its GC loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `store` - Storage backend; closed by [`shutdown`](Self::shutdown)
    /// * `cookie_name` - Name of the cookie carrying the session identifier
    pub fn new(store: Arc<dyn SessionStore>, cookie_name: &str) -> SessionResult<Self> {
        Self::with_config(store, SessionConfig::new(cookie_name)?)
    }

    /// Create a manager from a full configuration.
    ///
    /// Fails fast on invalid configuration without spawning anything.
    pub fn with_config(store: Arc<dyn SessionStore>, config: SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let inner = Arc::new(ManagerInner {
            store,
            config: RwLock::new(config),
            locks: SidLocks::default(),
        });
        let gc = spawn_gc(inner.clone());
        Ok(Self {
            inner,
            gc: tokio::sync::Mutex::new(Some(gc)),
        })
    }

    /// Resolve the request's session, creating a fresh one when needed.
    ///
    /// When the transport carries a usable token, the matching identifier
    /// is locked before the backend is touched, and its stored values
    /// become the handle's working copy. A missing, empty or unknown
    /// token yields a fresh session with a newly minted identifier, empty
    /// values and a new action token. In every case the transport cookie
    /// is (re)written to match the live identifier.
    ///
    /// Waits when another in-flight request holds the same identifier.
    ///
    /// # Arguments
    ///
    /// * `transport` - The request/response pair to read the token from
    ///   and write the cookie to
    pub async fn begin(&self, transport: Arc<dyn SessionTransport>) -> SessionResult<Session> {
        let config = self.inner.config.read().await.clone();

        if let Some(candidate) = transport
            .token(&config.cookie_name)
            .filter(|token| !token.is_empty())
        {
            let guard = self.inner.locks.acquire(&candidate).await;
            match self.inner.store.fetch(&candidate).await {
                Ok(record) => {
                    cookie::write_cookie(transport.as_ref(), &config, &candidate);
                    return Ok(Session::new(
                        self.inner.clone(),
                        transport,
                        candidate,
                        record.values,
                        guard,
                    ));
                }
                Err(e) if e.is_not_found() => {
                    // Stale token: drop whatever remains under it and fall
                    // through to a fresh session.
                    self.inner.store.delete(&candidate).await?;
                    drop(guard);
                }
                // The guard drops on this path, releasing the identifier.
                Err(e) => return Err(e),
            }
        }

        self.fresh(transport, &config).await
    }

    async fn fresh(
        &self,
        transport: Arc<dyn SessionTransport>,
        config: &SessionConfig,
    ) -> SessionResult<Session> {
        let sid = generate_sid();
        let guard = self.inner.locks.acquire(&sid).await;
        cookie::write_cookie(transport.as_ref(), config, &sid);
        let session = Session::new(self.inner.clone(), transport, sid, HashMap::new(), guard);
        session.rotate_action_token().await;
        Ok(session)
    }

    /// Change the interval between background sweeps.
    ///
    /// Takes effect on the next tick. Rejects intervals below the
    /// five-minute floor without side effects.
    pub async fn set_gc_delay(&self, delay: Duration) -> SessionResult<()> {
        validate_interval("GC delay", delay)?;
        self.inner.config.write().await.gc_delay = delay;
        Ok(())
    }

    /// Toggle the `Secure` attribute on session cookies.
    pub async fn set_secure(&self, secure: bool) {
        self.inner.config.write().await.secure = secure;
    }

    /// Stop the GC loop and close the backend.
    ///
    /// Waits up to [`SHUTDOWN_TIMEOUT`] for the loop to acknowledge the
    /// stop signal. On timeout the backend is still closed and
    /// [`SessionError::ShutdownTimeout`] is reported, with the late
    /// acknowledgment drained in the background; a backend-close error
    /// takes precedence over the timeout. A second call returns
    /// [`SessionError::Closed`].
    pub async fn shutdown(&self) -> SessionResult<()> {
        let handle = match self.gc.lock().await.take() {
            Some(handle) => handle,
            None => return Err(SessionError::Closed),
        };
        let GcHandle { stop_tx, mut ack_rx } = handle;

        // The loop may already have exited on its own; a failed send
        // still leaves the acknowledgment readable.
        let _ = stop_tx.send(());

        let mut result = match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut ack_rx).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(
                    "GC loop did not acknowledge shutdown within {:?}",
                    SHUTDOWN_TIMEOUT
                );
                // Drain the late acknowledgment so the loop's final send
                // is never left dangling.
                tokio::spawn(async move {
                    let _ = ack_rx.await;
                });
                Err(SessionError::ShutdownTimeout)
            }
        };

        if let Err(e) = self.inner.store.shutdown().await {
            result = Err(e);
        }
        result
    }
}

/// Spawn the background sweep loop. Sweep failures are logged and the
/// loop keeps ticking; only the stop signal ends it.
fn spawn_gc(inner: Arc<ManagerInner>) -> GcHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let (ack_tx, ack_rx) = oneshot::channel();

    tokio::spawn(async move {
        loop {
            // Re-read each tick so set_gc_delay applies from the next one.
            let delay = inner.config.read().await.gc_delay;
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = inner.store.sweep().await {
                        error!(error = %e, "session sweep failed");
                    }
                }
            }
        }
        debug!("session GC loop stopped");
        let _ = ack_tx.send(());
    });

    GcHandle { stop_tx, ack_rx }
}
