//! Per-request session handle.

use crate::cookie::{self, SessionTransport};
use crate::error::SessionResult;
use crate::manager::{ManagerInner, SidGuard};
use crate::traits::{SessionRecord, generate_sid};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Reserved key the anti-forgery action token is stored under.
pub(crate) const ACTION_TOKEN_KEY: &str = "actionToken";

struct SessionState {
    sid: String,
    values: HashMap<String, String>,
    guard: Option<SidGuard>,
}

/// A working copy of one session, bound to a single request.
///
/// The handle owns its identifier for as long as it lives: a concurrent
/// request presenting the same identifier waits in
/// [`SessionManager::begin`](crate::manager::SessionManager::begin) until
/// this handle releases it. [`commit`](Session::commit) is the request's
/// finalizer; call it exactly once on every path, including failure
/// paths. A handle dropped without commit releases the identifier but
/// loses its writes.
///
/// Values are guarded by a read/write lock so the action-token helpers
/// stay safe when a handler shares the session with sub-tasks.
pub struct Session {
    inner: Arc<ManagerInner>,
    transport: Arc<dyn SessionTransport>,
    state: RwLock<SessionState>,
}

impl Session {
    pub(crate) fn new(
        inner: Arc<ManagerInner>,
        transport: Arc<dyn SessionTransport>,
        sid: String,
        values: HashMap<String, String>,
        guard: SidGuard,
    ) -> Self {
        Self {
            inner,
            transport,
            state: RwLock::new(SessionState {
                sid,
                values,
                guard: Some(guard),
            }),
        }
    }

    /// The current session identifier.
    pub async fn sid(&self) -> String {
        self.state.read().await.sid.clone()
    }

    /// Look up a session value.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.state.read().await.values.get(key).cloned()
    }

    /// Set a session value. Visible to later requests only after
    /// [`commit`](Session::commit).
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.write().await.values.insert(key.into(), value.into());
    }

    /// Remove a session value, returning the previous one.
    pub async fn remove(&self, key: &str) -> Option<String> {
        self.state.write().await.values.remove(key)
    }

    /// The current anti-forgery action token.
    pub async fn action_token(&self) -> Option<String> {
        self.get(ACTION_TOKEN_KEY).await
    }

    /// Check a token presented by a mutating request against the stored
    /// action token. An empty or missing token never verifies.
    pub async fn verify_action_token(&self, presented: &str) -> bool {
        if presented.is_empty() {
            return false;
        }
        self.state.read().await.values.get(ACTION_TOKEN_KEY).map(String::as_str)
            == Some(presented)
    }

    /// Replace the action token, returning the new one. Call after each
    /// sensitive action so a token cannot be replayed.
    pub async fn rotate_action_token(&self) -> String {
        let token = generate_sid();
        self.state
            .write()
            .await
            .values
            .insert(ACTION_TOKEN_KEY.to_string(), token.clone());
        token
    }

    /// Throw the session away and start over: delete the stored record,
    /// release the old identifier, mint a fresh one, reset the values,
    /// rewrite the transport cookie and issue a new action token.
    ///
    /// This is the only operation that changes a handle's identifier.
    /// The old identifier is never handed out again.
    pub async fn clear(&self) -> SessionResult<()> {
        let mut state = self.state.write().await;
        if !state.sid.is_empty() {
            self.inner.store.delete(&state.sid).await?;
        }
        // Release the old identifier only once its record is gone.
        state.guard.take();

        let sid = generate_sid();
        state.guard = Some(self.inner.locks.acquire(&sid).await);
        state.sid = sid;
        state.values.clear();
        let token = generate_sid();
        state.values.insert(ACTION_TOKEN_KEY.to_string(), token);

        let config = self.inner.config.read().await.clone();
        cookie::write_cookie(self.transport.as_ref(), &config, &state.sid);
        Ok(())
    }

    /// Persist the session and release its identifier.
    ///
    /// The identifier is released whether or not the write succeeds, so a
    /// failed commit cannot block later requests for this session.
    /// Committing a handle whose identifier was never materialized is a
    /// success no-op.
    pub async fn commit(self) -> SessionResult<()> {
        let (sid, values, guard) = {
            let mut state = self.state.write().await;
            (
                mem::take(&mut state.sid),
                mem::take(&mut state.values),
                state.guard.take(),
            )
        };

        let result = if sid.is_empty() {
            Ok(())
        } else {
            self.inner
                .store
                .commit(SessionRecord::with_values(sid, values))
                .await
        };
        drop(guard);
        result
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Session");
        match self.state.try_read() {
            Ok(state) => out.field("sid", &state.sid).finish_non_exhaustive(),
            Err(_) => out.finish_non_exhaustive(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.guard.take().is_some() {
            warn!(sid = %state.sid, "session dropped without commit; releasing its identifier");
        }
    }
}
