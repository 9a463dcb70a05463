//! Storage contract shared by all session backends.

use crate::error::SessionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A durable session record: the value set plus its last-used time.
///
/// Records are the backend-side projection of a session. Many short-lived
/// [`Session`](crate::session::Session) handles map onto one record over
/// the record's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier
    pub sid: String,
    /// Session values as string key-value pairs
    pub values: HashMap<String, String>,
    /// Time of the last commit
    pub last_used: DateTime<Utc>,
}

impl SessionRecord {
    /// Create an empty record for the given identifier, stamped now.
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            values: HashMap::new(),
            last_used: Utc::now(),
        }
    }

    /// Create a record carrying an existing value set, stamped now.
    pub fn with_values(sid: impl Into<String>, values: HashMap<String, String>) -> Self {
        Self {
            sid: sid.into(),
            values,
            last_used: Utc::now(),
        }
    }
}

/// Storage backend contract for session records.
///
/// All backends expose the same five operations. Calls for different
/// identifiers may run fully in parallel; calls for the same identifier
/// are serialized by the manager's per-identifier locking, so a backend
/// only has to keep individual operations atomic.
///
/// # Examples
///
/// ```no_run
/// use sesh::{MemorySessionStore, SessionRecord, SessionStore};
/// use std::collections::HashMap;
/// use std::time::Duration;
///
/// # async fn example() -> sesh::SessionResult<()> {
/// let store = MemorySessionStore::new(Duration::from_secs(3600))?;
///
/// let mut values = HashMap::new();
/// values.insert("user_id".to_string(), "123".to_string());
/// store.commit(SessionRecord::with_values("abc123", values)).await?;
///
/// let record = store.fetch("abc123").await?;
/// assert_eq!(record.values.get("user_id").map(String::as_str), Some("123"));
///
/// store.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the record for an identifier.
    ///
    /// The returned value set is a copy: mutating it never changes backend
    /// state until a later [`commit`](SessionStore::commit).
    ///
    /// # Arguments
    ///
    /// * `sid` - The session identifier to look up
    ///
    /// # Returns
    ///
    /// The stored record, or [`SessionError::NotFound`] when no record
    /// exists or the record is older than the backend's max age.
    ///
    /// [`SessionError::NotFound`]: crate::error::SessionError::NotFound
    async fn fetch(&self, sid: &str) -> SessionResult<SessionRecord>;

    /// Persist a record, refreshing its last-used time to now.
    ///
    /// The stored value set is replaced wholesale. Committing a record with
    /// an empty `sid` is a success no-op; such records belong to sessions
    /// that were never materialized.
    ///
    /// # Arguments
    ///
    /// * `record` - The record to persist
    async fn commit(&self, record: SessionRecord) -> SessionResult<()>;

    /// Remove the record for an identifier.
    ///
    /// Deleting an absent record is a success, not an error.
    async fn delete(&self, sid: &str) -> SessionResult<()>;

    /// Remove every record whose age since last use exceeds the backend's
    /// max age. Errors inspecting individual records are skipped so one bad
    /// record cannot abort the scan.
    async fn sweep(&self) -> SessionResult<()>;

    /// Release backend resources.
    ///
    /// Every operation issued after shutdown fails fast with
    /// [`SessionError::Closed`](crate::error::SessionError::Closed) rather
    /// than hanging.
    async fn shutdown(&self) -> SessionResult<()>;
}

/// Generate a new session identifier: 32 random bytes, hex-encoded.
///
/// Identifiers are never reused; clearing a session always mints a fresh
/// one. The same generator backs anti-forgery action tokens.
pub fn generate_sid() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.random()).collect();
    hex::encode(bytes)
}
