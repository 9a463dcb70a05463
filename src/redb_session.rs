//! redb-backed session storage.
//!
//! This module requires the `redb` feature flag.

use crate::config::validate_interval;
use crate::error::{SessionError, SessionResult};
use crate::traits::{SessionRecord, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redb::{Database, TableDefinition};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Identifier to last-used time, as Unix seconds.
const ATIME_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sessions_atime");
/// Identifier to JSON-serialized value set.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions_data");

fn kv_err(e: impl Into<redb::Error>) -> SessionError {
    SessionError::Kv(e.into())
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// redb-backed session store.
///
/// Keeps two tables, one holding each identifier's last-used time and one
/// holding its serialized value set; every commit writes both in a single
/// write transaction. Fetch checks the record's age at read time, so a
/// stale record misses even before the next sweep.
///
/// # Examples
///
/// ```no_run
/// use redb::Database;
/// use sesh::{RedbSessionStore, SessionStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let db = Arc::new(Database::create("sessions.redb")?);
/// let store = RedbSessionStore::new(db, Duration::from_secs(3600))?;
/// # Ok(())
/// # }
/// ```
pub struct RedbSessionStore {
    db: Mutex<Option<Arc<Database>>>,
    max_age_secs: u64,
}

impl RedbSessionStore {
    /// Create a store over an externally supplied database handle.
    ///
    /// Both tables are created up front so later reads never race table
    /// creation.
    ///
    /// # Arguments
    ///
    /// * `db` - Open redb database; the store drops its handle on shutdown
    /// * `max_age` - Age since last use after which records expire;
    ///   at least five minutes
    pub fn new(db: Arc<Database>, max_age: Duration) -> SessionResult<Self> {
        validate_interval("max session age", max_age)?;

        let txn = db.begin_write().map_err(kv_err)?;
        {
            txn.open_table(ATIME_TABLE).map_err(kv_err)?;
            txn.open_table(DATA_TABLE).map_err(kv_err)?;
        }
        txn.commit().map_err(kv_err)?;

        Ok(Self {
            db: Mutex::new(Some(db)),
            max_age_secs: max_age.as_secs(),
        })
    }

    fn handle(&self) -> SessionResult<Arc<Database>> {
        self.db.lock().clone().ok_or(SessionError::Closed)
    }
}

impl fmt::Debug for RedbSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbSessionStore")
            .field("max_age_secs", &self.max_age_secs)
            .field("open", &self.db.lock().is_some())
            .finish()
    }
}

#[async_trait]
impl SessionStore for RedbSessionStore {
    async fn fetch(&self, sid: &str) -> SessionResult<SessionRecord> {
        let db = self.handle()?;
        let txn = db.begin_read().map_err(kv_err)?;

        let atimes = txn.open_table(ATIME_TABLE).map_err(kv_err)?;
        let atime = match atimes.get(sid).map_err(kv_err)? {
            Some(guard) => guard.value(),
            None => return Err(SessionError::NotFound),
        };
        if now_secs().saturating_sub(atime) > self.max_age_secs {
            return Err(SessionError::NotFound);
        }

        let datas = txn.open_table(DATA_TABLE).map_err(kv_err)?;
        let values: HashMap<String, String> = match datas.get(sid).map_err(kv_err)? {
            Some(guard) => serde_json::from_slice(guard.value())
                .map_err(|e| SessionError::Deserialization(e.to_string()))?,
            // A dangling atime entry counts as a miss; sweep removes it
            // once it goes stale.
            None => return Err(SessionError::NotFound),
        };
        let last_used = DateTime::from_timestamp(atime as i64, 0)
            .ok_or_else(|| SessionError::Deserialization(format!("invalid atime {atime}")))?;

        Ok(SessionRecord {
            sid: sid.to_string(),
            values,
            last_used,
        })
    }

    async fn commit(&self, record: SessionRecord) -> SessionResult<()> {
        if record.sid.is_empty() {
            return Ok(());
        }
        let data = serde_json::to_vec(&record.values)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        let db = self.handle()?;
        let txn = db.begin_write().map_err(kv_err)?;
        {
            let mut atimes = txn.open_table(ATIME_TABLE).map_err(kv_err)?;
            atimes.insert(record.sid.as_str(), now_secs()).map_err(kv_err)?;
            let mut datas = txn.open_table(DATA_TABLE).map_err(kv_err)?;
            datas.insert(record.sid.as_str(), data.as_slice()).map_err(kv_err)?;
        }
        txn.commit().map_err(kv_err)?;
        Ok(())
    }

    async fn delete(&self, sid: &str) -> SessionResult<()> {
        let db = self.handle()?;
        let txn = db.begin_write().map_err(kv_err)?;
        {
            let mut atimes = txn.open_table(ATIME_TABLE).map_err(kv_err)?;
            atimes.remove(sid).map_err(kv_err)?;
            let mut datas = txn.open_table(DATA_TABLE).map_err(kv_err)?;
            datas.remove(sid).map_err(kv_err)?;
        }
        txn.commit().map_err(kv_err)?;
        Ok(())
    }

    async fn sweep(&self) -> SessionResult<()> {
        let db = self.handle()?;
        let now = now_secs();

        // Collect under a read transaction, delete under a write
        // transaction. One unreadable entry must not abort the scan.
        let mut stale: Vec<String> = Vec::new();
        {
            let txn = db.begin_read().map_err(kv_err)?;
            let atimes = txn.open_table(ATIME_TABLE).map_err(kv_err)?;
            for entry in atimes.range::<&str>(..).map_err(kv_err)? {
                match entry {
                    Ok((sid, atime)) => {
                        if now.saturating_sub(atime.value()) > self.max_age_secs {
                            stale.push(sid.value().to_string());
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "skipping unreadable session entry during sweep");
                    }
                }
            }

            // Data rows without an atime sibling cannot be fetched or
            // expire on their own; remove them too.
            let datas = txn.open_table(DATA_TABLE).map_err(kv_err)?;
            for entry in datas.range::<&str>(..).map_err(kv_err)? {
                match entry {
                    Ok((sid, _)) => match atimes.get(sid.value()) {
                        Ok(Some(_)) => {}
                        Ok(None) => stale.push(sid.value().to_string()),
                        Err(e) => {
                            debug!(error = %e, "skipping unreadable session entry during sweep");
                        }
                    },
                    Err(e) => {
                        debug!(error = %e, "skipping unreadable session data during sweep");
                    }
                }
            }
        }

        if stale.is_empty() {
            return Ok(());
        }

        let txn = db.begin_write().map_err(kv_err)?;
        {
            let mut atimes = txn.open_table(ATIME_TABLE).map_err(kv_err)?;
            let mut datas = txn.open_table(DATA_TABLE).map_err(kv_err)?;
            for sid in &stale {
                if let Err(e) = atimes.remove(sid.as_str()) {
                    warn!(error = %e, "failed to remove stale session entry");
                    continue;
                }
                if let Err(e) = datas.remove(sid.as_str()) {
                    warn!(error = %e, "failed to remove stale session data");
                }
            }
        }
        txn.commit().map_err(kv_err)?;
        Ok(())
    }

    async fn shutdown(&self) -> SessionResult<()> {
        match self.db.lock().take() {
            Some(db) => {
                drop(db);
                Ok(())
            }
            None => Err(SessionError::Closed),
        }
    }
}
