//! SQLite-backed session storage.
//!
//! This module requires the `sqlite` feature flag.

use crate::config::validate_interval;
use crate::error::{SessionError, SessionResult};
use crate::traits::{SessionRecord, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;

/// Map operational sqlx failures, turning a closed pool into the uniform
/// fail-fast error.
fn db_err(e: sqlx::Error) -> SessionError {
    match e {
        sqlx::Error::PoolClosed => SessionError::Closed,
        other => SessionError::Database(other),
    }
}

/// The table name is interpolated into SQL, so only identifier characters
/// are accepted.
fn validate_table_name(table: &str) -> SessionResult<()> {
    if table.is_empty() {
        return Err(SessionError::Validation(
            "table name must not be empty".to_string(),
        ));
    }
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SessionError::Validation(format!(
            "table name {table:?} may only contain letters, digits and underscores"
        )));
    }
    Ok(())
}

/// SQLite-backed session store.
///
/// Stores records in a single table `(sid TEXT PRIMARY KEY, atime INTEGER,
/// data TEXT)` with the value set serialized as JSON. The table is created
/// on construction if it does not exist. Fetch filters out stale rows in
/// the lookup itself, so an expired record misses even before the next
/// sweep.
///
/// # Examples
///
/// ```no_run
/// use sesh::{SessionStore, SqliteSessionStore};
/// use sqlx::sqlite::SqlitePool;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = SqlitePool::connect("sqlite:sessions.db").await?;
/// let store = SqliteSessionStore::new(pool, "sessions", Duration::from_secs(3600)).await?;
///
/// let record = store.fetch("abc123").await;
/// assert!(record.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    max_age: chrono::Duration,
    fetch_sql: String,
    commit_sql: String,
    delete_sql: String,
    sweep_sql: String,
}

impl SqliteSessionStore {
    /// Create a store over an externally supplied connection pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - Open SQLite connection pool; the store closes it on
    ///   shutdown
    /// * `table` - Name of the session table; letters, digits and
    ///   underscores only
    /// * `max_age` - Age since last use after which records expire;
    ///   at least five minutes
    pub async fn new(pool: SqlitePool, table: &str, max_age: Duration) -> SessionResult<Self> {
        validate_table_name(table)?;
        validate_interval("max session age", max_age)?;
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|_| SessionError::Validation("max session age out of range".to_string()))?;

        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             sid TEXT PRIMARY KEY, \
             atime INTEGER NOT NULL, \
             data TEXT NOT NULL)"
        );
        sqlx::query(&create_sql).execute(&pool).await?;

        Ok(Self {
            pool,
            max_age,
            fetch_sql: format!("SELECT atime, data FROM {table} WHERE sid = ? AND atime >= ?"),
            commit_sql: format!("INSERT OR REPLACE INTO {table} (sid, atime, data) VALUES (?, ?, ?)"),
            delete_sql: format!("DELETE FROM {table} WHERE sid = ?"),
            sweep_sql: format!("DELETE FROM {table} WHERE atime < ?"),
        })
    }

    /// Unix timestamp below which records count as expired.
    fn cutoff(&self) -> i64 {
        (Utc::now() - self.max_age).timestamp()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn fetch(&self, sid: &str) -> SessionResult<SessionRecord> {
        let row = sqlx::query(&self.fetch_sql)
            .bind(sid)
            .bind(self.cutoff())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(SessionError::NotFound)?;

        let atime: i64 = row.try_get("atime").map_err(db_err)?;
        let data: String = row.try_get("data").map_err(db_err)?;
        let values: HashMap<String, String> = serde_json::from_str(&data)
            .map_err(|e| SessionError::Deserialization(e.to_string()))?;
        let last_used = DateTime::from_timestamp(atime, 0)
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
        let data = serde_json::to_string(&record.values)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        sqlx::query(&self.commit_sql)
            .bind(&record.sid)
            .bind(Utc::now().timestamp())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, sid: &str) -> SessionResult<()> {
        sqlx::query(&self.delete_sql)
            .bind(sid)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn sweep(&self) -> SessionResult<()> {
        sqlx::query(&self.sweep_sql)
            .bind(self.cutoff())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn shutdown(&self) -> SessionResult<()> {
        if self.pool.is_closed() {
            return Err(SessionError::Closed);
        }
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    const MAX_AGE: Duration = Duration::from_secs(300);

    async fn test_pool() -> SqlitePool {
        // A single connection keeps every query on the same in-memory
        // database.
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn test_store() -> SqliteSessionStore {
        SqliteSessionStore::new(test_pool().await, "sessions", MAX_AGE)
            .await
            .unwrap()
    }

    fn record(sid: &str, key: &str, value: &str) -> SessionRecord {
        let mut values = HashMap::new();
        values.insert(key.to_string(), value.to_string());
        SessionRecord::with_values(sid, values)
    }

    async fn backdate(store: &SqliteSessionStore, sid: &str, age: Duration) {
        let atime = (Utc::now() - chrono::Duration::from_std(age).unwrap()).timestamp();
        sqlx::query("UPDATE sessions SET atime = ? WHERE sid = ?")
            .bind(atime)
            .bind(sid)
            .execute(&store.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_bad_table_names() {
        for table in ["", "bad-name", "drop table", "s;--"] {
            let err = SqliteSessionStore::new(test_pool().await, table, MAX_AGE)
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Validation(_)), "{table:?}");
        }
    }

    #[tokio::test]
    async fn rejects_short_max_age() {
        let err = SqliteSessionStore::new(test_pool().await, "sessions", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[tokio::test]
    async fn commit_then_fetch_round_trips() {
        let store = test_store().await;
        store.commit(record("abc", "color", "blue")).await.unwrap();

        let fetched = store.fetch("abc").await.unwrap();
        assert_eq!(fetched.sid, "abc");
        assert_eq!(fetched.values.get("color").map(String::as_str), Some("blue"));
        assert!(fetched.last_used.timestamp() > 0);
    }

    #[tokio::test]
    async fn fetch_miss_returns_not_found() {
        let store = test_store().await;
        assert!(store.fetch("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn recommit_replaces_values() {
        let store = test_store().await;
        store.commit(record("abc", "color", "blue")).await.unwrap();
        store.commit(record("abc", "color", "red")).await.unwrap();

        let fetched = store.fetch("abc").await.unwrap();
        assert_eq!(fetched.values.get("color").map(String::as_str), Some("red"));
    }

    #[tokio::test]
    async fn empty_sid_commit_is_a_noop() {
        let store = test_store().await;
        store.commit(record("", "k", "v")).await.unwrap();
        assert!(store.fetch("").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = test_store().await;
        store.delete("absent").await.unwrap();

        store.commit(record("abc", "k", "v")).await.unwrap();
        store.delete("abc").await.unwrap();
        assert!(store.fetch("abc").await.unwrap_err().is_not_found());
        store.delete("abc").await.unwrap();
    }

    #[tokio::test]
    async fn stale_record_misses_before_sweep_runs() {
        let store = test_store().await;
        store.commit(record("abc", "k", "v")).await.unwrap();
        backdate(&store, "abc", MAX_AGE + Duration::from_secs(10)).await;

        assert!(store.fetch("abc").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_records() {
        let store = test_store().await;
        store.commit(record("old", "k", "v")).await.unwrap();
        store.commit(record("fresh", "k", "v")).await.unwrap();
        backdate(&store, "old", MAX_AGE + Duration::from_secs(10)).await;

        store.sweep().await.unwrap();

        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM sessions")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .try_get("n")
            .unwrap();
        assert_eq!(n, 1);
        assert!(store.fetch("fresh").await.is_ok());
    }

    #[tokio::test]
    async fn configured_table_name_is_used() {
        let pool = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone(), "app_sessions", MAX_AGE)
            .await
            .unwrap();
        store.commit(record("abc", "k", "v")).await.unwrap();

        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM app_sessions")
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("n")
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn operations_after_shutdown_fail_fast() {
        let store = test_store().await;
        store.shutdown().await.unwrap();

        assert!(matches!(
            store.fetch("abc").await.unwrap_err(),
            SessionError::Closed
        ));
        assert!(matches!(
            store.shutdown().await.unwrap_err(),
            SessionError::Closed
        ));
    }
}
