//! Cookie-backed server-side sessions.
//!
//! A session binds a browser to a bag of string values held on the server.
//! The browser carries only an opaque identifier in a cookie; the values
//! live in a pluggable storage backend and expire after a configurable
//! idle period.
//!
//! # Request Lifecycle
//!
//! Every request goes through the same three steps:
//!
//! 1. [`SessionManager::begin`] reads the session cookie from the request,
//!    locks the identifier so concurrent requests from the same browser
//!    run one at a time, and loads the stored values into a private
//!    working copy (minting a fresh identifier when the cookie is
//!    missing or stale).
//! 2. The handler reads and writes the working copy through the
//!    [`Session`] handle. Nothing is visible to other requests yet.
//! 3. [`Session::commit`] publishes the working copy back to the backend
//!    and releases the identifier.
//!
//! Fresh sessions also carry a random action token under a reserved key,
//! which handlers can round-trip through forms as a CSRF check; see
//! [`Session::verify_action_token`].
//!
//! Expired sessions are dropped lazily on access and in bulk by a
//! background sweep the manager runs on a configurable interval.
//!
//! # Features
//!
//! - `sqlite` - SQLite session storage via `sqlx` (enabled by default)
//! - `redb` - Embedded key-value session storage (enabled by default)
//!
//! The in-memory backend is always available.
//!
//! # Examples
//!
//! ## In-Memory Store
//!
//! ```no_run
//! use sesh::{MemorySessionStore, MemoryTransport, SessionManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sesh::SessionError> {
//!     // Sessions expire after an hour without use.
//!     let store = Arc::new(MemorySessionStore::new(Duration::from_secs(3600))?);
//!     let manager = SessionManager::new(store, "session")?;
//!
//!     // One request: resolve, use, commit.
//!     let transport = Arc::new(MemoryTransport::new());
//!     let session = manager.begin(transport).await?;
//!     session.set("color", "blue").await;
//!     println!("color = {:?}", session.get("color").await);
//!     session.commit().await?;
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## SQLite Store (requires `sqlite` feature)
//!
//! ```no_run
//! use sesh::{SessionManager, SqliteSessionStore};
//! use sqlx::sqlite::SqlitePoolOptions;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sesh::SessionError> {
//!     let pool = SqlitePoolOptions::new()
//!         .max_connections(5)
//!         .connect("sqlite:sessions.db")
//!         .await?;
//!     let store = SqliteSessionStore::new(pool, "sessions", Duration::from_secs(86400)).await?;
//!     let manager = SessionManager::new(Arc::new(store), "session")?;
//!
//!     // Same API as the in-memory store.
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Redb Store (requires `redb` feature)
//!
//! ```no_run
//! use redb::Database;
//! use sesh::{RedbSessionStore, SessionManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Arc::new(Database::create("sessions.redb")?);
//!     let store = RedbSessionStore::new(db, Duration::from_secs(86400))?;
//!     let manager = SessionManager::new(Arc::new(store), "session")?;
//!
//!     // Same API as the in-memory store.
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookie;
pub mod error;
pub mod manager;
pub mod memory_session;
pub mod session;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite_session;

#[cfg(feature = "redb")]
pub mod redb_session;

pub use config::{
    DEFAULT_COOKIE_MAX_AGE, DEFAULT_GC_DELAY, MIN_SESSION_AGE, SHUTDOWN_TIMEOUT, SessionConfig,
};
pub use cookie::{MemoryTransport, SessionTransport, parse_cookie_token, parse_set_cookie};
pub use error::{SessionError, SessionResult};
pub use manager::SessionManager;
pub use memory_session::MemorySessionStore;
pub use session::Session;
pub use traits::{SessionRecord, SessionStore, generate_sid};

#[cfg(feature = "sqlite")]
pub use sqlite_session::SqliteSessionStore;

#[cfg(feature = "redb")]
pub use redb_session::RedbSessionStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::cookie::{MemoryTransport, SessionTransport};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::manager::SessionManager;
    pub use crate::memory_session::MemorySessionStore;
    pub use crate::session::Session;
    pub use crate::traits::{SessionRecord, SessionStore, generate_sid};

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite_session::SqliteSessionStore;

    #[cfg(feature = "redb")]
    pub use crate::redb_session::RedbSessionStore;
}
