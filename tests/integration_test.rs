//! Integration tests for sesh

use sesh::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_AGE: Duration = Duration::from_secs(600);

/// Run one request against the manager the way a web handler would:
/// clear first, then store, then read, then commit. Cookies written to
/// the response are folded back into the browser's jar.
async fn handle(
    manager: &SessionManager,
    jar: &mut HashMap<String, String>,
    clear: bool,
    put: Option<(&str, &str)>,
    get: Option<&str>,
) -> String {
    let transport = Arc::new(MemoryTransport::new());
    for (name, value) in jar.iter() {
        transport.insert(name, value);
    }

    let session = manager.begin(transport.clone()).await.unwrap();
    if clear {
        session.clear().await.unwrap();
    }
    if let Some((key, value)) = put {
        session.set(key, value).await;
    }
    let body = match get {
        Some(key) => match session.get(key).await {
            Some(value) => format!("Got: {}", value),
            None => "NotFound".to_string(),
        },
        None => String::new(),
    };
    session.commit().await.unwrap();

    for header in transport.written() {
        if let Some((name, value)) = parse_set_cookie(&header) {
            jar.insert(name.to_string(), value.to_string());
        }
    }
    body
}

/// The full browser-visible session lifecycle against one backend.
async fn run_browser_scenario(manager: SessionManager) {
    let mut jar = HashMap::new();

    // First visit carries no cookie and finds nothing, but leaves with
    // a session cookie.
    let body = handle(&manager, &mut jar, false, None, Some("color")).await;
    assert_eq!(body, "NotFound");
    let first_sid = jar.get("session").unwrap().clone();
    assert_eq!(first_sid.len(), 64);

    // Storing a value keeps the same identifier.
    let body = handle(&manager, &mut jar, false, Some(("color", "blue")), None).await;
    assert_eq!(body, "");
    assert_eq!(jar.get("session").unwrap(), &first_sid);

    // The value survives into the next request.
    let body = handle(&manager, &mut jar, false, None, Some("color")).await;
    assert_eq!(body, "Got: blue");

    // Clearing discards the values and rotates the identifier.
    let body = handle(&manager, &mut jar, true, None, Some("color")).await;
    assert_eq!(body, "NotFound");
    let second_sid = jar.get("session").unwrap().clone();
    assert_ne!(second_sid, first_sid);

    // The old identifier is gone for good.
    let mut old_jar = HashMap::from([("session".to_string(), first_sid.clone())]);
    let body = handle(&manager, &mut old_jar, false, None, Some("color")).await;
    assert_eq!(body, "NotFound");
    assert_ne!(old_jar.get("session").unwrap(), &first_sid);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_browser_round_trip_memory() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store, "session").unwrap();
    run_browser_scenario(manager).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_browser_round_trip_sqlite() {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteSessionStore::new(pool, "sessions", MAX_AGE).await.unwrap();
    let manager = SessionManager::new(Arc::new(store), "session").unwrap();
    run_browser_scenario(manager).await;
}

#[cfg(feature = "redb")]
#[tokio::test]
async fn test_browser_round_trip_redb() {
    let db = redb::Database::builder()
        .create_with_backend(redb::backends::InMemoryBackend::new())
        .unwrap();
    let store = RedbSessionStore::new(Arc::new(db), MAX_AGE).unwrap();
    let manager = SessionManager::new(Arc::new(store), "session").unwrap();
    run_browser_scenario(manager).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_identifier_requests_are_serialized() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = Arc::new(SessionManager::new(store, "session").unwrap());

    // Seed a session every task will present.
    let transport = Arc::new(MemoryTransport::new());
    let session = manager.begin(transport).await.unwrap();
    session.set("count", "0").await;
    let sid = session.sid().await;
    session.commit().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let sid = sid.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                let transport = Arc::new(MemoryTransport::with_cookie("session", &sid));
                let session = manager.begin(transport).await.unwrap();
                let count: u32 = session.get("count").await.unwrap().parse().unwrap();
                session.set("count", (count + 1).to_string()).await;
                session.commit().await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Read-modify-write cycles never interleaved, so no increment was lost.
    let transport = Arc::new(MemoryTransport::with_cookie("session", &sid));
    let session = manager.begin(transport).await.unwrap();
    assert_eq!(session.get("count").await, Some("200".to_string()));
    session.commit().await.unwrap();

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_action_token_round_trip() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store, "session").unwrap();

    let transport = Arc::new(MemoryTransport::new());
    let session = manager.begin(transport).await.unwrap();

    // Fresh sessions come with a token already minted.
    let token = session.action_token().await.unwrap();
    assert_eq!(token.len(), 64);
    assert!(session.verify_action_token(&token).await);
    assert!(!session.verify_action_token("forged").await);
    assert!(!session.verify_action_token("").await);

    // Rotation invalidates the old token.
    let fresh = session.rotate_action_token().await;
    assert_ne!(fresh, token);
    assert!(!session.verify_action_token(&token).await);
    assert!(session.verify_action_token(&fresh).await);

    let sid = session.sid().await;
    session.commit().await.unwrap();

    // The current token persists like any other value.
    let transport = Arc::new(MemoryTransport::with_cookie("session", &sid));
    let session = manager.begin(transport).await.unwrap();
    assert!(session.verify_action_token(&fresh).await);
    session.commit().await.unwrap();

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removed_values_stay_gone_after_commit() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store, "session").unwrap();

    let transport = Arc::new(MemoryTransport::new());
    let session = manager.begin(transport).await.unwrap();
    session.set("color", "blue").await;
    session.set("shape", "round").await;
    assert_eq!(session.remove("color").await, Some("blue".to_string()));
    assert_eq!(session.remove("color").await, None);
    assert_eq!(session.get("color").await, None);
    let sid = session.sid().await;
    session.commit().await.unwrap();

    // Only the surviving key was persisted.
    let transport = Arc::new(MemoryTransport::with_cookie("session", &sid));
    let session = manager.begin(transport).await.unwrap();
    assert_eq!(session.get("color").await, None);
    assert_eq!(session.get("shape").await, Some("round".to_string()));
    session.commit().await.unwrap();

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_cookie_starts_fresh() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store, "session").unwrap();

    let stale = generate_sid();
    let transport = Arc::new(MemoryTransport::with_cookie("session", &stale));
    let session = manager.begin(transport.clone()).await.unwrap();
    assert_ne!(session.sid().await, stale);
    assert_eq!(session.get("anything").await, None);

    // The response points the browser at the replacement identifier.
    let written = transport.written();
    let header = written.last().unwrap();
    let (name, value) = parse_set_cookie(header).unwrap();
    assert_eq!(name, "session");
    assert_eq!(value, session.sid().await);

    session.commit().await.unwrap();
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_cookie_value_starts_fresh() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store, "session").unwrap();

    // Some clients send the cookie header with an empty value; that is
    // the same as presenting no cookie.
    let transport = Arc::new(MemoryTransport::with_cookie("session", ""));
    let session = manager.begin(transport).await.unwrap();
    assert_eq!(session.sid().await.len(), 64);
    assert_eq!(session.get("anything").await, None);
    session.commit().await.unwrap();

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cookie_attributes_on_the_wire() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store, "session").unwrap();

    let transport = Arc::new(MemoryTransport::new());
    let session = manager.begin(transport.clone()).await.unwrap();
    let sid = session.sid().await;
    session.commit().await.unwrap();

    let header = transport.written().pop().unwrap();
    assert_eq!(
        header,
        format!("session={}; Path=/; Max-Age=2592000; HttpOnly", sid)
    );
    assert!(!header.contains("Secure"));

    // Secure applies to every response after the toggle.
    manager.set_secure(true).await;
    let transport = Arc::new(MemoryTransport::with_cookie("session", &sid));
    let session = manager.begin(transport.clone()).await.unwrap();
    session.commit().await.unwrap();
    assert!(transport.written().pop().unwrap().ends_with("; Secure"));

    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_sessions_expire_end_to_end() {
    let store = Arc::new(MemorySessionStore::new(Duration::from_secs(300)).unwrap());
    let config = SessionConfig::new("session")
        .unwrap()
        .with_gc_delay(Duration::from_secs(300));
    let manager = SessionManager::with_config(store, config).unwrap();

    let transport = Arc::new(MemoryTransport::new());
    let session = manager.begin(transport).await.unwrap();
    session.set("color", "blue").await;
    let sid = session.sid().await;
    session.commit().await.unwrap();

    // Idle past the expiry window; the sweep also gets a chance to run.
    tokio::time::advance(Duration::from_secs(301)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    // The browser still has the cookie, but the session is gone.
    let transport = Arc::new(MemoryTransport::with_cookie("session", &sid));
    let session = manager.begin(transport).await.unwrap();
    assert_ne!(session.sid().await, sid);
    assert_eq!(session.get("color").await, None);
    session.commit().await.unwrap();

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_the_backend() {
    let store = Arc::new(MemorySessionStore::new(MAX_AGE).unwrap());
    let manager = SessionManager::new(store.clone(), "session").unwrap();

    manager.shutdown().await.unwrap();

    // The backend refuses work once closed.
    assert!(matches!(
        store.fetch("anything").await,
        Err(SessionError::Closed)
    ));
    // A second shutdown reports the manager already closed.
    assert!(matches!(manager.shutdown().await, Err(SessionError::Closed)));
}

#[test]
fn test_error_display() {
    let err = SessionError::Validation("cookie name must not be empty".to_string());
    assert!(format!("{}", err).contains("cookie name"));

    assert!(SessionError::NotFound.is_not_found());
    assert!(!SessionError::Closed.is_not_found());
}
