//! Session manager configuration.

use crate::error::{SessionError, SessionResult};
use std::time::Duration;

/// Floor for the backend max-age and the GC interval. Values below this
/// would make sessions thrash and are rejected at construction.
pub const MIN_SESSION_AGE: Duration = Duration::from_secs(5 * 60);

/// Default interval between background sweeps.
pub const DEFAULT_GC_DELAY: Duration = Duration::from_secs(60 * 60);

/// Default client-side lifetime of the session cookie.
pub const DEFAULT_COOKIE_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// How long manager shutdown waits for the GC loop to acknowledge the
/// stop signal before giving up on it.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the session cookie
    pub cookie_name: String,
    /// Set the `Secure` attribute on session cookies
    pub secure: bool,
    /// Interval between background sweeps
    pub gc_delay: Duration,
    /// Client-side lifetime of the session cookie
    pub cookie_max_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            secure: false,
            gc_delay: DEFAULT_GC_DELAY,          // 1 hour
            cookie_max_age: DEFAULT_COOKIE_MAX_AGE, // 30 days
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the given cookie name.
    ///
    /// # Arguments
    ///
    /// * `cookie_name` - Name of the cookie carrying the session identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use sesh::SessionConfig;
    ///
    /// let config = SessionConfig::new("myapp_session").unwrap();
    /// ```
    pub fn new(cookie_name: &str) -> SessionResult<Self> {
        if cookie_name.is_empty() {
            return Err(SessionError::Validation(
                "cookie name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            cookie_name: cookie_name.to_string(),
            ..Default::default()
        })
    }

    /// Set the `Secure` cookie attribute.
    ///
    /// # Arguments
    ///
    /// * `secure` - Whether session cookies are restricted to HTTPS
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the interval between background sweeps.
    ///
    /// The value is checked against [`MIN_SESSION_AGE`] when the manager is
    /// constructed.
    ///
    /// # Arguments
    ///
    /// * `delay` - Time between sweeps
    pub fn with_gc_delay(mut self, delay: Duration) -> Self {
        self.gc_delay = delay;
        self
    }

    /// Set the client-side lifetime of the session cookie.
    ///
    /// # Arguments
    ///
    /// * `max_age` - `Max-Age` value written on session cookies
    pub fn with_cookie_max_age(mut self, max_age: Duration) -> Self {
        self.cookie_max_age = max_age;
        self
    }

    /// Check the configuration, failing fast on bad values.
    pub fn validate(&self) -> SessionResult<()> {
        if self.cookie_name.is_empty() {
            return Err(SessionError::Validation(
                "cookie name must not be empty".to_string(),
            ));
        }
        validate_interval("GC delay", self.gc_delay)
    }
}

/// Reject intervals below the five-minute floor.
pub(crate) fn validate_interval(what: &str, value: Duration) -> SessionResult<()> {
    if value < MIN_SESSION_AGE {
        return Err(SessionError::Validation(format!(
            "{} must be at least {}s, got {}s",
            what,
            MIN_SESSION_AGE.as_secs(),
            value.as_secs()
        )));
    }
    Ok(())
}
