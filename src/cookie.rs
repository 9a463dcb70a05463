//! Cookie transport between the manager and a request/response pair.

use crate::config::SessionConfig;
use std::collections::HashMap;
use std::sync::Mutex;

/// Transport-side view of one request/response exchange.
///
/// The manager reads the inbound session token through this trait and
/// writes the outbound `Set-Cookie` value back through it. Implementations
/// adapt whatever request/response types the host application uses.
pub trait SessionTransport: Send + Sync {
    /// The value of the named cookie on the inbound request, if any.
    fn token(&self, name: &str) -> Option<String>;

    /// Queue a `Set-Cookie` header value on the outbound response.
    fn set_cookie(&self, cookie: String);
}

/// Render the session cookie with its fixed attributes.
pub(crate) fn format_cookie(config: &SessionConfig, sid: &str) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly",
        config.cookie_name,
        sid,
        config.cookie_max_age.as_secs()
    );
    if config.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Write the session cookie for `sid` to the transport.
pub(crate) fn write_cookie(transport: &dyn SessionTransport, config: &SessionConfig, sid: &str) {
    transport.set_cookie(format_cookie(config, sid));
}

/// Split a `Set-Cookie` value into its cookie name and value, dropping
/// the attributes.
pub fn parse_set_cookie(header: &str) -> Option<(&str, &str)> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Extract the named cookie's value from a raw request `Cookie:` header
/// value, e.g. `"a=1; session=abc; b=2"`. Transport implementations can
/// build [`SessionTransport::token`] on top of this.
pub fn parse_cookie_token<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (n, v) = pair.trim().split_once('=')?;
        (n == name).then_some(v)
    })
}

/// In-memory transport for tests and examples.
///
/// Holds the cookies "sent" with the request and collects the cookies
/// written to the response.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    cookies: Mutex<HashMap<String, String>>,
    written: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Transport for a request carrying no cookies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for a request carrying one cookie.
    pub fn with_cookie(name: &str, value: &str) -> Self {
        let transport = Self::default();
        transport.insert(name, value);
        transport
    }

    /// Add an inbound cookie, as if the client had sent it.
    pub fn insert(&self, name: &str, value: &str) {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.insert(name.to_string(), value.to_string());
        }
    }

    /// The `Set-Cookie` values written during this exchange, in order.
    pub fn written(&self) -> Vec<String> {
        self.written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl SessionTransport for MemoryTransport {
    fn token(&self, name: &str) -> Option<String> {
        self.cookies.lock().ok()?.get(name).cloned()
    }

    fn set_cookie(&self, cookie: String) {
        if let Ok(mut written) = self.written.lock() {
            written.push(cookie);
        }
    }
}
