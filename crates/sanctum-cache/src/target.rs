//! Connection target parsing for the cache store.
//!
//! Two forms are accepted:
//!
//! - bare `host:port` (port defaults to 6379 when omitted)
//! - `scheme://[:password@]host[:port][/db]` with scheme `plain`/`redis`
//!   or `tls`/`rediss`
//!
//! Parsing never fails. A string that looks like a URI but does not parse as
//! one is used verbatim as the address, so loose local-development strings
//! still produce a target.

use std::fmt;

use url::Url;

/// Default port for Redis-compatible stores.
pub const DEFAULT_PORT: u16 = 6379;

/// A parsed cache store connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    /// `host:port` to connect to.
    pub addr: String,
    /// Password for `AUTH`, if any.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Whether the connection is wrapped in TLS.
    pub tls: bool,
}

impl StoreTarget {
    /// Parse a connection string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if !raw.contains("://") {
            return Self::host_port(raw);
        }

        match Self::parse_uri(raw) {
            Some(target) => target,
            None => {
                tracing::warn!(
                    "Malformed cache store URI, treating the whole string as host:port"
                );
                Self::plain(raw.to_string())
            }
        }
    }

    fn host_port(raw: &str) -> Self {
        let addr = if raw.is_empty() {
            format!("localhost:{DEFAULT_PORT}")
        } else if raw.contains(':') {
            raw.to_string()
        } else {
            format!("{raw}:{DEFAULT_PORT}")
        };
        Self::plain(addr)
    }

    fn plain(addr: String) -> Self {
        Self {
            addr,
            password: None,
            db: 0,
            tls: false,
        }
    }

    fn parse_uri(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;

        let tls = match url.scheme() {
            "plain" | "redis" => false,
            "tls" | "rediss" => true,
            _ => return None,
        };

        let host = url.host_str().filter(|h| !h.is_empty())?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let password = match url.password() {
            Some(p) if !p.is_empty() => Some(urlencoding::decode(p).ok()?.into_owned()),
            _ => None,
        };

        let db = match url.path().trim_matches('/') {
            "" => 0,
            segment => segment.parse::<i64>().ok().filter(|db| *db >= 0)?,
        };

        Some(Self {
            addr: format!("{host}:{port}"),
            password,
            db,
            tls,
        })
    }

    /// Render the target as a `redis://` or `rediss://` URL for the client.
    pub fn to_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = self
            .password
            .as_ref()
            .map(|p| format!(":{}@", urlencoding::encode(p)))
            .unwrap_or_default();
        format!("{scheme}://{auth}{}/{}", self.addr, self.db)
    }
}

impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "tls" } else { "plain" };
        let auth = if self.password.is_some() { ":***@" } else { "" };
        write!(f, "{scheme}://{auth}{}/{}", self.addr, self.db)
    }
}
