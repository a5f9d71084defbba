//! Endpoint identity — the cache key.
//!
//! An [`Endpoint`] is built once per request from a caller-supplied
//! descriptor (`tcp://host:port?service=XE`) plus credential and service
//! overrides. Two endpoints are the same cache entry iff every attribute is
//! equal; nothing is normalized beyond scheme and port defaulting.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::Url;

/// The only scheme accepted for database endpoints.
pub const DEFAULT_SCHEME: &str = "tcp";

/// Listener port used when the descriptor names none.
pub const DEFAULT_PORT: u16 = 1521;

/// Query parameter carrying the service name.
pub const SERVICE_PARAM: &str = "service";

/// Characters left as-is when a query parameter value is escaped.
const PARAM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Reasons an endpoint descriptor cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("empty endpoint descriptor")]
    Empty,
    #[error("malformed URI {uri:?}: {reason}")]
    Malformed { uri: String, reason: String },
    #[error("unsupported scheme {0:?}, only \"tcp\" is allowed")]
    UnsupportedScheme(String),
    #[error("missing host in {0:?}")]
    MissingHost(String),
    #[error("cannot unescape parameter {name:?}: {reason}")]
    BadParam { name: String, reason: String },
}

/// Value identifying one logical database target and its credentials.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    user: String,
    password: String,
    service: String,
    params: BTreeMap<String, String>,
}

impl Endpoint {
    /// Build an endpoint directly from its parts (scheme `tcp`).
    pub fn new(host: &str, port: u16, service: &str, user: &str, password: &str) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            service: service.to_string(),
            params: BTreeMap::new(),
        }
    }

    /// Parse a descriptor with optional overrides.
    ///
    /// A missing scheme defaults to `tcp`, a missing port to `1521`.
    /// Non-empty `user`/`password`/`service` arguments take precedence over
    /// the URI's userinfo and `service` query parameter. The service value
    /// in the URI must be percent-escaped; the `service` argument is taken
    /// verbatim.
    pub fn parse(
        descriptor: &str,
        user: &str,
        password: &str,
        service: &str,
    ) -> Result<Self, EndpointError> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            return Err(EndpointError::Empty);
        }

        let raw = if descriptor.contains("://") {
            descriptor.to_string()
        } else {
            format!("{DEFAULT_SCHEME}://{descriptor}")
        };

        let url = Url::parse(&raw).map_err(|e| EndpointError::Malformed {
            uri: descriptor.to_string(),
            reason: e.to_string(),
        })?;

        if url.scheme() != DEFAULT_SCHEME {
            return Err(EndpointError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(EndpointError::MissingHost(descriptor.to_string())),
        };

        if !matches!(url.path(), "" | "/") || url.fragment().is_some() {
            return Err(EndpointError::Malformed {
                uri: descriptor.to_string(),
                reason: "unexpected path or fragment".to_string(),
            });
        }

        let mut params = parse_query(url.query().unwrap_or(""))?;
        let uri_service = params.remove(SERVICE_PARAM).unwrap_or_default();

        Ok(Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            user: pick(user, || decode_userinfo("user", url.username()))?,
            password: pick(password, || {
                decode_userinfo("password", url.password().unwrap_or(""))
            })?,
            service: if service.is_empty() {
                uri_service
            } else {
                service.to_string()
            },
            params,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Extra connection parameters from the descriptor's query string.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// `host:port`, for logs. Never includes credentials.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Re-derive the descriptor (without credentials).
    pub fn descriptor(&self) -> String {
        let mut out = format!("{}://{}:{}", self.scheme, self.host, self.port);
        let mut sep = '?';
        if !self.service.is_empty() {
            out.push(sep);
            out.push_str(SERVICE_PARAM);
            out.push('=');
            out.extend(utf8_percent_encode(&self.service, PARAM_VALUE));
            sep = '&';
        }
        for (name, value) in &self.params {
            out.push(sep);
            out.extend(utf8_percent_encode(name, PARAM_VALUE));
            out.push('=');
            out.extend(utf8_percent_encode(value, PARAM_VALUE));
            sep = '&';
        }
        out
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("service", &self.service)
            .field("params", &self.params)
            .finish()
    }
}

fn pick(
    explicit: &str,
    from_uri: impl FnOnce() -> Result<String, EndpointError>,
) -> Result<String, EndpointError> {
    if explicit.is_empty() {
        from_uri()
    } else {
        Ok(explicit.to_string())
    }
}

fn decode_userinfo(name: &str, raw: &str) -> Result<String, EndpointError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| EndpointError::BadParam {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

fn parse_query(query: &str) -> Result<BTreeMap<String, String>, EndpointError> {
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let name = unescape(name, name)?;
        let value = unescape(&name, value)?;
        params.insert(name, value);
    }
    Ok(params)
}

/// Query-string unescaping: `+` is a space, every `%` must start a valid
/// two-digit hex escape, and the result must be UTF-8.
fn unescape(name: &str, raw: &str) -> Result<String, EndpointError> {
    let bad = |reason: String| EndpointError::BadParam {
        name: name.to_string(),
        reason,
    };

    let bytes = raw.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(bad(format!("invalid escape at byte {i}")));
            }
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| bad(e.to_string()))
}
