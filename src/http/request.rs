use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::error::ParseErrorKind;
use crate::http::body::Body;
use crate::http::connection::ConnectionInfo;
use crate::http::headers::Headers;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Message loop-back test
    TRACE,
    /// CONNECT - Establish a tunnel
    CONNECT,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Method names are case-sensitive.
    ///
    /// # Example
    ///
    /// ```
    /// # use keel::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version of a request, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    Http10,
    Http11,
    H2,
}

impl Version {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/2" | "HTTP/2.0" => Some(Version::H2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::H2 => "HTTP/2",
        }
    }
}

/// URI parts derived from the request target and the Host header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUri {
    /// Target exactly as it appeared on the request line.
    pub raw: String,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    /// Normalized path; `*` for asterisk-form targets.
    pub path: String,
    pub query: Option<String>,
}

impl RequestUri {
    /// Derives URI parts for an origin-form, absolute-form or asterisk-form
    /// target. `host` is the Host header value (or HTTP/2 authority).
    pub fn derive(target: &str, host: Option<&str>, encrypted: bool) -> Result<Self, ParseErrorKind> {
        let default_scheme = if encrypted { "https" } else { "http" };
        let host = host.map(str::trim).filter(|h| !h.is_empty()).unwrap_or("localhost");

        if target == "*" {
            let base = Url::parse(&format!("{default_scheme}://{host}/"))
                .map_err(|_| ParseErrorKind::InvalidTarget)?;
            return Ok(Self::from_url(target, &base, "*".to_string(), None));
        }

        let url = if target.starts_with('/') {
            Url::parse(&format!("{default_scheme}://{host}{target}"))
        } else if target.starts_with("http://") || target.starts_with("https://") {
            Url::parse(target)
        } else {
            return Err(ParseErrorKind::InvalidTarget);
        }
        .map_err(|_| ParseErrorKind::InvalidTarget)?;

        let path = url.path().to_string();
        let query = url.query().map(str::to_string);
        Ok(Self::from_url(target, &url, path, query))
    }

    fn from_url(raw: &str, url: &Url, path: String, query: Option<String>) -> Self {
        Self {
            raw: raw.to_string(),
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port(),
            path,
            query,
        }
    }
}

/// Represents a parsed HTTP request.
///
/// The entity body is not buffered up front: `body` is fed by the connection
/// while handlers run and can be streamed or buffered on demand.
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    pub uri: RequestUri,
    pub version: Version,
    pub headers: Headers,
    pub body: Body,
    /// The connection this request arrived on
    pub connection: Arc<ConnectionInfo>,
    attributes: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Request {
    pub fn new(
        method: Method,
        uri: RequestUri,
        version: Version,
        headers: Headers,
        body: Body,
        connection: Arc<ConnectionInfo>,
    ) -> Self {
        Self {
            method,
            uri,
            version,
            headers,
            body,
            connection,
            attributes: HashMap::new(),
        }
    }

    /// The request path, without query string.
    pub fn path(&self) -> &str {
        &self.uri.path
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query.as_deref()
    }

    /// Retrieves the first value of a header (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Declared Content-Length, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// Determines whether the client wants the connection kept open.
    ///
    /// HTTP/1.1 is persistent unless `Connection: close` is sent, HTTP/1.0
    /// only with an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
            Version::Http11 => !self.headers.has_token("Connection", "close"),
            Version::H2 => true,
        }
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11 && self.headers.has_token("Expect", "100-continue")
    }

    /// Stores a value for later middleware or responders.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    pub fn attribute<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove_attribute(&mut self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("connection", &self.connection.id)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for constructing Request objects outside a live connection.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<Version>,
    headers: Headers,
    body: Option<Bytes>,
    connection: Option<Arc<ConnectionInfo>>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Request target, e.g. `/search?q=rust`.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn connection(mut self, connection: Arc<ConnectionInfo>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let method = self.method.ok_or("method missing")?;
        let target = self.target.ok_or("target missing")?;
        let connection = self.connection.unwrap_or_else(|| Arc::new(ConnectionInfo::detached()));
        let uri = RequestUri::derive(&target, self.headers.get("Host"), connection.is_encrypted())
            .map_err(|_| "invalid target")?;
        let body = self.body.map(Body::from).unwrap_or_else(Body::empty);

        Ok(Request::new(
            method,
            uri,
            self.version.unwrap_or(Version::Http11),
            self.headers,
            body,
            connection,
        ))
    }
}
