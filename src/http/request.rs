//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::borrow::Cow;

use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request target must be origin-form or absolute-form, got {target:?}")]
    InvalidTarget { target: String },
}

/// A fully parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. The original request
/// target (path plus query) is kept verbatim in [`Request::uri`]; it is what
/// the micro-cache keys on and what the upstream proxy forwards.
/// Absolute-form targets (`http://host/path?q`) are reduced to their
/// origin-form `path?q` at parse time.
///
/// # Examples
///
/// ```
/// use ssrd::http::request::Request;
///
/// let raw = b"GET /v1/get_entry_by_rank?limit=20 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/v1/get_entry_by_rank");
/// assert_eq!(request.uri(), "/v1/get_entry_by_rank?limit=20");
/// assert_eq!(request.query_string(), Some("limit=20"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    path_len: usize,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    /// The body itself is left in `buf`; its length is [`Request::content_length`].
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the headers.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    /// - [`RequestError::InvalidTarget`]: the target is neither origin-form
    ///   (`/...`) nor absolute-form (`scheme://authority/...`).
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});

        let raw_target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let target = origin_form(raw_target).ok_or_else(|| RequestError::InvalidTarget {
            target: raw_target.to_owned(),
        })?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self::from_parts(method, &target, version, header_map),
            body_offset,
        ))
    }

    /// Builds a `GET` request for `target` without going through the wire
    /// parser. Handy for warming caches and for tests.
    pub fn get(target: impl Into<String>) -> Self {
        let target: String = target.into();
        Self::from_parts(Method::Get, &target, 1, Headers::new())
    }

    fn from_parts(method: Method, target: &str, version: u8, headers: Headers) -> Self {
        let path_len = target.find('?').unwrap_or(target.len());
        Self {
            method,
            target: target.to_owned(),
            path_len,
            version,
            headers,
        }
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.target[..self.path_len]
    }

    /// Returns the original request target: path plus `?query` if present.
    pub fn uri(&self) -> &str {
        &self.target
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.target.get(self.path_len + 1..)
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Reduces a request target to origin-form.
///
/// `/path?q` is returned as is. `scheme://authority/path?q` loses its scheme
/// and authority; an empty path becomes `/`. Anything else is rejected.
fn origin_form(target: &str) -> Option<Cow<'_, str>> {
    if target.starts_with('/') {
        return Some(Cow::Borrowed(target));
    }
    let (scheme, rest) = target.split_once("://")?;
    let valid_scheme = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return None;
    }
    match rest.find(['/', '?']) {
        Some(at) if rest[at..].starts_with('/') => Some(Cow::Borrowed(&rest[at..])),
        Some(at) => Some(Cow::Owned(format!("/{}", &rest[at..]))),
        None => Some(Cow::Borrowed("/")),
    }
}
