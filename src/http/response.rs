//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing responses and splitting
//! them into a serialized head plus a [`Body`] for transmission.

use bytes::{BufMut, BytesMut};

use super::{Body, Headers, StatusCode};

/// How the server will delimit a streamed body on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Transfer-Encoding: chunked` (HTTP/1.1 peers).
    Chunked,
    /// No length at all; the body ends when the connection closes (HTTP/1.0 peers).
    CloseDelimited,
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use ssrd::http::{Response, StatusCode};
/// use ssrd::http::response::Framing;
///
/// let response = Response::html("<p>hi</p>").header("Server", "ssrd");
/// let (head, _body) = response.into_parts(Framing::Chunked);
/// let text = std::str::from_utf8(&head).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 9\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::empty(),
            keep_alive: true,
        }
    }

    /// `200 OK` with `Content-Type: text/html; charset=utf-8`.
    pub fn html(body: impl Into<Body>) -> Self {
        Self::new(StatusCode::Ok)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(body)
    }

    /// A plain-text response with the given status.
    pub fn text(status: StatusCode, body: impl Into<Body>) -> Self {
        Self::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
    }

    /// `302 Found` pointing at `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(StatusCode::Found).header("Location", location)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header in place, replacing any previous value. Used by
    /// middleware that decorates a downstream response.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the body with `f(body)`, keeping status and headers.
    #[must_use]
    pub fn map_body(mut self, f: impl FnOnce(Body) -> Body) -> Self {
        self.body = f(std::mem::take(&mut self.body));
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` when the body is streamed.
    pub fn is_streaming(&self) -> bool {
        self.body.is_stream()
    }

    /// Whether the connection stays open after this response is written.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Consumes the response, returning only its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Serializes the status line and headers, returning them with the body.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if a buffered body is
    ///   non-empty and no `Content-Type` header was set.
    /// - `Content-Length: <n>` for buffered bodies, or the header implied by
    ///   `framing` for streamed ones.
    /// - `Connection: keep-alive` or `Connection: close`.
    ///
    /// A close-delimited stream forces `Connection: close`.
    pub fn into_parts(mut self, framing: Framing) -> (BytesMut, Body) {
        if !self.status.allows_body() {
            self.body = Body::empty();
        }

        let length_header = match &self.body {
            Body::Full(bytes) => {
                if !bytes.is_empty() && !self.headers.contains("content-type") {
                    self.headers
                        .insert("Content-Type", "text/plain; charset=utf-8");
                }
                Some(("Content-Length", bytes.len().to_string()))
            }
            Body::Stream(_) => match framing {
                Framing::Chunked => Some(("Transfer-Encoding", "chunked".to_owned())),
                Framing::CloseDelimited => {
                    self.keep_alive = false;
                    None
                }
            },
        };

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // The framing header is always the last header before the blank line
        if let Some((name, value)) = length_header {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.put(&b"\r\n"[..]);

        (buf, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
