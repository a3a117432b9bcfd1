//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Connections are persistent (keep-alive) unless the peer or the response says
//! otherwise. Streamed bodies are written chunk by chunk as they arrive.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::body::{LAST_CHUNK, encode_chunk};
use crate::http::response::Framing;
use crate::http::{
    Body, Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The ssrd HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use ssrd::server::Server;
/// use ssrd::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8081").await?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, dispatching requests to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until_shutdown(handler, std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// The handler is wrapped in an [`Arc`] and shared across all spawned
    /// connection tasks. Once `shutdown` fires no new connections are
    /// accepted; connections already open finish their current response.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run_until_shutdown<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "ssrd listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    debug!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

fn payload_too_large() -> Response {
    Response::text(StatusCode::PayloadTooLarge, "Request entity too large").keep_alive(false)
}

/// Handles a single TCP connection over its lifetime.
///
/// Requests are served one at a time, in order. Bytes left over after a
/// request (a pipelined next request) are parsed before reading again.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let parsed = if buf.is_empty() {
            None
        } else {
            match Request::parse(&buf) {
                Ok((request, body_offset)) => {
                    let declared = request.content_length().unwrap_or(0);
                    match body_offset
                        .checked_add(declared)
                        .filter(|&total| total <= MAX_REQUEST_SIZE)
                    {
                        Some(total) => (buf.len() >= total).then_some((request, total)),
                        None => {
                            warn!(peer = %peer_addr, declared, "declared body too large, sending 413");
                            write_response(&mut stream, payload_too_large(), Framing::Chunked, false)
                                .await?;
                            break;
                        }
                    }
                }
                // Headers not yet fully received: read more data.
                Err(RequestError::Incomplete) => None,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response = Response::text(StatusCode::BadRequest, format!("Bad Request: {e}"))
                        .keep_alive(false);
                    write_response(&mut stream, response, Framing::Chunked, false).await?;
                    break;
                }
            }
        };

        let Some((request, consumed)) = parsed else {
            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large, sending 413");
                write_response(&mut stream, payload_too_large(), Framing::Chunked, false).await?;
                break;
            }
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            continue;
        };
        buf.advance(consumed);

        let framing = if request.version() == 0 {
            Framing::CloseDelimited
        } else {
            Framing::Chunked
        };
        let head_only = *request.method() == Method::Head;
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await;
        let response = if keep_alive {
            response
        } else {
            response.keep_alive(false)
        };

        if !write_response(&mut stream, response, framing, head_only).await? {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

/// Writes `response` to `out`. Returns whether the connection may be reused.
///
/// A streamed body that fails midway cannot be reported to the client since
/// the status line is already out; the connection is closed instead.
pub(crate) async fn write_response<W>(
    out: &mut W,
    response: Response,
    framing: Framing,
    head_only: bool,
) -> std::io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let close_delimited = response.is_streaming() && framing == Framing::CloseDelimited;
    let mut reusable = response.is_keep_alive() && !close_delimited;
    let (head, body) = response.into_parts(framing);
    out.write_all(&head).await?;

    match body {
        _ if head_only => {}
        Body::Full(bytes) => out.write_all(&bytes).await?,
        Body::Stream(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "streamed body failed, closing connection");
                        out.flush().await?;
                        return Ok(false);
                    }
                };
                if chunk.is_empty() {
                    continue;
                }
                match framing {
                    Framing::Chunked => out.write_all(&encode_chunk(&chunk)).await?,
                    Framing::CloseDelimited => out.write_all(&chunk).await?,
                }
            }
            if framing == Framing::Chunked {
                out.write_all(LAST_CHUNK).await?;
            } else {
                reusable = false;
            }
        }
    }

    out.flush().await?;
    Ok(reusable)
}
