//! Streaming passthrough to the upstream API host.

use std::io;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::{Client, header::CONTENT_TYPE};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::http::Body;
use crate::{Request, Response, StatusCode};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream host {host:?}: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },

    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream answered {status} for {url}")]
    Status { status: u16, url: String },
}

/// Forwards requests to `<host><path?query>` and streams the answer back.
///
/// No retries: one failure is one 500 for the client.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: Client,
    base: String,
}

impl UpstreamProxy {
    /// # Errors
    ///
    /// Fails if `host` is not an absolute URL or the client cannot be built.
    pub fn new(host: &str, timeout: Duration) -> Result<Self, ProxyError> {
        Url::parse(host).map_err(|source| ProxyError::InvalidHost {
            host: host.to_owned(),
            source,
        })?;
        let client = Client::builder()
            .user_agent(concat!("ssrd/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base: host.trim_end_matches('/').to_owned(),
        })
    }

    /// The upstream URL a request maps to.
    pub fn upstream_url(&self, request: &Request) -> String {
        format!("{}{}", self.base, request.uri())
    }

    /// Issues the upstream `GET` and returns a response streaming its body.
    ///
    /// Chunks are passed through unmodified and in order. The upstream
    /// status and `Content-Type` are forwarded; a 2xx code without a
    /// [`StatusCode`] variant is relayed as `200 OK`.
    ///
    /// # Errors
    ///
    /// Connection failures and non-2xx answers. Errors after the headers
    /// arrive surface as stream items instead.
    pub async fn forward(&self, request: &Request) -> Result<Response, ProxyError> {
        let url = self.upstream_url(request);
        debug!(%url, "forwarding upstream");

        let upstream = self.client.get(&url).send().await?;
        let status = upstream.status();
        if !status.is_success() {
            return Err(ProxyError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let content_type = upstream
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();
        let relayed = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::Ok);
        let stream = upstream.bytes_stream().map_err(io::Error::other);

        Ok(Response::new(relayed)
            .header("Content-Type", content_type)
            .body(Body::from_stream(stream)))
    }
}
