//! Response bodies: fully buffered or streamed chunk by chunk.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// A boxed stream of body chunks.
///
/// An `Err` item aborts the response; the server closes the connection
/// since the status line has already been sent.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// The payload of a [`Response`](super::Response).
pub enum Body {
    /// A body whose length is known up front (`Content-Length`).
    Full(Bytes),
    /// A body written as it arrives (`Transfer-Encoding: chunked`).
    Stream(BodyStream),
}

impl Body {
    /// An empty buffered body.
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    /// Wraps any chunk stream as a streamed body.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    /// Returns `true` for streamed bodies.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Buffers the whole body, draining a stream if necessary.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by a streamed body.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Full(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::Full(Bytes::from(v))
    }
}

/// Frames one chunk for `Transfer-Encoding: chunked`.
pub(crate) fn encode_chunk(chunk: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(chunk.len() + 16);
    buf.extend_from_slice(format!("{:X}\r\n", chunk.len()).as_bytes());
    buf.extend_from_slice(chunk);
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Terminating zero-length chunk.
pub(crate) const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[test]
    fn chunk_framing_uses_hex_length() {
        assert_eq!(&encode_chunk(b"hello")[..], b"5\r\nhello\r\n");
        assert_eq!(&encode_chunk(&[b'x'; 26])[..4], b"1A\r\n");
    }

    #[tokio::test]
    async fn collect_concatenates_stream_in_order() {
        let chunks = vec![
            Ok(Bytes::from_static(b"one,")),
            Ok(Bytes::from_static(b"two,")),
            Ok(Bytes::from_static(b"three")),
        ];
        let body = Body::from_stream(stream::iter(chunks));
        assert!(body.is_stream());
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"one,two,three"));
    }

    #[tokio::test]
    async fn collect_surfaces_stream_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("upstream reset")),
        ];
        let err = Body::from_stream(stream::iter(chunks)).collect().await.unwrap_err();
        assert_eq!(err.to_string(), "upstream reset");
    }
}
