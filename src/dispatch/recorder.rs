use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tracing::debug;

use crate::cache::{CacheKey, CachedResponse, ResponseCache};
use crate::http::{Body, BodyStream};

/// Bodies larger than this stream through but are not cached.
pub const MAX_RECORDED_BODY: usize = 4 * 1024 * 1024;

/// Tees a streamed body into the micro-cache.
///
/// Chunks reach the client untouched. The concatenated body is stored only
/// once the upstream stream ends cleanly; an error, an oversized body, or the
/// client going away (the stream is dropped early) stores nothing.
pub struct Recorder {
    inner: BodyStream,
    recorded: BytesMut,
    sink: Option<Sink>,
}

struct Sink {
    cache: Arc<ResponseCache>,
    key: CacheKey,
    content_type: String,
}

impl Recorder {
    /// Wraps `body` so that it is cached under `key` on completion.
    /// A buffered body is cached immediately.
    pub fn wrap(body: Body, cache: Arc<ResponseCache>, key: CacheKey, content_type: String) -> Body {
        match body {
            Body::Full(bytes) => {
                cache.set(key, CachedResponse::new(content_type, bytes.clone()));
                Body::Full(bytes)
            }
            Body::Stream(inner) => Body::from_stream(Self {
                inner,
                recorded: BytesMut::new(),
                sink: Some(Sink {
                    cache,
                    key,
                    content_type,
                }),
            }),
        }
    }

    fn record(&mut self, chunk: &Bytes) {
        if self.sink.is_none() {
            return;
        }
        if self.recorded.len() + chunk.len() > MAX_RECORDED_BODY {
            if let Some(sink) = self.sink.take() {
                debug!(key = %sink.key, "streamed body too large to cache");
            }
            self.recorded = BytesMut::new();
            return;
        }
        self.recorded.extend_from_slice(chunk);
    }
}

impl Stream for Recorder {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.record(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.sink = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let Some(sink) = this.sink.take() {
                    let body = this.recorded.split().freeze();
                    debug!(key = %sink.key, bytes = body.len(), "caching streamed body");
                    sink.cache
                        .set(sink.key, CachedResponse::new(sink.content_type, body));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::{StreamExt, stream};

    use super::*;
    use crate::Request;
    use crate::cache::CacheConfig;

    fn setup() -> (Arc<ResponseCache>, CacheKey) {
        let cache = Arc::new(ResponseCache::new(&CacheConfig::default()));
        let key = cache.hash(&Request::get("/v1/get_entry_by_rank")).unwrap();
        (cache, key)
    }

    fn chunks(items: Vec<io::Result<Bytes>>) -> Body {
        Body::from_stream(stream::iter(items))
    }

    #[tokio::test]
    async fn clean_stream_is_cached_after_last_chunk() {
        let (cache, key) = setup();
        let body = Recorder::wrap(
            chunks(vec![
                Ok(Bytes::from_static(b"[1,")),
                Ok(Bytes::from_static(b"2,")),
                Ok(Bytes::from_static(b"3]")),
            ]),
            Arc::clone(&cache),
            key.clone(),
            "application/json".into(),
        );
        assert!(cache.get(&key).is_none());

        assert_eq!(body.collect().await.unwrap(), "[1,2,3]");
        assert_eq!(
            cache.get(&key),
            Some(CachedResponse::new("application/json", "[1,2,3]"))
        );
    }

    #[tokio::test]
    async fn failed_stream_is_not_cached() {
        let (cache, key) = setup();
        let body = Recorder::wrap(
            chunks(vec![
                Ok(Bytes::from_static(b"[1,")),
                Err(io::Error::other("upstream reset")),
            ]),
            Arc::clone(&cache),
            key.clone(),
            "application/json".into(),
        );
        assert!(body.collect().await.is_err());
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn abandoned_stream_is_not_cached() {
        let (cache, key) = setup();
        let Body::Stream(mut stream) = Recorder::wrap(
            chunks(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))]),
            Arc::clone(&cache),
            key.clone(),
            "text/plain".into(),
        ) else {
            panic!("expected a streamed body");
        };
        assert!(stream.next().await.is_some());
        drop(stream);
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn oversized_stream_passes_through_uncached() {
        let (cache, key) = setup();
        let big = Bytes::from(vec![b'x'; MAX_RECORDED_BODY]);
        let body = Recorder::wrap(
            chunks(vec![Ok(big.clone()), Ok(Bytes::from_static(b"y"))]),
            Arc::clone(&cache),
            key.clone(),
            "text/plain".into(),
        );
        assert_eq!(body.collect().await.unwrap().len(), MAX_RECORDED_BODY + 1);
        assert!(cache.get(&key).is_none());
    }
}
