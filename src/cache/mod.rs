//! Micro-cache for rendered pages and proxied responses.
//!
//! A bounded, time-bounded map from [`CacheKey`] to a previously produced
//! body. Entries expire `ttl` after they were stored, no matter how often they
//! are read, and when the store is full the least-recently-inserted entry
//! makes room for the new one. Reads never refresh recency: this cache exists
//! to absorb bursts of identical requests, not to track popularity.
//!
//! There is no single-flight protection; concurrent misses on the same key
//! each render independently and the last writer wins.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::Request;

const DEFAULT_TTL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Micro-cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Runtime switch; when off every request is treated as uncacheable.
    pub enabled: bool,
    /// Freshness window, measured from insertion.
    pub ttl: Duration,
    /// Maximum number of entries held at once.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

/// Identifies one cacheable response: the request's effective URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached response body together with the content type it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub content_type: String,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// The store used by the dispatcher.
pub type ResponseCache = MicroCache<CachedResponse>;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// A TTL-bounded, capacity-bounded cache safe to share between connection tasks.
pub struct MicroCache<V> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<V>>>,
    ttl: Duration,
    enabled: bool,
}

impl<V: Clone> MicroCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.max_entries_non_zero())),
            ttl: config.ttl,
            enabled: config.enabled,
        }
    }

    /// Derives the cache key for `request`.
    ///
    /// Returns `None` when caching is switched off or the method is not safe
    /// to replay (anything but `GET`/`HEAD`). Every page is otherwise
    /// cacheable since responses carry no per-user content.
    pub fn hash(&self, request: &Request) -> Option<CacheKey> {
        if !self.enabled || !request.method().is_safe() {
            return None;
        }
        Some(CacheKey(request.uri().to_owned()))
    }

    /// Returns the stored value if it is still fresh.
    ///
    /// Expired entries are dropped on the way out.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut entries = self.lock("get");
        let fresh = match entries.peek(key) {
            None => return None,
            Some(entry) => entry.stored_at.elapsed() < self.ttl,
        };
        if fresh {
            entries.peek(key).map(|entry| entry.value.clone())
        } else {
            entries.pop(key);
            None
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Returns the key evicted to make room, if the store was full.
    pub fn set(&self, key: CacheKey, value: V) -> Option<CacheKey> {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        let evicted = self
            .lock("set")
            .push(key.clone(), entry)
            .and_then(|(old_key, _)| (old_key != key).then_some(old_key));
        if let Some(evicted) = &evicted {
            debug!(key = %evicted, "micro-cache evicted entry at capacity");
        }
        evicted
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock("purge_expired");
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Number of entries currently held, fresh or not.
    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock("capacity").cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry<V>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    result = "poisoned_recovered",
                    "Recovered from poisoned micro-cache lock"
                );
                poisoned.into_inner()
            }
        }
    }
}

impl<V: Clone + Send + 'static> MicroCache<V> {
    /// Periodically reclaims memory held by expired entries.
    ///
    /// Expiry is already enforced on read; this only keeps stale bodies from
    /// lingering in a quiet cache.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged, "micro-cache sweep");
                }
            }
        })
    }
}
