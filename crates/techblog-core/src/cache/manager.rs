use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

/// Default freshness window for cached queries.
/// Matches the default refetch behavior of browser query caches.
const DEFAULT_STALE_SECS: i64 = 60;

/// Hierarchical cache key, e.g. `["post", "my-slug"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.cached_at
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.age() > stale_after
    }
}

/// Issued when a fetch starts; its result is only stored if no invalidation
/// happened in between.
#[derive(Debug, Clone)]
pub struct FetchTicket {
    key: QueryKey,
    epoch: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

struct CacheInner {
    entries: HashMap<QueryKey, CachedData<serde_json::Value>>,
    /// Bumped by every invalidation and purge
    epoch: u64,
}

pub struct QueryCache {
    inner: Mutex<CacheInner>,
    stale_after: Duration,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_stale_after(Duration::seconds(DEFAULT_STALE_SECS))
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                epoch: 0,
            }),
            stale_after,
        }
    }

    /// Fresh cached value for `key`, if any.
    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let inner = self.inner.lock();
        let cached = inner.entries.get(key)?;
        if cached.is_stale(self.stale_after) {
            debug!(%key, "Cache entry stale");
            return None;
        }
        match serde_json::from_value(cached.data.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%key, error = %e, "Cache entry has unexpected shape");
                None
            }
        }
    }

    pub fn begin(&self, key: QueryKey) -> FetchTicket {
        FetchTicket {
            key,
            epoch: self.inner.lock().epoch,
        }
    }

    /// Store a fetch result. Returns false if the result was discarded
    /// because the cache was invalidated while the fetch was in flight.
    pub fn complete<T: Serialize>(&self, ticket: FetchTicket, value: &T) -> bool {
        let data = match serde_json::to_value(value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %ticket.key, error = %e, "Failed to cache fetch result");
                return false;
            }
        };

        let mut inner = self.inner.lock();
        if inner.epoch != ticket.epoch {
            debug!(key = %ticket.key, "Discarding fetch result from before invalidation");
            return false;
        }
        inner.entries.insert(ticket.key, CachedData::new(data));
        true
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &QueryKey) {
        let mut inner = self.inner.lock();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        inner.epoch += 1;
        debug!(%prefix, "Cache invalidated");
    }

    /// Remove everything.
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.epoch += 1;
        debug!("Cache purged");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
