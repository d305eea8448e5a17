//! Query result caching.
//!
//! Only queries with a cache key are cached; commands always reach their handler.
//! Errors are never cached. A hit short-circuits the rest of the pipeline, including
//! validation, since the cached value was produced by a request that already passed it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::envelope::{ErasedResponse, RequestEnvelope};
use crate::pipeline::{DispatchResult, Next, PipelineBehavior};
use crate::request::RequestKind;

/// Storage for cached query results.
///
/// Implementations must be safe for concurrent use; the behavior never holds a lock across
/// an await point.
pub trait QueryCache: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<ErasedResponse>;

    fn insert(&self, key: String, value: ErasedResponse, ttl: Duration);

    /// Remove one entry. Returns whether it was present.
    fn invalidate(&self, key: &str) -> bool;

    /// Remove every entry whose key starts with `prefix` (e.g. a request type name).
    fn invalidate_prefix(&self, prefix: &str) -> usize;

    fn clear(&self);
}

#[derive(Debug)]
struct CacheEntry {
    value: ErasedResponse,
    expires_at: Instant,
}

/// Bounded in-process TTL cache.
///
/// When full, expired entries are purged first; if none expired, the entry closest to
/// expiry is evicted. A poisoned lock degrades to a cache miss.
#[derive(Debug)]
pub struct InMemoryQueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_entries: usize,
}

impl InMemoryQueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl QueryCache for InMemoryQueryCache {
    fn get(&self, key: &str) -> Option<ErasedResponse> {
        let now = Instant::now();
        {
            let entries = self.entries.read().ok()?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it so it does not count against capacity.
        if let Ok(mut entries) = self.entries.write() {
            if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                entries.remove(key);
            }
        }
        None
    }

    fn insert(&self, key: String, value: ErasedResponse, ttl: Duration) {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!("query cache lock poisoned; result not cached");
            return;
        };

        let now = Instant::now();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));
        entries.insert(key, CacheEntry { value, expires_at });
    }

    fn invalidate(&self, key: &str) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(key).is_some())
            .unwrap_or(false)
    }

    fn invalidate_prefix(&self, prefix: &str) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

/// Serves repeated queries from a [`QueryCache`].
pub struct CachingBehavior {
    cache: Arc<dyn QueryCache>,
    default_ttl: Duration,
}

impl CachingBehavior {
    pub fn new(cache: Arc<dyn QueryCache>, default_ttl: Duration) -> Self {
        Self { cache, default_ttl }
    }

    /// The underlying cache, for explicit invalidation after writes.
    pub fn cache(&self) -> &Arc<dyn QueryCache> {
        &self.cache
    }
}

impl core::fmt::Debug for CachingBehavior {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CachingBehavior")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PipelineBehavior for CachingBehavior {
    fn name(&self) -> &'static str {
        "caching"
    }

    async fn handle(
        &self,
        envelope: RequestEnvelope,
        _ctx: &RequestContext,
        next: Next<'_>,
    ) -> DispatchResult {
        if envelope.kind() != RequestKind::Query {
            return next.run(envelope).await;
        }
        let Some(key) = envelope.cache_key().map(str::to_owned) else {
            return next.run(envelope).await;
        };

        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(request_type = envelope.short_type(), "query cache hit");
            return Ok(hit);
        }

        let ttl = envelope.cache_ttl().unwrap_or(self.default_ttl);
        let response = next.run(envelope).await?;
        self.cache.insert(key, response.clone(), ttl);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::behaviors::test_support::{Echo, Lookup, fixture};
    use crate::pipeline::Pipeline;

    fn erased(n: u32) -> ErasedResponse {
        Arc::new(n)
    }

    fn caching(cache: Arc<InMemoryQueryCache>) -> Pipeline {
        Pipeline::new().with(CachingBehavior::new(cache, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn identical_queries_hit_the_handler_once() {
        let cache = Arc::new(InMemoryQueryCache::default());
        let (mediator, lookups) = fixture(caching(cache.clone()));
        let ctx = RequestContext::new();

        let first = mediator.send(Lookup::new("k1"), &ctx).await.unwrap();
        let second = mediator.send(Lookup::new("k1"), &ctx).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn different_keys_are_cached_separately() {
        let cache = Arc::new(InMemoryQueryCache::default());
        let (mediator, lookups) = fixture(caching(cache.clone()));
        let ctx = RequestContext::new();

        mediator.send(Lookup::new("a"), &ctx).await.unwrap();
        mediator.send(Lookup::new("b"), &ctx).await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn commands_and_errors_are_not_cached() {
        let cache = Arc::new(InMemoryQueryCache::default());
        let (mediator, lookups) = fixture(caching(cache.clone()));
        let ctx = RequestContext::new();

        mediator.send(Echo::ok("cmd"), &ctx).await.unwrap();
        assert!(cache.is_empty());

        mediator.send(Lookup::missing("gone"), &ctx).await.unwrap_err();
        mediator.send(Lookup::missing("gone"), &ctx).await.unwrap_err();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidation_forces_a_fresh_read() {
        let cache = Arc::new(InMemoryQueryCache::default());
        let (mediator, lookups) = fixture(caching(cache.clone()));
        let ctx = RequestContext::new();

        mediator.send(Lookup::new("k"), &ctx).await.unwrap();
        assert_eq!(cache.invalidate_prefix(core::any::type_name::<Lookup>()), 1);
        mediator.send(Lookup::new("k"), &ctx).await.unwrap();
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = InMemoryQueryCache::default();
        cache.insert("k".to_string(), erased(1), Duration::ZERO);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_the_entry_closest_to_expiry() {
        let cache = InMemoryQueryCache::new(2);
        cache.insert("short".to_string(), erased(1), Duration::from_secs(10));
        cache.insert("long".to_string(), erased(2), Duration::from_secs(100));
        cache.insert("new".to_string(), erased(3), Duration::from_secs(50));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = InMemoryQueryCache::default();
        cache.insert("a".to_string(), erased(1), Duration::from_secs(10));
        cache.insert("b".to_string(), erased(2), Duration::from_secs(10));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
