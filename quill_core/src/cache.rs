//! Fragment cache for rendered feed pages.
//!
//! Entries live for a fixed TTL and are never invalidated by writes to the
//! store: a page rendered before a post was deleted keeps being served
//! until it expires or the cache is cleared.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

#[async_trait]
pub trait FragmentCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Bytes>;

    async fn set(&self, key: String, value: Bytes, ttl: Duration);

    /// Drop every fragment, regardless of TTL.
    async fn clear(&self);
}

/// Cache key for a fragment of `view`, varied on `parts`.
pub fn fragment_key(view: &str, parts: &[&str]) -> String {
    let mut key = view.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[derive(Debug, Clone)]
struct CachedFragment {
    data: Bytes,
    expires_at: Instant,
}

impl CachedFragment {
    #[inline]
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-local [`FragmentCache`].
#[derive(Debug, Default)]
pub struct MemoryFragmentCache {
    store: DashMap<String, CachedFragment>,
}

impl MemoryFragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl FragmentCache for MemoryFragmentCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!(key, "fragment cache hit");
                return Some(entry.data.clone());
            }
        }

        // Expired entries are dropped on read. The guard above must be gone
        // before touching the shard again.
        if self
            .store
            .remove_if(key, |_, entry| entry.is_expired())
            .is_some()
        {
            debug!(key, "fragment expired");
        }
        None
    }

    async fn set(&self, key: String, value: Bytes, ttl: Duration) {
        // Keys vary on caller input; sweep expired fragments on every write.
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let swept = before.saturating_sub(self.store.len());
        if swept > 0 {
            debug!(swept, "expired fragments dropped");
        }

        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, size = value.len(), "caching fragment");
        self.store.insert(
            key,
            CachedFragment {
                data: value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn clear(&self) {
        let dropped = self.store.len();
        self.store.clear();
        debug!(dropped, "fragment cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_value_within_ttl() {
        let cache = MemoryFragmentCache::new();
        cache
            .set("index_page:1".into(), Bytes::from_static(b"<ul/>"), Duration::from_secs(60))
            .await;

        assert_eq!(
            cache.get("index_page:1").await,
            Some(Bytes::from_static(b"<ul/>"))
        );
        assert_eq!(cache.get("index_page:2").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_get_dropped() {
        let cache = MemoryFragmentCache::new();
        cache
            .set("k".into(), Bytes::from_static(b"v"), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries_under_other_keys() {
        let cache = MemoryFragmentCache::new();
        for i in 0..50 {
            cache
                .set(format!("index_page:{i}"), Bytes::from_static(b"v"), Duration::from_millis(10))
                .await;
        }
        assert_eq!(cache.len(), 50);
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache
            .set("index_page:1".into(), Bytes::from_static(b"fresh"), Duration::from_secs(60))
            .await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("index_page:1").await, Some(Bytes::from_static(b"fresh")));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache = MemoryFragmentCache::new();
        for i in 0..5 {
            cache
                .set(format!("k{i}"), Bytes::from(vec![i]), Duration::from_secs(60))
                .await;
        }
        assert_eq!(cache.len(), 5);

        cache.clear().await;
        assert!(cache.is_empty());
        assert_eq!(cache.get("k0").await, None);
    }

    #[tokio::test]
    async fn concurrent_writers_and_readers() {
        let cache = Arc::new(MemoryFragmentCache::new());

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{}", i % 4);
                cache
                    .set(key.clone(), Bytes::from(vec![i]), Duration::from_secs(60))
                    .await;
                cache.get(&key).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn keys_join_view_and_parts() {
        assert_eq!(fragment_key("index_page", &[]), "index_page");
        assert_eq!(fragment_key("index_page", &["3"]), "index_page:3");
    }
}
