use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::hash::KeyDeriver;
use crate::types::ParsedReceipt;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
#[error("Store error: {0}")]
pub struct StoreError(pub String);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize cache value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A key-value store whose entries expire after a per-key TTL.
#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: TtlStore + ?Sized> TtlStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        (**self).set(key, value, ttl).await
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    /// `None` when the TTL reaches past what the clock can represent.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local [`TtlStore`]. Expired entries are dropped when read or swept
/// by [`MemoryStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().await.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(e) if e.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(e) => Ok(Some(e.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }
}

// ── Result cache ──────────────────────────────────────────────────────────────

/// Read-through/write-through cache of parse results, keyed by image fingerprint.
pub struct ResultCache {
    store: Box<dyn TtlStore>,
    keys: Box<dyn KeyDeriver>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Box<dyn TtlStore>, keys: Box<dyn KeyDeriver>, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key_for(&self, image: &[u8]) -> String {
        self.keys.derive(image)
    }

    /// A store failure or an undecodable value is reported as a miss.
    pub async fn get(&self, key: &str) -> Option<ParsedReceipt> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, "Cache read failed: {e}");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                tracing::debug!(key, "Discarding undecodable cache entry: {e}");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &ParsedReceipt) -> Result<(), CacheError> {
        self.put_with_ttl(key, value, self.ttl).await
    }

    pub async fn put_with_ttl(
        &self,
        key: &str,
        value: &ParsedReceipt,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes, ttl).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ReceiptParser;
    use crate::hash::EdgeFingerprint;

    fn cache_with(store: Box<dyn TtlStore>) -> ResultCache {
        ResultCache::new(store, Box::new(EdgeFingerprint::default()), DEFAULT_TTL)
    }

    struct FailingStore;

    #[async_trait]
    impl TtlStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError("connection refused".into()))
        }
        async fn set(&self, _: &str, _: Vec<u8>, _: Duration) -> Result<(), StoreError> {
            Err(StoreError("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let cache = cache_with(Box::new(MemoryStore::new()));
        let receipt = ReceiptParser::default()
            .parse("SUPER LIDER\nBOLETA\n76.543.210-3\nTOTAL $15.000\n01/10/2024")
            .unwrap();
        cache.put("k", &receipt).await.unwrap();
        assert_eq!(cache.get("k").await, Some(receipt));
    }

    #[tokio::test]
    async fn miss_on_absent_key() {
        let cache = cache_with(Box::new(MemoryStore::new()));
        assert_eq!(cache.get("nope").await, None);
    }

    #[tokio::test]
    async fn miss_on_garbage_value() {
        let store = MemoryStore::new();
        store.set("k", b"not json".to_vec(), DEFAULT_TTL).await.unwrap();
        let cache = cache_with(Box::new(store));
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn store_errors_are_misses_on_read_and_errors_on_write() {
        let cache = cache_with(Box::new(FailingStore));
        assert_eq!(cache.get("k").await, None);
        let err = cache.put("k", &ParsedReceipt::empty("x")).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store.set("k", vec![1], Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1]));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", vec![1], Duration::from_secs(u64::MAX)).await.unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1]));
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn huge_ttl_put_roundtrips() {
        let cache = ResultCache::new(
            Box::new(MemoryStore::new()),
            Box::new(EdgeFingerprint::default()),
            Duration::MAX,
        );
        let receipt = ParsedReceipt::empty("JUMBO");
        cache.put("k", &receipt).await.unwrap();
        assert_eq!(cache.get("k").await, Some(receipt));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let store = MemoryStore::new();
        store.set("short", vec![1], Duration::from_secs(1)).await.unwrap();
        store.set("long", vec![2], Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.purge_expired().await, 1);
        assert!(!store.is_empty().await);
    }
}
