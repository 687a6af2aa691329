//! Bounded LRU tier in front of a persistent store
//!
//! The in-memory map is the record of what is still cached. When an insert
//! needs room past the limit, the least-recently-used token is dropped from
//! memory *and* removed from the wrapped store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{BasementError, Result, StoreError};
use crate::key::Token;
use crate::store::Store;
use crate::types::CacheStats;

/// Capacity used when the caller has no preference
pub const DEFAULT_LIMIT: usize = 32;

/// Entry taken out of memory to make room, kept whole so it can be put back
struct Evicted<V> {
    token: Token,
    value: V,
    tick: u64,
}

/// Recency-ordered map. Each access stamps the entry with a fresh tick;
/// the smallest tick is the eviction candidate.
struct LruMap<V> {
    entries: HashMap<Token, (V, u64)>,
    order: BTreeMap<u64, Token>,
    tick: u64,
}

impl<V: Clone> LruMap<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn get(&mut self, token: &Token) -> Option<V> {
        let tick = self.next_tick();
        let (value, last) = self.entries.get_mut(token)?;
        self.order.remove(&*last);
        *last = tick;
        self.order.insert(tick, token.clone());
        Some(value.clone())
    }

    /// Insert or refresh `token`. The caller makes room first.
    fn insert(&mut self, token: Token, value: V) {
        let tick = self.next_tick();

        if let Some((slot, last)) = self.entries.get_mut(&token) {
            self.order.remove(&*last);
            *slot = value;
            *last = tick;
            self.order.insert(tick, token);
            return;
        }

        self.order.insert(tick, token.clone());
        self.entries.insert(token, (value, tick));
    }

    /// Take out the oldest entry if inserting `token` would exceed `limit`
    fn evict_for(&mut self, token: &Token, limit: usize) -> Option<Evicted<V>> {
        if self.entries.contains_key(token) || self.entries.len() < limit {
            return None;
        }
        let (tick, token) = self.order.pop_first()?;
        let (value, _) = self.entries.remove(&token)?;
        Some(Evicted { token, value, tick })
    }

    /// Put an evicted entry back at its original recency
    fn restore(&mut self, evicted: Evicted<V>) {
        self.order.insert(evicted.tick, evicted.token.clone());
        self.entries
            .insert(evicted.token, (evicted.value, evicted.tick));
    }

    fn remove(&mut self, token: &Token) -> bool {
        match self.entries.remove(token) {
            Some((_, last)) => {
                self.order.remove(&last);
                true
            }
            None => false,
        }
    }

    fn contains(&self, token: &Token) -> bool {
        self.entries.contains_key(token)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Fixed-capacity memory tier composed over a [`Store`].
///
/// `BoundedCache` is itself a `Store`, so it can be handed to the pipeline
/// wherever a plain backend would go. Every path that changes which tokens
/// are cached runs under one async write lock; memory hits never take it.
pub struct BoundedCache<V, S> {
    store: S,
    limit: usize,
    memory: Mutex<LruMap<V>>,
    writes: tokio::sync::Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V, S> BoundedCache<V, S>
where
    V: Clone + Send + Sync,
    S: Store<V>,
{
    /// Wrap `store` with an in-memory tier holding at most `limit` entries
    pub fn new(store: S, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(BasementError::Validation(
                "Expected a positive cache limit, encountered 0.".to_string(),
            ));
        }
        Ok(Self::build(store, limit))
    }

    /// Wrap `store` with the default capacity
    pub fn with_default_limit(store: S) -> Self {
        Self::build(store, DEFAULT_LIMIT)
    }

    fn build(store: S, limit: usize) -> Self {
        Self {
            store,
            limit,
            memory: Mutex::new(LruMap::new()),
            writes: tokio::sync::Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Number of entries currently held in memory
    pub fn len(&self) -> usize {
        self.memory().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `token` is held in memory, without touching its recency
    pub fn contains(&self, token: &Token) -> bool {
        self.memory().contains(token)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.limit,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    // The lock is only held for map bookkeeping, never across an await
    fn memory(&self) -> MutexGuard<'_, LruMap<V>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_hit(&self, token: &Token) -> Option<V> {
        let cached = self.memory().get(token);
        if cached.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(token = %token, "Memory hit");
        }
        cached
    }

    /// Free a slot for `token` by evicting the least-recently-used entry
    /// and deleting its durable copy. If the delete fails the entry goes
    /// back where it was and nothing has changed.
    ///
    /// Must be called with the write lock held.
    async fn make_room(&self, token: &Token) -> std::result::Result<(), StoreError> {
        let evicted = self.memory().evict_for(token, self.limit);
        let Some(evicted) = evicted else {
            return Ok(());
        };

        debug!(evicted = %evicted.token, inserted = %token, "Evicting least-recently-used entry");
        if let Err(err) = self.store.remove(&evicted.token).await {
            warn!(evicted = %evicted.token, error = %err, "Failed to remove evicted entry");
            self.memory().restore(evicted);
            return Err(err);
        }

        self.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl<V, S> Store<V> for BoundedCache<V, S>
where
    V: Clone + Send + Sync,
    S: Store<V>,
{
    async fn load(&self, token: &Token) -> std::result::Result<Option<V>, StoreError> {
        if let Some(value) = self.memory_hit(token) {
            return Ok(Some(value));
        }

        let _writes = self.writes.lock().await;
        // A writer may have cached the token while this call waited
        if let Some(value) = self.memory_hit(token) {
            return Ok(Some(value));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.store.load(token).await?;
        if let Some(value) = &loaded {
            self.make_room(token).await?;
            self.memory().insert(token.clone(), value.clone());
            debug!(token = %token, "Promoted entry from store");
        }
        Ok(loaded)
    }

    async fn save(&self, token: &Token, value: &V) -> std::result::Result<(), StoreError> {
        let _writes = self.writes.lock().await;
        self.make_room(token).await?;
        self.store.save(token, value).await?;
        self.memory().insert(token.clone(), value.clone());
        Ok(())
    }

    async fn remove(&self, token: &Token) -> std::result::Result<(), StoreError> {
        let _writes = self.writes.lock().await;
        self.store.remove(token).await?;
        self.memory().remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Memory store that records every remove it receives
    #[derive(Default)]
    struct RemoveLog {
        inner: MemoryStore<String>,
        removed: Mutex<Vec<Token>>,
        loads: AtomicU64,
    }

    impl RemoveLog {
        fn removed(&self) -> Vec<Token> {
            self.removed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Store<String> for RemoveLog {
        async fn load(&self, token: &Token) -> std::result::Result<Option<String>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(token).await
        }

        async fn save(&self, token: &Token, value: &String) -> std::result::Result<(), StoreError> {
            self.inner.save(token, value).await
        }

        async fn remove(&self, token: &Token) -> std::result::Result<(), StoreError> {
            self.removed.lock().unwrap().push(token.clone());
            self.inner.remove(token).await
        }
    }

    fn cache(limit: usize) -> (Arc<RemoveLog>, BoundedCache<String, Arc<RemoveLog>>) {
        let log = Arc::new(RemoveLog::default());
        let cache = BoundedCache::new(log.clone(), limit).unwrap();
        (log, cache)
    }

    fn t(s: &str) -> Token {
        Token::from(s)
    }

    #[test]
    fn test_zero_limit_rejected() {
        let result = BoundedCache::new(MemoryStore::<String>::new(), 0);
        assert!(matches!(result, Err(BasementError::Validation(_))));
    }

    #[test]
    fn test_default_limit() {
        let cache = BoundedCache::with_default_limit(MemoryStore::<String>::new());
        assert_eq!(cache.limit(), DEFAULT_LIMIT);
        assert_eq!(cache.stats().capacity, 32);
    }

    #[tokio::test]
    async fn test_memory_hit_skips_store() {
        let (log, cache) = cache(4);
        cache.save(&t("a"), &"dataA".to_string()).await.unwrap();

        let value = cache.load(&t("a")).await.unwrap();
        assert_eq!(value.as_deref(), Some("dataA"));
        assert_eq!(log.loads.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_store_hit_is_promoted() {
        let (log, cache) = cache(4);
        log.inner.save(&t("a"), &"dataA".to_string()).await.unwrap();
        assert!(!cache.contains(&t("a")));

        let value = cache.load(&t("a")).await.unwrap();
        assert_eq!(value.as_deref(), Some("dataA"));
        assert!(cache.contains(&t("a")));
        assert_eq!(cache.stats().misses, 1);

        cache.load(&t("a")).await.unwrap();
        assert_eq!(log.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_miss_is_not_inserted() {
        let (_log, cache) = cache(4);
        assert!(cache.load(&t("nope")).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_eviction_removes_durable_copy() {
        let (log, cache) = cache(2);
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.save(&t("b"), &"2".to_string()).await.unwrap();
        assert!(log.removed().is_empty());

        cache.save(&t("c"), &"3".to_string()).await.unwrap();

        assert_eq!(log.removed(), vec![t("a")]);
        assert!(!cache.contains(&t("a")));
        assert!(!log.inner.contains(&t("a")).await);
        assert!(log.inner.contains(&t("b")).await);
        assert!(log.inner.contains(&t("c")).await);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_load_refreshes_recency() {
        let (log, cache) = cache(2);
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.save(&t("b"), &"2".to_string()).await.unwrap();

        // Touch "a" so "b" becomes the oldest
        cache.load(&t("a")).await.unwrap();
        cache.save(&t("c"), &"3".to_string()).await.unwrap();

        assert_eq!(log.removed(), vec![t("b")]);
        assert!(cache.contains(&t("a")));
    }

    #[tokio::test]
    async fn test_resave_does_not_evict() {
        let (log, cache) = cache(2);
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.save(&t("b"), &"2".to_string()).await.unwrap();
        cache.save(&t("a"), &"1b".to_string()).await.unwrap();

        assert!(log.removed().is_empty());
        assert_eq!(cache.load(&t("a")).await.unwrap().as_deref(), Some("1b"));
    }

    #[tokio::test]
    async fn test_limit_one_evicts_every_new_token() {
        let (log, cache) = cache(1);
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.save(&t("b"), &"2".to_string()).await.unwrap();
        cache.save(&t("c"), &"3".to_string()).await.unwrap();

        assert_eq!(log.removed(), vec![t("a"), t("b")]);
        assert_eq!(log.inner.len().await, 1);
        assert!(cache.contains(&t("c")));
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let (log, cache) = cache(2);
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.remove(&t("a")).await.unwrap();

        assert!(!cache.contains(&t("a")));
        assert!(log.inner.is_empty().await);
        cache.remove(&t("a")).await.unwrap();
    }

    /// Memory store whose next `remove` parks until released
    #[derive(Default)]
    struct GatedRemove {
        inner: MemoryStore<String>,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Store<String> for GatedRemove {
        async fn load(&self, token: &Token) -> std::result::Result<Option<String>, StoreError> {
            self.inner.load(token).await
        }

        async fn save(&self, token: &Token, value: &String) -> std::result::Result<(), StoreError> {
            self.inner.save(token, value).await
        }

        async fn remove(&self, token: &Token) -> std::result::Result<(), StoreError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.remove(token).await
        }
    }

    /// Memory store whose `remove` always fails
    #[derive(Default)]
    struct FailingRemove {
        inner: MemoryStore<String>,
    }

    #[async_trait]
    impl Store<String> for FailingRemove {
        async fn load(&self, token: &Token) -> std::result::Result<Option<String>, StoreError> {
            self.inner.load(token).await
        }

        async fn save(&self, token: &Token, value: &String) -> std::result::Result<(), StoreError> {
            self.inner.save(token, value).await
        }

        async fn remove(&self, _token: &Token) -> std::result::Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
    }

    #[tokio::test]
    async fn test_resave_during_eviction_keeps_tiers_in_sync() {
        let store = Arc::new(GatedRemove::default());
        let cache = Arc::new(BoundedCache::new(Arc::clone(&store), 2).unwrap());
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.save(&t("b"), &"2".to_string()).await.unwrap();
        store.armed.store(true, Ordering::SeqCst);

        // Saving "c" evicts "a" and parks inside its durable remove
        let evicting = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.save(&t("c"), &"3".to_string()).await })
        };
        store.entered.notified().await;

        let resave = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.save(&t("a"), &"1b".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.release.notify_one();

        evicting.await.unwrap().unwrap();
        resave.await.unwrap().unwrap();

        for token in ["a", "b", "c"] {
            assert_eq!(
                cache.contains(&t(token)),
                store.inner.contains(&t(token)).await,
                "tiers disagree on {token}"
            );
        }
        assert_eq!(cache.load(&t("a")).await.unwrap().as_deref(), Some("1b"));
    }

    #[tokio::test]
    async fn test_failed_eviction_on_save_caches_nothing() {
        let store = Arc::new(FailingRemove::default());
        let cache = BoundedCache::new(Arc::clone(&store), 1).unwrap();
        cache.save(&t("a"), &"1".to_string()).await.unwrap();

        let err = cache.save(&t("b"), &"2".to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));

        // The evicted entry is back and the new one is nowhere
        assert!(cache.contains(&t("a")));
        assert!(store.inner.contains(&t("a")).await);
        assert!(!cache.contains(&t("b")));
        assert!(!store.inner.contains(&t("b")).await);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_failed_eviction_on_promotion_changes_nothing() {
        let store = Arc::new(FailingRemove::default());
        let cache = BoundedCache::new(Arc::clone(&store), 1).unwrap();
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        store.inner.save(&t("b"), &"2".to_string()).await.unwrap();

        assert!(cache.load(&t("b")).await.is_err());

        assert!(cache.contains(&t("a")));
        assert!(!cache.contains(&t("b")));
        assert_eq!(cache.load(&t("a")).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_restored_entry_keeps_its_recency() {
        let store = Arc::new(FailingRemove::default());
        let cache = BoundedCache::new(Arc::clone(&store), 2).unwrap();
        cache.save(&t("a"), &"1".to_string()).await.unwrap();
        cache.save(&t("b"), &"2".to_string()).await.unwrap();

        assert!(cache.save(&t("c"), &"3".to_string()).await.is_err());
        assert!(cache.save(&t("c"), &"3".to_string()).await.is_err());

        assert!(cache.contains(&t("a")));
        assert!(cache.contains(&t("b")));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);

        // "a" went back at its old recency, so it is still the next victim
        let victim = cache.memory().evict_for(&t("c"), 2).map(|e| e.token);
        assert_eq!(victim, Some(t("a")));
    }
}
