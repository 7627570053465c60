//! Per-connection prepared statement cache with LRU eviction.
//!
//! ## Lifecycle
//!
//! 1. `prepare_statement`/`prepare_call` build a [`CacheKey`] from the SQL
//!    text, statement kind and creation options
//! 2. On a hit the new statement proxy shares the cached compiled statement;
//!    on a miss the driver compiles one and it is cached immediately
//! 3. Closing a cache-managed proxy only clears the parameters; the compiled
//!    statement stays with the cache
//! 4. A statement is closed at the driver only when it is evicted as least
//!    recently used, or when the owning connection is closed
//!
//! The cache lives inside its [`PooledConnection`](crate::PooledConnection)
//! and is only reached by the borrower currently holding that connection.
//! Each compiled statement sits behind its own mutex because several proxies
//! of that borrower may share it.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use beecp_driver::{RawCallableStatement, RawPreparedStatement, StatementOptions};
use lru::LruCache;
use parking_lot::Mutex;

/// A compiled statement shared between the cache and its proxies.
pub type Shared<T> = Arc<Mutex<Box<T>>>;

/// Which connection call produced a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// `prepare_statement`.
    Prepared,
    /// `prepare_call`.
    Callable,
}

/// Identity of a compiled statement.
///
/// Statements created with different options never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: StatementKind,
    sql: String,
    options: StatementOptions,
}

impl CacheKey {
    /// Key for a prepared statement.
    #[must_use]
    pub fn prepared(sql: &str, options: &StatementOptions) -> Self {
        Self {
            kind: StatementKind::Prepared,
            sql: sql.to_string(),
            options: options.clone(),
        }
    }

    /// Key for a callable statement.
    #[must_use]
    pub fn callable(sql: &str, options: &StatementOptions) -> Self {
        Self {
            kind: StatementKind::Callable,
            sql: sql.to_string(),
            options: options.clone(),
        }
    }

    /// Statement kind.
    #[must_use]
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// A compiled statement held by the cache.
///
/// Cloning shares the same driver statement.
#[derive(Clone)]
pub enum CachedStatement {
    /// Prepared statement.
    Prepared(Shared<dyn RawPreparedStatement>),
    /// Callable statement.
    Callable(Shared<dyn RawCallableStatement>),
}

impl CachedStatement {
    /// Kind of the wrapped statement.
    #[must_use]
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Prepared(_) => StatementKind::Prepared,
            Self::Callable(_) => StatementKind::Callable,
        }
    }

    /// Close the statement at the driver level.
    pub fn close(&self) -> beecp_driver::Result<()> {
        match self {
            Self::Prepared(stmt) => stmt.lock().close(),
            Self::Callable(stmt) => stmt.lock().close(),
        }
    }

    /// Whether another holder, a proxy or the cache, shares this statement.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        match self {
            Self::Prepared(stmt) => Arc::strong_count(stmt) > 1,
            Self::Callable(stmt) => Arc::strong_count(stmt) > 1,
        }
    }

    /// Close a statement that left the cache.
    ///
    /// A statement still in use is left open; the last proxy closes it.
    pub fn retire(self) {
        if self.is_in_use() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::debug!(error = %e, "failed to close evicted statement");
        }
    }
}

impl fmt::Debug for CachedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachedStatement").field(&self.kind()).finish()
    }
}

/// Bounded LRU mapping from [`CacheKey`] to compiled statements.
///
/// A capacity of zero makes the cache inert: lookups miss without counting
/// and `put` stores nothing.
pub struct StatementCache {
    cache: Option<LruCache<CacheKey, CachedStatement>>,
    hits: u64,
    misses: u64,
}

impl StatementCache {
    /// Create a cache holding at most `capacity` statements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    /// Whether statements are cached at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Look up a cached statement, marking it most recently used.
    ///
    /// The entry stays in the cache; the returned handle shares it.
    pub fn get(&mut self, key: &CacheKey) -> Option<CachedStatement> {
        let cache = self.cache.as_mut()?;
        match cache.get(key) {
            Some(stmt) => {
                self.hits += 1;
                tracing::trace!(sql = key.sql(), "statement cache hit");
                Some(stmt.clone())
            }
            None => {
                self.misses += 1;
                tracing::trace!(sql = key.sql(), "statement cache miss");
                None
            }
        }
    }

    /// Store a freshly compiled statement.
    ///
    /// Returns the statement the caller must close: the previous entry under
    /// the same key or the least recently used entry when at capacity. When
    /// caching is disabled nothing is stored and `None` is returned.
    #[must_use = "a returned statement must be closed"]
    pub fn put(&mut self, key: CacheKey, stmt: CachedStatement) -> Option<CachedStatement> {
        let cache = self.cache.as_mut()?;
        cache.push(key, stmt).map(|(evicted_key, evicted)| {
            tracing::trace!(sql = evicted_key.sql(), "statement evicted from cache");
            evicted
        })
    }

    /// Close and remove every cached statement.
    ///
    /// Returns the number of statements closed. Close failures are logged.
    pub fn drain_and_close_all(&mut self) -> usize {
        let Some(cache) = self.cache.as_mut() else {
            return 0;
        };
        let mut closed = 0;
        while let Some((key, stmt)) = cache.pop_lru() {
            if let Err(e) = stmt.close() {
                tracing::debug!(sql = key.sql(), error = %e, "failed to close cached statement");
            }
            closed += 1;
        }
        if closed > 0 {
            tracing::debug!(count = closed, "drained statement cache");
        }
        closed
    }

    /// Number of cached statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached statements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.cap().get())
    }

    /// Number of lookups that found a statement.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of lookups that found nothing.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Cache hit ratio (0.0 to 1.0).
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use beecp_driver::{Concurrency, DriverError, RawResultSet, Value};

    use super::*;

    struct Stub {
        id: usize,
        closes: Arc<AtomicUsize>,
    }

    impl RawPreparedStatement for Stub {
        fn bind(&mut self, _index: usize, _value: Value) -> beecp_driver::Result<()> {
            Ok(())
        }
        fn clear_parameters(&mut self) -> beecp_driver::Result<()> {
            Ok(())
        }
        fn execute_query(&mut self) -> beecp_driver::Result<Box<dyn RawResultSet>> {
            Err(DriverError::Unsupported("execute_query"))
        }
        fn execute_update(&mut self) -> beecp_driver::Result<u64> {
            Ok(self.id as u64)
        }
        fn execute(&mut self) -> beecp_driver::Result<bool> {
            Ok(false)
        }
        fn result_set(&mut self) -> beecp_driver::Result<Option<Box<dyn RawResultSet>>> {
            Ok(None)
        }
        fn set_query_timeout(&mut self, _timeout: Duration) -> beecp_driver::Result<()> {
            Ok(())
        }
        fn close(&mut self) -> beecp_driver::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stub(id: usize, closes: &Arc<AtomicUsize>) -> CachedStatement {
        let raw: Box<dyn RawPreparedStatement> = Box::new(Stub {
            id,
            closes: Arc::clone(closes),
        });
        CachedStatement::Prepared(Arc::new(Mutex::new(raw)))
    }

    fn id_of(stmt: &CachedStatement) -> u64 {
        match stmt {
            CachedStatement::Prepared(s) => s.lock().execute_update().unwrap(),
            CachedStatement::Callable(_) => unreachable!(),
        }
    }

    fn key(sql: &str) -> CacheKey {
        CacheKey::prepared(sql, &StatementOptions::new())
    }

    #[test]
    fn test_get_shares_entry() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(4);
        assert!(cache.put(key("select 1"), stub(1, &closes)).is_none());

        let first = cache.get(&key("select 1")).unwrap();
        let second = cache.get(&key("select 1")).unwrap();
        assert_eq!(cache.len(), 1);
        match (&first, &second) {
            (CachedStatement::Prepared(a), CachedStatement::Prepared(b)) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => unreachable!(),
        }
        assert_eq!(id_of(&first), 1);
        assert!(cache.get(&key("select 2")).is_none());
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lru_eviction_returns_oldest() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(2);
        assert!(cache.put(key("a"), stub(1, &closes)).is_none());
        assert!(cache.put(key("b"), stub(2, &closes)).is_none());

        // touch "a" so "b" becomes least recently used
        assert!(cache.get(&key("a")).is_some());

        let evicted = cache.put(key("c"), stub(3, &closes)).unwrap();
        assert_eq!(id_of(&evicted), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("b")).is_none());
    }

    #[test]
    fn test_retire_skips_statement_in_use() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(1);
        assert!(cache.put(key("a"), stub(1, &closes)).is_none());
        let held = cache.get(&key("a")).unwrap();
        assert!(held.is_in_use());

        cache.put(key("b"), stub(2, &closes)).unwrap().retire();
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        held.retire();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_put_same_key_displaces_previous() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(4);
        assert!(cache.put(key("a"), stub(1, &closes)).is_none());
        let displaced = cache.put(key("a"), stub(2, &closes)).unwrap();
        assert_eq!(id_of(&displaced), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_options_and_kind_are_part_of_key() {
        let plain = CacheKey::prepared("select 1", &StatementOptions::new());
        let updatable = CacheKey::prepared(
            "select 1",
            &StatementOptions::new().concurrency(Concurrency::Updatable),
        );
        let call = CacheKey::callable("select 1", &StatementOptions::new());
        assert_ne!(plain, updatable);
        assert_ne!(plain, call);

        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(4);
        assert!(cache.put(plain.clone(), stub(1, &closes)).is_none());
        assert!(cache.get(&updatable).is_none());
        assert!(cache.get(&call).is_none());
        assert!(cache.get(&plain).is_some());
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(0);
        assert!(!cache.is_enabled());
        assert!(cache.put(key("a"), stub(1, &closes)).is_none());
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.misses(), 0);
        assert_eq!(cache.capacity(), 0);
    }

    #[test]
    fn test_drain_closes_everything() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut cache = StatementCache::new(8);
        for i in 0..5 {
            assert!(cache.put(key(&format!("select {i}")), stub(i, &closes)).is_none());
        }
        assert_eq!(cache.drain_and_close_all(), 5);
        assert_eq!(closes.load(Ordering::SeqCst), 5);
        assert!(cache.is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn len_never_exceeds_capacity(
                capacity in 0usize..8,
                ops in proptest::collection::vec((0u8..12, any::<bool>()), 0..64),
            ) {
                let closes = Arc::new(AtomicUsize::new(0));
                let mut cache = StatementCache::new(capacity);
                for (n, lookup) in ops {
                    let k = key(&format!("select {n}"));
                    if lookup {
                        let _ = cache.get(&k);
                    } else if let Some(extra) = cache.put(k, stub(n as usize, &closes)) {
                        let _ = extra.close();
                    }
                    prop_assert!(cache.len() <= capacity);
                }
            }
        }
    }
}
