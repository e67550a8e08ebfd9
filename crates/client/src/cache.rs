//! In-memory TTL cache for board API responses.
//!
//! Keys are flat strings (`board:{id}`, `board:{id}:lists`,
//! `boards:user:{id}`) so every entry touched by a mutation can be dropped
//! together with one regex sweep. Expired entries are evicted lazily on
//! access, and `set` sheds a batch of entries once the map hits its cap;
//! there is no background sweep.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use regex::Regex;
use uuid::Uuid;

/// Maximum number of cache entries before eviction.
/// Each cached response (a board, a list collection, a user index) is one
/// entry.
const MAX_ENTRIES: usize = 1000;

/// Cached value with expiration time.
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe string-keyed cache with per-entry TTLs.
///
/// Uses DashMap for concurrent access without locks.
#[derive(Clone)]
pub struct TtlCache<V: Clone> {
    inner: Arc<DashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> TtlCache<V> {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::with_capacity(64)),
        }
    }

    /// Get a cached value if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        // Use get() instead of entry() to avoid holding the lock
        let entry = self.inner.get(key)?;

        if entry.is_expired() {
            // Release the read lock before removing
            drop(entry);
            self.inner.remove(key);
            return None;
        }

        Some(entry.value.clone())
    }

    /// Whether a live entry exists for the key. Evicts it when expired.
    pub fn has(&self, key: &str) -> bool {
        let Some(entry) = self.inner.get(key) else {
            return false;
        };

        if entry.is_expired() {
            drop(entry);
            self.inner.remove(key);
            return false;
        }

        true
    }

    /// Cache a value under `key` for `ttl`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        // Evict if the cache is too large
        if self.inner.len() >= MAX_ENTRIES {
            self.evict_expired();

            // Still over the cap: drop a tenth of the entries to make room
            if self.inner.len() >= MAX_ENTRIES {
                let to_remove = MAX_ENTRIES / 10;
                let keys_to_remove: Vec<_> = self
                    .inner
                    .iter()
                    .take(to_remove)
                    .map(|r| r.key().clone())
                    .collect();

                for key in keys_to_remove {
                    self.inner.remove(&key);
                }
            }
        }

        self.inner.insert(key.into(), CacheEntry::new(value, ttl));
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    /// Remove every entry whose key matches `pattern`.
    pub fn invalidate_pattern(&self, pattern: &Regex) {
        self.inner.retain(|key, _| !pattern.is_match(key));
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        self.inner.retain(|_, entry| !entry.is_expired());
    }

    /// Clear all cache entries.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Number of stored entries, expired ones included until they are
    /// touched.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Cache key for a full board.
pub fn board_key(board_id: Uuid) -> String {
    format!("board:{board_id}")
}

/// Cache key for a board's list collection.
pub fn board_lists_key(board_id: Uuid) -> String {
    format!("board:{board_id}:lists")
}

/// Cache key for one user's board index.
pub fn user_boards_key(user_id: Uuid) -> String {
    format!("boards:user:{user_id}")
}

/// Pattern matching every key that belongs to one board.
pub fn board_pattern(board_id: Uuid) -> Regex {
    Regex::new(&format!("^board:{board_id}(:.*)?$")).expect("failed to compile board key pattern")
}

/// Pattern matching every user's board index.
pub fn user_boards_pattern() -> Regex {
    Regex::new("^boards:user:.*$").expect("failed to compile user boards pattern")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_cache_set_and_get() {
        let cache = TtlCache::new();
        cache.set("k", 7usize, TTL);

        assert_eq!(cache.get("k"), Some(7));
        assert!(cache.has("k"));
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_cache_delete() {
        let cache = TtlCache::new();
        cache.set("k", 1u8, TTL);

        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_board_pattern_sweeps_only_that_board() {
        let cache = TtlCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let user = Uuid::new_v4();

        cache.set(board_key(a), 1u8, TTL);
        cache.set(board_lists_key(a), 2u8, TTL);
        cache.set(board_key(b), 3u8, TTL);
        cache.set(user_boards_key(user), 4u8, TTL);
        assert_eq!(cache.len(), 4);

        cache.invalidate_pattern(&board_pattern(a));

        assert!(!cache.has(&board_key(a)));
        assert!(!cache.has(&board_lists_key(a)));
        assert!(cache.has(&board_key(b)));
        assert!(cache.has(&user_boards_key(user)));
    }

    #[test]
    fn test_user_boards_pattern_sweeps_every_user() {
        let cache = TtlCache::new();
        let board = Uuid::new_v4();

        cache.set(user_boards_key(Uuid::new_v4()), 1u8, TTL);
        cache.set(user_boards_key(Uuid::new_v4()), 2u8, TTL);
        cache.set(board_key(board), 3u8, TTL);

        cache.invalidate_pattern(&user_boards_pattern());

        assert_eq!(cache.len(), 1);
        assert!(cache.has(&board_key(board)));
    }

    #[test]
    fn test_cache_clear() {
        let cache = TtlCache::new();
        cache.set("a", 1u8, TTL);
        cache.set("b", 2u8, TTL);
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_expiration_is_lazy() {
        let cache = TtlCache::new();
        cache.set("k", 1u8, Duration::from_millis(40));

        assert!(cache.has("k"));

        tokio::time::sleep(Duration::from_millis(80)).await;

        // The entry is still stored until an access evicts it.
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_set_evicts_at_capacity() {
        let cache = TtlCache::new();
        for i in 0..MAX_ENTRIES {
            cache.set(format!("k{i}"), i, TTL);
        }
        assert_eq!(cache.len(), MAX_ENTRIES);

        cache.set("overflow", MAX_ENTRIES, TTL);

        // Nothing has expired, so a tenth of the entries got dropped to
        // make room for the new one.
        assert_eq!(cache.len(), MAX_ENTRIES - MAX_ENTRIES / 10 + 1);
        assert!(cache.has("overflow"));
    }

    #[tokio::test]
    async fn test_evict_expired_drops_only_dead_entries() {
        let cache = TtlCache::new();
        cache.set("short", 1u8, Duration::from_millis(40));
        cache.set("long", 2u8, TTL);

        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.evict_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.has("long"));
    }

    #[test]
    fn test_key_shapes() {
        let board = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert_eq!(board_key(board), format!("board:{board}"));
        assert_eq!(board_lists_key(board), format!("board:{board}:lists"));
        assert_eq!(user_boards_key(user), format!("boards:user:{user}"));
        assert!(board_pattern(board).is_match(&board_key(board)));
        assert!(board_pattern(board).is_match(&board_lists_key(board)));
        assert!(!board_pattern(board).is_match(&board_key(Uuid::new_v4())));
    }
}
