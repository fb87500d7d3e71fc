//! Shared state store contract.
//!
//! Circuit-breaker state must be observable by every process serving portal
//! traffic, so it lives in an external TTL-based key-value store rather than
//! in process memory. [`StateStore`] is the minimal contract the breaker
//! needs; production deployments back it with a shared cache, and tests use
//! [`InMemoryStore`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Minimal TTL-based key-value store used for cross-process breaker state.
///
/// Implementations must make [`StateStore::increment`] atomic: concurrent
/// increments on the same key may never lose a count. Everything else is
/// plain read/write; the breaker tolerates read-then-write races (see
/// [`crate::breaker`]).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Writes `value` under `key` with the given time-to-live.
    async fn put(&self, key: &str, value: &str, ttl: Duration);

    /// Atomically increments the counter under `key` and returns the new
    /// value.
    ///
    /// The TTL applies only when the counter is first created; later
    /// increments must not extend the window.
    async fn increment(&self, key: &str, ttl: Duration) -> u64;

    /// Removes `key` from the store.
    async fn forget(&self, key: &str);
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process [`StateStore`] implementation.
///
/// Suitable for tests and single-process deployments. Expired entries are
/// dropped lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries. Test helper.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock();
        entries.values().filter(|e| !e.is_expired()).count()
    }

    /// Returns true if the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    async fn increment(&self, key: &str, ttl: Duration) -> u64 {
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.parse::<u64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        let expires_at = match entries.get(key) {
            Some(entry) if !entry.is_expired() => entry.expires_at,
            _ => Some(Instant::now() + ttl),
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        next
    }

    async fn forget(&self, key: &str) {
        let mut entries = self.entries.lock();
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryStore::new();
        store.put("k", "v", Duration::from_secs(60)).await;
        assert_eq!(store.get("k").await.as_deref(), Some("v"));
        assert_eq!(store.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_increment_starts_at_one() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("n", Duration::from_secs(60)).await, 1);
        assert_eq!(store.increment("n", Duration::from_secs(60)).await, 2);
        assert_eq!(store.increment("n", Duration::from_secs(60)).await, 3);
        assert_eq!(store.get("n").await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_forget() {
        let store = InMemoryStore::new();
        store.put("k", "v", Duration::from_secs(60)).await;
        store.forget("k").await;
        assert_eq!(store.get("k").await, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_is_gone() {
        let store = InMemoryStore::new();
        store.put("k", "v", Duration::from_millis(1)).await;
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k").await, None);
    }

    #[tokio::test]
    async fn test_increment_after_expiry_restarts() {
        let store = InMemoryStore::new();
        store.put("n", "7", Duration::from_millis(1)).await;
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.increment("n", Duration::from_secs(60)).await, 1);
    }
}
