// ============================================================================
// State Store
// ============================================================================
//
// Keyed storage with compare-and-swap semantics for the gateway's shared
// mutable state:
// - rate-limit windows (one per identity)
// - circuit breaker snapshots (one per protected call-site)
//
// The rate limiter and circuit breaker only talk to this trait. A shared
// store (Redis, Postgres advisory rows) must make `compare_and_swap` atomic
// across every gateway instance that shares it. The stored values carry
// tokio `Instant`s, which are only meaningful inside one process, so such a
// store would also need them re-expressed as wall-clock timestamps.
//
// ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Keyed state with optimistic concurrency
#[async_trait]
pub trait StateStore<V>: Send + Sync
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Current value for `key`, if any
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Replace the value for `key` with `new` only if it still equals
    /// `expected` (`None` meaning "absent").
    ///
    /// Returns `Ok(true)` when the swap happened, `Ok(false)` when another
    /// writer got there first and the caller should re-read.
    async fn compare_and_swap(&self, key: &str, expected: Option<&V>, new: V) -> Result<bool>;

    /// Drop every entry for which `keep` returns false; returns how many
    /// were removed. Stores with native expiry may treat this as a no-op.
    async fn retain(&self, keep: &(dyn for<'k> Fn(&'k V) -> bool + Send + Sync)) -> Result<usize>;
}

/// Process-local store backed by a mutex-guarded map
///
/// The lock is never held across an await point.
pub struct InMemoryStore<V> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of tracked keys (for metrics and tests)
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> StateStore<V> for InMemoryStore<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&V>, new: V) -> Result<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;

        if entries.get(key) != expected {
            return Ok(false);
        }

        entries.insert(key.to_string(), new);
        Ok(true)
    }

    async fn retain(&self, keep: &(dyn for<'k> Fn(&'k V) -> bool + Send + Sync)) -> Result<usize> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("state store lock poisoned"))?;

        let before = entries.len();
        entries.retain(|_, value| keep(value));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_when_absent() {
        let store = InMemoryStore::<u32>::new();

        assert!(store.compare_and_swap("a", None, 1).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_expectation_is_rejected() {
        let store = InMemoryStore::<u32>::new();
        store.compare_and_swap("a", None, 1).await.unwrap();

        // Someone else already inserted, so "absent" is stale
        assert!(!store.compare_and_swap("a", None, 5).await.unwrap());
        // Wrong current value
        assert!(!store.compare_and_swap("a", Some(&2), 5).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(1));

        assert!(store.compare_and_swap("a", Some(&1), 2).await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_retain_drops_rejected_entries() {
        let store = InMemoryStore::<u32>::new();
        for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
            store.compare_and_swap(key, None, value).await.unwrap();
        }

        assert_eq!(store.retain(&|v: &u32| *v >= 2).await.unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("c").await.unwrap(), Some(3));
    }
}
