//! Rate limiting and ephemeral caching for generation calls.
//!
//! Both types are bounded: long-running servers must not grow memory with
//! every speaker/target pair the town ever produced.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Per-key cooldown gate. A key that fired within the window is denied;
/// callers substitute their deterministic fallback instead of waiting.
pub struct CooldownGate {
    entries: RwLock<HashMap<String, Instant>>,
    window: Duration,
    max_entries: usize,
}

impl CooldownGate {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            window,
            max_entries,
        }
    }

    /// Try to take the key. `true` records the attempt and lets the caller
    /// proceed; `false` means the key is still cooling down.
    pub async fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now()).await
    }

    async fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(last) = entries.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            evict_oldest(&mut entries);
        }
        entries.insert(key.to_string(), now);
        true
    }

    /// Drop every recorded key. Called at the daily rollover.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    #[cfg(test)]
    pub async fn try_acquire_for_test(&self, key: &str, now: Instant) -> bool {
        self.try_acquire_at(key, now).await
    }
}

fn evict_oldest(entries: &mut HashMap<String, Instant>) {
    if let Some(oldest) = entries
        .iter()
        .min_by_key(|(_, at)| **at)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&oldest);
    }
}

/// A thread-safe cache with time-to-live expiration and a size cap.
///
/// Entries expire after the configured TTL; inserting past the cap evicts
/// the oldest entry first.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, TtlEntry<V>>>,
    ttl: Duration,
    max_entries: usize,
}

struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Insert a value, replacing any existing entry and resetting the TTL.
    pub async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            // Expired entries go first; otherwise the oldest makes room.
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            TtlEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Insert a value with an explicit timestamp (tests only).
    #[cfg(test)]
    pub async fn insert_at(&self, key: K, value: V, inserted_at: Instant) {
        let entry = TtlEntry { value, inserted_at };
        self.entries.write().await.insert(key, entry);
    }

    /// Get a value if it exists and hasn't expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.entries.read().await;
        guard.get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Drop everything. Called at the daily rollover.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
