//! Bucket storage.
//!
//! The store exclusively owns every bucket. Callers receive a [`BucketHandle`]
//! for the duration of one admission check; the handle's mutex is the
//! per-bucket critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Mutable per-key state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Currently available tokens, in `[0, capacity]`.
    pub tokens: f64,
    /// Clock reading (nanos) of the last refill. Never decreases.
    pub last_refill_nanos: u64,
}

/// Shared handle to one bucket. Lock it for the whole read-modify-write.
pub type BucketHandle = Arc<Mutex<BucketState>>;

/// Lock a bucket, recovering from poisoning.
///
/// The guarded state is two plain numbers written by assignment, so a panic
/// elsewhere while the lock was held cannot leave it half-updated.
pub fn lock_bucket(handle: &BucketHandle) -> MutexGuard<'_, BucketState> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Storage interface for bucket state (injectable into the controller).
pub trait BucketStore: Send + Sync + std::fmt::Debug {
    /// Return the bucket for `key`, creating it with `initial_tokens` stamped at
    /// `now_nanos` if absent.
    ///
    /// Concurrent first calls for the same key resolve to one bucket; every
    /// caller receives a handle to that same instance.
    fn get_or_create(&self, key: &str, now_nanos: u64, initial_tokens: f64) -> BucketHandle;

    /// Snapshot the state for `key`, if tracked.
    fn get(&self, key: &str) -> Option<BucketState>;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    /// `true` when no key is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove buckets last refilled at least `idle_for` before `now_nanos`.
    ///
    /// Buckets an in-flight check currently holds are kept. Returns the number
    /// of buckets removed.
    fn evict_idle(&self, now_nanos: u64, idle_for: Duration) -> usize;
}

/// In-memory store: a `RwLock`ed map of individually locked buckets.
///
/// The map lock is held only to look up, insert, or evict; refill arithmetic
/// runs under the bucket's own mutex. Clones share the same map.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBucketStore {
    buckets: Arc<RwLock<HashMap<String, BucketHandle>>>,
}

impl InMemoryBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketStore for InMemoryBucketStore {
    fn get_or_create(&self, key: &str, now_nanos: u64, initial_tokens: f64) -> BucketHandle {
        {
            let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = map.get(key) {
                return handle.clone();
            }
        }

        // Another caller may have inserted between the read and write locks;
        // `entry` keeps whichever bucket got there first.
        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.to_owned())
            .or_insert_with(|| {
                tracing::trace!(key, "bucket created");
                Arc::new(Mutex::new(BucketState {
                    tokens: initial_tokens,
                    last_refill_nanos: now_nanos,
                }))
            })
            .clone()
    }

    fn get(&self, key: &str) -> Option<BucketState> {
        let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).map(|handle| *lock_bucket(handle))
    }

    fn len(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn evict_idle(&self, now_nanos: u64, idle_for: Duration) -> usize {
        let idle_nanos = u64::try_from(idle_for.as_nanos()).unwrap_or(u64::MAX);
        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        // With the write lock held no new handles can be handed out, so a
        // strong count of 1 means no check is using the bucket.
        map.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let state = lock_bucket(handle);
            now_nanos.saturating_sub(state.last_refill_nanos) < idle_nanos
        });
        let evicted = before - map.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = map.len(), "evicted idle buckets");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn creates_full_bucket_on_first_contact() {
        let store = InMemoryBucketStore::new();
        assert!(store.is_empty());
        let handle = store.get_or_create("alice:10.0.0.1", 42, 9.0);
        assert_eq!(*lock_bucket(&handle), BucketState { tokens: 9.0, last_refill_nanos: 42 });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn existing_bucket_is_not_reset() {
        let store = InMemoryBucketStore::new();
        let first = store.get_or_create("k", 0, 5.0);
        lock_bucket(&first).tokens = 1.0;

        let second = store.get_or_create("k", 10 * SEC, 5.0);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.get("k").unwrap(), BucketState { tokens: 1.0, last_refill_nanos: 0 });
    }

    #[test]
    fn concurrent_first_calls_share_one_bucket() {
        let store = InMemoryBucketStore::new();
        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.get_or_create("shared", i, 3.0)
                })
            })
            .collect();

        let buckets: Vec<BucketHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for bucket in &buckets[1..] {
            assert!(Arc::ptr_eq(&buckets[0], bucket), "all callers must observe one instance");
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn evicts_only_idle_buckets() {
        let store = InMemoryBucketStore::new();
        drop(store.get_or_create("old", 0, 1.0));
        drop(store.get_or_create("fresh", 50 * SEC, 1.0));

        let evicted = store.evict_idle(60 * SEC, Duration::from_secs(30));
        assert_eq!(evicted, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn eviction_skips_buckets_in_use() {
        let store = InMemoryBucketStore::new();
        let held = store.get_or_create("busy", 0, 1.0);

        assert_eq!(store.evict_idle(100 * SEC, Duration::from_secs(1)), 0);
        assert_eq!(store.len(), 1);

        drop(held);
        assert_eq!(store.evict_idle(100 * SEC, Duration::from_secs(1)), 1);
        assert!(store.is_empty());
    }
}
