//! Per-key async serialization
//!
//! Lifecycle calls for one VM id must be observed in issue order while calls for
//! different ids proceed in parallel. Each key maps to a weakly held mutex that
//! disappears once its last guard is dropped, so ids that are never touched
//! again cost nothing.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = Arc<DashMap<K, Weak<Mutex<()>>>>;

/// Held for the duration of one operation on a key
///
/// Dropping the last guard of a key removes the key from the map.
pub struct KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    guard: Option<OwnedMutexGuard<()>>,
    mutex: Arc<Mutex<()>>,
    key: K,
    locks: LockMap<K>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters hold their own strong reference, so a count of one means
        // nobody else wants this key.
        if Arc::strong_count(&self.mutex) == 1 {
            self.locks
                .remove_if(&self.key, |_, weak| weak.strong_count() <= 1);
        }
    }
}

/// Async lock table keyed by `K`, typically a VM id
pub struct KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    locks: LockMap<K>,
}

impl<K> KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits until no other guard for `key` is held.
    ///
    /// Waiters are granted the lock in arrival order.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let mutex = self.mutex_for(key);
        let guard = Arc::clone(&mutex).lock_owned().await;

        KeyedLockGuard {
            guard: Some(guard),
            mutex,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    fn mutex_for(&self, key: &K) -> Arc<Mutex<()>> {
        loop {
            match self.locks.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    if let Some(mutex) = occupied.get().upgrade() {
                        return mutex;
                    }
                    occupied.remove();
                }
                Entry::Vacant(vacant) => {
                    let mutex = Arc::new(Mutex::new(()));
                    vacant.insert(Arc::downgrade(&mutex));
                    return mutex;
                }
            }
        }
    }

    /// Keys currently tracked, including any not yet cleaned up.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
