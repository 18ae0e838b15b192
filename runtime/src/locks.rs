//! Per-key async critical sections.
//!
//! The token check and the triple-write of one submission must not
//! interleave with another call on the same submission, while calls on
//! different submissions proceed independently. [`KeyedLocks`] hands out one
//! async mutex per key and forgets the mutex once nobody holds it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A set of named async mutexes.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

/// Guard of one key; the critical section ends when it is dropped.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    /// Create an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self.slot(key);
        KeyGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of keys with a live mutex.
    #[must_use]
    pub fn active(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|w| w.strong_count() > 0).count()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slots.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        // Drop entries whose mutex is gone before adding a new one.
        slots.retain(|_, weak| weak.strong_count() > 0);
        let mutex = Arc::new(AsyncMutex::new(()));
        slots.insert(key.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}
