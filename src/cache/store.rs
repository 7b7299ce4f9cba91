use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use thiserror::Error;

use crate::api::Object;

/// Errors reading the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A writer panicked while holding the lock; contents may be stale.
    #[error("cache lock poisoned; contents may be inconsistent")]
    Poisoned,
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Poisoned => "store_poisoned",
        }
    }
}

/// Key → object cache filled by one informer and read by the workers.
#[derive(Debug, Default)]
pub struct Store {
    items: RwLock<HashMap<String, Arc<Object>>>,
}

impl Store {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Object cached under `key`.
    pub fn get_by_key(&self, key: &str) -> Result<Option<Arc<Object>>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::Poisoned)?;
        Ok(items.get(key).cloned())
    }

    /// Snapshot of every cached object.
    pub fn list(&self) -> Vec<Arc<Object>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        items.values().cloned().collect()
    }

    /// Snapshot of every cached key.
    pub fn keys(&self) -> Vec<String> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        items.keys().cloned().collect()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Object>>> {
        self.items.write().unwrap_or_else(|poisoned| {
            self.items.clear_poison();
            poisoned.into_inner()
        })
    }

    pub(crate) fn upsert(&self, key: String, obj: Arc<Object>) -> Option<Arc<Object>> {
        self.write().insert(key, obj)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<Object>> {
        self.write().remove(key)
    }

    /// Swaps the whole content; returns the previous content.
    pub(crate) fn replace(&self, items: HashMap<String, Arc<Object>>) -> HashMap<String, Arc<Object>> {
        std::mem::replace(&mut *self.write(), items)
    }

    /// Poisons the lock the way a panicking writer would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = self.items.write();
                    panic!("writer died");
                })
                .join();
        });
    }
}
