//! Shared keyed registry for live session handles.
//!
//! Every manager owns one registry mapping a logical id (project id,
//! terminal session id) to its live handle. The map is never handed out
//! raw; callers go through these operations, and the one-live-instance
//! invariant is enforced with [`Registry::replace`] rather than ad-hoc
//! check-then-insert at call sites.

use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};

/// Concurrent map from logical id to live handle.
#[derive(Debug)]
pub struct Registry<T> {
    entries: DashMap<String, T>,
}

impl<T> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a handle, returning any previous handle under the same key.
    pub fn insert(&self, key: impl Into<String>, value: T) -> Option<T> {
        self.entries.insert(key.into(), value)
    }

    /// Atomic upsert: store `value` under `key` and hand back the displaced
    /// handle so the caller can terminate it. This is the single code path
    /// for "at most one live instance per key".
    pub fn replace(&self, key: impl Into<String>, value: T) -> Option<T> {
        self.entries.insert(key.into(), value)
    }

    /// Remove and return the handle for `key`.
    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Remove the handle for `key` only when `pred` holds.
    ///
    /// Used when a stale handle reports its own exit: the key may already
    /// be occupied by a replacement, which must survive.
    pub fn remove_if(&self, key: &str, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        self.entries
            .remove_if(key, |_, value| pred(value))
            .map(|(_, v)| v)
    }

    /// Shared access to the handle for `key`.
    pub fn get(&self, key: &str) -> Option<Ref<'_, String, T>> {
        self.entries.get(key)
    }

    /// Exclusive access to the handle for `key`.
    pub fn get_mut(&self, key: &str) -> Option<RefMut<'_, String, T>> {
        self.entries.get_mut(key)
    }

    /// Whether a handle exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Snapshot of all keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit every entry.
    pub fn for_each(&self, mut f: impl FnMut(&str, &T)) {
        for entry in self.entries.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Remove every handle, returning them for teardown.
    pub fn drain(&self) -> Vec<(String, T)> {
        let keys = self.keys();
        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.remove(&key) {
                drained.push((key, value));
            }
        }
        drained
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.insert("a", 1).is_none());
        assert_eq!(*registry.get("a").unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replace_returns_displaced() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("a", 1);
        let displaced = registry.replace("a", 2);
        assert_eq!(displaced, Some(1));
        assert_eq!(*registry.get("a").unwrap(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("a", 1);
        assert_eq!(registry.remove("a"), Some(1));
        assert_eq!(registry.remove("a"), None);
    }

    #[test]
    fn test_drain() {
        let registry: Registry<u32> = Registry::new();
        registry.insert("a", 1);
        registry.insert("b", 2);
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
