//! In-memory lock table owned by the leader.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Value meaning "nobody holds this key". Absent keys read as this.
pub const UNLOCKED: &str = "";

/// Flat `key -> value` map with atomic compare-and-swap.
///
/// Every operation runs inside one critical section covering the whole map.
/// The store attaches no meaning to values beyond the empty string being
/// equivalent to an absent key.
#[derive(Debug, Default)]
pub struct LockStore {
    entries: Mutex<HashMap<String, String>>,
}

impl LockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`, or the empty string.
    pub fn get(&self, key: &str) -> String {
        self.entries()
            .get(key)
            .cloned()
            .unwrap_or_else(|| UNLOCKED.to_string())
    }

    /// Set `key` to `new` if its current value equals `old`.
    ///
    /// Returns the value observed before the call and whether the swap
    /// happened. On success the observed value is `old`.
    pub fn compare_and_swap(&self, key: &str, old: &str, new: &str) -> (String, bool) {
        let mut entries = self.entries();
        let current = entries.get(key).map(String::as_str).unwrap_or(UNLOCKED);
        if current != old {
            return (current.to_string(), false);
        }

        if new == UNLOCKED {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), new.to_string());
        }
        (old.to_string(), true)
    }

    /// Number of keys currently holding a non-empty value.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // No critical section can leave the map half-written, so a guard
    // poisoned by a panicking holder is still safe to reuse.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
