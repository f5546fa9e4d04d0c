//! Lock-guarded local copy of a keyspace.
//!
//! Every read and mutation goes through one mutex. The lifecycle phase
//! lives under the same lock, so nothing can be applied once the cache is
//! closed, and a bootstrap merge is never observed half-applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::node::local_key;

/// Lifecycle of a [`Dict`](crate::Dict).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictState {
    /// Bootstrap has not succeeded yet.
    Initializing,
    /// Bootstrap done, changes applied as they arrive.
    Live,
    /// No further changes are applied.
    Closed,
}

pub struct Cache {
    inner: Mutex<CacheState>,
}

struct CacheState {
    entries: HashMap<String, String>,
    phase: DictState,
    // keys set while initializing; their values in `entries` outrank the snapshot
    touched: HashSet<String>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheState {
                entries: HashMap::new(),
                phase: DictState::Initializing,
                touched: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).cloned()
    }

    /// Stores `value` under the local key of `full_key`. Returns `false`
    /// if the cache is closed and nothing was applied.
    pub fn set(&self, full_key: &str, value: String) -> bool {
        let mut state = self.lock();
        let key = local_key(full_key).to_string();

        let phase = state.phase;
        match phase {
            DictState::Closed => return false,
            DictState::Initializing => {
                state.touched.insert(key.clone());
            }
            DictState::Live => {}
        }

        state.entries.insert(key, value);
        true
    }

    /// Merges a bootstrap snapshot and goes live, under a single lock
    /// acquisition. Keys set while initializing keep their current value.
    ///
    /// Returns `false` if the cache was already closed. A cache that is
    /// already live merges the batch without changing phase.
    pub fn bootstrap<'a, I>(&self, batch: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = self.lock();
        if state.phase == DictState::Closed {
            return false;
        }

        let touched = std::mem::take(&mut state.touched);
        for (full_key, value) in batch {
            let key = local_key(full_key);
            if !touched.contains(key) {
                state.entries.insert(key.to_string(), value.to_string());
            }
        }

        state.phase = DictState::Live;
        true
    }

    pub fn close(&self) {
        let mut state = self.lock();
        state.phase = DictState::Closed;
        state.touched.clear();
    }

    pub fn state(&self) -> DictState {
        self.lock().phase
    }

    pub fn is_closed(&self) -> bool {
        self.state() == DictState::Closed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
