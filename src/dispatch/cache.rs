//! Call-target cache
//!
//! Keyed by (callable identity, name, convention, conversion). Lookups of
//! published entries only take a shard read lock; construction re-checks
//! under the shard write lock so concurrent first use builds one target.
//!
//! Targets for managed callables hold their callable strongly, which also
//! keeps the key's identity from being reused. [`CallTargetCache::sweep`]
//! drops those entries once nothing outside the cache uses the target.

use super::convention::CallingConvention;
use super::target::{CallTarget, Executable};
use crate::error::PyResult;
use crate::logging::log_target_created;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub callable: usize,
    pub name: String,
    pub convention: CallingConvention,
    pub conversion: bool,
}

struct CacheEntry {
    target: Executable,
    /// Set for managed callables
    sweepable: bool,
}

impl CacheEntry {
    fn is_unused(&self) -> bool {
        self.sweepable && Arc::strong_count(&self.target) == 1
    }
}

#[derive(Default)]
pub struct CallTargetCache {
    entries: DashMap<TargetKey, CacheEntry>,
    constructions: AtomicUsize,
}

impl CallTargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TargetKey) -> Option<Executable> {
        self.entries.get(key).map(|entry| entry.target.clone())
    }

    /// Cached target for `key`, built by `build` on first use
    ///
    /// `sweepable` entries may be dropped by [`sweep`](Self::sweep).
    pub fn get_or_create<F>(&self, key: TargetKey, sweepable: bool, build: F) -> PyResult<Executable>
    where
        F: FnOnce() -> PyResult<CallTarget>,
    {
        if let Some(target) = self.get(&key) {
            return Ok(target);
        }

        let conversion = key.conversion;
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().target.clone()),
            Entry::Vacant(entry) => {
                let target = Arc::new(build()?);
                self.constructions.fetch_add(1, Ordering::Relaxed);
                log_target_created(target.name(), target.convention().name(), conversion);
                entry.insert(CacheEntry {
                    target: target.clone(),
                    sweepable,
                });
                Ok(target)
            }
        }
    }

    /// Drop every entry for a native callable, e.g. when its library unloads
    pub fn forget_callable(&self, callable: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.callable != callable);
        before - self.entries.len()
    }

    /// Drop managed-callable entries whose target is only held here
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_unused());
        before - self.entries.len()
    }

    /// Number of targets built so far
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
