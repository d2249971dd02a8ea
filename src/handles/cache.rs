//! Weak cache from raw native pointers to their managed proxies

use crate::object::{Object, WeakObject};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Entries never keep a proxy alive; a dead entry is recreated on demand
/// and dropped by [`HandleCache::sweep`].
#[derive(Default)]
pub struct HandleCache {
    entries: DashMap<usize, WeakObject>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ptr: usize) -> Option<Object> {
        self.entries.get(&ptr).and_then(|weak| weak.upgrade())
    }

    /// Live proxy for `ptr`, creating a fresh one if absent or collected
    pub fn get_or_create(&self, ptr: usize) -> Object {
        if let Some(obj) = self.get(ptr) {
            return obj;
        }

        match self.entries.entry(ptr) {
            Entry::Occupied(mut entry) => match entry.get().upgrade() {
                Some(obj) => obj,
                None => {
                    let obj = Object::native_proxy(ptr);
                    entry.insert(obj.downgrade());
                    obj
                }
            },
            Entry::Vacant(entry) => {
                let obj = Object::native_proxy(ptr);
                entry.insert(obj.downgrade());
                obj
            }
        }
    }

    /// Associate an existing managed object with a native pointer
    pub fn insert(&self, ptr: usize, obj: &Object) {
        self.entries.insert(ptr, obj.downgrade());
    }

    pub fn remove(&self, ptr: usize) -> Option<Object> {
        self.entries.remove(&ptr).and_then(|(_, weak)| weak.upgrade())
    }

    /// Drop entries whose proxies were collected; returns how many
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.is_alive());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
