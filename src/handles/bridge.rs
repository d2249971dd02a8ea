//! Wrapper table and refcount discipline

use super::{HandleCache, NativeHandle};
use crate::error::HandleError;
use crate::logging::{log_handle_created, log_handle_released};
use crate::object::{Object, ObjectId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{trace, warn};

/// Tombstones kept in checked mode before the oldest slot is recycled
pub const DEFAULT_QUARANTINE: usize = 1024;

/// What a wrapper stands for
#[derive(Debug, Clone)]
pub enum WrapperTarget {
    /// Primitive wrapper created from a native integer
    Int(i64),
    /// Primitive wrapper created from a native double
    Float(f64),
    /// Generic wrapper delegating to a managed object
    Object(Object),
    /// Generic wrapper delegating to another wrapper
    Wrapper(NativeHandle),
}

struct Wrapper {
    target: WrapperTarget,
    refcount: u64,
    /// Boxed value of a primitive wrapper, created on first resolve
    materialized: Option<Object>,
}

enum Slot {
    Live(Wrapper),
    /// Tombstone left by a release in checked mode
    Released,
    Vacant,
}

#[derive(Default)]
struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    /// Tombstoned slots, oldest first
    tombstones: VecDeque<usize>,
    by_identity: HashMap<ObjectId, usize>,
    ints: HashMap<i64, usize>,
    floats: HashMap<u64, usize>,
    scopes: Vec<Vec<usize>>,
    unscoped_pins: usize,
    released: usize,
}

impl HandleTable {
    fn allocate(&mut self, target: WrapperTarget) -> usize {
        let wrapper = Wrapper {
            target,
            refcount: 1,
            materialized: None,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Slot::Live(wrapper);
                index
            }
            None => {
                self.slots.push(Slot::Live(wrapper));
                self.slots.len() - 1
            }
        }
    }

    fn live_mut(&mut self, handle: NativeHandle) -> Result<&mut Wrapper, HandleError> {
        let index = handle.index().ok_or(HandleError::Unknown(handle))?;
        match self.slots.get_mut(index) {
            Some(Slot::Live(wrapper)) => Ok(wrapper),
            Some(Slot::Released) => Err(HandleError::Stale(handle)),
            Some(Slot::Vacant) | None => Err(HandleError::Unknown(handle)),
        }
    }

    fn incref_index(&mut self, index: usize) -> Result<u64, HandleError> {
        let handle = NativeHandle::from_index(index);
        let wrapper = self.live_mut(handle)?;
        wrapper.refcount = wrapper
            .refcount
            .checked_add(1)
            .ok_or(HandleError::Overflow(handle))?;
        Ok(wrapper.refcount)
    }

    /// Tombstone `index`, recycling the oldest tombstone past `limit`
    fn quarantine(&mut self, index: usize, limit: usize) -> Slot {
        let evicted = std::mem::replace(&mut self.slots[index], Slot::Released);
        self.tombstones.push_back(index);
        while self.tombstones.len() > limit {
            let Some(oldest) = self.tombstones.pop_front() else {
                break;
            };
            self.slots[oldest] = Slot::Vacant;
            self.free.push(oldest);
        }
        evicted
    }

    fn pin(&mut self, index: usize) {
        match self.scopes.last_mut() {
            Some(scope) => scope.push(index),
            None => self.unscoped_pins += 1,
        }
    }
}

/// Snapshot of wrapper-table occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub live: usize,
    pub primitives: usize,
    pub released: usize,
    pub pinned: usize,
    /// Table length, live or not
    pub slots: usize,
    pub tombstones: usize,
}

/// Maps managed objects to native handles and back
pub struct ReferenceBridge {
    table: Mutex<HandleTable>,
    pointers: HandleCache,
    checked: bool,
    max_depth: usize,
    quarantine: usize,
}

impl ReferenceBridge {
    pub fn new(checked: bool, max_depth: usize) -> Self {
        Self {
            table: Mutex::new(HandleTable::default()),
            pointers: HandleCache::new(),
            checked,
            max_depth,
            quarantine: DEFAULT_QUARANTINE,
        }
    }

    /// Bound on tombstoned slots in checked mode
    ///
    /// A double release is caught until its slot leaves the quarantine.
    pub fn with_quarantine(mut self, limit: usize) -> Self {
        self.quarantine = limit;
        self
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Native-pointer side cache
    pub fn pointers(&self) -> &HandleCache {
        &self.pointers
    }

    /// Hand `obj` to native code as an owned reference
    ///
    /// The same object maps to the same handle while its wrapper is live;
    /// each call adds one reference the receiver must release.
    pub fn to_new_reference(&self, obj: &Object) -> Result<NativeHandle, HandleError> {
        if let crate::object::Payload::NativeProxy(ptr) = obj.payload() {
            return Ok(NativeHandle::from_raw(*ptr));
        }

        let mut table = self.table.lock();
        if let Some(&index) = table.by_identity.get(&obj.id()) {
            table.incref_index(index)?;
            return Ok(NativeHandle::from_index(index));
        }

        let index = table.allocate(WrapperTarget::Object(obj.clone()));
        table.by_identity.insert(obj.id(), index);
        let handle = NativeHandle::from_index(index);
        log_handle_created(handle, obj.class_name(), 1);
        Ok(handle)
    }

    /// Hand `obj` to native code for the duration of the current borrow scope
    ///
    /// The bridge holds the reference; it is dropped when the innermost
    /// [`BorrowScope`] exits. Native code that wants to keep the object
    /// must incref it. Outside any scope the pin lives as long as the bridge.
    pub fn to_borrowed_reference(&self, obj: &Object) -> Result<NativeHandle, HandleError> {
        let handle = self.to_new_reference(obj)?;
        if let Some(index) = handle.index() {
            self.table.lock().pin(index);
        }
        Ok(handle)
    }

    /// Borrowed references created until the guard drops are reclaimed then
    pub fn enter_scope(&self) -> BorrowScope<'_> {
        let mut table = self.table.lock();
        table.scopes.push(Vec::new());
        BorrowScope {
            bridge: self,
            depth: table.scopes.len() - 1,
        }
    }

    /// Primitive wrapper for a native integer, shared per value
    pub fn int_handle(&self, value: i64) -> Result<NativeHandle, HandleError> {
        let mut table = self.table.lock();
        if let Some(&index) = table.ints.get(&value) {
            table.incref_index(index)?;
            return Ok(NativeHandle::from_index(index));
        }
        let index = table.allocate(WrapperTarget::Int(value));
        table.ints.insert(value, index);
        Ok(NativeHandle::from_index(index))
    }

    /// Primitive wrapper for a native double, shared per bit pattern
    pub fn float_handle(&self, value: f64) -> Result<NativeHandle, HandleError> {
        let mut table = self.table.lock();
        if let Some(&index) = table.floats.get(&value.to_bits()) {
            table.incref_index(index)?;
            return Ok(NativeHandle::from_index(index));
        }
        let index = table.allocate(WrapperTarget::Float(value));
        table.floats.insert(value.to_bits(), index);
        Ok(NativeHandle::from_index(index))
    }

    /// Generic wrapper delegating to another handle; holds one reference on it
    pub fn wrap_handle(&self, inner: NativeHandle) -> Result<NativeHandle, HandleError> {
        if inner.is_null() {
            return Err(HandleError::Null);
        }
        let mut table = self.table.lock();
        if let Some(index) = inner.index() {
            table.incref_index(index)?;
        }
        let index = table.allocate(WrapperTarget::Wrapper(inner));
        Ok(NativeHandle::from_index(index))
    }

    /// Unwrap any handle kind to its managed object
    pub fn resolve(&self, handle: NativeHandle) -> Result<Object, HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }

        let mut current = handle;
        for _ in 0..=self.max_depth {
            if !current.is_tagged() {
                return Ok(self.pointers.get_or_create(current.as_raw()));
            }

            let mut table = self.table.lock();
            let wrapper = table.live_mut(current)?;
            if let Some(boxed) = &wrapper.materialized {
                return Ok(boxed.clone());
            }
            let boxed = match &wrapper.target {
                WrapperTarget::Object(obj) => return Ok(obj.clone()),
                WrapperTarget::Wrapper(inner) => {
                    current = *inner;
                    continue;
                }
                WrapperTarget::Int(value) => Object::int(*value),
                WrapperTarget::Float(value) => Object::float(*value),
            };

            // The boxed value crosses back to this same wrapper
            wrapper.materialized = Some(boxed.clone());
            if let Some(index) = current.index() {
                table.by_identity.insert(boxed.id(), index);
            }
            return Ok(boxed);
        }

        Err(HandleError::TooDeep {
            handle,
            limit: self.max_depth,
        })
    }

    pub fn target(&self, handle: NativeHandle) -> Result<WrapperTarget, HandleError> {
        Ok(self.table.lock().live_mut(handle)?.target.clone())
    }

    /// Borrowed → owned transfer. Raw native pointers are left to native code.
    pub fn incref(&self, handle: NativeHandle) -> Result<u64, HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        match handle.index() {
            Some(index) => self.table.lock().incref_index(index),
            None => Ok(0),
        }
    }

    pub fn refcount(&self, handle: NativeHandle) -> Result<u64, HandleError> {
        if !handle.is_tagged() {
            return Ok(0);
        }
        Ok(self.table.lock().live_mut(handle)?.refcount)
    }

    /// Drop one native reference; returns the remaining count
    ///
    /// At zero the wrapper is evicted. The count never goes below zero:
    /// releasing an evicted wrapper is reported as a double release in
    /// checked mode and as an unknown handle otherwise.
    pub fn release(&self, handle: NativeHandle) -> Result<u64, HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        let Some(index) = handle.index() else {
            return Ok(0);
        };

        let (remaining, inner) = {
            let mut table = self.table.lock();
            let wrapper = match table.slots.get_mut(index) {
                Some(Slot::Live(wrapper)) => wrapper,
                Some(Slot::Released) => return Err(HandleError::DoubleRelease(handle)),
                Some(Slot::Vacant) | None => return Err(HandleError::Unknown(handle)),
            };

            wrapper.refcount -= 1;
            if wrapper.refcount > 0 {
                return Ok(wrapper.refcount);
            }

            table.released += 1;
            let evicted = if self.checked {
                table.quarantine(index, self.quarantine)
            } else {
                table.free.push(index);
                std::mem::replace(&mut table.slots[index], Slot::Vacant)
            };

            let mut inner = None;
            if let Slot::Live(wrapper) = evicted {
                if let Some(boxed) = &wrapper.materialized {
                    if table.by_identity.get(&boxed.id()) == Some(&index) {
                        table.by_identity.remove(&boxed.id());
                    }
                }
                match wrapper.target {
                    WrapperTarget::Object(obj) => {
                        if table.by_identity.get(&obj.id()) == Some(&index) {
                            table.by_identity.remove(&obj.id());
                        }
                    }
                    WrapperTarget::Int(value) => {
                        table.ints.remove(&value);
                    }
                    WrapperTarget::Float(value) => {
                        table.floats.remove(&value.to_bits());
                    }
                    WrapperTarget::Wrapper(target) => inner = Some(target),
                }
            }
            (0, inner)
        };

        log_handle_released(handle);
        if let Some(inner) = inner {
            self.release(inner)?;
        }
        Ok(remaining)
    }

    /// Take ownership of a new reference returned by native code
    pub fn steal(&self, handle: NativeHandle) -> Result<Object, HandleError> {
        let obj = self.resolve(handle)?;
        self.release(handle)?;
        Ok(obj)
    }

    pub fn stats(&self) -> BridgeStats {
        let table = self.table.lock();
        let mut stats = BridgeStats {
            released: table.released,
            pinned: table.unscoped_pins + table.scopes.iter().map(Vec::len).sum::<usize>(),
            slots: table.slots.len(),
            tombstones: table.tombstones.len(),
            ..BridgeStats::default()
        };
        for slot in &table.slots {
            if let Slot::Live(wrapper) = slot {
                stats.live += 1;
                if matches!(wrapper.target, WrapperTarget::Int(_) | WrapperTarget::Float(_)) {
                    stats.primitives += 1;
                }
            }
        }
        stats
    }
}

/// Borrow scope guard; see [`ReferenceBridge::enter_scope`]
#[must_use]
pub struct BorrowScope<'a> {
    bridge: &'a ReferenceBridge,
    depth: usize,
}

impl Drop for BorrowScope<'_> {
    fn drop(&mut self) {
        let pinned: Vec<usize> = {
            let mut table = self.bridge.table.lock();
            if table.scopes.len() <= self.depth {
                return;
            }
            table.scopes.split_off(self.depth).into_iter().flatten().collect()
        };

        trace!(event = "borrow_scope_exit", reclaimed = pinned.len());
        for index in pinned {
            if let Err(err) = self.bridge.release(NativeHandle::from_index(index)) {
                // Native code released a reference it only borrowed
                warn!(event = "borrow_scope_release_failed", error = %err);
            }
        }
    }
}
