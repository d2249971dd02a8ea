//! Allocation tracker - native heap attribution for the managed collector
//!
//! Design: one mutex-guarded table per context, since allocation hooks can
//! fire from native threads outside the main call path.
//! - Domains are created on first use and looked up by caller key
//! - Every tracked byte feeds a signed memory-pressure counter; crossing the
//!   threshold asks the runtime for a collection once per crossing
//! - Container registrations are independent of size tracking

#[cfg(test)]
mod tests;

use crate::error::BridgeError;
use crate::logging::{
    log_allocation_site, log_container, log_free, log_memory_pressure, log_new_reference,
    log_static_type, log_track, log_untrack,
};
use crate::object::{FrameRef, ManagedRuntime};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AllocationRecord {
    pub ptr: usize,
    pub size: u64,
    pub domain: u64,
    pub site: Option<FrameRef>,
}

/// Independent partition of the allocation table
#[derive(Debug)]
pub struct TraceMallocDomain {
    key: u64,
    allocations: HashMap<usize, AllocationRecord>,
}

impl TraceMallocDomain {
    fn new(key: u64) -> Self {
        Self {
            key,
            allocations: HashMap::new(),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.allocations.values().map(|r| r.size).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub class_name: String,
    pub frame: Option<FrameRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStats {
    pub key: u64,
    pub allocations: usize,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    domains: Vec<TraceMallocDomain>,
    index: HashMap<u64, usize>,
    containers: HashMap<usize, ContainerRecord>,
    static_types: HashMap<usize, String>,
    pressure: i64,
    above_threshold: bool,
}

impl TrackerState {
    fn find_or_create(&mut self, key: u64) -> usize {
        if let Some(&index) = self.index.get(&key) {
            return index;
        }
        self.domains.push(TraceMallocDomain::new(key));
        let index = self.domains.len() - 1;
        self.index.insert(key, index);
        index
    }

    /// Returns true when this change crossed the threshold upwards
    fn adjust_pressure(&mut self, delta: i64, threshold: u64) -> bool {
        self.pressure = self.pressure.saturating_add(delta);
        let above = self.pressure > 0 && self.pressure as u64 >= threshold;
        let crossed = above && !self.above_threshold;
        self.above_threshold = above;
        crossed
    }
}

pub struct AllocationTracker {
    state: Mutex<TrackerState>,
    trace_memory: bool,
    trace_calls: bool,
    threshold: u64,
}

impl AllocationTracker {
    pub fn new(trace_memory: bool, trace_calls: bool, threshold: u64) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            trace_memory,
            trace_calls,
            threshold,
        }
    }

    pub fn is_tracing(&self) -> bool {
        self.trace_memory
    }

    /// Stable index of the domain for `key`, creating it on first use
    pub fn find_or_create_domain(&self, key: u64) -> usize {
        self.state.lock().find_or_create(key)
    }

    pub fn pressure(&self) -> i64 {
        self.state.lock().pressure
    }

    /// Record an allocation and add its size to memory pressure
    ///
    /// Re-tracking a pointer replaces the old record and its size. Sizes
    /// above `i64::MAX` are refused.
    pub fn track(
        &self,
        runtime: &dyn ManagedRuntime,
        domain: u64,
        ptr: usize,
        size: u64,
    ) -> Result<(), BridgeError> {
        let signed = i64::try_from(size).map_err(|_| BridgeError::AllocationTooLarge { ptr, size })?;
        let site = if self.trace_calls {
            runtime.current_frame()
        } else {
            None
        };

        let crossed = {
            let mut state = self.state.lock();
            let index = state.find_or_create(domain);
            let record = AllocationRecord {
                ptr,
                size,
                domain,
                site,
            };
            let replaced = state.domains[index].allocations.insert(ptr, record);
            let delta = signed - replaced.map_or(0, |r| r.size as i64);
            state.adjust_pressure(delta, self.threshold)
        };

        log_track(domain, ptr, size);
        if crossed {
            log_memory_pressure(self.pressure(), self.threshold);
            runtime.request_collection();
        }
        Ok(())
    }

    /// Remove a record; returns its size, or 0 if `ptr` was not tracked
    ///
    /// A domain seen for the first time is created empty.
    pub fn untrack(&self, domain: u64, ptr: usize) -> u64 {
        let mut state = self.state.lock();
        let index = state.find_or_create(domain);
        let size = match state.domains[index].allocations.remove(&ptr) {
            Some(record) => record.size,
            None => return 0,
        };
        state.adjust_pressure(-(size as i64), self.threshold);
        drop(state);

        log_untrack(domain, ptr, size);
        size
    }

    /// Hook run right before native code frees `ptr`
    ///
    /// Pressure drops by `size`. Any record for `ptr` is removed from
    /// whichever domain holds it; with memory tracing on, its allocation
    /// site is reported.
    pub fn free(&self, ptr: usize, size: u64) -> Option<AllocationRecord> {
        let record = {
            let mut state = self.state.lock();
            state.adjust_pressure(-i64::try_from(size).unwrap_or(i64::MAX), self.threshold);
            state
                .domains
                .iter_mut()
                .find_map(|domain| domain.allocations.remove(&ptr))
        };

        if self.trace_memory {
            log_free(ptr, size);
            let located = record
                .as_ref()
                .and_then(|r| r.site.as_ref())
                .and_then(FrameRef::first_located);
            if let Some(location) = located {
                log_allocation_site(ptr, &location.to_string());
            }
        }
        record
    }

    /// Hook for a fresh reference to a tracked object; nothing to record
    pub fn new_reference(&self, ptr: usize) {
        log_new_reference(ptr);
    }

    /// Register a native container with the collector
    pub fn track_container(&self, ptr: usize, frame: Option<FrameRef>, class_name: &str) {
        log_container(ptr, class_name, true);
        self.state.lock().containers.insert(
            ptr,
            ContainerRecord {
                class_name: class_name.to_string(),
                frame,
            },
        );
    }

    /// Deregister a container; unknown pointers are ignored
    pub fn untrack_container(&self, ptr: usize) -> Option<ContainerRecord> {
        let record = self.state.lock().containers.remove(&ptr);
        if let Some(record) = &record {
            log_container(ptr, &record.class_name, false);
        }
        record
    }

    pub fn is_container_tracked(&self, ptr: usize) -> bool {
        self.state.lock().containers.contains_key(&ptr)
    }

    /// Note a statically allocated native type
    pub fn trace_static_memory(&self, ptr: usize, class_name: &str) {
        if self.trace_memory {
            log_static_type(ptr, class_name);
        }
        self.state
            .lock()
            .static_types
            .insert(ptr, class_name.to_string());
    }

    pub fn static_type_name(&self, ptr: usize) -> Option<String> {
        self.state.lock().static_types.get(&ptr).cloned()
    }

    pub fn record(&self, domain: u64, ptr: usize) -> Option<AllocationRecord> {
        let state = self.state.lock();
        let index = *state.index.get(&domain)?;
        state.domains[index].allocations.get(&ptr).cloned()
    }

    pub fn stats(&self) -> Vec<DomainStats> {
        self.state
            .lock()
            .domains
            .iter()
            .map(|domain| DomainStats {
                key: domain.key(),
                allocations: domain.len(),
                bytes: domain.bytes(),
            })
            .collect()
    }
}
