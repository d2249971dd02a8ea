//! Per-execution-context bridge state
//!
//! Every bridge operation takes a [`BridgeContext`] explicitly. Only the
//! call-target cache is shared between contexts; handle tables, error
//! slots and allocation tables are per context, so independent contexts
//! stay isolated.
//!
//! While a native function runs, its context is also reachable through
//! [`BridgeContext::with_current`] so native callbacks can find it.

use crate::config::{BridgeConfig, InvariantPolicy};
use crate::dispatch::CallTargetCache;
use crate::error::{BridgeError, HandleError, PyErr, PyResult};
use crate::exception::ExceptionState;
use crate::handles::{NativeHandle, ReferenceBridge};
use crate::logging::{log_bridge_init, log_bridge_shutdown, log_invariant_violation, perf};
use crate::object::{ManagedRuntime, Object, Payload};
use crate::tracemalloc::AllocationTracker;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static ACTIVE: RefCell<Vec<*const BridgeContext>> = const { RefCell::new(Vec::new()) };
}

pub struct BridgeContext {
    bridge: ReferenceBridge,
    errors: ExceptionState,
    tracker: AllocationTracker,
    targets: Arc<CallTargetCache>,
    config: BridgeConfig,
    runtime: Arc<dyn ManagedRuntime>,
}

impl BridgeContext {
    pub fn new(config: BridgeConfig, runtime: Arc<dyn ManagedRuntime>) -> Self {
        Self::with_target_cache(config, runtime, Arc::new(CallTargetCache::new()))
    }

    /// Context sharing call targets with other contexts
    pub fn with_target_cache(
        config: BridgeConfig,
        runtime: Arc<dyn ManagedRuntime>,
        targets: Arc<CallTargetCache>,
    ) -> Self {
        log_bridge_init(config.trace_native_memory, config.checked_handles);
        Self {
            bridge: ReferenceBridge::new(config.checked_handles, config.max_wrapper_depth)
                .with_quarantine(config.handle_quarantine),
            errors: ExceptionState::new(),
            tracker: AllocationTracker::new(
                config.trace_native_memory,
                config.trace_native_memory_calls,
                config.memory_pressure_threshold,
            ),
            targets,
            config,
            runtime,
        }
    }

    pub fn bridge(&self) -> &ReferenceBridge {
        &self.bridge
    }

    pub fn errors(&self) -> &ExceptionState {
        &self.errors
    }

    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }

    pub fn targets(&self) -> &Arc<CallTargetCache> {
        &self.targets
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &dyn ManagedRuntime {
        self.runtime.as_ref()
    }

    // ========================================================================
    // Invariant policy
    // ========================================================================

    /// Apply the invariant policy to a bridge failure
    ///
    /// Fatal policy panics with the description. Degrade policy logs and
    /// hands back `fallback`.
    pub fn on_invariant<T>(&self, err: impl Into<BridgeError>, fallback: T) -> T {
        let err = err.into();
        match self.config.invariant_policy {
            InvariantPolicy::Fatal => {
                log_invariant_violation(&err.to_string(), true);
                panic!("bridge invariant violated: {}", err);
            }
            InvariantPolicy::Degrade => {
                log_invariant_violation(&err.to_string(), false);
                fallback
            }
        }
    }

    /// Handle failures on a managed-facing path; degraded mode raises
    /// `SystemError` since there is no value to fall back to
    fn handle_failure(&self, err: HandleError) -> PyErr {
        let py_err = PyErr::from(err.clone());
        self.on_invariant(err, py_err)
    }

    // ========================================================================
    // Reference crossings
    // ========================================================================

    pub fn new_ref(&self, obj: &Object) -> PyResult<NativeHandle> {
        self.bridge
            .to_new_reference(obj)
            .map_err(|err| self.handle_failure(err))
    }

    pub fn borrowed_ref(&self, obj: &Object) -> PyResult<NativeHandle> {
        self.bridge
            .to_borrowed_reference(obj)
            .map_err(|err| self.handle_failure(err))
    }

    pub fn resolve(&self, handle: NativeHandle) -> PyResult<Object> {
        self.bridge
            .resolve(handle)
            .map_err(|err| self.handle_failure(err))
    }

    pub fn steal(&self, handle: NativeHandle) -> PyResult<Object> {
        self.bridge
            .steal(handle)
            .map_err(|err| self.handle_failure(err))
    }

    /// Call any managed callable; bridge builtins are dispatched here
    pub fn call(&self, callable: &Object, args: &[Object], kwargs: &[(String, Object)]) -> PyResult<Object> {
        match callable.payload() {
            Payload::Builtin(function) => function.call(self, args, kwargs),
            _ => self.runtime.call(callable, args, kwargs),
        }
    }

    // ========================================================================
    // Active context
    // ========================================================================

    /// Make this context current on this thread until the guard drops
    pub fn enter(&self) -> ActiveContext<'_> {
        ACTIVE.with(|active| active.borrow_mut().push(self as *const BridgeContext));
        ActiveContext { _ctx: self }
    }

    /// Run `f` with the innermost active context, if any
    pub fn with_current<R>(f: impl FnOnce(&BridgeContext) -> R) -> Option<R> {
        let ptr = ACTIVE.with(|active| active.borrow().last().copied())?;
        // Safety: pointers are pushed by `enter` and popped when the
        // borrowing guard drops, so the context outlives this call
        Some(f(unsafe { &*ptr }))
    }

    pub fn current_ptr() -> *const BridgeContext {
        ACTIVE
            .with(|active| active.borrow().last().copied())
            .unwrap_or(std::ptr::null())
    }

    /// Sweep weak caches; returns (pointer proxies, call targets) dropped
    pub fn sweep_caches(&self) -> (usize, usize) {
        let _perf = perf::track("sweep_caches");
        (self.bridge.pointers().sweep(), self.targets.sweep())
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        log_bridge_shutdown(self.bridge.stats().live);
    }
}

/// Guard returned by [`BridgeContext::enter`]
#[must_use]
pub struct ActiveContext<'a> {
    _ctx: &'a BridgeContext,
}

impl Drop for ActiveContext<'_> {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}
