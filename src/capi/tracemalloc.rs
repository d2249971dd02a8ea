//! Allocation tracing - C API over [`AllocationTracker`](crate::tracemalloc::AllocationTracker)

use super::context;
use crate::context::BridgeContext;
use libc::{c_char, c_int};
use std::ffi::CStr;

/// Record a native allocation; 0 on success, -1 without a context or for
/// a size that cannot be tracked
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_tracemalloc_track(
    ctx: *const BridgeContext,
    domain: u64,
    ptr: usize,
    size: usize,
) -> c_int {
    let Some(ctx) = context(ctx, "tracemalloc_track") else {
        return -1;
    };
    match ctx.tracker().track(ctx.runtime(), domain, ptr, size as u64) {
        Ok(()) => 0,
        Err(err) => {
            tracing::warn!(event = "tracemalloc_track_failed", error = %err);
            -1
        }
    }
}

/// Forget a native allocation; returns its size, 0 if it was not tracked,
/// -1 without a context
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_tracemalloc_untrack(
    ctx: *const BridgeContext,
    domain: u64,
    ptr: usize,
) -> i64 {
    let Some(ctx) = context(ctx, "tracemalloc_untrack") else {
        return -1;
    };
    ctx.tracker().untrack(domain, ptr) as i64
}

/// Account for a native free
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_trace_free(ctx: *const BridgeContext, ptr: usize, size: usize) {
    if let Some(ctx) = context(ctx, "trace_free") {
        ctx.tracker().free(ptr, size as u64);
    }
}

/// Reference hook; always 0, -1 without a context
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_tracemalloc_new_reference(ctx: *const BridgeContext, ptr: usize) -> c_int {
    let Some(ctx) = context(ctx, "tracemalloc_new_reference") else {
        return -1;
    };
    ctx.tracker().new_reference(ptr);
    0
}

/// Start tracking a native container object
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - `class_name` must be null or a NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_gc_track(
    ctx: *const BridgeContext,
    ptr: usize,
    class_name: *const c_char,
) {
    let Some(ctx) = context(ctx, "gc_track") else {
        return;
    };
    let class_name = if class_name.is_null() {
        "object".into()
    } else {
        CStr::from_ptr(class_name).to_string_lossy()
    };
    ctx.tracker()
        .track_container(ptr, ctx.runtime().current_frame(), &class_name);
}

/// Stop tracking a native container; 1 if it was tracked
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_gc_untrack(ctx: *const BridgeContext, ptr: usize) -> c_int {
    let Some(ctx) = context(ctx, "gc_untrack") else {
        return 0;
    };
    ctx.tracker().untrack_container(ptr).is_some() as c_int
}
