//! C API - `extern "C"` surface for extension modules
//!
//! Design: every entry point takes the [`BridgeContext`] pointer
//! explicitly. Calls are:
//! 1. Null-safe (a null context or handle is a no-op or returns the
//!    error sentinel)
//! 2. Policy-aware (bridge invariant failures go through
//!    [`BridgeContext::on_invariant`])
//! 3. Sentinel-based (managed errors land in the error indicator)

mod args;
mod errors;
mod object;
mod refcount;
mod tracemalloc;


pub use args::{
    typthon_cext_parse_tuple_and_keywords, ArgSlot, ARG_BOOL, ARG_FLOAT, ARG_INT, ARG_MISSING,
    ARG_OBJECT, ARG_STR, ARG_UINT,
};
pub use errors::{
    typthon_cext_err_clear, typthon_cext_err_fetch, typthon_cext_err_occurred,
    typthon_cext_err_restore, typthon_cext_err_set_exc_info, typthon_cext_err_set_string,
};
pub use object::{
    typthon_cext_object_richcompare, typthon_cext_object_setattr, typthon_cext_object_type,
    typthon_cext_type_is_subtype,
};
pub use refcount::{
    typthon_cext_decref, typthon_cext_incref, typthon_cext_refcount, typthon_cext_to_borrowed_ref,
    typthon_cext_to_new_ref,
};
pub use tracemalloc::{
    typthon_cext_gc_track, typthon_cext_gc_untrack, typthon_cext_trace_free,
    typthon_cext_tracemalloc_new_reference, typthon_cext_tracemalloc_track,
    typthon_cext_tracemalloc_untrack,
};

use crate::context::BridgeContext;
use crate::dispatch::{CallingConvention, ConventionWrapper};
use libc::c_int;

/// Borrow the context behind a native pointer
///
/// # Safety
/// `ctx` must be null or point to a live [`BridgeContext`]
#[inline]
unsafe fn context<'a>(ctx: *const BridgeContext, caller: &'static str) -> Option<&'a BridgeContext> {
    if ctx.is_null() {
        tracing::warn!(event = "null_context", function = caller, "C API called without a context");
        return None;
    }
    Some(&*ctx)
}

/// Option bits for native code (`TRACE_MEM`, ...); 0 without a context
///
/// # Safety
/// `ctx` must be null or point to a live [`BridgeContext`]
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_native_options(ctx: *const BridgeContext) -> u32 {
    context(ctx, "native_options").map_or(0, |ctx| ctx.config().native_options())
}

/// Context of the innermost native call on this thread, or NULL
#[no_mangle]
pub extern "C" fn typthon_cext_current_context() -> *const BridgeContext {
    BridgeContext::current_ptr()
}

/// Wrapper descriptor for a convention code; NULL for unknown codes
#[no_mangle]
pub extern "C" fn typthon_cext_convention(code: c_int) -> *const ConventionWrapper {
    match CallingConvention::from_code(code) {
        Some(convention) => convention.wrapper() as *const ConventionWrapper,
        None => std::ptr::null(),
    }
}
