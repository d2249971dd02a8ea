//! Reference counting - C API for handle refcounts
//!
//! Null handles are ignored. Raw native pointers (untagged handles) are
//! owned by native code, so the bridge does not count them.

use super::context;
use crate::context::BridgeContext;
use crate::handles::NativeHandle;
use crate::object::Object;

/// New reference to `*obj`
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - `obj` must be null or point to a valid [`Object`]
/// - Returns NULL for null input
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_to_new_ref(ctx: *const BridgeContext, obj: *const Object) -> NativeHandle {
    let Some(ctx) = context(ctx, "to_new_ref") else {
        return NativeHandle::NULL;
    };
    if obj.is_null() {
        return NativeHandle::NULL;
    }
    ctx.new_ref(&*obj).unwrap_or(NativeHandle::NULL)
}

/// Borrowed reference to `*obj`, released when the current call returns
///
/// # Safety
/// Same as [`typthon_cext_to_new_ref`]
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_to_borrowed_ref(
    ctx: *const BridgeContext,
    obj: *const Object,
) -> NativeHandle {
    let Some(ctx) = context(ctx, "to_borrowed_ref") else {
        return NativeHandle::NULL;
    };
    if obj.is_null() {
        return NativeHandle::NULL;
    }
    ctx.borrowed_ref(&*obj).unwrap_or(NativeHandle::NULL)
}

/// Increment a handle's reference count (hot path)
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - Null-safe (no-op for null handles)
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_incref(ctx: *const BridgeContext, handle: NativeHandle) {
    if handle.is_null() {
        return;
    }
    let Some(ctx) = context(ctx, "incref") else {
        return;
    };
    if let Err(err) = ctx.bridge().incref(handle) {
        ctx.on_invariant(err, ());
    }
}

/// Decrement a handle's reference count, evicting the wrapper at zero
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - Null-safe (no-op for null handles)
/// - A second release of an evicted handle is an invariant violation
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_decref(ctx: *const BridgeContext, handle: NativeHandle) {
    if handle.is_null() {
        return;
    }
    let Some(ctx) = context(ctx, "decref") else {
        return;
    };
    if let Err(err) = ctx.bridge().release(handle) {
        ctx.on_invariant(err, ());
    }
}

/// Current reference count (for debugging/testing)
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - Returns 0 for null and raw native handles
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_refcount(ctx: *const BridgeContext, handle: NativeHandle) -> u64 {
    if handle.is_null() {
        return 0;
    }
    let Some(ctx) = context(ctx, "refcount") else {
        return 0;
    };
    ctx.bridge()
        .refcount(handle)
        .unwrap_or_else(|err| ctx.on_invariant(err, 0))
}
