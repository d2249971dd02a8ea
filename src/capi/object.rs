//! Object protocol - comparisons, attributes and types for native code

use super::context;
use crate::context::BridgeContext;
use crate::dispatch::{get_class, is_subtype, rich_compare, set_attribute};
use crate::error::PyErr;
use crate::handles::NativeHandle;
use libc::{c_char, c_int};
use std::ffi::CStr;

/// New reference to the result of `a <op> b`; NULL on error
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_object_richcompare(
    ctx: *const BridgeContext,
    a: NativeHandle,
    b: NativeHandle,
    op: c_int,
) -> NativeHandle {
    match context(ctx, "object_richcompare") {
        Some(ctx) => rich_compare(ctx, a, b, op),
        None => NativeHandle::NULL,
    }
}

/// Set `obj.name = value`, deleting it when `value` is NULL; 0 or -1
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - `name` must be null or a NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_object_setattr(
    ctx: *const BridgeContext,
    obj: NativeHandle,
    name: *const c_char,
    value: NativeHandle,
) -> c_int {
    let Some(ctx) = context(ctx, "object_setattr") else {
        return -1;
    };
    if name.is_null() {
        ctx.errors().set_error(PyErr::system_error("attribute name must not be NULL"));
        return -1;
    }
    let name = CStr::from_ptr(name).to_string_lossy();
    set_attribute(ctx, obj, &name, value)
}

/// 1 if `a` is a subtype of `b`, 0 if not, -1 on error
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_type_is_subtype(
    ctx: *const BridgeContext,
    a: NativeHandle,
    b: NativeHandle,
) -> c_int {
    match context(ctx, "type_is_subtype") {
        Some(ctx) => is_subtype(ctx, a, b),
        None => -1,
    }
}

/// Borrowed reference to the class of `obj`; NULL on error
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_object_type(ctx: *const BridgeContext, obj: NativeHandle) -> NativeHandle {
    match context(ctx, "object_type") {
        Some(ctx) => get_class(ctx, obj),
        None => NativeHandle::NULL,
    }
}
