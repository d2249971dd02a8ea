//! Error indicator - C API over [`ExceptionState`](crate::exception::ExceptionState)

use super::context;
use crate::context::BridgeContext;
use crate::error::PyErr;
use crate::handles::NativeHandle;
use crate::object::{ExceptionKind, Object};
use libc::c_char;
use std::ffi::CStr;

/// Take ownership of an optional handle passed in by native code
fn steal_optional(ctx: &BridgeContext, handle: NativeHandle) -> Option<Object> {
    if handle.is_null() {
        return None;
    }
    ctx.steal(handle).ok()
}

fn new_ref_or_null(ctx: &BridgeContext, obj: Option<&Object>) -> NativeHandle {
    obj.and_then(|obj| ctx.new_ref(obj).ok())
        .unwrap_or(NativeHandle::NULL)
}

/// Borrowed handle to the pending error's class, NULL when clean
///
/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_err_occurred(ctx: *const BridgeContext) -> NativeHandle {
    let Some(ctx) = context(ctx, "err_occurred") else {
        return NativeHandle::NULL;
    };
    match ctx.errors().occurred() {
        Some(class) => ctx.borrowed_ref(&class).unwrap_or(NativeHandle::NULL),
        None => NativeHandle::NULL,
    }
}

/// Read-and-clear the pending error as three new references
///
/// All three outputs are NULL when no error is pending.
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - Each output pointer must be null or valid for writes
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_err_fetch(
    ctx: *const BridgeContext,
    class: *mut NativeHandle,
    value: *mut NativeHandle,
    traceback: *mut NativeHandle,
) {
    let Some(ctx) = context(ctx, "err_fetch") else {
        return;
    };
    let info = ctx.errors().fetch();
    let (c, v, t) = match &info {
        Some(info) => (
            new_ref_or_null(ctx, Some(&info.class)),
            new_ref_or_null(ctx, Some(&info.value)),
            new_ref_or_null(ctx, info.traceback.as_ref()),
        ),
        None => (NativeHandle::NULL, NativeHandle::NULL, NativeHandle::NULL),
    };
    for (out, handle) in [(class, c), (value, v), (traceback, t)] {
        if !out.is_null() {
            *out = handle;
        }
    }
}

/// Set the pending error, stealing all three references
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - Non-null handles must be owned references the caller gives up
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_err_restore(
    ctx: *const BridgeContext,
    class: NativeHandle,
    value: NativeHandle,
    traceback: NativeHandle,
) {
    let Some(ctx) = context(ctx, "err_restore") else {
        return;
    };
    ctx.errors().restore(
        steal_optional(ctx, class),
        steal_optional(ctx, value),
        steal_optional(ctx, traceback),
    );
}

/// Set or clear the handled exception, stealing all three references
///
/// # Safety
/// Same as [`typthon_cext_err_restore`]
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_err_set_exc_info(
    ctx: *const BridgeContext,
    class: NativeHandle,
    value: NativeHandle,
    traceback: NativeHandle,
) {
    let Some(ctx) = context(ctx, "err_set_exc_info") else {
        return;
    };
    ctx.errors().set_exc_info(
        steal_optional(ctx, class),
        steal_optional(ctx, value),
        steal_optional(ctx, traceback),
    );
}

/// # Safety
/// `ctx` must be null or point to a live context
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_err_clear(ctx: *const BridgeContext) {
    if let Some(ctx) = context(ctx, "err_clear") {
        ctx.errors().clear();
    }
}

/// Raise `kind(message)`; unknown kind codes raise `SystemError`
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - `message` must be null or a NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_err_set_string(
    ctx: *const BridgeContext,
    kind: u32,
    message: *const c_char,
) {
    let Some(ctx) = context(ctx, "err_set_string") else {
        return;
    };
    let message = if message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(message).to_string_lossy().into_owned()
    };
    let err = match ExceptionKind::from_code(kind) {
        Some(kind) => PyErr::new(kind, message),
        None => PyErr::system_error(format!("unknown exception kind {}: {}", kind, message)),
    };
    ctx.errors().set_error(err);
}
