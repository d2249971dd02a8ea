//! Native → managed calls
//!
//! Errors raised on the managed side are parked in the error indicator and
//! replaced by the C-level sentinel for the return type.

use crate::context::BridgeContext;
use crate::error::{PyErr, PyResult};
use crate::handles::{as_f64, as_i64, as_void_ptr, NativeHandle};
use crate::object::{CompareOp, Object};
use smallvec::SmallVec;

/// Value native code treats as "an error is set"
pub trait ErrorSentinel: Sized {
    const SENTINEL: Self;
}

impl ErrorSentinel for NativeHandle {
    const SENTINEL: Self = NativeHandle::NULL;
}

impl ErrorSentinel for i64 {
    const SENTINEL: Self = -1;
}

impl ErrorSentinel for i32 {
    const SENTINEL: Self = -1;
}

impl ErrorSentinel for f64 {
    const SENTINEL: Self = -1.0;
}

impl ErrorSentinel for usize {
    const SENTINEL: Self = 0;
}

/// What native code is calling
#[derive(Debug, Clone, Copy)]
pub enum UpcallTarget<'a> {
    /// A callable object
    Callable(NativeHandle),
    /// A named attribute of `receiver`, then called
    Method { receiver: NativeHandle, name: &'a str },
}

/// Call into managed code with native arguments
pub fn upcall(ctx: &BridgeContext, target: UpcallTarget<'_>, args: &[NativeHandle]) -> PyResult<Object> {
    let args = args
        .iter()
        .map(|&handle| ctx.resolve(handle))
        .collect::<PyResult<SmallVec<[Object; 8]>>>()?;

    let callable = match target {
        UpcallTarget::Callable(handle) => ctx.resolve(handle)?,
        UpcallTarget::Method { receiver, name } => {
            let receiver = ctx.resolve(receiver)?;
            ctx.runtime().get_attribute(&receiver, name)?
        }
    };
    ctx.call(&callable, &args, &[])
}

/// Convert a managed outcome to a native return value
pub fn transfer<T: ErrorSentinel>(ctx: &BridgeContext, result: PyResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            ctx.errors().set_error(err);
            T::SENTINEL
        }
    }
}

/// Result as a new reference, NULL on error
pub fn upcall_new_ref(ctx: &BridgeContext, target: UpcallTarget<'_>, args: &[NativeHandle]) -> NativeHandle {
    let result = upcall(ctx, target, args).and_then(|obj| ctx.new_ref(&obj));
    transfer(ctx, result)
}

/// Result as a borrowed reference, NULL on error
pub fn upcall_borrowed(ctx: &BridgeContext, target: UpcallTarget<'_>, args: &[NativeHandle]) -> NativeHandle {
    let result = upcall(ctx, target, args).and_then(|obj| ctx.borrowed_ref(&obj));
    transfer(ctx, result)
}

/// Result as a C long, -1 on error
pub fn upcall_long(ctx: &BridgeContext, target: UpcallTarget<'_>, args: &[NativeHandle]) -> i64 {
    let result = upcall(ctx, target, args).and_then(|obj| as_i64(&obj));
    transfer(ctx, result)
}

/// Result as a C double, -1.0 on error
pub fn upcall_double(ctx: &BridgeContext, target: UpcallTarget<'_>, args: &[NativeHandle]) -> f64 {
    let result = upcall(ctx, target, args).and_then(|obj| as_f64(&obj));
    transfer(ctx, result)
}

/// Result as a pointer, NULL on error
pub fn upcall_ptr(ctx: &BridgeContext, target: UpcallTarget<'_>, args: &[NativeHandle]) -> usize {
    let result = upcall(ctx, target, args).and_then(|obj| as_void_ptr(&obj));
    transfer(ctx, result)
}

// ============================================================================
// Object protocol
// ============================================================================

fn compare_op(code: i32) -> PyResult<CompareOp> {
    CompareOp::from_code(code)
        .ok_or_else(|| PyErr::system_error(format!("invalid comparison operator {}", code)))
}

fn compare(ctx: &BridgeContext, a: NativeHandle, b: NativeHandle, op: i32) -> PyResult<NativeHandle> {
    let op = compare_op(op)?;
    let (a, b) = (ctx.resolve(a)?, ctx.resolve(b)?);
    let result = ctx.runtime().rich_compare(&a, &b, op)?;
    ctx.new_ref(&result)
}

/// `a <op> b` as a new reference, NULL on error
pub fn rich_compare(ctx: &BridgeContext, a: NativeHandle, b: NativeHandle, op: i32) -> NativeHandle {
    transfer(ctx, compare(ctx, a, b, op))
}

fn store_attribute(ctx: &BridgeContext, obj: NativeHandle, name: &str, value: NativeHandle) -> PyResult<i32> {
    let obj = ctx.resolve(obj)?;
    let value = if value.is_null() {
        Object::no_value()
    } else {
        ctx.resolve(value)?
    };
    ctx.runtime().set_attribute(&obj, name, value)?;
    Ok(0)
}

/// Set `obj.name`; a NULL value deletes it. 0 on success, -1 on error.
pub fn set_attribute(ctx: &BridgeContext, obj: NativeHandle, name: &str, value: NativeHandle) -> i32 {
    transfer(ctx, store_attribute(ctx, obj, name, value))
}

fn subtype(ctx: &BridgeContext, a: NativeHandle, b: NativeHandle) -> PyResult<i32> {
    let (a, b) = (ctx.resolve(a)?, ctx.resolve(b)?);
    Ok(ctx.runtime().is_subtype(&a, &b) as i32)
}

/// 1 if `a` is a subtype of `b`, 0 if not, -1 on error
pub fn is_subtype(ctx: &BridgeContext, a: NativeHandle, b: NativeHandle) -> i32 {
    transfer(ctx, subtype(ctx, a, b))
}

/// Borrowed reference to the class of `obj`, NULL on error
pub fn get_class(ctx: &BridgeContext, obj: NativeHandle) -> NativeHandle {
    let result = ctx
        .resolve(obj)
        .and_then(|obj| ctx.borrowed_ref(&ctx.runtime().get_class(&obj)));
    transfer(ctx, result)
}
