//! Argument parsing - C API over [`parse_tuple_and_keywords`]
//!
//! C varargs are not expressible here, so decoded values are written to a
//! caller-provided array of [`ArgSlot`]s, one per format unit.

use super::context;
use crate::args::{parse_tuple_and_keywords, ParsedArg};
use crate::context::BridgeContext;
use crate::error::{PyErr, PyResult};
use crate::handles::NativeHandle;
use crate::object::{Object, Payload};
use libc::{c_char, c_int};
use std::ffi::CStr;

pub const ARG_MISSING: c_int = 0;
pub const ARG_OBJECT: c_int = 1;
pub const ARG_INT: c_int = 2;
pub const ARG_UINT: c_int = 3;
pub const ARG_FLOAT: c_int = 4;
pub const ARG_STR: c_int = 5;
pub const ARG_BOOL: c_int = 6;

/// One decoded format unit
///
/// `handle` is a borrowed reference for objects and strings (NULL for a
/// `z` unit given `None`); `int` holds integers, the unsigned bit pattern
/// and predicates; `float` holds `f` and `d` units.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgSlot {
    pub kind: c_int,
    pub handle: NativeHandle,
    pub int: i64,
    pub float: f64,
}

unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> PyResult<std::borrow::Cow<'a, str>> {
    if ptr.is_null() {
        return Err(PyErr::system_error(format!("{} must not be NULL", what)));
    }
    Ok(CStr::from_ptr(ptr).to_string_lossy())
}

/// Read a NULL-terminated array of keyword names
unsafe fn keyword_list(mut keywords: *const *const c_char) -> Vec<String> {
    let mut names = Vec::new();
    if keywords.is_null() {
        return names;
    }
    while !(*keywords).is_null() {
        names.push(CStr::from_ptr(*keywords).to_string_lossy().into_owned());
        keywords = keywords.add(1);
    }
    names
}

fn slot(ctx: &BridgeContext, arg: ParsedArg) -> PyResult<ArgSlot> {
    let mut slot = ArgSlot::default();
    match arg {
        ParsedArg::Missing => slot.kind = ARG_MISSING,
        ParsedArg::Object(obj) => {
            slot.kind = ARG_OBJECT;
            slot.handle = ctx.borrowed_ref(&obj)?;
        }
        ParsedArg::Int(v) => {
            slot.kind = ARG_INT;
            slot.int = v;
        }
        ParsedArg::UInt(v) => {
            slot.kind = ARG_UINT;
            slot.int = v as i64;
        }
        ParsedArg::Float(v) => {
            slot.kind = ARG_FLOAT;
            slot.float = v;
        }
        ParsedArg::Str(s) => {
            slot.kind = ARG_STR;
            if let Some(s) = s {
                slot.handle = ctx.borrowed_ref(&Object::str(s))?;
            }
        }
        ParsedArg::Bool(b) => {
            slot.kind = ARG_BOOL;
            slot.int = b as i64;
        }
    }
    Ok(slot)
}

unsafe fn parse(
    ctx: &BridgeContext,
    args: NativeHandle,
    kwargs: NativeHandle,
    format: *const c_char,
    keywords: *const *const c_char,
    out: *mut ArgSlot,
    out_len: usize,
) -> PyResult<()> {
    let format = c_str(format, "format")?;
    let names = keyword_list(keywords);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let args = ctx.resolve(args)?;
    let Payload::Tuple(positional) = args.payload() else {
        return Err(PyErr::system_error("argument list is not a tuple"));
    };
    let kwargs = if kwargs.is_null() {
        Object::dict(Vec::new())
    } else {
        ctx.resolve(kwargs)?
    };
    let Payload::Dict(keyword_args) = kwargs.payload() else {
        return Err(PyErr::system_error("keyword arguments are not a dict"));
    };

    let parsed = parse_tuple_and_keywords(positional, keyword_args, &format, &names)?;
    if parsed.len() > out_len || (out.is_null() && !parsed.is_empty()) {
        return Err(PyErr::system_error(format!(
            "{} format units but room for {}",
            parsed.len(),
            out_len
        )));
    }
    for (i, arg) in parsed.into_iter().enumerate() {
        *out.add(i) = slot(ctx, arg)?;
    }
    Ok(())
}

/// Decode `args` and `kwargs` against `format`; 1 on success, 0 on error
///
/// # Safety
/// - `ctx` must be null or point to a live context
/// - `format` must be a NUL-terminated string
/// - `keywords` must be null or a NULL-terminated array of such strings
/// - `out` must be valid for `out_len` writes
#[no_mangle]
pub unsafe extern "C" fn typthon_cext_parse_tuple_and_keywords(
    ctx: *const BridgeContext,
    args: NativeHandle,
    kwargs: NativeHandle,
    format: *const c_char,
    keywords: *const *const c_char,
    out: *mut ArgSlot,
    out_len: usize,
) -> c_int {
    let Some(ctx) = context(ctx, "parse_tuple_and_keywords") else {
        return 0;
    };
    match parse(ctx, args, kwargs, format, keywords, out, out_len) {
        Ok(()) => 1,
        Err(err) => {
            ctx.errors().set_error(err);
            0
        }
    }
}
