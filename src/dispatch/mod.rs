//! Calling-convention dispatcher
//!
//! Design: a closed [`CallingConvention`] enum, each variant owning a
//! marshal/check pair ([`ConventionWrapper`]). Wrapping a callable builds a
//! [`CallTarget`] once per (callable, name, convention, conversion) and
//! memoizes it in the shared [`CallTargetCache`], so repeated wraps return
//! the same `Arc`.
//!
//! Native → managed calls go through [`upcall`] and friends, which turn
//! managed errors into the C sentinel for their return type.

mod cache;
mod convention;
mod function;
mod native;
mod target;
mod upcall;

#[cfg(test)]
mod tests;

pub use cache::{CallTargetCache, TargetKey};
pub use convention::{richcmp_op_constructions, CallingConvention, ConventionWrapper};
pub use function::{
    create_builtin_method, create_function, wrap, wrap_managed, wrap_native, BuiltinFunction,
    Callable, Undecorated,
};
pub use native::{
    AllocFunc, BinaryFunc, FastCallFunc, FastCallKwFunc, GetAttrFunc, InquiryFunc, NativeFunction,
    RichCompareFunc, SetAttrFunc, SsizeObjArgFunc, TernaryFunc, UnaryFunc,
};
pub use target::{CallTarget, Executable, TargetKind};
pub use upcall::{
    get_class, is_subtype, rich_compare, set_attribute, transfer, upcall, upcall_borrowed,
    upcall_double, upcall_long, upcall_new_ref, upcall_ptr, ErrorSentinel, UpcallTarget,
};
