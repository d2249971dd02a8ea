//! Native function pointer shapes
//!
//! Every handle-typed parameter and result is a [`NativeHandle`], which is
//! `repr(transparent)` over a pointer-sized word.

use crate::handles::NativeHandle;
use libc::{c_char, c_int, ssize_t};

pub type UnaryFunc = unsafe extern "C" fn(NativeHandle) -> NativeHandle;
pub type BinaryFunc = unsafe extern "C" fn(NativeHandle, NativeHandle) -> NativeHandle;
pub type TernaryFunc =
    unsafe extern "C" fn(NativeHandle, NativeHandle, NativeHandle) -> NativeHandle;
pub type FastCallFunc =
    unsafe extern "C" fn(NativeHandle, *const NativeHandle, ssize_t) -> NativeHandle;
pub type FastCallKwFunc = unsafe extern "C" fn(
    NativeHandle,
    *const NativeHandle,
    ssize_t,
    NativeHandle,
) -> NativeHandle;
pub type AllocFunc = unsafe extern "C" fn(NativeHandle, ssize_t) -> NativeHandle;
pub type GetAttrFunc = unsafe extern "C" fn(NativeHandle, *const c_char) -> NativeHandle;
pub type SetAttrFunc = unsafe extern "C" fn(NativeHandle, *const c_char, NativeHandle) -> c_int;
pub type RichCompareFunc = unsafe extern "C" fn(NativeHandle, NativeHandle, c_int) -> NativeHandle;
pub type SsizeObjArgFunc = unsafe extern "C" fn(NativeHandle, ssize_t, NativeHandle) -> c_int;
pub type InquiryFunc = unsafe extern "C" fn(NativeHandle) -> c_int;

/// A native callable tagged with its C signature
#[derive(Clone, Copy)]
pub enum NativeFunction {
    Unary(UnaryFunc),
    Binary(BinaryFunc),
    Ternary(TernaryFunc),
    FastCall(FastCallFunc),
    FastCallKw(FastCallKwFunc),
    Alloc(AllocFunc),
    GetAttr(GetAttrFunc),
    SetAttr(SetAttrFunc),
    RichCompare(RichCompareFunc),
    SsizeObjArg(SsizeObjArgFunc),
    Inquiry(InquiryFunc),
}

impl NativeFunction {
    /// Code address, the callable's identity
    pub fn address(&self) -> usize {
        match *self {
            Self::Unary(f) => f as usize,
            Self::Binary(f) => f as usize,
            Self::Ternary(f) => f as usize,
            Self::FastCall(f) => f as usize,
            Self::FastCallKw(f) => f as usize,
            Self::Alloc(f) => f as usize,
            Self::GetAttr(f) => f as usize,
            Self::SetAttr(f) => f as usize,
            Self::RichCompare(f) => f as usize,
            Self::SsizeObjArg(f) => f as usize,
            Self::Inquiry(f) => f as usize,
        }
    }

    pub fn signature(&self) -> &'static str {
        match self {
            Self::Unary(_) => "unaryfunc",
            Self::Binary(_) => "binaryfunc",
            Self::Ternary(_) => "ternaryfunc",
            Self::FastCall(_) => "fastcall",
            Self::FastCallKw(_) => "fastcall-with-keywords",
            Self::Alloc(_) => "allocfunc",
            Self::GetAttr(_) => "getattrfunc",
            Self::SetAttr(_) => "setattrfunc",
            Self::RichCompare(_) => "richcmpfunc",
            Self::SsizeObjArg(_) => "ssizeobjargproc",
            Self::Inquiry(_) => "inquiry",
        }
    }
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({} @ {:#x})", self.signature(), self.address())
    }
}
