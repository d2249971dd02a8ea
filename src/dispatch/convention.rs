//! Calling conventions and their marshal/check pairs
//!
//! Each [`CallingConvention`] maps to one static [`ConventionWrapper`].
//! Per-operator rich-comparison wrappers are built lazily, at most once
//! per operator, and read lock-free after publication.

use super::native::NativeFunction;
use crate::context::BridgeContext;
use crate::error::{BridgeError, PyErr, PyResult};
use crate::exception::{CheckedResult, NativeResult, ResultCheck};
use crate::handles::{as_i64, NativeHandle};
use crate::logging::log_native_call;
use crate::object::{CompareOp, ExceptionKind, Object};
use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// Positional vector, no conversion beyond handles
    Direct,
    NoArgs,
    O,
    VarArgs,
    Keywords,
    FastCall,
    FastCallWithKeywords,
    Alloc,
    GetAttr,
    SetAttr,
    RichCompare,
    RichCompareOp(CompareOp),
    SsizeObjArg,
    Reverse,
    Pow,
    ReversePow,
    IterNext,
    Inquiry,
}

impl CallingConvention {
    /// First code of the per-operator rich comparison block
    pub const RICHCMP_OP_BASE: i32 = 100;

    pub fn from_code(code: i32) -> Option<Self> {
        let convention = match code {
            0 => Self::Direct,
            1 => Self::Keywords,
            2 => Self::VarArgs,
            3 => Self::NoArgs,
            4 => Self::O,
            5 => Self::FastCall,
            6 => Self::FastCallWithKeywords,
            7 => Self::Alloc,
            8 => Self::GetAttr,
            9 => Self::SetAttr,
            10 => Self::RichCompare,
            11 => Self::SsizeObjArg,
            12 => Self::Reverse,
            13 => Self::Pow,
            14 => Self::ReversePow,
            15 => Self::IterNext,
            16 => Self::Inquiry,
            _ => Self::RichCompareOp(CompareOp::from_code(code - Self::RICHCMP_OP_BASE)?),
        };
        Some(convention)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Direct => "METH_DIRECT",
            Self::NoArgs => "METH_NOARGS",
            Self::O => "METH_O",
            Self::VarArgs => "METH_VARARGS",
            Self::Keywords => "METH_KEYWORDS",
            Self::FastCall => "METH_FASTCALL",
            Self::FastCallWithKeywords => "METH_FASTCALL_WITH_KEYWORDS",
            Self::Alloc => "METH_ALLOC",
            Self::GetAttr => "METH_GETATTR",
            Self::SetAttr => "METH_SETATTR",
            Self::RichCompare => "METH_RICHCMP",
            Self::RichCompareOp(CompareOp::Lt) => "METH_LT",
            Self::RichCompareOp(CompareOp::Le) => "METH_LE",
            Self::RichCompareOp(CompareOp::Eq) => "METH_EQ",
            Self::RichCompareOp(CompareOp::Ne) => "METH_NE",
            Self::RichCompareOp(CompareOp::Gt) => "METH_GT",
            Self::RichCompareOp(CompareOp::Ge) => "METH_GE",
            Self::SsizeObjArg => "METH_SSIZE_OBJ_ARG",
            Self::Reverse => "METH_REVERSE",
            Self::Pow => "METH_POW",
            Self::ReversePow => "METH_REVERSE_POW",
            Self::IterNext => "METH_ITERNEXT",
            Self::Inquiry => "METH_INQUIRY",
        }
    }

    pub fn wrapper(self) -> &'static ConventionWrapper {
        match self {
            Self::Direct => &DIRECT,
            Self::NoArgs => &NOARGS,
            Self::O => &ONE_ARG,
            Self::VarArgs => &VARARGS,
            Self::Keywords => &KEYWORDS,
            Self::FastCall => &FASTCALL,
            Self::FastCallWithKeywords => &FASTCALL_WITH_KEYWORDS,
            Self::Alloc => &ALLOC,
            Self::GetAttr => &GETATTR,
            Self::SetAttr => &SETATTR,
            Self::RichCompare => &RICHCMP,
            Self::RichCompareOp(op) => richcmp_op_wrapper(op),
            Self::SsizeObjArg => &SSIZE_OBJ_ARG,
            Self::Reverse => &REVERSE,
            Self::Pow => &POW,
            Self::ReversePow => &REVERSE_POW,
            Self::IterNext => &ITERNEXT,
            Self::Inquiry => &INQUIRY,
        }
    }

    pub fn result_check(self) -> ResultCheck {
        self.wrapper().check
    }
}

/// Managed call as seen by a marshal function
pub(crate) struct CallArgs<'a> {
    pub name: &'a str,
    pub receiver: Option<&'a Object>,
    pub args: &'a [Object],
    pub kwargs: &'a [(String, Object)],
}

type MarshalFn =
    fn(&ConventionWrapper, &BridgeContext, &NativeFunction, &CallArgs<'_>) -> PyResult<NativeResult>;

pub struct ConventionWrapper {
    pub convention: CallingConvention,
    /// Native signature this convention invokes
    pub expects: &'static str,
    pub check: ResultCheck,
    marshal: MarshalFn,
    op: Option<CompareOp>,
}

impl ConventionWrapper {
    pub fn accepts(&self, function: &NativeFunction) -> bool {
        function.signature() == self.expects
    }

    /// Marshal, invoke and check one native call
    ///
    /// Borrowed argument handles live until the native function returns;
    /// the result is stolen as a new reference.
    pub(crate) fn call(
        &self,
        ctx: &BridgeContext,
        function: &NativeFunction,
        call: &CallArgs<'_>,
    ) -> PyResult<Object> {
        log_native_call(call.name, self.convention.name(), call.args.len());

        let result = {
            let _scope = ctx.bridge().enter_scope();
            let _active = ctx.enter();
            (self.marshal)(self, ctx, function, call)?
        };

        let checked = self.check.apply(ctx.errors(), call.name, result);
        if let (Err(_), NativeResult::Pointer(handle)) = (&checked, result) {
            // Result discarded because an error was set alongside it
            if !handle.is_null() {
                if let Err(err) = ctx.bridge().release(handle) {
                    ctx.on_invariant(err, ());
                }
            }
        }

        match checked? {
            CheckedResult::Handle(handle) => ctx.steal(handle),
            CheckedResult::Int(_) => Ok(Object::none()),
            CheckedResult::Bool(value) => Ok(Object::bool(value)),
        }
    }
}

const fn wrapper(
    convention: CallingConvention,
    expects: &'static str,
    check: ResultCheck,
    marshal: MarshalFn,
) -> ConventionWrapper {
    ConventionWrapper {
        convention,
        expects,
        check,
        marshal,
        op: None,
    }
}

use CallingConvention as CC;
use ResultCheck::{Default as DefaultCheck, Inquiry as InquiryCheck, IterNext as IterNextCheck};

static DIRECT: ConventionWrapper = wrapper(CC::Direct, "fastcall", DefaultCheck, marshal_fastcall);
static NOARGS: ConventionWrapper = wrapper(CC::NoArgs, "binaryfunc", DefaultCheck, marshal_noargs);
static ONE_ARG: ConventionWrapper = wrapper(CC::O, "binaryfunc", DefaultCheck, marshal_o);
static VARARGS: ConventionWrapper = wrapper(CC::VarArgs, "binaryfunc", DefaultCheck, marshal_varargs);
static KEYWORDS: ConventionWrapper = wrapper(CC::Keywords, "ternaryfunc", DefaultCheck, marshal_keywords);
static FASTCALL: ConventionWrapper = wrapper(CC::FastCall, "fastcall", DefaultCheck, marshal_fastcall);
static FASTCALL_WITH_KEYWORDS: ConventionWrapper = wrapper(
    CC::FastCallWithKeywords,
    "fastcall-with-keywords",
    DefaultCheck,
    marshal_fastcall_kw,
);
static ALLOC: ConventionWrapper = wrapper(CC::Alloc, "allocfunc", DefaultCheck, marshal_alloc);
static GETATTR: ConventionWrapper = wrapper(CC::GetAttr, "getattrfunc", DefaultCheck, marshal_getattr);
static SETATTR: ConventionWrapper = wrapper(CC::SetAttr, "setattrfunc", DefaultCheck, marshal_setattr);
static RICHCMP: ConventionWrapper = wrapper(CC::RichCompare, "richcmpfunc", DefaultCheck, marshal_richcmp);
static SSIZE_OBJ_ARG: ConventionWrapper =
    wrapper(CC::SsizeObjArg, "ssizeobjargproc", DefaultCheck, marshal_ssize_obj_arg);
static REVERSE: ConventionWrapper = wrapper(CC::Reverse, "binaryfunc", DefaultCheck, marshal_reverse);
static POW: ConventionWrapper = wrapper(CC::Pow, "ternaryfunc", DefaultCheck, marshal_pow);
static REVERSE_POW: ConventionWrapper =
    wrapper(CC::ReversePow, "ternaryfunc", DefaultCheck, marshal_reverse_pow);
static ITERNEXT: ConventionWrapper = wrapper(CC::IterNext, "unaryfunc", IterNextCheck, marshal_unary);
static INQUIRY: ConventionWrapper = wrapper(CC::Inquiry, "inquiry", InquiryCheck, marshal_inquiry);

static RICHCMP_OP_WRAPPERS: [OnceCell<ConventionWrapper>; 6] = [
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
];

static RICHCMP_OP_CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

fn richcmp_op_wrapper(op: CompareOp) -> &'static ConventionWrapper {
    RICHCMP_OP_WRAPPERS[op.code() as usize].get_or_init(|| {
        RICHCMP_OP_CONSTRUCTIONS.fetch_add(1, Ordering::Relaxed);
        ConventionWrapper {
            op: Some(op),
            ..wrapper(
                CC::RichCompareOp(op),
                "richcmpfunc",
                DefaultCheck,
                marshal_richcmp_op,
            )
        }
    })
}

/// How many per-operator wrappers have been built process-wide
pub fn richcmp_op_constructions() -> usize {
    RICHCMP_OP_CONSTRUCTIONS.load(Ordering::Relaxed)
}

// ============================================================================
// Argument checks
// ============================================================================

fn no_kwargs(call: &CallArgs<'_>) -> PyResult<()> {
    if call.kwargs.is_empty() {
        Ok(())
    } else {
        Err(PyErr::type_error(format!(
            "{}() takes no keyword arguments",
            call.name
        )))
    }
}

fn expect_args(call: &CallArgs<'_>, min: usize, max: usize) -> PyResult<()> {
    no_kwargs(call)?;
    let given = call.args.len();
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let message = match (min, max) {
        (0, 0) => format!("{}() takes no arguments ({} given)", call.name, given),
        (1, 1) => format!("{}() takes exactly one argument ({} given)", call.name, given),
        (n, m) if n == m => format!("{}() takes exactly {} arguments ({} given)", call.name, n, given),
        (n, m) => format!("{}() takes from {} to {} arguments ({} given)", call.name, n, m, given),
    };
    Err(PyErr::type_error(message))
}

fn mismatch(wrapper: &ConventionWrapper, call: &CallArgs<'_>) -> PyErr {
    BridgeError::SignatureMismatch {
        name: call.name.to_string(),
        expected: wrapper.expects,
    }
    .into()
}

fn receiver(ctx: &BridgeContext, call: &CallArgs<'_>) -> PyResult<NativeHandle> {
    match call.receiver {
        Some(obj) => ctx.borrowed_ref(obj),
        None => Ok(NativeHandle::NULL),
    }
}

fn optional_arg(ctx: &BridgeContext, arg: Option<&Object>) -> PyResult<NativeHandle> {
    ctx.borrowed_ref(&arg.cloned().unwrap_or_else(Object::none))
}

fn c_name(obj: &Object) -> PyResult<CString> {
    let name = obj.as_str().ok_or_else(|| {
        PyErr::type_error(format!(
            "attribute name must be string, not '{}'",
            obj.class_name()
        ))
    })?;
    CString::new(name).map_err(|_| PyErr::new(ExceptionKind::ValueError, "embedded null character"))
}

fn to_ssize(obj: &Object) -> PyResult<libc::ssize_t> {
    let value = as_i64(obj)?;
    libc::ssize_t::try_from(value).map_err(|_| {
        PyErr::overflow_error("Python int too large to convert to C ssize_t")
    })
}

// ============================================================================
// Marshal functions
// ============================================================================

fn marshal_noargs(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Binary(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 0, 0)?;
    let this = receiver(ctx, call)?;
    Ok(NativeResult::Pointer(unsafe { f(this, NativeHandle::NULL) }))
}

fn marshal_o(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Binary(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 1)?;
    let this = receiver(ctx, call)?;
    let arg = ctx.borrowed_ref(&call.args[0])?;
    Ok(NativeResult::Pointer(unsafe { f(this, arg) }))
}

fn marshal_varargs(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Binary(f) = *f else { return Err(mismatch(w, call)) };
    no_kwargs(call)?;
    let this = receiver(ctx, call)?;
    let args = ctx.borrowed_ref(&Object::tuple(call.args.to_vec()))?;
    Ok(NativeResult::Pointer(unsafe { f(this, args) }))
}

fn marshal_keywords(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Ternary(f) = *f else { return Err(mismatch(w, call)) };
    let this = receiver(ctx, call)?;
    let args = ctx.borrowed_ref(&Object::tuple(call.args.to_vec()))?;
    let kwargs = if call.kwargs.is_empty() {
        NativeHandle::NULL
    } else {
        ctx.borrowed_ref(&Object::dict(call.kwargs.to_vec()))?
    };
    Ok(NativeResult::Pointer(unsafe { f(this, args, kwargs) }))
}

fn marshal_fastcall(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::FastCall(f) = *f else { return Err(mismatch(w, call)) };
    no_kwargs(call)?;
    let this = receiver(ctx, call)?;
    let argv = call
        .args
        .iter()
        .map(|arg| ctx.borrowed_ref(arg))
        .collect::<PyResult<SmallVec<[NativeHandle; 8]>>>()?;
    Ok(NativeResult::Pointer(unsafe {
        f(this, argv.as_ptr(), argv.len() as libc::ssize_t)
    }))
}

fn marshal_fastcall_kw(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::FastCallKw(f) = *f else { return Err(mismatch(w, call)) };
    let this = receiver(ctx, call)?;
    let values = call.args.iter().chain(call.kwargs.iter().map(|(_, value)| value));
    let argv = values
        .map(|arg| ctx.borrowed_ref(arg))
        .collect::<PyResult<SmallVec<[NativeHandle; 8]>>>()?;
    let kwnames = if call.kwargs.is_empty() {
        NativeHandle::NULL
    } else {
        let names = call.kwargs.iter().map(|(name, _)| Object::str(name.as_str())).collect();
        ctx.borrowed_ref(&Object::tuple(names))?
    };
    Ok(NativeResult::Pointer(unsafe {
        f(this, argv.as_ptr(), call.args.len() as libc::ssize_t, kwnames)
    }))
}

fn marshal_alloc(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Alloc(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 0, 1)?;
    let this = receiver(ctx, call)?;
    let nitems = call.args.first().map(to_ssize).transpose()?.unwrap_or(0);
    Ok(NativeResult::Pointer(unsafe { f(this, nitems) }))
}

fn marshal_getattr(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::GetAttr(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 1)?;
    let this = receiver(ctx, call)?;
    let name = c_name(&call.args[0])?;
    Ok(NativeResult::Pointer(unsafe { f(this, name.as_ptr()) }))
}

fn marshal_setattr(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::SetAttr(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 2)?;
    let this = receiver(ctx, call)?;
    let name = c_name(&call.args[0])?;
    // A missing value means delete
    let value = match call.args.get(1) {
        Some(value) => ctx.borrowed_ref(value)?,
        None => NativeHandle::NULL,
    };
    Ok(NativeResult::Int(unsafe { f(this, name.as_ptr(), value) } as i64))
}

fn marshal_richcmp(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::RichCompare(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 2, 2)?;
    let code = as_i64(&call.args[1])?;
    let op = i32::try_from(code)
        .ok()
        .and_then(CompareOp::from_code)
        .ok_or_else(|| PyErr::system_error(format!("invalid comparison operator {}", code)))?;
    let this = receiver(ctx, call)?;
    let other = ctx.borrowed_ref(&call.args[0])?;
    Ok(NativeResult::Pointer(unsafe { f(this, other, op.code()) }))
}

fn marshal_richcmp_op(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::RichCompare(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 1)?;
    let op = w.op.ok_or_else(|| mismatch(w, call))?;
    let this = receiver(ctx, call)?;
    let other = ctx.borrowed_ref(&call.args[0])?;
    Ok(NativeResult::Pointer(unsafe { f(this, other, op.code()) }))
}

fn marshal_ssize_obj_arg(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::SsizeObjArg(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 2)?;
    let this = receiver(ctx, call)?;
    let index = to_ssize(&call.args[0])?;
    let value = match call.args.get(1) {
        Some(value) => ctx.borrowed_ref(value)?,
        None => NativeHandle::NULL,
    };
    Ok(NativeResult::Int(unsafe { f(this, index, value) } as i64))
}

fn marshal_reverse(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Binary(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 1)?;
    let this = receiver(ctx, call)?;
    let other = ctx.borrowed_ref(&call.args[0])?;
    Ok(NativeResult::Pointer(unsafe { f(other, this) }))
}

fn marshal_pow(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Ternary(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 2)?;
    let this = receiver(ctx, call)?;
    let exponent = ctx.borrowed_ref(&call.args[0])?;
    let modulus = optional_arg(ctx, call.args.get(1))?;
    Ok(NativeResult::Pointer(unsafe { f(this, exponent, modulus) }))
}

fn marshal_reverse_pow(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Ternary(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 1, 2)?;
    let this = receiver(ctx, call)?;
    let base = ctx.borrowed_ref(&call.args[0])?;
    let modulus = optional_arg(ctx, call.args.get(1))?;
    Ok(NativeResult::Pointer(unsafe { f(base, this, modulus) }))
}

fn marshal_unary(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Unary(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 0, 0)?;
    let this = receiver(ctx, call)?;
    Ok(NativeResult::Pointer(unsafe { f(this) }))
}

fn marshal_inquiry(w: &ConventionWrapper, ctx: &BridgeContext, f: &NativeFunction, call: &CallArgs<'_>) -> PyResult<NativeResult> {
    let NativeFunction::Inquiry(f) = *f else { return Err(mismatch(w, call)) };
    expect_args(call, 0, 0)?;
    let this = receiver(ctx, call)?;
    Ok(NativeResult::Int(unsafe { f(this) } as i64))
}
