//! Tests for calling conventions, call targets and upcalls
//!
//! The `extern "C"` functions below stand in for extension code. They reach
//! the bridge through [`BridgeContext::with_current`], the way native
//! callbacks do. They must not panic: unwinding out of `extern "C"` aborts.

use super::*;
use crate::config::{BridgeConfig, InvariantPolicy};
use crate::context::BridgeContext;
use crate::error::{PyErr, NULL_WITHOUT_ERROR, SENTINEL_WITHOUT_ERROR};
use crate::handles::NativeHandle;
use crate::object::{CompareOp, ExceptionKind, ManagedRuntime, Object, Payload, SimpleRuntime};
use libc::{c_char, c_int, ssize_t};
use std::ffi::CStr;
use std::sync::Arc;

// ============================================================================
// Native stand-ins
// ============================================================================

fn on_bridge<R: Default>(f: impl FnOnce(&BridgeContext) -> R) -> R {
    BridgeContext::with_current(f).unwrap_or_default()
}

fn obj(handle: NativeHandle) -> Object {
    on_bridge(|ctx| ctx.resolve(handle).ok()).unwrap_or_else(Object::no_value)
}

fn give(value: Object) -> NativeHandle {
    on_bridge(|ctx| ctx.new_ref(&value).unwrap_or(NativeHandle::NULL))
}

fn raise(kind: ExceptionKind, message: &str) {
    on_bridge(|ctx| ctx.errors().set_error(PyErr::new(kind, message)));
}

fn tuple_len(handle: NativeHandle) -> usize {
    match obj(handle).payload() {
        Payload::Tuple(items) => items.len(),
        _ => 0,
    }
}

unsafe extern "C" fn echo_arg(_this: NativeHandle, arg: NativeHandle) -> NativeHandle {
    on_bridge(|ctx| ctx.bridge().incref(arg).map(|_| arg).unwrap_or(NativeHandle::NULL))
}

unsafe extern "C" fn self_or_unbound(this: NativeHandle, _unused: NativeHandle) -> NativeHandle {
    if this.is_null() {
        give(Object::str("unbound"))
    } else {
        give(obj(this))
    }
}

unsafe extern "C" fn count_args(_this: NativeHandle, args: NativeHandle) -> NativeHandle {
    give(Object::int(tuple_len(args) as i64))
}

unsafe extern "C" fn describe_call(
    _this: NativeHandle,
    args: NativeHandle,
    kwargs: NativeHandle,
) -> NativeHandle {
    let keywords = if kwargs.is_null() {
        -1
    } else {
        match obj(kwargs).payload() {
            Payload::Dict(items) => items.len() as i64,
            _ => -2,
        }
    };
    give(Object::tuple(vec![
        Object::int(tuple_len(args) as i64),
        Object::int(keywords),
    ]))
}

unsafe extern "C" fn fast_sum(_this: NativeHandle, argv: *const NativeHandle, n: ssize_t) -> NativeHandle {
    let args = std::slice::from_raw_parts(argv, n as usize);
    let total: i128 = args.iter().map(|&h| obj(h).as_int().unwrap_or(0)).sum();
    give(Object::int(total))
}

unsafe extern "C" fn fast_kw(
    _this: NativeHandle,
    argv: *const NativeHandle,
    nargs: ssize_t,
    kwnames: NativeHandle,
) -> NativeHandle {
    let nkw = if kwnames.is_null() { 0 } else { tuple_len(kwnames) };
    let all = std::slice::from_raw_parts(argv, nargs as usize + nkw);
    let last = all.last().map(|&h| obj(h)).unwrap_or_else(Object::none);
    give(Object::tuple(vec![
        Object::int(nargs as i64),
        Object::int(nkw as i64),
        last,
    ]))
}

unsafe extern "C" fn alloc_items(_this: NativeHandle, nitems: ssize_t) -> NativeHandle {
    give(Object::int(nitems as i64))
}

unsafe extern "C" fn getattr_echo(_this: NativeHandle, name: *const c_char) -> NativeHandle {
    give(Object::str(CStr::from_ptr(name).to_string_lossy().into_owned()))
}

unsafe extern "C" fn setattr_no_delete(_this: NativeHandle, _name: *const c_char, value: NativeHandle) -> c_int {
    if value.is_null() {
        raise(ExceptionKind::AttributeError, "cannot delete");
        return -1;
    }
    0
}

unsafe extern "C" fn compare_op(_this: NativeHandle, _other: NativeHandle, op: c_int) -> NativeHandle {
    give(Object::int(op as i64))
}

unsafe extern "C" fn store_item(_this: NativeHandle, index: ssize_t, _value: NativeHandle) -> c_int {
    if index < 0 {
        -1
    } else {
        0
    }
}

unsafe extern "C" fn pair(a: NativeHandle, b: NativeHandle) -> NativeHandle {
    give(Object::tuple(vec![obj(a), obj(b)]))
}

unsafe extern "C" fn triple(a: NativeHandle, b: NativeHandle, c: NativeHandle) -> NativeHandle {
    give(Object::tuple(vec![obj(a), obj(b), obj(c)]))
}

unsafe extern "C" fn exhausted(_this: NativeHandle) -> NativeHandle {
    NativeHandle::NULL
}

unsafe extern "C" fn broken_next(_this: NativeHandle) -> NativeHandle {
    raise(ExceptionKind::ValueError, "broken iterator");
    NativeHandle::NULL
}

unsafe extern "C" fn always_true(_this: NativeHandle) -> c_int {
    7
}

unsafe extern "C" fn inquiry_fails(_this: NativeHandle) -> c_int {
    -1
}

unsafe extern "C" fn forgets_error(_this: NativeHandle, _arg: NativeHandle) -> NativeHandle {
    NativeHandle::NULL
}

unsafe extern "C" fn raises_value_error(_this: NativeHandle, _arg: NativeHandle) -> NativeHandle {
    raise(ExceptionKind::ValueError, "bad input");
    NativeHandle::NULL
}

unsafe extern "C" fn result_and_error(_this: NativeHandle, arg: NativeHandle) -> NativeHandle {
    raise(ExceptionKind::ValueError, "late");
    give(obj(arg))
}

/// Sets an error and returns a handle it already gave up
unsafe extern "C" fn error_with_released_result(_this: NativeHandle, _arg: NativeHandle) -> NativeHandle {
    raise(ExceptionKind::ValueError, "late");
    on_bridge(|ctx| {
        let handle = ctx.new_ref(&Object::instance("Gone")).unwrap_or(NativeHandle::NULL);
        let _ = ctx.bridge().release(handle);
        handle
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn context() -> BridgeContext {
    BridgeContext::new(
        BridgeConfig {
            checked_handles: true,
            invariant_policy: InvariantPolicy::Degrade,
            ..BridgeConfig::default()
        },
        Arc::new(SimpleRuntime::new()),
    )
}

fn function(ctx: &BridgeContext, name: &str, f: NativeFunction, convention: CallingConvention) -> Object {
    create_function(ctx, name, &Callable::Native(f), Some(convention), None).unwrap()
}

fn method(ctx: &BridgeContext, name: &str, f: NativeFunction, convention: CallingConvention, receiver: &Object) -> Object {
    let owner = Object::type_object("Widget");
    let unbound = create_function(ctx, name, &Callable::Native(f), Some(convention), Some(&owner)).unwrap();
    create_builtin_method(&unbound, receiver).unwrap()
}

fn ints(values: &[i64]) -> Vec<Object> {
    values.iter().map(|&v| Object::int(v)).collect()
}

fn tuple_items(obj: &Object) -> Vec<Object> {
    match obj.payload() {
        Payload::Tuple(items) => items.clone(),
        _ => panic!("expected tuple, got {}", obj.repr()),
    }
}

// ============================================================================
// Convention codes
// ============================================================================

#[test]
fn test_convention_codes() {
    assert_eq!(CallingConvention::from_code(4), Some(CallingConvention::O));
    assert_eq!(CallingConvention::from_code(0), Some(CallingConvention::Direct));
    assert_eq!(
        CallingConvention::from_code(CallingConvention::RICHCMP_OP_BASE + 2),
        Some(CallingConvention::RichCompareOp(CompareOp::Eq))
    );
    assert_eq!(CallingConvention::from_code(99), None);
    assert_eq!(CallingConvention::from_code(-1), None);
}

#[test]
fn test_every_convention_has_its_wrapper() {
    for code in (0..=16).chain(100..=105) {
        let convention = CallingConvention::from_code(code).unwrap();
        assert_eq!(convention.wrapper().convention, convention);
    }
}

#[test]
fn test_result_checks_per_convention() {
    use crate::exception::ResultCheck;
    assert_eq!(CallingConvention::IterNext.result_check(), ResultCheck::IterNext);
    assert_eq!(CallingConvention::Inquiry.result_check(), ResultCheck::Inquiry);
    assert_eq!(CallingConvention::Alloc.result_check(), ResultCheck::Default);
    assert_eq!(CallingConvention::O.result_check(), ResultCheck::Default);
}

// ============================================================================
// Marshaling per convention
// ============================================================================

#[test]
fn test_meth_o_passes_argument_through() {
    let ctx = context();
    let f = function(&ctx, "echo", NativeFunction::Binary(echo_arg), CallingConvention::O);
    let arg = Object::instance("Payload");

    let result = ctx.call(&f, &[arg.clone()], &[]).unwrap();
    assert!(result.is(&arg));
    assert_eq!(ctx.bridge().stats().live, 0);
}

#[test]
fn test_meth_o_arity() {
    let ctx = context();
    let f = function(&ctx, "echo", NativeFunction::Binary(echo_arg), CallingConvention::O);

    let err = ctx.call(&f, &ints(&[1, 2]), &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::TypeError);
    assert_eq!(err.message(), "echo() takes exactly one argument (2 given)");
}

#[test]
fn test_keywords_rejected_where_unsupported() {
    let ctx = context();
    let f = function(&ctx, "echo", NativeFunction::Binary(echo_arg), CallingConvention::O);
    let kwargs = vec![("x".to_string(), Object::int(1))];

    let err = ctx.call(&f, &ints(&[1]), &kwargs).unwrap_err();
    assert_eq!(err.message(), "echo() takes no keyword arguments");
}

#[test]
fn test_noargs_self_binding() {
    let ctx = context();
    let receiver = Object::instance("Widget");

    let bound = method(&ctx, "me", NativeFunction::Binary(self_or_unbound), CallingConvention::NoArgs, &receiver);
    assert!(ctx.call(&bound, &[], &[]).unwrap().is(&receiver));

    let free = function(&ctx, "me", NativeFunction::Binary(self_or_unbound), CallingConvention::NoArgs);
    assert_eq!(ctx.call(&free, &[], &[]).unwrap().as_str(), Some("unbound"));

    let err = ctx.call(&free, &ints(&[1]), &[]).unwrap_err();
    assert_eq!(err.message(), "me() takes no arguments (1 given)");
}

#[test]
fn test_unbound_method_takes_self_from_args() {
    let ctx = context();
    let owner = Object::type_object("Widget");
    let unbound = create_function(
        &ctx,
        "me",
        &Callable::Native(NativeFunction::Binary(self_or_unbound)),
        Some(CallingConvention::NoArgs),
        Some(&owner),
    )
    .unwrap();

    let receiver = Object::instance("Widget");
    assert!(ctx.call(&unbound, &[receiver.clone()], &[]).unwrap().is(&receiver));

    let err = ctx.call(&unbound, &[], &[]).unwrap_err();
    assert_eq!(err.message(), "descriptor 'me' needs an argument");
}

#[test]
fn test_varargs_packs_tuple() {
    let ctx = context();
    let f = function(&ctx, "count", NativeFunction::Binary(count_args), CallingConvention::VarArgs);
    assert_eq!(ctx.call(&f, &ints(&[1, 2, 3]), &[]).unwrap().as_int(), Some(3));
}

#[test]
fn test_keywords_passes_null_without_kwargs() {
    let ctx = context();
    let f = function(&ctx, "describe", NativeFunction::Ternary(describe_call), CallingConvention::Keywords);

    let plain = tuple_items(&ctx.call(&f, &ints(&[1, 2]), &[]).unwrap());
    assert_eq!(plain[0].as_int(), Some(2));
    assert_eq!(plain[1].as_int(), Some(-1));

    let kwargs = vec![("flag".to_string(), Object::bool(true))];
    let with_kw = tuple_items(&ctx.call(&f, &ints(&[1, 2]), &kwargs).unwrap());
    assert_eq!(with_kw[1].as_int(), Some(1));
}

#[test]
fn test_fastcall_and_direct_default() {
    let ctx = context();
    let fast = function(&ctx, "sum", NativeFunction::FastCall(fast_sum), CallingConvention::FastCall);
    assert_eq!(ctx.call(&fast, &ints(&[1, 2, 3]), &[]).unwrap().as_int(), Some(6));
    assert_eq!(ctx.call(&fast, &[], &[]).unwrap().as_int(), Some(0));

    let direct = create_function(&ctx, "sum", &Callable::Native(NativeFunction::FastCall(fast_sum)), None, None).unwrap();
    assert_eq!(ctx.call(&direct, &ints(&[4, 5]), &[]).unwrap().as_int(), Some(9));
}

#[test]
fn test_fastcall_with_keywords_layout() {
    let ctx = context();
    let f = function(
        &ctx,
        "kw",
        NativeFunction::FastCallKw(fast_kw),
        CallingConvention::FastCallWithKeywords,
    );
    let kwargs = vec![("x".to_string(), Object::str("last"))];

    let items = tuple_items(&ctx.call(&f, &ints(&[1, 2]), &kwargs).unwrap());
    assert_eq!(items[0].as_int(), Some(2));
    assert_eq!(items[1].as_int(), Some(1));
    assert_eq!(items[2].as_str(), Some("last"));
}

#[test]
fn test_alloc_nitems() {
    let ctx = context();
    let f = function(&ctx, "alloc", NativeFunction::Alloc(alloc_items), CallingConvention::Alloc);
    assert_eq!(ctx.call(&f, &ints(&[5]), &[]).unwrap().as_int(), Some(5));
    assert_eq!(ctx.call(&f, &[], &[]).unwrap().as_int(), Some(0));
}

#[test]
fn test_getattr_passes_c_string() {
    let ctx = context();
    let f = function(&ctx, "getattr", NativeFunction::GetAttr(getattr_echo), CallingConvention::GetAttr);
    assert_eq!(ctx.call(&f, &[Object::str("size")], &[]).unwrap().as_str(), Some("size"));

    let err = ctx.call(&f, &ints(&[1]), &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::TypeError);
}

#[test]
fn test_setattr_missing_value_deletes() {
    let ctx = context();
    let f = function(&ctx, "setattr", NativeFunction::SetAttr(setattr_no_delete), CallingConvention::SetAttr);

    let set = ctx.call(&f, &[Object::str("x"), Object::int(1)], &[]).unwrap();
    assert!(set.is_none());

    let err = ctx.call(&f, &[Object::str("x")], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::AttributeError);
    assert!(!ctx.errors().is_pending());
}

#[test]
fn test_richcmp_reads_operator_argument() {
    let ctx = context();
    let f = function(&ctx, "cmp", NativeFunction::RichCompare(compare_op), CallingConvention::RichCompare);
    let other = Object::int(1);

    assert_eq!(ctx.call(&f, &[other.clone(), Object::int(2)], &[]).unwrap().as_int(), Some(2));

    let err = ctx.call(&f, &[other, Object::int(9)], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
}

#[test]
fn test_richcmp_per_operator_wrapper_built_once() {
    let ctx = context();
    let gt = CallingConvention::RichCompareOp(CompareOp::Gt);
    let f = function(&ctx, "__gt__", NativeFunction::RichCompare(compare_op), gt);
    assert_eq!(ctx.call(&f, &ints(&[1]), &[]).unwrap().as_int(), Some(CompareOp::Gt.code() as i128));

    let first = CallingConvention::RichCompareOp(CompareOp::Ge).wrapper();
    let built = richcmp_op_constructions();
    let second = CallingConvention::RichCompareOp(CompareOp::Ge).wrapper();

    assert!(std::ptr::eq(first, second));
    assert_eq!(richcmp_op_constructions(), built);
    assert!(built <= CompareOp::ALL.len());
}

#[test]
fn test_richcmp_wrappers_converge_across_threads() {
    let wrappers: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    CallingConvention::RichCompareOp(CompareOp::Lt).wrapper() as *const ConventionWrapper as usize
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(wrappers.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_ssize_obj_arg_sentinel_without_error() {
    let ctx = context();
    let f = function(&ctx, "setitem", NativeFunction::SsizeObjArg(store_item), CallingConvention::SsizeObjArg);

    assert!(ctx.call(&f, &[Object::int(0), Object::int(1)], &[]).unwrap().is_none());

    let err = ctx.call(&f, &[Object::int(-1), Object::int(1)], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
    assert_eq!(err.message(), format!("setitem {}", SENTINEL_WITHOUT_ERROR));
}

#[test]
fn test_reverse_swaps_operands() {
    let ctx = context();
    let receiver = Object::instance("Widget");
    let other = Object::int(3);
    let f = method(&ctx, "__radd__", NativeFunction::Binary(pair), CallingConvention::Reverse, &receiver);

    let items = tuple_items(&ctx.call(&f, &[other.clone()], &[]).unwrap());
    assert!(items[0].is(&other));
    assert!(items[1].is(&receiver));
}

#[test]
fn test_pow_default_modulus_is_none() {
    let ctx = context();
    let receiver = Object::instance("Widget");
    let pow = method(&ctx, "__pow__", NativeFunction::Ternary(triple), CallingConvention::Pow, &receiver);

    let items = tuple_items(&ctx.call(&pow, &ints(&[2]), &[]).unwrap());
    assert!(items[0].is(&receiver));
    assert_eq!(items[1].as_int(), Some(2));
    assert!(items[2].is_none());

    let rpow = method(&ctx, "__rpow__", NativeFunction::Ternary(triple), CallingConvention::ReversePow, &receiver);
    let items = tuple_items(&ctx.call(&rpow, &ints(&[2, 7]), &[]).unwrap());
    assert_eq!(items[0].as_int(), Some(2));
    assert!(items[1].is(&receiver));
    assert_eq!(items[2].as_int(), Some(7));
}

#[test]
fn test_iternext_exhaustion_and_errors() {
    let ctx = context();
    let receiver = Object::instance("Iterator");

    let done = method(&ctx, "__next__", NativeFunction::Unary(exhausted), CallingConvention::IterNext, &receiver);
    let err = ctx.call(&done, &[], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::StopIteration);

    let broken = method(&ctx, "__next__", NativeFunction::Unary(broken_next), CallingConvention::IterNext, &receiver);
    let err = ctx.call(&broken, &[], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::ValueError);
}

#[test]
fn test_inquiry_truth_value() {
    let ctx = context();
    let receiver = Object::instance("Widget");

    let truthy = method(&ctx, "__bool__", NativeFunction::Inquiry(always_true), CallingConvention::Inquiry, &receiver);
    assert!(ctx.call(&truthy, &[], &[]).unwrap().is_truthy());

    let failing = method(&ctx, "__bool__", NativeFunction::Inquiry(inquiry_fails), CallingConvention::Inquiry, &receiver);
    let err = ctx.call(&failing, &[], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
}

// ============================================================================
// Error protocol at the call boundary
// ============================================================================

#[test]
fn test_null_without_error_names_callable() {
    let ctx = context();
    let f = function(&ctx, "forgetful", NativeFunction::Binary(forgets_error), CallingConvention::O);

    let err = ctx.call(&f, &ints(&[1]), &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
    assert_eq!(err.message(), format!("forgetful {}", NULL_WITHOUT_ERROR));
    assert!(!ctx.errors().is_pending());
}

#[test]
fn test_raised_error_propagates_and_clears() {
    let ctx = context();
    let f = function(&ctx, "strict", NativeFunction::Binary(raises_value_error), CallingConvention::O);

    let err = ctx.call(&f, &ints(&[1]), &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::ValueError);
    assert_eq!(err.message(), "bad input");
    assert!(!ctx.errors().is_pending());
    assert_eq!(ctx.bridge().stats().live, 0);
}

#[test]
fn test_result_with_error_is_chained_and_released() {
    let ctx = context();
    let f = function(&ctx, "sloppy", NativeFunction::Binary(result_and_error), CallingConvention::O);

    let err = ctx.call(&f, &[Object::instance("Widget")], &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
    assert_eq!(err.cause().unwrap().kind(), ExceptionKind::ValueError);
    assert_eq!(ctx.bridge().stats().live, 0);
}

#[test]
fn test_failed_release_of_discarded_result_degrades() {
    let ctx = context();
    let f = function(&ctx, "sloppy", NativeFunction::Binary(error_with_released_result), CallingConvention::O);

    let err = ctx.call(&f, &ints(&[1]), &[]).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
    assert_eq!(err.cause().unwrap().kind(), ExceptionKind::ValueError);
    assert_eq!(ctx.bridge().stats().live, 0);
}

#[test]
#[should_panic(expected = "double release")]
fn test_failed_release_of_discarded_result_is_fatal() {
    let ctx = BridgeContext::new(
        BridgeConfig {
            checked_handles: true,
            invariant_policy: InvariantPolicy::Fatal,
            ..BridgeConfig::default()
        },
        Arc::new(SimpleRuntime::new()),
    );
    let f = function(&ctx, "sloppy", NativeFunction::Binary(error_with_released_result), CallingConvention::O);
    let _ = ctx.call(&f, &ints(&[1]), &[]);
}

#[test]
fn test_signature_mismatch_rejected_at_wrap() {
    let ctx = context();
    let err = create_function(
        &ctx,
        "wrong",
        &Callable::Native(NativeFunction::Binary(echo_arg)),
        Some(CallingConvention::Inquiry),
        None,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
    assert!(ctx.targets().is_empty());
}

// ============================================================================
// Call-target cache
// ============================================================================

#[test]
fn test_repeated_wrap_returns_same_target() {
    let ctx = context();
    let f = NativeFunction::Binary(echo_arg);

    let a = wrap_native(&ctx, "echo", f, CallingConvention::O).unwrap();
    let b = wrap_native(&ctx, "echo", f, CallingConvention::O).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(ctx.targets().constructions(), 1);

    let c = wrap_native(&ctx, "echo", f, CallingConvention::Reverse).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(ctx.targets().constructions(), 2);
}

#[test]
fn test_decorated_native_shares_target() {
    let ctx = context();
    let plain = Callable::Native(NativeFunction::Binary(echo_arg));
    let decorated = plain.clone().decorate().decorate();

    let a = wrap(&ctx, "echo", &plain, CallingConvention::O, true).unwrap().unwrap();
    let b = wrap(&ctx, "echo", &decorated, CallingConvention::O, true).unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_native_always_converted() {
    let ctx = context();
    let callable = Callable::Native(NativeFunction::Binary(echo_arg));
    let target = wrap(&ctx, "echo", &callable, CallingConvention::O, false).unwrap().unwrap();
    assert!(target.needs_conversion());
}

#[test]
fn test_shared_cache_across_contexts() {
    let cache = Arc::new(CallTargetCache::new());
    let make = || {
        BridgeContext::with_target_cache(
            BridgeConfig::default(),
            Arc::new(SimpleRuntime::new()),
            cache.clone(),
        )
    };
    let (one, two) = (make(), make());
    let f = NativeFunction::FastCall(fast_sum);

    let a = wrap_native(&one, "sum", f, CallingConvention::FastCall).unwrap();
    let b = wrap_native(&two, "sum", f, CallingConvention::FastCall).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.constructions(), 1);
}

#[test]
fn test_concurrent_first_wrap_builds_once() {
    let cache = Arc::new(CallTargetCache::new());
    let f = NativeFunction::Binary(count_args);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let cache = cache.clone();
            scope.spawn(move || {
                let ctx = BridgeContext::with_target_cache(
                    BridgeConfig::default(),
                    Arc::new(SimpleRuntime::new()),
                    cache,
                );
                wrap_native(&ctx, "count", f, CallingConvention::VarArgs).unwrap();
            });
        }
    });
    assert_eq!(cache.constructions(), 1);
}

#[test]
fn test_forget_callable() {
    let ctx = context();
    let f = NativeFunction::Binary(echo_arg);
    wrap_native(&ctx, "echo", f, CallingConvention::O).unwrap();
    wrap_native(&ctx, "echo", f, CallingConvention::Reverse).unwrap();

    assert_eq!(ctx.targets().forget_callable(f.address()), 2);
    assert!(ctx.targets().is_empty());
}

#[test]
fn test_sweep_drops_unused_managed_targets() {
    let ctx = context();
    let callable = Object::managed_function("f", |_, _| Ok(Object::none()));
    let weak = callable.downgrade();

    let target = wrap_managed(&ctx, "f", &callable, CallingConvention::VarArgs).unwrap().unwrap();
    drop(callable);
    assert_eq!(ctx.targets().sweep(), 0);
    assert!(weak.is_alive());

    drop(target);
    assert_eq!(ctx.targets().sweep(), 1);
    assert!(!weak.is_alive());
}

// ============================================================================
// create_function
// ============================================================================

fn managed_counter() -> Object {
    Object::managed_function("counter", |args, _| Ok(Object::int(args.len() as i64)))
}

#[test]
fn test_handle_without_convention_is_the_managed_callable() {
    let ctx = context();
    let callable = managed_counter();
    let handle = ctx.new_ref(&callable).unwrap();

    let f = create_function(&ctx, "counter", &Callable::Handle(handle), None, None).unwrap();
    assert!(f.is(&callable));

    let direct = create_function(&ctx, "counter", &Callable::Handle(handle), Some(CallingConvention::Direct), None)
        .unwrap();
    assert!(direct.is(&callable));
    assert!(ctx.targets().is_empty());
}

#[test]
fn test_decorated_handle_is_unwrapped() {
    let ctx = context();
    let callable = managed_counter();
    let handle = ctx.new_ref(&callable).unwrap();
    let decorated = Callable::Handle(handle).decorate();

    let f = create_function(&ctx, "counter", &decorated, None, None).unwrap();
    assert!(f.is(&callable));
}

#[test]
fn test_handle_with_convention_calls_without_conversion() {
    let ctx = context();
    let callable = managed_counter();
    let handle = ctx.new_ref(&callable).unwrap();
    let owner = Object::type_object("Widget");

    let f = create_function(
        &ctx,
        "counter",
        &Callable::Handle(handle),
        Some(CallingConvention::VarArgs),
        Some(&owner),
    )
    .unwrap();
    match f.payload() {
        Payload::Builtin(builtin) => assert!(!builtin.target().needs_conversion()),
        _ => panic!("expected builtin"),
    }

    // Receiver is prepended to the managed call
    let bound = create_builtin_method(&f, &Object::instance("Widget")).unwrap();
    assert_eq!(ctx.call(&bound, &ints(&[1, 2]), &[]).unwrap().as_int(), Some(3));
}

#[test]
fn test_builtin_method_requires_builtin() {
    let err = create_builtin_method(&Object::int(1), &Object::none()).unwrap_err();
    assert_eq!(err.kind(), ExceptionKind::TypeError);
}

// ============================================================================
// Upcalls
// ============================================================================

#[test]
fn test_upcall_new_ref() {
    let ctx = context();
    let callable = managed_counter();
    let target = UpcallTarget::Callable(ctx.new_ref(&callable).unwrap());
    let args = [ctx.new_ref(&Object::int(1)).unwrap(), ctx.new_ref(&Object::int(2)).unwrap()];

    let result = upcall_new_ref(&ctx, target, &args);
    assert_eq!(ctx.steal(result).unwrap().as_int(), Some(2));
    assert!(!ctx.errors().is_pending());
}

#[test]
fn test_upcall_method_on_receiver() {
    let runtime = Arc::new(SimpleRuntime::new());
    let ctx = BridgeContext::new(BridgeConfig::default(), runtime.clone());
    let receiver = Object::instance("Widget");
    runtime
        .set_attribute(&receiver, "double", Object::managed_function("double", |args, _| {
            Ok(Object::int(args[0].as_int().unwrap_or(0) * 2))
        }))
        .unwrap();

    let target = UpcallTarget::Method {
        receiver: ctx.new_ref(&receiver).unwrap(),
        name: "double",
    };
    let arg = ctx.new_ref(&Object::int(21)).unwrap();
    assert_eq!(upcall_long(&ctx, target, &[arg]), 42);
}

#[test]
fn test_upcall_errors_become_sentinels() {
    let ctx = context();
    let failing = Object::managed_function("fail", |_, _| {
        Err(PyErr::new(ExceptionKind::RuntimeError, "nope"))
    });
    let target = UpcallTarget::Callable(ctx.new_ref(&failing).unwrap());

    assert!(upcall_new_ref(&ctx, target, &[]).is_null());
    assert_eq!(ctx.errors().take().unwrap().kind(), ExceptionKind::RuntimeError);

    assert_eq!(upcall_long(&ctx, target, &[]), -1);
    assert!(ctx.errors().take().is_some());

    assert_eq!(upcall_double(&ctx, target, &[]), -1.0);
    assert!(ctx.errors().take().is_some());

    assert_eq!(upcall_ptr(&ctx, target, &[]), 0);
    assert!(ctx.errors().take().is_some());

    assert!(upcall_borrowed(&ctx, target, &[]).is_null());
    assert!(ctx.errors().take().is_some());
}

#[test]
fn test_upcall_conversion_errors() {
    let ctx = context();
    let returns_str = Object::managed_function("name", |_, _| Ok(Object::str("x")));
    let target = UpcallTarget::Callable(ctx.new_ref(&returns_str).unwrap());

    assert_eq!(upcall_long(&ctx, target, &[]), -1);
    assert_eq!(ctx.errors().take().unwrap().kind(), ExceptionKind::TypeError);
}

#[test]
fn test_upcall_double_and_ptr() {
    let ctx = context();
    let half = Object::managed_function("half", |_, _| Ok(Object::float(0.5)));
    let proxy = Object::managed_function("ptr", |_, _| Ok(Object::native_proxy(0xdead0)));

    let half = UpcallTarget::Callable(ctx.new_ref(&half).unwrap());
    let proxy = UpcallTarget::Callable(ctx.new_ref(&proxy).unwrap());
    assert_eq!(upcall_double(&ctx, half, &[]), 0.5);
    assert_eq!(upcall_ptr(&ctx, proxy, &[]), 0xdead0);
}

#[test]
fn test_transfer_parks_error() {
    let ctx = context();
    let value: i64 = transfer(&ctx, Err(PyErr::type_error("t")));
    assert_eq!(value, -1);
    assert_eq!(ctx.errors().occurred().unwrap().as_exception_type(), Some(ExceptionKind::TypeError));

    let ok: f64 = transfer(&ctx, Ok(2.5));
    assert_eq!(ok, 2.5);
}

// ============================================================================
// Object protocol upcalls
// ============================================================================

#[test]
fn test_rich_compare_upcall() {
    let ctx = context();
    let one = ctx.new_ref(&Object::int(1)).unwrap();
    let two = ctx.new_ref(&Object::int(2)).unwrap();

    let lt = rich_compare(&ctx, one, two, CompareOp::Lt.code());
    assert!(ctx.steal(lt).unwrap().is_truthy());
    let ge = rich_compare(&ctx, one, two, CompareOp::Ge.code());
    assert!(!ctx.steal(ge).unwrap().is_truthy());
}

#[test]
fn test_rich_compare_upcall_errors() {
    let ctx = context();
    let a = ctx.new_ref(&Object::str("a")).unwrap();
    let one = ctx.new_ref(&Object::int(1)).unwrap();

    assert!(rich_compare(&ctx, a, one, CompareOp::Lt.code()).is_null());
    assert_eq!(ctx.errors().take().unwrap().kind(), ExceptionKind::TypeError);

    assert!(rich_compare(&ctx, a, one, 6).is_null());
    let err = ctx.errors().take().unwrap();
    assert_eq!(err.kind(), ExceptionKind::SystemError);
    assert!(err.message().contains("operator 6"));
}

#[test]
fn test_set_attribute_upcall_sets_and_deletes() {
    let ctx = context();
    let point = Object::instance("Point");
    let handle = ctx.new_ref(&point).unwrap();
    let value = ctx.new_ref(&Object::int(3)).unwrap();

    assert_eq!(set_attribute(&ctx, handle, "x", value), 0);
    assert_eq!(ctx.runtime().get_attribute(&point, "x").unwrap().as_int(), Some(3));

    assert_eq!(set_attribute(&ctx, handle, "x", NativeHandle::NULL), 0);
    assert!(ctx.runtime().get_attribute(&point, "x").is_err());

    assert_eq!(set_attribute(&ctx, handle, "x", NativeHandle::NULL), -1);
    assert_eq!(ctx.errors().take().unwrap().kind(), ExceptionKind::AttributeError);
}

#[test]
fn test_is_subtype_upcall() {
    let ctx = context();
    let key_error = ctx.new_ref(&Object::exception_type(ExceptionKind::KeyError)).unwrap();
    let lookup = ctx.new_ref(&Object::exception_type(ExceptionKind::LookupError)).unwrap();

    assert_eq!(is_subtype(&ctx, key_error, lookup), 1);
    assert_eq!(is_subtype(&ctx, lookup, key_error), 0);
    assert!(!ctx.errors().is_pending());
}

#[test]
fn test_get_class_upcall_is_borrowed() {
    let ctx = context();
    let widget = ctx.new_ref(&Object::instance("Widget")).unwrap();

    let class = {
        let _scope = ctx.bridge().enter_scope();
        let class = get_class(&ctx, widget);
        let resolved = ctx.resolve(class).unwrap();
        assert!(matches!(resolved.payload(), Payload::Type(name) if name == "Widget"));
        class
    };
    assert!(ctx.bridge().refcount(class).is_err());
}
