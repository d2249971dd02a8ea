//! Turning native slots into managed callables

use super::cache::TargetKey;
use super::convention::CallingConvention;
use super::native::NativeFunction;
use super::target::{CallTarget, Executable};
use crate::context::BridgeContext;
use crate::error::{BridgeError, PyErr, PyResult};
use crate::handles::NativeHandle;
use crate::object::{Object, Payload};

/// Managed-side function object backed by a call target
#[derive(Clone)]
pub struct BuiltinFunction {
    name: String,
    target: Executable,
    owner: Option<Object>,
    receiver: Option<Object>,
}

impl BuiltinFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Executable {
        &self.target
    }

    pub fn owner(&self) -> Option<&Object> {
        self.owner.as_ref()
    }

    pub fn receiver(&self) -> Option<&Object> {
        self.receiver.as_ref()
    }

    /// Bound functions pass their receiver as `self`. Unbound functions
    /// that belong to a type take `self` from the first argument; free
    /// functions get a NULL `self`.
    pub fn call(&self, ctx: &BridgeContext, args: &[Object], kwargs: &[(String, Object)]) -> PyResult<Object> {
        match (&self.receiver, &self.owner) {
            (Some(receiver), _) => self.target.invoke(ctx, Some(receiver), args, kwargs),
            (None, Some(_)) => match args.split_first() {
                Some((this, rest)) => self.target.invoke(ctx, Some(this), rest, kwargs),
                None => Err(PyErr::type_error(format!(
                    "descriptor '{}' needs an argument",
                    self.name
                ))),
            },
            (None, None) => self.target.invoke(ctx, None, args, kwargs),
        }
    }
}

/// What native code registered as a callable slot
#[derive(Debug, Clone)]
pub enum Callable {
    Native(NativeFunction),
    /// Handle to a managed callable, e.g. a slot inherited from a managed type
    Handle(NativeHandle),
    /// Thin decoration around another callable
    Decorated(Box<Callable>),
}

impl Callable {
    pub fn decorate(self) -> Self {
        Callable::Decorated(Box::new(self))
    }

    /// Remove every decoration layer
    pub fn strip(&self) -> Undecorated {
        let mut current = self;
        loop {
            match current {
                Callable::Native(function) => return Undecorated::Native(*function),
                Callable::Handle(handle) => return Undecorated::Handle(*handle),
                Callable::Decorated(inner) => current = inner.as_ref(),
            }
        }
    }
}

/// A callable with its decorations removed
#[derive(Debug, Clone, Copy)]
pub enum Undecorated {
    Native(NativeFunction),
    Handle(NativeHandle),
}

/// Cached executable for a native callable under `convention`
pub fn wrap_native(
    ctx: &BridgeContext,
    name: &str,
    function: NativeFunction,
    convention: CallingConvention,
) -> PyResult<Executable> {
    let wrapper = convention.wrapper();
    if !wrapper.accepts(&function) {
        return Err(BridgeError::SignatureMismatch {
            name: name.to_string(),
            expected: wrapper.expects,
        }
        .into());
    }

    let key = TargetKey {
        callable: function.address(),
        name: name.to_string(),
        convention,
        conversion: true,
    };
    ctx.targets()
        .get_or_create(key, false, || Ok(CallTarget::native(name, convention, function)))
}

/// Cached executable for a managed callable reached from native code
///
/// `None` means the callable should be used directly.
pub fn wrap_managed(
    ctx: &BridgeContext,
    name: &str,
    callable: &Object,
    convention: CallingConvention,
) -> PyResult<Option<Executable>> {
    if convention == CallingConvention::Direct {
        return Ok(None);
    }

    let key = TargetKey {
        callable: callable.id().as_usize(),
        name: name.to_string(),
        convention,
        conversion: false,
    };
    let target = ctx.targets().get_or_create(key, true, || {
        Ok(CallTarget::managed(name, convention, callable.clone()))
    })?;
    Ok(Some(target))
}

/// Wrap any callable; decorations are stripped first
///
/// Managed callables never get conversions. Native callables always do,
/// whatever `needs_conversion` says, since they cannot be called otherwise.
pub fn wrap(
    ctx: &BridgeContext,
    name: &str,
    callable: &Callable,
    convention: CallingConvention,
    needs_conversion: bool,
) -> PyResult<Option<Executable>> {
    match callable.strip() {
        Undecorated::Native(function) => {
            if !needs_conversion {
                tracing::debug!(
                    event = "conversion_forced",
                    function = name,
                    "native callable wrapped with conversion"
                );
            }
            wrap_native(ctx, name, function, convention).map(Some)
        }
        Undecorated::Handle(handle) => {
            let managed = ctx.resolve(handle)?;
            wrap_managed(ctx, name, &managed, convention)
        }
    }
}

fn builtin(name: &str, target: Executable, owner: Option<&Object>) -> Object {
    Object::from_payload(Payload::Builtin(BuiltinFunction {
        name: name.to_string(),
        target,
        owner: owner.cloned(),
        receiver: None,
    }))
}

/// Register a native slot as a managed callable
///
/// - Handle to a managed callable, no convention: the managed callable
/// - Handle with a convention: a builtin calling it without conversion,
///   or the callable itself for the direct convention
/// - Native callable: a builtin with full conversion; no convention means
///   the direct convention
///
/// Decorated callables are unwrapped first.
pub fn create_function(
    ctx: &BridgeContext,
    name: &str,
    callable: &Callable,
    convention: Option<CallingConvention>,
    owner: Option<&Object>,
) -> PyResult<Object> {
    match callable.strip() {
        Undecorated::Handle(handle) => {
            let managed = ctx.resolve(handle)?;
            let Some(convention) = convention else {
                return Ok(managed);
            };
            match wrap_managed(ctx, name, &managed, convention)? {
                Some(target) => Ok(builtin(name, target, owner)),
                None => Ok(managed),
            }
        }
        Undecorated::Native(function) => {
            let convention = convention.unwrap_or(CallingConvention::Direct);
            let target = wrap_native(ctx, name, function, convention)?;
            Ok(builtin(name, target, owner))
        }
    }
}

/// Bind a builtin function to `receiver`
pub fn create_builtin_method(function: &Object, receiver: &Object) -> PyResult<Object> {
    match function.payload() {
        Payload::Builtin(f) => Ok(Object::from_payload(Payload::Builtin(BuiltinFunction {
            receiver: Some(receiver.clone()),
            ..f.clone()
        }))),
        _ => Err(PyErr::type_error(format!(
            "expected a builtin function, got '{}'",
            function.class_name()
        ))),
    }
}
