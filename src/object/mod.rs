//! Managed object facade
//!
//! Design: the bridge observes managed objects, it never owns their memory.
//! An [`Object`] is a cheap-clone `Arc` reference whose pointer is its
//! identity; [`WeakObject`] lets caches hold entries without keeping the
//! object alive. Everything the bridge needs from the managed side beyond
//! the payload goes through the [`ManagedRuntime`] trait.

mod exception;
mod runtime;

pub use exception::ExceptionKind;
pub use runtime::{CompareOp, FrameRef, ManagedRuntime, SimpleRuntime, SourceLocation};

use crate::args::MemoryViewInfo;
use crate::dispatch::BuiltinFunction;
use crate::error::PyResult;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::{Arc, Weak};

/// Managed-side callable body (what the interpreter would supply)
pub type ManagedFn = dyn Fn(&[Object], &[(String, Object)]) -> PyResult<Object> + Send + Sync;

#[derive(Clone)]
pub struct ManagedFunction {
    pub name: String,
    pub body: Arc<ManagedFn>,
}

#[derive(Debug, Clone)]
pub struct ExceptionData {
    pub kind: ExceptionKind,
    pub message: String,
    pub cause: Option<Object>,
}

pub enum Payload {
    None,
    /// Marker for "no value", distinct from `None`
    NoValue,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Object>),
    Dict(Vec<(String, Object)>),
    Type(String),
    ExceptionType(ExceptionKind),
    Exception(ExceptionData),
    Builtin(BuiltinFunction),
    Managed(ManagedFunction),
    MemoryView(MemoryViewInfo),
    /// Managed stand-in for a raw native pointer
    NativeProxy(usize),
    Instance(String),
}

struct ObjectData {
    payload: Payload,
}

/// Strong reference to a managed object
#[derive(Clone)]
pub struct Object(Arc<ObjectData>);

/// Non-owning reference; `upgrade` fails once the object is collected
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectData>);

/// Pointer identity of a live object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

static NONE: Lazy<Object> = Lazy::new(|| Object::from_payload(Payload::None));
static NO_VALUE: Lazy<Object> = Lazy::new(|| Object::from_payload(Payload::NoValue));
static TRUE: Lazy<Object> = Lazy::new(|| Object::from_payload(Payload::Bool(true)));
static FALSE: Lazy<Object> = Lazy::new(|| Object::from_payload(Payload::Bool(false)));
static EXCEPTION_TYPES: Lazy<Vec<Object>> = Lazy::new(|| {
    ExceptionKind::ALL
        .iter()
        .map(|&kind| Object::from_payload(Payload::ExceptionType(kind)))
        .collect()
});

impl Object {
    pub(crate) fn from_payload(payload: Payload) -> Self {
        Self(Arc::new(ObjectData { payload }))
    }

    pub fn none() -> Self {
        NONE.clone()
    }

    pub fn no_value() -> Self {
        NO_VALUE.clone()
    }

    pub fn bool(value: bool) -> Self {
        if value {
            TRUE.clone()
        } else {
            FALSE.clone()
        }
    }

    pub fn int(value: impl Into<i128>) -> Self {
        Self::from_payload(Payload::Int(value.into()))
    }

    pub fn float(value: f64) -> Self {
        Self::from_payload(Payload::Float(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::from_payload(Payload::Str(value.into()))
    }

    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self::from_payload(Payload::Bytes(value.into()))
    }

    pub fn tuple(items: Vec<Object>) -> Self {
        Self::from_payload(Payload::Tuple(items))
    }

    pub fn dict(items: Vec<(String, Object)>) -> Self {
        Self::from_payload(Payload::Dict(items))
    }

    pub fn type_object(name: impl Into<String>) -> Self {
        Self::from_payload(Payload::Type(name.into()))
    }

    pub fn instance(class_name: impl Into<String>) -> Self {
        Self::from_payload(Payload::Instance(class_name.into()))
    }

    pub fn native_proxy(ptr: usize) -> Self {
        Self::from_payload(Payload::NativeProxy(ptr))
    }

    /// The unique class object for an exception kind
    pub fn exception_type(kind: ExceptionKind) -> Self {
        EXCEPTION_TYPES[kind as usize].clone()
    }

    pub fn exception(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self::exception_with_cause(kind, message, None)
    }

    pub fn exception_with_cause(
        kind: ExceptionKind,
        message: impl Into<String>,
        cause: Option<Object>,
    ) -> Self {
        Self::from_payload(Payload::Exception(ExceptionData {
            kind,
            message: message.into(),
            cause,
        }))
    }

    pub fn managed_function<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[Object], &[(String, Object)]) -> PyResult<Object> + Send + Sync + 'static,
    {
        Self::from_payload(Payload::Managed(ManagedFunction {
            name: name.into(),
            body: Arc::new(body),
        }))
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        ObjectId(Arc::as_ptr(&self.0) as usize)
    }

    /// Identity comparison (`a is b`)
    #[inline]
    pub fn is(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.0))
    }

    pub fn is_none(&self) -> bool {
        matches!(self.payload(), Payload::None)
    }

    pub fn is_no_value(&self) -> bool {
        matches!(self.payload(), Payload::NoValue)
    }

    pub fn as_int(&self) -> Option<i128> {
        match self.payload() {
            Payload::Int(v) => Some(*v),
            Payload::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.payload() {
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.payload() {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&ExceptionData> {
        match self.payload() {
            Payload::Exception(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_exception_type(&self) -> Option<ExceptionKind> {
        match self.payload() {
            Payload::ExceptionType(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self.payload(),
            Payload::Builtin(_) | Payload::Managed(_) | Payload::Type(_) | Payload::ExceptionType(_)
        )
    }

    pub fn is_truthy(&self) -> bool {
        match self.payload() {
            Payload::None | Payload::NoValue => false,
            Payload::Bool(b) => *b,
            Payload::Int(v) => *v != 0,
            Payload::Float(v) => *v != 0.0,
            Payload::Str(s) => !s.is_empty(),
            Payload::Bytes(b) => !b.is_empty(),
            Payload::Tuple(items) => !items.is_empty(),
            Payload::Dict(items) => !items.is_empty(),
            _ => true,
        }
    }

    pub fn class_name(&self) -> &str {
        match self.payload() {
            Payload::None => "NoneType",
            Payload::NoValue => "NoValue",
            Payload::Bool(_) => "bool",
            Payload::Int(_) => "int",
            Payload::Float(_) => "float",
            Payload::Str(_) => "str",
            Payload::Bytes(_) => "bytes",
            Payload::Tuple(_) => "tuple",
            Payload::Dict(_) => "dict",
            Payload::Type(_) | Payload::ExceptionType(_) => "type",
            Payload::Exception(data) => data.kind.name(),
            Payload::Builtin(f) if f.receiver().is_some() => "builtin_method",
            Payload::Builtin(_) => "builtin_function_or_method",
            Payload::Managed(_) => "function",
            Payload::MemoryView(_) => "memoryview",
            Payload::NativeProxy(_) => "PyCapsule",
            Payload::Instance(name) => name,
        }
    }

    pub fn repr(&self) -> String {
        match self.payload() {
            Payload::None => "None".to_string(),
            Payload::NoValue => "<no value>".to_string(),
            Payload::Bool(true) => "True".to_string(),
            Payload::Bool(false) => "False".to_string(),
            Payload::Int(v) => v.to_string(),
            Payload::Float(v) => format!("{:?}", v),
            Payload::Str(s) => format!("'{}'", s),
            Payload::Bytes(b) => format!("b<{} bytes>", b.len()),
            Payload::Tuple(items) => {
                let inner: Vec<_> = items.iter().map(Object::repr).collect();
                if items.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Payload::Dict(items) => {
                let inner: Vec<_> = items
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Payload::Type(name) => format!("<class '{}'>", name),
            Payload::ExceptionType(kind) => format!("<class '{}'>", kind.name()),
            Payload::Exception(data) => format!("{}('{}')", data.kind.name(), data.message),
            Payload::Builtin(f) => format!("<built-in function {}>", f.name()),
            Payload::Managed(f) => format!("<function {}>", f.name),
            Payload::MemoryView(_) => format!("<memory at {:#x}>", self.id().0),
            Payload::NativeProxy(ptr) => format!("<native object at {:#x}>", ptr),
            Payload::Instance(name) => format!("<{} object at {:#x}>", name, self.id().0),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.repr())
    }
}

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// True if this weak reference still points at `obj`
    pub fn refers_to(&self, obj: &Object) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&obj.0))
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObject(alive = {})", self.is_alive())
    }
}
