//! Collaborator interface to the managed runtime
//!
//! The bridge reads and writes attributes, calls methods and compares
//! objects only through [`ManagedRuntime`]. [`SimpleRuntime`] is a small
//! attribute-dictionary implementation used by the native test harness and
//! by embedders that have no richer object system yet.

use super::{ExceptionKind, Object, ObjectId, Payload, WeakObject};
use crate::error::{PyErr, PyResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rich comparison operator, numbered as on the native side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CompareOp {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOp {
    pub const ALL: [CompareOp; 6] = [
        Self::Lt,
        Self::Le,
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Ge,
    ];

    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: CmpOrdering) -> bool {
        match self {
            Self::Lt => ordering.is_lt(),
            Self::Le => ordering.is_le(),
            Self::Eq => ordering.is_eq(),
            Self::Ne => ordering.is_ne(),
            Self::Gt => ordering.is_gt(),
            Self::Ge => ordering.is_ge(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} in {}", self.file, self.line, self.function)
    }
}

struct Frame {
    location: Option<SourceLocation>,
    caller: Option<FrameRef>,
}

/// Reference into the managed call stack
///
/// Frames without a source position (native or synthetic frames) are
/// skipped when an allocation site is reported.
#[derive(Clone)]
pub struct FrameRef(Arc<Frame>);

impl FrameRef {
    pub fn new(location: Option<SourceLocation>, caller: Option<FrameRef>) -> Self {
        Self(Arc::new(Frame { location, caller }))
    }

    pub fn located(file: &str, line: u32, function: &str, caller: Option<FrameRef>) -> Self {
        Self::new(
            Some(SourceLocation {
                file: file.to_string(),
                line,
                function: function.to_string(),
            }),
            caller,
        )
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.0.location.as_ref()
    }

    pub fn caller(&self) -> Option<&FrameRef> {
        self.0.caller.as_ref()
    }

    /// Walk towards the outermost caller until a frame has a source position
    pub fn first_located(&self) -> Option<&SourceLocation> {
        let mut cursor = Some(self);
        while let Some(frame) = cursor {
            if let Some(location) = frame.location() {
                return Some(location);
            }
            cursor = frame.caller();
        }
        None
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_located() {
            Some(location) => write!(f, "FrameRef({})", location),
            None => write!(f, "FrameRef(<unknown>)"),
        }
    }
}

/// What the bridge needs from the managed object system
pub trait ManagedRuntime: Send + Sync {
    fn get_attribute(&self, obj: &Object, name: &str) -> PyResult<Object>;

    fn set_attribute(&self, obj: &Object, name: &str, value: Object) -> PyResult<()>;

    fn call_method(&self, obj: &Object, name: &str, args: &[Object]) -> PyResult<Object> {
        let method = self.get_attribute(obj, name)?;
        self.call(&method, args, &[])
    }

    fn get_class(&self, obj: &Object) -> Object;

    fn is_subtype(&self, a: &Object, b: &Object) -> bool;

    fn call(&self, callable: &Object, args: &[Object], kwargs: &[(String, Object)])
        -> PyResult<Object>;

    fn rich_compare(&self, a: &Object, b: &Object, op: CompareOp) -> PyResult<Object>;

    /// Current managed frame, used to attribute native allocations
    fn current_frame(&self) -> Option<FrameRef> {
        None
    }

    /// Native memory pressure crossed the configured threshold
    fn request_collection(&self) {}
}

/// Attribute-dictionary runtime
#[derive(Default)]
pub struct SimpleRuntime {
    attributes: DashMap<(ObjectId, String), (WeakObject, Object)>,
    types: DashMap<String, Object>,
    frame: Mutex<Option<FrameRef>>,
    collections: AtomicUsize,
}

impl SimpleRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_frame(&self, frame: Option<FrameRef>) {
        *self.frame.lock() = frame;
    }

    pub fn collections_requested(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    fn type_named(&self, name: &str) -> Object {
        self.types
            .entry(name.to_string())
            .or_insert_with(|| Object::type_object(name))
            .clone()
    }

    fn no_attribute(obj: &Object, name: &str) -> PyErr {
        PyErr::new(
            ExceptionKind::AttributeError,
            format!("'{}' object has no attribute '{}'", obj.class_name(), name),
        )
    }
}

impl ManagedRuntime for SimpleRuntime {
    fn get_attribute(&self, obj: &Object, name: &str) -> PyResult<Object> {
        match self.attributes.get(&(obj.id(), name.to_string())) {
            Some(entry) if entry.0.refers_to(obj) => Ok(entry.1.clone()),
            _ => Err(Self::no_attribute(obj, name)),
        }
    }

    fn set_attribute(&self, obj: &Object, name: &str, value: Object) -> PyResult<()> {
        let key = (obj.id(), name.to_string());
        if value.is_no_value() {
            return match self.attributes.remove(&key) {
                Some(_) => Ok(()),
                None => Err(Self::no_attribute(obj, name)),
            };
        }
        self.attributes.insert(key, (obj.downgrade(), value));
        Ok(())
    }

    fn get_class(&self, obj: &Object) -> Object {
        match obj.payload() {
            Payload::Exception(data) => Object::exception_type(data.kind),
            _ => self.type_named(obj.class_name()),
        }
    }

    fn is_subtype(&self, a: &Object, b: &Object) -> bool {
        match (a.payload(), b.payload()) {
            (Payload::ExceptionType(x), Payload::ExceptionType(y)) => x.is_subclass_of(*y),
            (Payload::Type(_), Payload::Type(y)) if y == "object" => true,
            (Payload::Type(x), Payload::Type(y)) => x == y,
            _ => a.is(b),
        }
    }

    fn call(
        &self,
        callable: &Object,
        args: &[Object],
        kwargs: &[(String, Object)],
    ) -> PyResult<Object> {
        match callable.payload() {
            Payload::Managed(function) => (function.body)(args, kwargs),
            Payload::ExceptionType(kind) => {
                let message = args.first().map(crate::error::message_of).unwrap_or_default();
                Ok(Object::exception(*kind, message))
            }
            Payload::Type(name) => Ok(Object::instance(name.clone())),
            _ => Err(PyErr::type_error(format!(
                "'{}' object is not callable",
                callable.class_name()
            ))),
        }
    }

    fn rich_compare(&self, a: &Object, b: &Object, op: CompareOp) -> PyResult<Object> {
        let number = |o: &Object| o.as_float().or_else(|| o.as_int().map(|v| v as f64));
        let ordering = match (a.payload(), b.payload()) {
            (Payload::Int(x), Payload::Int(y)) => Some(x.cmp(y)),
            (Payload::Str(x), Payload::Str(y)) => Some(x.cmp(y)),
            _ => match (number(a), number(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        };
        match (ordering, op) {
            (Some(ordering), op) => Ok(Object::bool(op.holds(ordering))),
            (None, CompareOp::Eq) => Ok(Object::bool(a.is(b))),
            (None, CompareOp::Ne) => Ok(Object::bool(!a.is(b))),
            (None, op) => Err(PyErr::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                a.class_name(),
                b.class_name()
            ))),
        }
    }

    fn current_frame(&self) -> Option<FrameRef> {
        self.frame.lock().clone()
    }

    fn request_collection(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
    }
}
