//! Error taxonomy for the bridge
//!
//! Two layers live here:
//! - [`BridgeError`]: failures of the bridge itself (handle discipline,
//!   configuration, allocation-domain bookkeeping)
//! - [`PyErr`]: a managed exception in flight, the only thing that ever
//!   reaches managed callers through [`PyResult`]

use crate::object::{ExceptionKind, Object, Payload};
use crate::handles::NativeHandle;
use std::fmt;
use thiserror::Error;

pub type PyResult<T> = Result<T, PyErr>;

pub const NULL_WITHOUT_ERROR: &str = "returned NULL without setting an error";
pub const RESULT_WITH_ERROR: &str = "returned a result with an error set";
pub const SENTINEL_WITHOUT_ERROR: &str = "returned -1 without setting an error";

/// Handle-discipline violations detected by the reference bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("null handle passed where an object was expected")]
    Null,
    #[error("handle {0} refers to a released wrapper")]
    Stale(NativeHandle),
    #[error("double release of handle {0}")]
    DoubleRelease(NativeHandle),
    #[error("handle {0} was never issued by this bridge")]
    Unknown(NativeHandle),
    #[error("wrapper chain starting at {handle} is deeper than {limit}")]
    TooDeep { handle: NativeHandle, limit: usize },
    #[error("refcount overflow on handle {0}")]
    Overflow(NativeHandle),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("allocation of {size} bytes at {ptr:#x} is too large to track")]
    AllocationTooLarge { ptr: usize, size: u64 },

    #[error("native callable for {name} does not have the {expected} signature")]
    SignatureMismatch { name: String, expected: &'static str },

    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}

impl BridgeError {
    /// Whether this is a bridge-internal invariant failure rather than an
    /// environmental error
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Handle(_))
    }
}

/// A managed exception in flight, with its optional traceback
#[derive(Clone)]
pub struct PyErr {
    value: Object,
    traceback: Option<Object>,
}

impl PyErr {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self::from_value(Object::exception(kind, message))
    }

    /// Wrap an existing exception instance
    ///
    /// Non-exception values are coerced into a `TypeError` the same way a
    /// `raise` of a non-exception would be.
    pub fn from_value(value: Object) -> Self {
        if value.as_exception().is_some() {
            Self { value, traceback: None }
        } else {
            Self::new(
                ExceptionKind::TypeError,
                "exceptions must derive from BaseException",
            )
        }
    }

    pub fn with_traceback(mut self, traceback: Option<Object>) -> Self {
        self.traceback = traceback;
        self
    }

    /// Build `kind(message)` chained onto `cause`
    pub fn chained(kind: ExceptionKind, message: impl Into<String>, cause: PyErr) -> Self {
        Self::from_value(Object::exception_with_cause(kind, message, Some(cause.value)))
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::SystemError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn overflow_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::OverflowError, message)
    }

    pub fn stop_iteration() -> Self {
        Self::new(ExceptionKind::StopIteration, "")
    }

    pub fn value(&self) -> &Object {
        &self.value
    }

    pub fn traceback(&self) -> Option<&Object> {
        self.traceback.as_ref()
    }

    pub fn kind(&self) -> ExceptionKind {
        self.value
            .as_exception()
            .map(|data| data.kind)
            .unwrap_or(ExceptionKind::SystemError)
    }

    /// The exception class object
    pub fn class(&self) -> Object {
        Object::exception_type(self.kind())
    }

    pub fn message(&self) -> &str {
        self.value
            .as_exception()
            .map(|data| data.message.as_str())
            .unwrap_or("")
    }

    pub fn cause(&self) -> Option<PyErr> {
        self.value
            .as_exception()
            .and_then(|data| data.cause.clone())
            .map(PyErr::from_value)
    }

    pub fn is_instance_of(&self, kind: ExceptionKind) -> bool {
        self.kind().is_subclass_of(kind)
    }
}

impl From<HandleError> for PyErr {
    fn from(err: HandleError) -> Self {
        PyErr::system_error(err.to_string())
    }
}

impl From<BridgeError> for PyErr {
    fn from(err: BridgeError) -> Self {
        PyErr::system_error(err.to_string())
    }
}

impl fmt::Debug for PyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyErr")
            .field("kind", &self.kind())
            .field("message", &self.message())
            .field("has_traceback", &self.traceback.is_some())
            .finish()
    }
}

impl fmt::Display for PyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message().is_empty() {
            write!(f, "{}", self.kind().name())
        } else {
            write!(f, "{}: {}", self.kind().name(), self.message())
        }
    }
}

impl std::error::Error for PyErr {}

/// Extract the payload message when a value is used as an exception argument
pub(crate) fn message_of(value: &Object) -> String {
    match value.payload() {
        Payload::Str(s) => s.clone(),
        Payload::None => String::new(),
        _ => value.repr(),
    }
}
