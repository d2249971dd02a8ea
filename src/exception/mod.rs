//! Exception transfer protocol
//!
//! Each execution context owns one [`ExceptionState`] with two slots:
//! - `current`: the in-flight error indicator native code polls
//! - `caught`: the error visible to an active handler
//!
//! Managed errors never unwind through native frames. They are parked in
//! `current` and a sentinel is returned instead; on the way back, the
//! [`ResultCheck`] policies turn sentinels plus `current` into `PyResult`.

mod check;


pub use check::{CheckedResult, NativeResult, ResultCheck};

use crate::error::{message_of, PyErr};
use crate::logging::{log_error_to_native, log_protocol_violation, log_unraisable};
use crate::object::Object;
use parking_lot::Mutex;

/// `(type, value, traceback)` triple as seen by native code
#[derive(Debug, Clone)]
pub struct ExcInfo {
    pub class: Object,
    pub value: Object,
    pub traceback: Option<Object>,
}

impl From<&PyErr> for ExcInfo {
    fn from(err: &PyErr) -> Self {
        Self {
            class: err.class(),
            value: err.value().clone(),
            traceback: err.traceback().cloned(),
        }
    }
}

/// Observable protocol state at a call boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Clean,
    Pending,
    Handling,
}

#[derive(Default)]
pub struct ExceptionState {
    current: Mutex<Option<PyErr>>,
    caught: Mutex<Option<PyErr>>,
}

impl ExceptionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn phase(&self) -> Phase {
        if self.caught.lock().is_some() {
            Phase::Handling
        } else if self.is_pending() {
            Phase::Pending
        } else {
            Phase::Clean
        }
    }

    /// Park a managed error for native code to observe
    pub fn set_error(&self, err: PyErr) {
        log_error_to_native(err.kind().name(), err.message());
        *self.current.lock() = Some(err);
    }

    /// Read-and-clear `current`
    pub fn take(&self) -> Option<PyErr> {
        self.current.lock().take()
    }

    pub fn clear(&self) {
        self.current.lock().take();
    }

    /// Class of the pending error, if any
    pub fn occurred(&self) -> Option<Object> {
        self.current.lock().as_ref().map(PyErr::class)
    }

    /// Set `current` from a native `(type, value, traceback)` triple
    ///
    /// All-absent clears the slot. An exception value is kept as is. Any
    /// other value is normalized eagerly into a new instance of `class`
    /// carrying it as the message, so `fetch` returns that instance rather
    /// than the raw value. Input with neither an exception class nor an
    /// exception value parks a `SystemError` instead of clearing the slot.
    pub fn restore(&self, class: Option<Object>, value: Option<Object>, traceback: Option<Object>) {
        let absent = |obj: &Option<Object>| obj.as_ref().map_or(true, |o| o.is_none() || o.is_no_value());
        if absent(&class) && absent(&value) && absent(&traceback) {
            self.clear();
            return;
        }
        let err = match normalize(class.clone(), value.clone()) {
            Some(err) => err.with_traceback(traceback),
            None => {
                let described = |obj: Option<Object>| obj.map_or_else(|| "NULL".to_string(), |o| o.repr());
                let err = PyErr::system_error(format!(
                    "restore called without an exception (type: {}, value: {})",
                    described(class),
                    described(value)
                ));
                log_protocol_violation("restore", err.message());
                err
            }
        };
        *self.current.lock() = Some(err);
    }

    /// Read-and-clear `current` as a triple; `None` when clean
    pub fn fetch(&self) -> Option<ExcInfo> {
        self.take().map(|err| ExcInfo::from(&err))
    }

    /// Set or clear `caught`; partial input it cannot interpret is ignored
    pub fn set_exc_info(&self, class: Option<Object>, value: Option<Object>, traceback: Option<Object>) {
        if class.is_none() && value.is_none() && traceback.is_none() {
            self.caught.lock().take();
            return;
        }
        if let Some(err) = normalize(class, value) {
            *self.caught.lock() = Some(err.with_traceback(traceback));
        }
    }

    pub fn exc_info(&self) -> Option<ExcInfo> {
        self.caught.lock().as_ref().map(ExcInfo::from)
    }

    /// Enter a handler for `err`; the previous `caught` comes back on drop
    pub fn enter_handler(&self, err: PyErr) -> HandlerGuard<'_> {
        let previous = self.caught.lock().replace(err);
        HandlerGuard {
            state: self,
            previous,
        }
    }

    /// Report an error nobody can receive, then clear `caught`
    pub fn write_unraisable(&self, err: &PyErr, context: Option<&Object>) {
        let context = context.map(Object::repr).unwrap_or_default();
        log_unraisable(err.kind().name(), err.message(), &context);
        self.caught.lock().take();
    }

    /// Last-resort display of an error
    pub fn display(&self, err: &PyErr) {
        tracing::error!(event = "error_display", "{}", err);
        let mut cause = err.cause();
        while let Some(inner) = cause {
            tracing::error!(event = "error_display", "caused by {}", inner);
            cause = inner.cause();
        }
    }
}

fn normalize(class: Option<Object>, value: Option<Object>) -> Option<PyErr> {
    let value = value.filter(|v| !v.is_none() && !v.is_no_value());
    match (class.as_ref().and_then(Object::as_exception_type), value) {
        (_, Some(value)) if value.as_exception().is_some() => Some(PyErr::from_value(value)),
        (Some(kind), Some(value)) => Some(PyErr::new(kind, message_of(&value))),
        (Some(kind), None) => Some(PyErr::new(kind, "")),
        (None, _) => None,
    }
}

/// Keeps an error in `caught` while a handler runs
#[must_use]
pub struct HandlerGuard<'a> {
    state: &'a ExceptionState,
    previous: Option<PyErr>,
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        *self.state.caught.lock() = self.previous.take();
    }
}
