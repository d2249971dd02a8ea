//! Result-check policies applied to every native return

use super::ExceptionState;
use crate::error::{PyErr, PyResult, NULL_WITHOUT_ERROR, RESULT_WITH_ERROR, SENTINEL_WITHOUT_ERROR};
use crate::handles::NativeHandle;
use crate::logging::log_protocol_violation;
use crate::object::ExceptionKind;

/// Raw value a native function returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeResult {
    Pointer(NativeHandle),
    Int(i64),
}

/// Native result after the error protocol has been honored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckedResult {
    /// Non-null new reference
    Handle(NativeHandle),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCheck {
    /// NULL or -1 signals an error that must be set
    Default,
    /// NULL without an error means exhaustion
    IterNext,
    /// -1 signals an error; anything else is a truth value
    Inquiry,
}

impl ResultCheck {
    pub fn apply(self, state: &ExceptionState, name: &str, result: NativeResult) -> PyResult<CheckedResult> {
        match self {
            Self::Default => check_default(state, name, result),
            Self::IterNext => check_iternext(state, name, result),
            Self::Inquiry => check_inquiry(state, name, result),
        }
    }
}

fn protocol_violation(name: &str, what: &str) -> PyErr {
    let message = format!("{} {}", name, what);
    log_protocol_violation(name, &message);
    PyErr::system_error(message)
}

fn check_default(state: &ExceptionState, name: &str, result: NativeResult) -> PyResult<CheckedResult> {
    match result {
        NativeResult::Pointer(handle) if handle.is_null() => match state.take() {
            Some(err) => Err(err),
            None => Err(protocol_violation(name, NULL_WITHOUT_ERROR)),
        },
        NativeResult::Pointer(handle) => match state.take() {
            Some(err) => {
                let message = format!("{} {}", name, RESULT_WITH_ERROR);
                log_protocol_violation(name, &message);
                Err(PyErr::chained(ExceptionKind::SystemError, message, err))
            }
            None => Ok(CheckedResult::Handle(handle)),
        },
        NativeResult::Int(-1) => match state.take() {
            Some(err) => Err(err),
            None => Err(protocol_violation(name, SENTINEL_WITHOUT_ERROR)),
        },
        // A pending error alongside a non-sentinel scalar is left for the
        // caller's next check
        NativeResult::Int(value) => Ok(CheckedResult::Int(value)),
    }
}

fn check_iternext(state: &ExceptionState, _name: &str, result: NativeResult) -> PyResult<CheckedResult> {
    match result {
        NativeResult::Pointer(handle) if handle.is_null() => match state.take() {
            Some(err) => Err(err),
            None => Err(PyErr::stop_iteration()),
        },
        NativeResult::Pointer(handle) => Ok(CheckedResult::Handle(handle)),
        NativeResult::Int(value) => Ok(CheckedResult::Int(value)),
    }
}

fn check_inquiry(state: &ExceptionState, name: &str, result: NativeResult) -> PyResult<CheckedResult> {
    match result {
        NativeResult::Int(-1) => match state.take() {
            Some(err) => Err(err),
            None => Err(protocol_violation(name, SENTINEL_WITHOUT_ERROR)),
        },
        NativeResult::Int(value) => Ok(CheckedResult::Bool(value != 0)),
        NativeResult::Pointer(_) => Err(PyErr::system_error(format!(
            "Inquiry function '{}' did not return an integer.",
            name
        ))),
    }
}
