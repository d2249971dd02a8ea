//! Scalar crossings: native integers and doubles in, C scalars out

use super::{NativeHandle, ReferenceBridge};
use crate::error::{HandleError, PyErr, PyResult};
use crate::object::{Object, Payload};

impl ReferenceBridge {
    /// New reference to an integer built from a native 64-bit value
    ///
    /// With `signed == false` the bits are read as unsigned, so negative
    /// inputs become values above `i64::MAX` and get a boxed wrapper.
    pub fn long_from_i64(&self, value: i64, signed: bool) -> Result<NativeHandle, HandleError> {
        if signed || value >= 0 {
            self.int_handle(value)
        } else {
            self.to_new_reference(&Object::int(value as u64))
        }
    }

    pub fn float_from_f64(&self, value: f64) -> Result<NativeHandle, HandleError> {
        self.float_handle(value)
    }
}

/// C `long` view of an integer object
pub fn as_i64(obj: &Object) -> PyResult<i64> {
    match obj.payload() {
        Payload::Int(_) | Payload::Bool(_) => {
            let value = obj.as_int().unwrap_or_default();
            i64::try_from(value)
                .map_err(|_| PyErr::overflow_error("Python int too large to convert to C long"))
        }
        Payload::Float(_) => Err(PyErr::type_error("integer argument expected, got float")),
        _ => Err(PyErr::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            obj.class_name()
        ))),
    }
}

/// C `double` view of a number
pub fn as_f64(obj: &Object) -> PyResult<f64> {
    match obj.payload() {
        Payload::Float(v) => Ok(*v),
        Payload::Int(v) => Ok(*v as f64),
        Payload::Bool(b) => Ok(*b as u8 as f64),
        _ => Err(PyErr::type_error(format!(
            "must be real number, not {}",
            obj.class_name()
        ))),
    }
}

/// Pointer view of an integer; signed values are reinterpreted
pub fn as_void_ptr(obj: &Object) -> PyResult<usize> {
    match obj.payload() {
        Payload::NativeProxy(ptr) => Ok(*ptr),
        Payload::Int(v) => {
            if let Ok(signed) = i64::try_from(*v) {
                Ok(signed as usize)
            } else if let Ok(unsigned) = u64::try_from(*v) {
                Ok(unsigned as usize)
            } else {
                Err(PyErr::overflow_error(
                    "Python int too large to convert to C pointer",
                ))
            }
        }
        _ => Err(PyErr::type_error(format!(
            "an integer is required (got type {})",
            obj.class_name()
        ))),
    }
}
