//! Native buffer descriptors to managed memory views

use crate::error::{PyErr, PyResult};
use crate::object::{ExceptionKind, Object, Payload};

pub const MAX_DIMENSIONS: usize = 64;

/// Buffer as exported by native code
///
/// `buf` is the raw address; the view never dereferences it.
#[derive(Debug, Clone, Default)]
pub struct BufferDescriptor {
    pub owner: Option<Object>,
    pub buf: usize,
    pub len: isize,
    pub readonly: bool,
    pub itemsize: isize,
    pub format: Option<String>,
    pub ndim: usize,
    pub shape: Option<Vec<isize>>,
    pub strides: Option<Vec<isize>>,
    pub suboffsets: Option<Vec<isize>>,
}

/// Validated memory view geometry
#[derive(Debug, Clone)]
pub struct MemoryViewInfo {
    pub owner: Option<Object>,
    pub buf: usize,
    pub len: isize,
    pub readonly: bool,
    pub itemsize: isize,
    pub format: String,
    pub ndim: usize,
    pub shape: Vec<isize>,
    pub strides: Vec<isize>,
    pub suboffsets: Option<Vec<isize>>,
    pub c_contiguous: bool,
    pub f_contiguous: bool,
}

impl MemoryViewInfo {
    pub fn item_count(&self) -> isize {
        self.shape.iter().product()
    }
}

fn value_error(message: String) -> PyErr {
    PyErr::new(ExceptionKind::ValueError, message)
}

fn size_overflow() -> PyErr {
    value_error("memoryview: buffer size overflows".to_string())
}

/// `product(shape) * itemsize`, rejecting shapes that overflow on the way
fn byte_size(shape: &[isize], itemsize: isize) -> PyResult<isize> {
    shape
        .iter()
        .try_fold(itemsize, |acc, &extent| acc.checked_mul(extent))
        .ok_or_else(size_overflow)
}

fn contiguous_strides<'a>(
    extents: impl Iterator<Item = &'a isize>,
    ndim: usize,
    itemsize: isize,
) -> PyResult<Vec<isize>> {
    let mut strides = Vec::with_capacity(ndim);
    let mut step = itemsize;
    for &extent in extents {
        strides.push(step);
        step = step.checked_mul(extent).ok_or_else(size_overflow)?;
    }
    Ok(strides)
}

fn c_strides(shape: &[isize], itemsize: isize) -> PyResult<Vec<isize>> {
    let mut strides = contiguous_strides(shape.iter().rev(), shape.len(), itemsize)?;
    strides.reverse();
    Ok(strides)
}

fn f_strides(shape: &[isize], itemsize: isize) -> PyResult<Vec<isize>> {
    contiguous_strides(shape.iter(), shape.len(), itemsize)
}

fn check_dims(what: &str, values: &[isize], ndim: usize) -> PyResult<()> {
    if values.len() != ndim {
        return Err(value_error(format!(
            "memoryview: {} has {} entries, expected {}",
            what,
            values.len(),
            ndim
        )));
    }
    Ok(())
}

/// Build a managed memory view from a native buffer descriptor
///
/// A missing shape is `[len / itemsize]` for one dimension and an error
/// for more; missing strides are C-contiguous.
pub fn memoryview_from_buffer(desc: BufferDescriptor) -> PyResult<Object> {
    if desc.itemsize <= 0 {
        return Err(value_error(format!(
            "memoryview: itemsize must be positive, got {}",
            desc.itemsize
        )));
    }
    if desc.len < 0 {
        return Err(value_error(format!(
            "memoryview: negative buffer length {}",
            desc.len
        )));
    }
    if desc.ndim > MAX_DIMENSIONS {
        return Err(value_error(format!(
            "memoryview: number of dimensions must not exceed {}",
            MAX_DIMENSIONS
        )));
    }

    let shape = match desc.shape {
        Some(shape) => {
            check_dims("shape", &shape, desc.ndim)?;
            if shape.iter().any(|&extent| extent < 0) {
                return Err(value_error("memoryview: negative extent in shape".into()));
            }
            shape
        }
        None => match desc.ndim {
            0 => Vec::new(),
            1 => vec![desc.len / desc.itemsize],
            n => {
                return Err(PyErr::system_error(format!(
                    "memoryview: shape is required for {}-dimensional buffers",
                    n
                )))
            }
        },
    };

    let expected_len = byte_size(&shape, desc.itemsize)?;
    if expected_len != desc.len {
        return Err(value_error(format!(
            "memoryview: buffer length {} does not match shape ({} bytes)",
            desc.len, expected_len
        )));
    }

    let strides = match desc.strides {
        Some(strides) => {
            check_dims("strides", &strides, desc.ndim)?;
            strides
        }
        None => c_strides(&shape, desc.itemsize)?,
    };

    if let Some(suboffsets) = &desc.suboffsets {
        check_dims("suboffsets", suboffsets, desc.ndim)?;
    }

    let direct = desc.suboffsets.is_none();
    let empty = desc.len == 0;
    let c_contiguous = direct && (empty || strides == c_strides(&shape, desc.itemsize)?);
    let f_contiguous = direct && (empty || strides == f_strides(&shape, desc.itemsize)?);

    Ok(Object::from_payload(Payload::MemoryView(MemoryViewInfo {
        owner: desc.owner,
        buf: desc.buf,
        len: desc.len,
        readonly: desc.readonly,
        itemsize: desc.itemsize,
        format: desc.format.unwrap_or_else(|| "B".to_string()),
        ndim: desc.ndim,
        shape,
        strides,
        suboffsets: desc.suboffsets,
        c_contiguous,
        f_contiguous,
    })))
}
