//! Argument and buffer marshaling for native callers
//!
//! - [`parse_tuple_and_keywords`]: decode positional and keyword arguments
//!   against a format string
//! - [`memoryview_from_buffer`]: validate a native buffer description and
//!   expose it as a managed memory view

mod buffer;
mod format;


pub use buffer::{memoryview_from_buffer, BufferDescriptor, MemoryViewInfo, MAX_DIMENSIONS};
pub use format::{parse_tuple_and_keywords, split_format, FormatSpec, ParsedArg};
