//! Symbolic exception kinds
//!
//! The bridge never owns the managed exception hierarchy; it raises and
//! queries errors by kind and relies on this small subclass table for
//! `isinstance`-style matching.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExceptionKind {
    BaseException = 0,
    Exception = 1,
    SystemError = 2,
    TypeError = 3,
    ValueError = 4,
    LookupError = 5,
    KeyError = 6,
    IndexError = 7,
    OverflowError = 8,
    AttributeError = 9,
    StopIteration = 10,
    MemoryError = 11,
    RuntimeError = 12,
    UnicodeError = 13,
}

impl ExceptionKind {
    pub const ALL: [ExceptionKind; 14] = [
        Self::BaseException,
        Self::Exception,
        Self::SystemError,
        Self::TypeError,
        Self::ValueError,
        Self::LookupError,
        Self::KeyError,
        Self::IndexError,
        Self::OverflowError,
        Self::AttributeError,
        Self::StopIteration,
        Self::MemoryError,
        Self::RuntimeError,
        Self::UnicodeError,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::BaseException => "BaseException",
            Self::Exception => "Exception",
            Self::SystemError => "SystemError",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::LookupError => "LookupError",
            Self::KeyError => "KeyError",
            Self::IndexError => "IndexError",
            Self::OverflowError => "OverflowError",
            Self::AttributeError => "AttributeError",
            Self::StopIteration => "StopIteration",
            Self::MemoryError => "MemoryError",
            Self::RuntimeError => "RuntimeError",
            Self::UnicodeError => "UnicodeError",
        }
    }

    /// Direct base class; `None` only for `BaseException`
    pub const fn base(self) -> Option<ExceptionKind> {
        match self {
            Self::BaseException => None,
            Self::Exception => Some(Self::BaseException),
            Self::KeyError | Self::IndexError => Some(Self::LookupError),
            Self::UnicodeError => Some(Self::ValueError),
            _ => Some(Self::Exception),
        }
    }

    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        let mut cursor = Some(self);
        while let Some(kind) = cursor {
            if kind == other {
                return true;
            }
            cursor = kind.base();
        }
        false
    }

    /// Decode the numeric code used on the native surface
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub const fn code(self) -> u32 {
        self as u32
    }
}
