//! Reference bridge - managed objects as native handles
//!
//! Design: native code sees pointer-shaped words; the bridge keeps the
//! refcount on a *wrapper* slot, never on the managed object itself.
//! - Tagged words (high bit set) index the wrapper table
//! - Untagged non-null words are raw native pointers, resolved through the
//!   weak [`HandleCache`] to a managed proxy
//! - Wrapping the same object twice yields the same handle while the
//!   wrapper is live, so `id(x)` stays stable across crossings
//! - Released slots are tombstoned in checked mode so stale use and double
//!   release are caught instead of aliasing a recycled slot; the oldest
//!   tombstones are recycled once the quarantine is full

mod bridge;
mod cache;
mod primitive;


pub use bridge::{BorrowScope, BridgeStats, ReferenceBridge, WrapperTarget, DEFAULT_QUARANTINE};
pub use cache::HandleCache;
pub use primitive::{as_f64, as_i64, as_void_ptr};

use std::fmt;

/// Pointer-shaped value handed to native code
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub const NULL: Self = Self(0);

    /// Marks bridge-issued handles; native allocations never have it set
    pub const TAG: usize = 1 << (usize::BITS - 1);

    /// Keeps handles 8-byte aligned like real object pointers
    const SHIFT: u32 = 3;

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_tagged(self) -> bool {
        self.0 & Self::TAG != 0
    }

    #[inline]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(Self::TAG | (index << Self::SHIFT))
    }

    #[inline]
    pub(crate) const fn index(self) -> Option<usize> {
        if self.is_tagged() {
            Some((self.0 & !Self::TAG) >> Self::SHIFT)
        } else {
            None
        }
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NativeHandle(NULL)")
        } else {
            write!(f, "NativeHandle({:#x})", self.0)
        }
    }
}
