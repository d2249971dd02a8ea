//! Typthon C-extension bridge
//!
//! Lets natively compiled extension modules run against the managed
//! runtime. Native code never sees managed objects directly:
//!
//! - [`handles`]: reference bridge between objects and native handles
//! - [`dispatch`]: calling conventions, call targets and upcalls
//! - [`exception`]: error indicator slots and result checks
//! - [`tracemalloc`]: native allocation and container tracking
//! - [`args`]: argument parsing and buffer views
//! - [`capi`]: the `extern "C"` surface extension modules link against
//!
//! All per-execution state lives in a [`BridgeContext`].

pub mod args;
pub mod capi;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod handles;
pub mod logging;
pub mod object;
pub mod tracemalloc;

pub use config::{BridgeConfig, InvariantPolicy};
pub use context::BridgeContext;
pub use dispatch::{create_function, Callable, CallingConvention, NativeFunction};
pub use error::{BridgeError, HandleError, PyErr, PyResult};
pub use exception::ExceptionState;
pub use handles::{NativeHandle, ReferenceBridge};
pub use object::{ExceptionKind, ManagedRuntime, Object, SimpleRuntime};
pub use tracemalloc::AllocationTracker;

/// Bridge initialization: logging from `TYPTHON_CEXT_LOG_*`
#[no_mangle]
pub extern "C" fn typthon_cext_init() {
    logging::init();
}

/// Bridge cleanup
#[no_mangle]
pub extern "C" fn typthon_cext_cleanup() {
    tracing::debug!(event = "bridge_cleanup", "Extension bridge cleanup");
}
