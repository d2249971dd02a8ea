//! Logging infrastructure - structured tracing across the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Stable `event = "..."` fields for every boundary crossing
//! - Console (text or JSON) and optional file output

use crate::handles::NativeHandle;
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

pub(crate) fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // TYPTHON_CEXT_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("TYPTHON_CEXT_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // TYPTHON_CEXT_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("TYPTHON_CEXT_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("TYPTHON_CEXT_LOG_JSON").is_ok();
        config.show_spans = std::env::var("TYPTHON_CEXT_LOG_SPANS").is_ok();

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("typthon_cext.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Idempotent. If the host already installed a global subscriber, that one
/// is kept.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "typthon_cext={}",
                config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (text_layer, json_layer) = if config.json_format {
            let layer = fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_span_events(span_events.clone())
                .with_target(true);
            (None, Some(layer))
        } else {
            let layer = fmt::layer()
                .with_writer(io::stdout)
                .with_span_events(span_events.clone())
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions));
            (Some(layer), None)
        };

        let file_layer = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(|path| {
                let path = Path::new(path);
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let file = path
                    .file_name()
                    .map(|name| name.to_os_string())
                    .unwrap_or_else(|| "typthon_cext.log".into());
                fmt::layer()
                    .with_writer(tracing_appender::rolling::never(dir, file))
                    .with_ansi(false)
                    .with_span_events(span_events)
            });

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(text_layer)
            .with(json_layer)
            .with(file_layer)
            .try_init();
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Reference bridge
// ============================================================================

#[inline]
pub fn log_handle_created(handle: NativeHandle, class_name: &str, refcount: u64) {
    use tracing::trace;
    trace!(
        event = "handle_created",
        handle = %handle,
        class = class_name,
        refcount = refcount,
        "Wrapper created"
    );
}

#[inline]
pub fn log_handle_released(handle: NativeHandle) {
    use tracing::trace;
    trace!(event = "handle_released", handle = %handle, "Wrapper evicted");
}

/// Log a bridge invariant failure (ownership or domain bookkeeping)
pub fn log_invariant_violation(error: &str, fatal: bool) {
    use tracing::{error, warn};
    if fatal {
        error!(event = "invariant_violation", error = error, "Bridge invariant violated");
    } else {
        warn!(
            event = "invariant_violation",
            error = error,
            "Bridge invariant violated, continuing"
        );
    }
}

// ============================================================================
// Dispatch and error transfer
// ============================================================================

pub fn log_target_created(name: &str, convention: &str, conversion: bool) {
    use tracing::debug;
    debug!(
        event = "call_target_created",
        function = name,
        convention = convention,
        conversion = conversion,
        "Call target built"
    );
}

#[inline]
pub fn log_native_call(name: &str, convention: &str, arg_count: usize) {
    use tracing::trace;
    trace!(
        event = "native_call",
        function = name,
        convention = convention,
        args = arg_count,
        "Calling native function"
    );
}

pub fn log_protocol_violation(name: &str, message: &str) {
    use tracing::warn;
    warn!(
        event = "protocol_violation",
        function = name,
        error = message,
        "Native function broke the error protocol"
    );
}

pub fn log_error_to_native(kind: &str, message: &str) {
    use tracing::debug;
    debug!(
        event = "error_to_native",
        kind = kind,
        message = message,
        "Managed error transferred to native error indicator"
    );
}

pub fn log_unraisable(kind: &str, message: &str, context: &str) {
    use tracing::warn;
    warn!(
        event = "unraisable",
        kind = kind,
        message = message,
        context = context,
        "Exception ignored"
    );
}

// ============================================================================
// Allocation tracking
// ============================================================================

#[inline]
pub fn log_track(domain: u64, ptr: usize, size: u64) {
    use tracing::trace;
    trace!(
        event = "tracemalloc_track",
        domain = domain,
        size_bytes = size,
        "Tracking memory (size: {}): {:#x}",
        size,
        ptr
    );
}

#[inline]
pub fn log_untrack(domain: u64, ptr: usize, size: u64) {
    use tracing::trace;
    trace!(
        event = "tracemalloc_untrack",
        domain = domain,
        size_bytes = size,
        "Untracking memory (size: {}): {:#x}",
        size,
        ptr
    );
}

#[inline]
pub fn log_free(ptr: usize, size: u64) {
    use tracing::trace;
    trace!(
        event = "tracemalloc_free",
        size_bytes = size,
        "Freeing pointer (size: {}): {:#x}",
        size,
        ptr
    );
}

#[inline]
pub fn log_new_reference(ptr: usize) {
    use tracing::trace;
    trace!(event = "tracemalloc_new_reference", "New reference to {:#x}", ptr);
}

pub fn log_allocation_site(ptr: usize, site: &str) {
    use tracing::debug;
    debug!(
        event = "allocation_site",
        "Free'd pointer {:#x} was allocated at: {}",
        ptr,
        site
    );
}

pub fn log_container(ptr: usize, class_name: &str, tracked: bool) {
    use tracing::trace;
    if tracked {
        trace!(
            event = "gc_track",
            class = class_name,
            "Tracking container object at {:#x}",
            ptr
        );
    } else {
        trace!(
            event = "gc_untrack",
            class = class_name,
            "Untracking container object at {:#x}",
            ptr
        );
    }
}

pub fn log_static_type(ptr: usize, class_name: &str) {
    use tracing::debug;
    debug!(
        event = "trace_type",
        "Initializing native type {} (ptr = {:#x})",
        class_name,
        ptr
    );
}

pub fn log_memory_pressure(pressure: i64, threshold: u64) {
    use tracing::info;
    info!(
        event = "memory_pressure",
        pressure_bytes = pressure,
        threshold_bytes = threshold,
        "Native memory pressure above threshold, requesting collection"
    );
}

// ============================================================================
// Lifecycle
// ============================================================================

pub fn log_bridge_init(trace_memory: bool, checked_handles: bool) {
    use tracing::info;
    info!(
        event = "bridge_init",
        trace_memory = trace_memory,
        checked_handles = checked_handles,
        "Extension bridge initializing"
    );
}

pub fn log_bridge_shutdown(live_handles: usize) {
    use tracing::info;
    info!(
        event = "bridge_shutdown",
        live_handles = live_handles,
        "Extension bridge shutting down"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}
