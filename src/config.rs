use crate::error::BridgeError;
use crate::handles::DEFAULT_QUARANTINE;
use crate::logging::{parse_level, LogConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Bit set exported to native code
pub mod native_options {
    pub const TRACE_MEM: u32 = 0x1;
}

/// What happens when native code breaks handle discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvariantPolicy {
    /// Abort with the invariant description
    Fatal,
    /// Log a warning and treat the operation as a no-op
    Degrade,
}

impl Default for InvariantPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            InvariantPolicy::Fatal
        } else {
            InvariantPolicy::Degrade
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_false")]
    pub trace_native_memory: bool,

    /// Record the managed frame for each tracked allocation
    #[serde(default = "default_false")]
    pub trace_native_memory_calls: bool,

    /// Tombstone released handles so stale use is detected
    #[serde(default = "default_checked")]
    pub checked_handles: bool,

    /// Tombstones kept before the oldest released slot is reused
    #[serde(default = "default_handle_quarantine")]
    pub handle_quarantine: usize,

    #[serde(default)]
    pub invariant_policy: InvariantPolicy,

    #[serde(default = "default_pressure_threshold")]
    pub memory_pressure_threshold: u64,

    #[serde(default = "default_max_wrapper_depth")]
    pub max_wrapper_depth: usize,

    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default)]
    pub file: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            trace_native_memory: false,
            trace_native_memory_calls: false,
            checked_handles: default_checked(),
            handle_quarantine: default_handle_quarantine(),
            invariant_policy: InvariantPolicy::default(),
            memory_pressure_threshold: default_pressure_threshold(),
            max_wrapper_depth: default_max_wrapper_depth(),
            log: LogSection::default(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: None,
        }
    }
}

fn default_false() -> bool { false }
fn default_checked() -> bool { cfg!(debug_assertions) }
fn default_handle_quarantine() -> usize { DEFAULT_QUARANTINE }
fn default_pressure_threshold() -> u64 { 256 * 1024 * 1024 }
fn default_max_wrapper_depth() -> usize { 8 }
fn default_level() -> String { "info".to_string() }

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, BridgeError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `TYPTHON_CEXT_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `TYPTHON_CEXT_*` overrides read through `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).map(|val| parse_flag(&val));

        if let Some(on) = flag("TYPTHON_CEXT_TRACE_MEM") {
            self.trace_native_memory = on;
        }
        if let Some(on) = flag("TYPTHON_CEXT_TRACE_CALLS") {
            self.trace_native_memory_calls = on;
            self.trace_native_memory |= on;
        }
        if let Some(on) = flag("TYPTHON_CEXT_CHECKED_HANDLES") {
            self.checked_handles = on;
        }
        if let Some(limit) = lookup("TYPTHON_CEXT_HANDLE_QUARANTINE").and_then(|v| v.parse().ok()) {
            self.handle_quarantine = limit;
        }

        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.trace_native_memory_calls && !self.trace_native_memory {
            return Err(BridgeError::ConfigInvalid(
                "trace_native_memory_calls requires trace_native_memory".to_string(),
            ));
        }
        if self.max_wrapper_depth == 0 {
            return Err(BridgeError::ConfigInvalid(
                "max_wrapper_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Options word read by native code at startup
    pub fn native_options(&self) -> u32 {
        let mut options = 0;
        if self.trace_native_memory {
            options |= native_options::TRACE_MEM;
        }
        options
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_level(&self.log.level),
            file_output: self.log.file.is_some(),
            log_path: self.log.file.clone(),
            json_format: self.log.json,
            show_spans: false,
        }
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::ConfigInvalid(e.to_string()))
    }
}
