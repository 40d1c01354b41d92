use crate::logging::{LogFormat, LogLevel};

/// Name used when the process name cannot be derived from `argv[0]`.
pub const DEFAULT_APP_NAME: &str = "marshal";

/// Directory searched for action manifests when none is configured.
pub const DEFAULT_ACTIONS_PATH: &str = ".";

/// Shared deadline for the whole action-discovery fan-out.
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 30;

/// Default log level for the binary.
#[must_use]
pub const fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
