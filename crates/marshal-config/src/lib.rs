//! Shared configuration for the marshal orchestrator.
//!
//! The crate owns everything that is resolved once per process invocation
//! before any plugin runs: the environment-variable naming scheme derived
//! from the process name, the persistent command-line flags visible to every
//! action, and the resolved [`Config`] that ties both together.
//!
//! Values are layered with a fixed precedence: an explicit command-line flag
//! wins over the matching `<PREFIX>_<KEY>` environment variable, which wins
//! over the [`Settings`] loaded by `ortho_config` from configuration files and
//! `MARSHAL_*` variables, which in turn wins over the built-in default.

mod config;
mod defaults;
mod env;
mod flags;
mod logging;
mod settings;

pub use config::{Config, ConfigError};
pub use defaults::{
    DEFAULT_ACTIONS_PATH, DEFAULT_APP_NAME, DEFAULT_DISCOVERY_TIMEOUT_SECS, default_log_format,
    default_log_level,
};
pub use env::{EnvKey, EnvPrefix, EnvSource, SystemEnv};
pub use flags::{GLOBAL_HEADING, PersistentFlags, RESERVED_FLAGS};
pub use logging::{LogFormat, LogFormatParseError, LogLevel};
pub use settings::{Settings, SettingsLoader, SystemSettingsLoader};
