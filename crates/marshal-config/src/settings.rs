//! File and environment settings loaded through `ortho_config`.
//!
//! [`Settings`] is the layer beneath the process-name environment and the
//! persistent flags: configuration files discovered by `ortho_config`
//! merged with `MARSHAL_*` variables. Every field is optional so unset
//! values fall through to the built-in defaults.

use std::ffi::OsStr;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

use crate::logging::{LogFormat, LogLevel};

/// Settings read from configuration files and `MARSHAL_*` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "MARSHAL")]
pub struct Settings {
    /// Directory searched for action manifests.
    #[ortho_config(cli_short = 'a')]
    pub actions_path: Option<Utf8PathBuf>,
    /// Log level.
    #[ortho_config(cli_short = 'l')]
    pub log_level: Option<LogLevel>,
    /// Log format.
    #[ortho_config(cli_short = 'f')]
    pub log_format: Option<LogFormat>,
    /// Quiet mode.
    #[ortho_config(cli_short = 'q')]
    pub quiet: Option<bool>,
    /// Discovery deadline in seconds.
    #[ortho_config(cli_short = 'd')]
    pub discovery_timeout: Option<u64>,
    /// Parent orchestrator pid.
    #[ortho_config(cli_short = 'p')]
    pub parent_pid: Option<u32>,
}

/// Loads the [`Settings`] layer for a process.
pub trait SettingsLoader: Send + Sync {
    /// Loads settings for the process named by `argv0`.
    ///
    /// # Errors
    ///
    /// Returns the `ortho_config` error when a configuration file or a
    /// `MARSHAL_*` variable cannot be read or deserialised.
    fn load(&self, argv0: &OsStr) -> Result<Settings, Arc<OrthoError>>;
}

/// Loader that reads configuration files and the process environment.
///
/// Only `argv0` is handed to `ortho_config`; the persistent flags are parsed
/// by the CLI and layered on top by [`crate::Config::resolve`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSettingsLoader;

impl SettingsLoader for SystemSettingsLoader {
    fn load(&self, argv0: &OsStr) -> Result<Settings, Arc<OrthoError>> {
        Settings::load_from_iter([argv0.to_os_string()])
    }
}

/// A fixed settings layer, used where the process environment and
/// configuration files must not leak in.
impl SettingsLoader for Settings {
    fn load(&self, _argv0: &OsStr) -> Result<Settings, Arc<OrthoError>> {
        Ok(self.clone())
    }
}
