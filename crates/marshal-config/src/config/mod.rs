//! Resolved per-process configuration.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoError;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::defaults::{
    DEFAULT_ACTIONS_PATH, DEFAULT_DISCOVERY_TIMEOUT_SECS, default_log_format, default_log_level,
};
use crate::env::{EnvKey, EnvPrefix, EnvSource, app_name_from_argv0};
use crate::flags::PersistentFlags;
use crate::logging::{LogFormat, LogLevel};
use crate::settings::Settings;

/// Errors raised while resolving configuration from flags and environment.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration files or `MARSHAL_*` variables could not be loaded.
    #[error("failed to load settings: {0}")]
    Load(#[source] Arc<OrthoError>),
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value '{value}' in {variable}: {message}")]
    InvalidEnv {
        /// Fully-qualified variable name.
        variable: String,
        /// Offending value.
        value: String,
        /// Human-readable description of the expected form.
        message: String,
    },
}

/// Configuration resolved once per process invocation.
///
/// Values are layered: explicit flag, then `<PREFIX>_<KEY>` environment
/// variable, then the loaded [`Settings`], then default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    app_name: String,
    prefix: EnvPrefix,
    actions_path: Utf8PathBuf,
    discovery_timeout: Duration,
    log_level: LogLevel,
    log_format: LogFormat,
    quiet: bool,
    parent_pid: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        let app_name = String::from(crate::defaults::DEFAULT_APP_NAME);
        Self {
            prefix: EnvPrefix::new(&app_name),
            app_name,
            actions_path: Utf8PathBuf::from(DEFAULT_ACTIONS_PATH),
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            log_level: default_log_level(),
            log_format: default_log_format(),
            quiet: false,
            parent_pid: None,
        }
    }
}

impl Config {
    /// Resolves configuration for the process named by `argv0`.
    ///
    /// `settings` is the layer loaded from configuration files and
    /// `MARSHAL_*` variables; see [`crate::SettingsLoader`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] when an environment variable holds
    /// a value that cannot be parsed.
    pub fn resolve(
        argv0: &OsStr,
        flags: &PersistentFlags,
        settings: &Settings,
        env: &impl EnvSource,
    ) -> Result<Self, ConfigError> {
        let app_name = app_name_from_argv0(argv0);
        let prefix = EnvPrefix::new(&app_name);
        let lookup = EnvLookup {
            prefix: &prefix,
            env,
        };

        let log_level = match flags
            .log_level
            .or_else(|| LogLevel::from_verbosity(flags.verbose))
        {
            Some(level) => level,
            None => lookup
                .parsed(EnvKey::LogLevel)?
                .or(settings.log_level)
                .unwrap_or_else(default_log_level),
        };
        let log_format = match flags.log_format {
            Some(format) => format,
            None => lookup
                .parsed(EnvKey::LogFormat)?
                .or(settings.log_format)
                .unwrap_or_else(default_log_format),
        };
        let quiet = flags.quiet
            || lookup
                .flag(EnvKey::Quiet)?
                .or(settings.quiet)
                .unwrap_or(false);
        let actions_path = lookup
            .raw(EnvKey::ActionsPath)
            .map(Utf8PathBuf::from)
            .or_else(|| settings.actions_path.clone())
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_ACTIONS_PATH));
        let discovery_timeout = lookup
            .parsed::<u64>(EnvKey::DiscoveryTimeout)?
            .or(settings.discovery_timeout)
            .map_or(
                Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
                Duration::from_secs,
            );
        let parent_pid = lookup
            .parsed::<u32>(EnvKey::ParentPid)?
            .or(settings.parent_pid);

        Ok(Self {
            app_name,
            prefix,
            actions_path,
            discovery_timeout,
            log_level,
            log_format,
            quiet,
            parent_pid,
        })
    }

    /// Overrides the actions search path.
    #[must_use]
    pub fn with_actions_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.actions_path = path.into();
        self
    }

    /// Overrides the discovery deadline.
    #[must_use]
    pub const fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Application name derived from `argv[0]`.
    #[must_use]
    pub fn app_name(&self) -> &str {
        self.app_name.as_str()
    }

    /// Environment-variable prefix.
    #[must_use]
    pub const fn prefix(&self) -> &EnvPrefix {
        &self.prefix
    }

    /// Directory searched for action manifests.
    #[must_use]
    pub fn actions_path(&self) -> &camino::Utf8Path {
        self.actions_path.as_path()
    }

    /// Deadline shared by every discovery plugin.
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Resolved log level; quiet mode forces [`LogLevel::Disabled`].
    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        if self.quiet {
            LogLevel::Disabled
        } else {
            self.log_level
        }
    }

    /// Resolved log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether quiet mode is active.
    #[must_use]
    pub const fn quiet(&self) -> bool {
        self.quiet
    }

    /// Parent orchestrator pid when running as a forked child.
    #[must_use]
    pub const fn parent_pid(&self) -> Option<u32> {
        self.parent_pid
    }

    /// Environment a forked child of this process should inherit.
    #[must_use]
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![
            (
                self.prefix.var(EnvKey::ParentPid),
                std::process::id().to_string(),
            ),
            (
                self.prefix.var(EnvKey::LogLevel),
                self.log_level().to_string(),
            ),
            (
                self.prefix.var(EnvKey::LogFormat),
                self.log_format.to_string(),
            ),
        ]
    }

    /// Renders the `persistent` flag group copied into every action input.
    #[must_use]
    pub fn persistent_group(&self) -> Map<String, Value> {
        let mut group = Map::new();
        group.insert(
            String::from("log_level"),
            Value::String(self.log_level().to_string()),
        );
        group.insert(
            String::from("log_format"),
            Value::String(self.log_format.to_string()),
        );
        group.insert(String::from("quiet"), Value::Bool(self.quiet));
        group
    }
}

struct EnvLookup<'a, E: EnvSource> {
    prefix: &'a EnvPrefix,
    env: &'a E,
}

impl<E: EnvSource> EnvLookup<'_, E> {
    fn raw(&self, key: EnvKey) -> Option<String> {
        self.env
            .var(&self.prefix.var(key))
            .filter(|value| !value.trim().is_empty())
    }

    fn parsed<T>(&self, key: EnvKey) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|error| ConfigError::InvalidEnv {
                variable: self.prefix.var(key),
                value: value.clone(),
                message: error.to_string(),
            })
    }

    fn flag(&self, key: EnvKey) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv {
                variable: self.prefix.var(key),
                value,
                message: String::from("expected a boolean"),
            }),
        }
    }
}
