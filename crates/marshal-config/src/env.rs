//! Environment-variable naming derived from the process name.
//!
//! Every variable the orchestrator reads is named `<PREFIX>_<KEY>`, where the
//! prefix is the upper-cased process name. Renaming the binary therefore
//! renames its whole environment surface, which keeps forks of the tool from
//! reading each other's settings.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::hash::BuildHasher;
use std::path::Path;

use crate::defaults::DEFAULT_APP_NAME;

/// Keys of the environment variables understood by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvKey {
    /// Process id of the parent orchestrator when running as a forked child.
    ParentPid,
    /// Directory searched for action manifests.
    ActionsPath,
    /// Log level (`disabled`, `error`, `warn`, `info`, `debug`, `trace`).
    LogLevel,
    /// Log format (`json` or `compact`).
    LogFormat,
    /// Quiet mode; any of `1`, `true`, `yes`, `on` enables it.
    Quiet,
    /// Deadline in seconds for action discovery.
    DiscoveryTimeout,
}

impl EnvKey {
    /// Returns the key suffix appended to the prefix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParentPid => "PARENT_PID",
            Self::ActionsPath => "ACTIONS_PATH",
            Self::LogLevel => "LOG_LEVEL",
            Self::LogFormat => "LOG_FORMAT",
            Self::Quiet => "QUIET",
            Self::DiscoveryTimeout => "DISCOVERY_TIMEOUT",
        }
    }
}

/// Upper-cased variable prefix derived from the process name.
///
/// # Example
///
/// ```
/// use marshal_config::{EnvKey, EnvPrefix};
///
/// let prefix = EnvPrefix::new("my-tool");
/// assert_eq!(prefix.var(EnvKey::LogLevel), "MY_TOOL_LOG_LEVEL");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvPrefix(String);

impl EnvPrefix {
    /// Builds a prefix from an application name.
    #[must_use]
    pub fn new(app_name: &str) -> Self {
        let normalised: String = app_name
            .trim()
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        if normalised.is_empty() {
            return Self(DEFAULT_APP_NAME.to_ascii_uppercase());
        }
        Self(normalised)
    }

    /// Derives the prefix from `argv[0]`, using the file stem of the path.
    #[must_use]
    pub fn from_process_name(argv0: &OsStr) -> Self {
        Self::new(&app_name_from_argv0(argv0))
    }

    /// Returns the full variable name for `key`.
    #[must_use]
    pub fn var(&self, key: EnvKey) -> String {
        format!("{}_{}", self.0, key.as_str())
    }

    /// Returns the bare prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for EnvPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the application name encoded in `argv[0]`.
#[must_use]
pub fn app_name_from_argv0(argv0: &OsStr) -> String {
    Path::new(argv0)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_owned())
}

/// Read access to environment variables.
///
/// Production code uses [`SystemEnv`]; tests pass a `HashMap` so the process
/// environment is never mutated.
pub trait EnvSource {
    /// Returns the value of `name`, if set and valid UTF-8.
    fn var(&self, name: &str) -> Option<String>;
}

/// [`EnvSource`] backed by the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<S: BuildHasher> EnvSource for HashMap<String, String, S> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<T: EnvSource + ?Sized> EnvSource for &T {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("marshal", "MARSHAL")]
    #[case("my-tool", "MY_TOOL")]
    #[case("tool.v2", "TOOL_V2")]
    #[case("   ", "MARSHAL")]
    fn prefix_is_normalised(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(EnvPrefix::new(name).as_str(), expected);
    }

    #[rstest]
    #[case(EnvKey::ParentPid, "MARSHAL_PARENT_PID")]
    #[case(EnvKey::ActionsPath, "MARSHAL_ACTIONS_PATH")]
    #[case(EnvKey::LogLevel, "MARSHAL_LOG_LEVEL")]
    #[case(EnvKey::LogFormat, "MARSHAL_LOG_FORMAT")]
    #[case(EnvKey::Quiet, "MARSHAL_QUIET")]
    fn variables_use_prefix_and_key(#[case] key: EnvKey, #[case] expected: &str) {
        assert_eq!(EnvPrefix::new("marshal").var(key), expected);
    }

    #[test]
    fn prefix_is_derived_from_argv0_stem() {
        let prefix = EnvPrefix::from_process_name(OsStr::new("/usr/local/bin/deploy-kit"));
        assert_eq!(prefix.as_str(), "DEPLOY_KIT");
    }

    #[test]
    fn hash_map_acts_as_env_source() {
        let mut env = HashMap::new();
        env.insert(String::from("MARSHAL_QUIET"), String::from("1"));
        assert_eq!(env.var("MARSHAL_QUIET").as_deref(), Some("1"));
        assert!(env.var("MARSHAL_LOG_LEVEL").is_none());
    }
}
