//! Error types and phase classification for the CLI runtime.
//!
//! Only the CLI boundary decides whether usage text accompanies an error,
//! and it decides purely from [`AppError::phase`].

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use marshal_config::ConfigError;
use marshal_core::{ActionError, BootstrapError, HookError, PluginError, ServiceError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Stage of an invocation in which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Wiring, configuration and bootstrap, before the command line exists.
    Setup,
    /// Building or resolving the command line and validating input.
    Input,
    /// Running the selected command.
    Execution,
}

/// Failures surfaced by [`crate::run`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Registering a plugin failed.
    #[error("failed to register plugins: {0}")]
    Plugins(#[from] PluginError),
    /// Configuration could not be resolved from flags and environment.
    #[error("failed to resolve configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    /// Registering a process-wide service failed.
    #[error("failed to register services: {0}")]
    Services(#[from] ServiceError),
    /// Bootstrap stopped before the command line could be built.
    #[error("startup failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    /// An action could not be turned into a command.
    #[error("failed to build command for action '{id}': {source}")]
    Synthesis {
        /// Action ID.
        id: String,
        /// Underlying definition error.
        #[source]
        source: ActionError,
    },
    /// An action flag reuses a name owned by another flag.
    #[error("action '{id}' declares flag '--{flag}' which is already taken")]
    FlagCollision {
        /// Action ID.
        id: String,
        /// Offending long flag name.
        flag: String,
    },
    /// An action ID is already used by another command.
    #[error("command name '{name}' is already taken")]
    CommandCollision {
        /// Contested command name.
        name: String,
    },
    /// Parsing the command line failed.
    #[error("{0}")]
    Usage(clap::Error),
    /// A parsed value could not be read back from the matches.
    #[error("failed to read flag '{flag}': {message}")]
    Matches {
        /// Argument identifier.
        flag: String,
        /// Description of the mismatch.
        message: String,
    },
    /// The selected subcommand names neither an action nor a plugin command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// Input resolution or validation rejected the invocation.
    #[error(transparent)]
    Input(ActionError),
    /// The action failed while running.
    #[error(transparent)]
    Execution(ActionError),
    /// A plugin command failed.
    #[error("command '{command}' failed: {source}")]
    Command {
        /// Command name.
        command: String,
        /// Underlying failure.
        #[source]
        source: HookError,
    },
    /// Writing to the standard streams failed.
    #[error("failed to write output: {0}")]
    Output(#[source] Arc<io::Error>),
}

impl From<io::Error> for AppError {
    fn from(error: io::Error) -> Self {
        Self::Output(Arc::new(error))
    }
}

impl AppError {
    /// Phase in which the error was raised.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Plugins(_)
            | Self::Configuration(_)
            | Self::Telemetry(_)
            | Self::Services(_)
            | Self::Bootstrap(_) => Phase::Setup,
            Self::Synthesis { .. }
            | Self::FlagCollision { .. }
            | Self::CommandCollision { .. }
            | Self::Usage(_)
            | Self::Matches { .. }
            | Self::UnknownCommand(_)
            | Self::Input(_) => Phase::Input,
            Self::Execution(_) | Self::Command { .. } | Self::Output(_) => Phase::Execution,
        }
    }

    /// Process exit status for the error.
    ///
    /// Usage errors keep clap's status; an action failure that carries an
    /// exit code propagates it; everything else is a plain failure.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        let code = match self {
            Self::Usage(error) => Some(error.exit_code()),
            Self::Execution(error) => error.exit_code(),
            _ => None,
        };
        code.and_then(|value| u8::try_from(value).ok())
            .filter(|value| *value != 0)
            .map_or(ExitCode::FAILURE, ExitCode::from)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn execution(exit_code: Option<i32>) -> AppError {
        AppError::Execution(ActionError::Execution {
            id: String::from("build"),
            message: String::from("boom"),
            exit_code,
        })
    }

    #[rstest]
    #[case(AppError::UnknownCommand(String::from("nope")), Phase::Input)]
    #[case(
        AppError::Input(ActionError::Input {
            id: String::from("build"),
            message: String::from("missing"),
        }),
        Phase::Input
    )]
    #[case(execution(None), Phase::Execution)]
    #[case(
        AppError::Bootstrap(BootstrapError::Discovery(
            marshal_core::DiscoveryError::Cancelled
        )),
        Phase::Setup
    )]
    fn errors_report_their_phase(#[case] error: AppError, #[case] expected: Phase) {
        assert_eq!(error.phase(), expected);
    }

    #[test]
    fn action_exit_codes_propagate() {
        assert_eq!(execution(Some(7)).exit_code(), ExitCode::from(7));
    }

    #[rstest]
    #[case(None)]
    #[case(Some(0))]
    #[case(Some(-1))]
    #[case(Some(300))]
    fn unrepresentable_exit_codes_become_failure(#[case] code: Option<i32>) {
        assert_eq!(execution(code).exit_code(), ExitCode::FAILURE);
    }
}
