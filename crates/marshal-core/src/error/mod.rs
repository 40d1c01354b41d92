//! Domain errors raised by the orchestration layer.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint.

use std::sync::Arc;

use thiserror::Error;

use crate::bootstrap::Stage;
use crate::capability::CapabilityId;

/// Boxed error returned by plugin hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the service registry.
///
/// Every variant denotes a wiring defect rather than a user error; bootstrap
/// halts when one surfaces.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A service with the same capability identity is already registered.
    #[error("service '{capability}' is already registered")]
    Duplicate {
        /// Identity that collided.
        capability: CapabilityId,
    },

    /// No registered service satisfies the requested capability.
    #[error("no service provides capability '{capability}'")]
    Missing {
        /// Identity that was requested.
        capability: CapabilityId,
    },

    /// The identity matched, but the stored service cannot be viewed as the
    /// requested type.
    #[error("service '{capability}' is registered as '{registered}' and cannot satisfy the requested type")]
    TargetMismatch {
        /// Identity that was requested.
        capability: CapabilityId,
        /// Concrete type name of the registered service.
        registered: &'static str,
    },
}

/// Errors raised while registering plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with the same capability identity is already registered.
    #[error("plugin '{plugin}' is already registered")]
    Duplicate {
        /// Identity that collided.
        plugin: CapabilityId,
    },
}

/// Errors arising from action definitions, input handling and execution.
#[derive(Debug, Error)]
pub enum ActionError {
    /// An action with the same ID is already registered.
    #[error("action '{id}' is already registered")]
    Duplicate {
        /// Offending action ID.
        id: String,
    },

    /// The requested action is not registered.
    #[error("action '{id}' not found")]
    NotFound {
        /// Requested ID or alias.
        id: String,
    },

    /// The action definition is malformed.
    #[error("action '{id}' has an invalid definition: {message}")]
    Definition {
        /// Action ID.
        id: String,
        /// Description of the defect.
        message: String,
    },

    /// A declared default does not match the parameter type.
    #[error("parameter '{parameter}' declares a default that is not a valid {expected}: {value}")]
    InvalidDefault {
        /// Parameter name.
        parameter: String,
        /// Declared type.
        expected: &'static str,
        /// Offending default, rendered as JSON.
        value: String,
    },

    /// A manifest could not be read or parsed.
    #[error("failed to load action manifest '{path}': {message}")]
    Manifest {
        /// Manifest location.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// User input did not match the shape of the action.
    #[error("invalid input for action '{id}': {message}")]
    Input {
        /// Action ID.
        id: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Input failed schema or runtime validation.
    #[error("input validation failed for action '{id}': {}", .messages.join("; "))]
    Validation {
        /// Action ID.
        id: String,
        /// Every violation found.
        messages: Vec<String>,
    },

    /// A value processor rejected a value.
    #[error("processor '{processor}' failed for parameter '{parameter}': {message}")]
    Processor {
        /// Processor name.
        processor: String,
        /// Parameter being processed.
        parameter: String,
        /// Description of the failure.
        message: String,
    },

    /// A decorator failed while adjusting the action.
    #[error("decorator failed for action '{id}': {message}")]
    Decorator {
        /// Action ID.
        id: String,
        /// Description of the failure.
        message: String,
    },

    /// The action has no validated input bound to it.
    #[error("action '{id}' has no validated input")]
    Unbound {
        /// Action ID.
        id: String,
    },

    /// The runtime failed while executing the action.
    #[error("action '{id}' failed: {message}")]
    Execution {
        /// Action ID.
        id: String,
        /// Description of the failure.
        message: String,
        /// Exit status reported by the runtime, when there is one.
        exit_code: Option<i32>,
    },

    /// Execution was cancelled before it completed.
    #[error("action '{id}' was cancelled")]
    Cancelled {
        /// Action ID.
        id: String,
    },

    /// An I/O error occurred while writing action output.
    #[error("I/O error in action '{id}': {source}")]
    Io {
        /// Action ID.
        id: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl ActionError {
    /// Returns the exit status the process should report for this error.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// Errors raised by the action discovery fan-out.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The shared deadline elapsed before every plugin responded.
    #[error("action discovery timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Discovery was cancelled by the caller.
    #[error("action discovery was cancelled")]
    Cancelled,

    /// A discovery plugin returned an error.
    #[error("plugin '{plugin}' failed to discover actions: {source}")]
    Plugin {
        /// Plugin identity.
        plugin: CapabilityId,
        /// Underlying failure.
        #[source]
        source: HookError,
    },

    /// A discovery worker could not be spawned or exited without reporting.
    #[error("discovery worker for plugin '{plugin}' failed: {message}")]
    Worker {
        /// Plugin identity.
        plugin: CapabilityId,
        /// Description of the failure.
        message: String,
    },
}

/// Errors that halt the bootstrap sequence.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Service wiring failed.
    #[error("service wiring failed: {0}")]
    Services(#[from] ServiceError),

    /// An app-init hook failed.
    #[error("plugin '{plugin}' failed during {phase}: {source}")]
    Hook {
        /// Plugin identity.
        plugin: CapabilityId,
        /// Bootstrap phase in which the hook ran.
        phase: &'static str,
        /// Underlying failure.
        #[source]
        source: HookError,
    },

    /// Action discovery failed as a whole.
    #[error("action discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A transition was requested out of order.
    #[error("bootstrap cannot move from {from:?} to {to:?}")]
    Stage {
        /// Current stage.
        from: Stage,
        /// Requested stage.
        to: Stage,
    },
}
