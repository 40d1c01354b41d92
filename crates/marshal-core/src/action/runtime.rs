//! Execution strategies bound to actions.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::action::definition::Parameter;
use crate::action::input::{Input, ValidatedInput};
use crate::cancel::CancellationToken;
use crate::error::ActionError;
use crate::service::ServiceRegistry;

/// Extra flags a runtime adds to every action bound to it.
///
/// The resolved values land in the input flag group named [`Self::group`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeFlags {
    group: String,
    params: Vec<Parameter>,
}

impl RuntimeFlags {
    /// Creates a flag set stored under `group`.
    #[must_use]
    pub fn new(group: impl Into<String>, params: Vec<Parameter>) -> Self {
        Self {
            group: group.into(),
            params,
        }
    }

    /// Flag group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Declared flags.
    #[must_use]
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Resolved defaults of every flag that declares one.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InvalidDefault`] when a default does not match
    /// its type.
    pub fn defaults(&self) -> Result<Map<String, Value>, ActionError> {
        let mut defaults = Map::new();
        for param in &self.params {
            if let Some(value) = param.resolved_default()? {
                defaults.insert(param.name.clone(), value);
            }
        }
        Ok(defaults)
    }
}

/// Standard streams handed to a running action.
pub struct Streams<'a> {
    /// Input stream.
    pub input: Box<dyn Read + Send>,
    /// Output stream, masked by the caller.
    pub out: &'a mut dyn Write,
    /// Error stream, masked by the caller.
    pub err: &'a mut dyn Write,
}

impl<'a> Streams<'a> {
    /// Bundles the three streams.
    #[must_use]
    pub fn new(input: Box<dyn Read + Send>, out: &'a mut dyn Write, err: &'a mut dyn Write) -> Self {
        Self { input, out, err }
    }

    /// Takes the input stream, leaving an empty reader behind.
    pub fn take_input(&mut self) -> Box<dyn Read + Send> {
        std::mem::replace(&mut self.input, Box::new(io::empty()))
    }
}

impl fmt::Debug for Streams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Streams").finish_non_exhaustive()
    }
}

/// Everything a runtime needs to execute one invocation.
#[derive(Debug)]
pub struct RunContext<'a> {
    /// ID of the running action.
    pub action_id: &'a str,
    /// Validated input.
    pub input: &'a ValidatedInput,
    /// Standard streams.
    pub streams: Streams<'a>,
    /// Invocation-wide cancellation.
    pub cancel: &'a CancellationToken,
    /// Read-only services.
    pub services: &'a ServiceRegistry,
}

/// Strategy that executes an action.
pub trait Runtime: Send + Sync {
    /// Short runtime name, such as `container` or `function`.
    fn kind(&self) -> &'static str;

    /// Flags this runtime adds to the command line.
    fn flags(&self) -> Option<&RuntimeFlags> {
        None
    }

    /// Runtime-specific input checks run after schema validation.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Validation`] when the input cannot be run.
    fn validate_input(&self, _action_id: &str, _input: &Input) -> Result<(), ActionError> {
        Ok(())
    }

    /// Runs the action.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Execution`] or [`ActionError::Cancelled`] when
    /// the run fails.
    fn execute(&self, context: &mut RunContext<'_>) -> Result<(), ActionError>;
}

type RunFn = dyn Fn(&mut RunContext<'_>) -> Result<(), ActionError> + Send + Sync;

/// In-process runtime backed by a closure.
#[derive(Clone)]
pub struct FnRuntime {
    run: Arc<RunFn>,
    flags: Option<RuntimeFlags>,
}

impl FnRuntime {
    /// Wraps `run`.
    #[must_use]
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&mut RunContext<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self {
            run: Arc::new(run),
            flags: None,
        }
    }

    /// Declares runtime flags.
    #[must_use]
    pub fn with_flags(mut self, flags: RuntimeFlags) -> Self {
        self.flags = Some(flags);
        self
    }
}

impl fmt::Debug for FnRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRuntime")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl Runtime for FnRuntime {
    fn kind(&self) -> &'static str {
        "function"
    }

    fn flags(&self) -> Option<&RuntimeFlags> {
        self.flags.as_ref()
    }

    fn execute(&self, context: &mut RunContext<'_>) -> Result<(), ActionError> {
        (self.run)(context)
    }
}
