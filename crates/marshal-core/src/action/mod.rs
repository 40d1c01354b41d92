//! Action model: definitions, runtimes, input and the action manager.
//!
//! An [`Action`] pairs an ID with a definition and a runtime. Both may be
//! loaded lazily through an [`ActionLoader`], so discovering many actions
//! costs nothing until one of them is actually requested.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::cancel::CancellationToken;
use crate::error::ActionError;
use crate::service::ServiceRegistry;

pub mod definition;
pub mod input;
pub mod manager;
pub mod processor;
pub mod runtime;

pub use self::definition::{ActionDefinition, ParamType, Parameter, ValueProcessing};
pub use self::input::{Input, PERSISTENT_GROUP, ValidatedInput};
pub use self::manager::{ActionManager, Decorator};
pub use self::processor::{ProcessorContext, ValueProcessor};
pub use self::runtime::{FnRuntime, RunContext, Runtime, RuntimeFlags, Streams};

/// Loads an action's definition and runtime on first use.
pub trait ActionLoader: Send + Sync {
    /// Produces the definition and runtime for the action `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Manifest`] or [`ActionError::Definition`] when
    /// the source cannot be read or is malformed.
    fn load(&self, id: &str) -> Result<(ActionDefinition, Arc<dyn Runtime>), ActionError>;
}

#[derive(Clone)]
struct Loaded {
    definition: Arc<ActionDefinition>,
    runtime: Arc<dyn Runtime>,
}

/// An action definition bound to a runtime.
///
/// Cloning is cheap and shares the loaded definition; each clone carries its
/// own bound input and runtime override.
#[derive(Clone)]
pub struct Action {
    id: String,
    loader: Option<Arc<dyn ActionLoader>>,
    loaded: OnceCell<Loaded>,
    runtime_override: Option<Arc<dyn Runtime>>,
    input: Option<ValidatedInput>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("loaded", &self.is_loaded())
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl Action {
    /// Creates a fully materialised action.
    #[must_use]
    pub fn new(id: impl Into<String>, definition: ActionDefinition, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            id: id.into(),
            loader: None,
            loaded: OnceCell::with_value(Loaded {
                definition: Arc::new(definition),
                runtime,
            }),
            runtime_override: None,
            input: None,
        }
    }

    /// Creates an action whose definition is loaded on first use.
    #[must_use]
    pub fn lazy(id: impl Into<String>, loader: Arc<dyn ActionLoader>) -> Self {
        Self {
            id: id.into(),
            loader: Some(loader),
            loaded: OnceCell::new(),
            runtime_override: None,
            input: None,
        }
    }

    /// Unique action ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` once the definition has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Returns the definition, loading it if needed.
    ///
    /// # Errors
    ///
    /// Propagates loader and validation failures.
    pub fn definition(&self) -> Result<&ActionDefinition, ActionError> {
        self.materialise().map(|loaded| loaded.definition.as_ref())
    }

    /// Returns the bound runtime, preferring any override.
    ///
    /// # Errors
    ///
    /// Propagates loader and validation failures.
    pub fn runtime(&self) -> Result<Arc<dyn Runtime>, ActionError> {
        if let Some(runtime) = &self.runtime_override {
            return Ok(Arc::clone(runtime));
        }
        self.materialise().map(|loaded| Arc::clone(&loaded.runtime))
    }

    /// Replaces the runtime for this instance.
    pub fn set_runtime(&mut self, runtime: Arc<dyn Runtime>) {
        self.runtime_override = Some(runtime);
    }

    /// Binds validated input. Any previous binding is replaced.
    pub fn set_input(&mut self, input: ValidatedInput) {
        self.input = Some(input);
    }

    /// Bound input, if any.
    #[must_use]
    pub const fn input(&self) -> Option<&ValidatedInput> {
        self.input.as_ref()
    }

    /// Runs the action with its bound input.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Unbound`] when no input is bound, otherwise
    /// whatever the runtime reports.
    pub fn execute<'a>(
        &'a self,
        streams: Streams<'a>,
        cancel: &'a CancellationToken,
        services: &'a ServiceRegistry,
    ) -> Result<(), ActionError> {
        let input = self.input.as_ref().ok_or_else(|| ActionError::Unbound {
            id: self.id.clone(),
        })?;
        let runtime = self.runtime()?;
        if cancel.is_cancelled() {
            return Err(ActionError::Cancelled {
                id: self.id.clone(),
            });
        }
        let mut context = RunContext {
            action_id: &self.id,
            input,
            streams,
            cancel,
            services,
        };
        runtime.execute(&mut context)
    }

    fn materialise(&self) -> Result<&Loaded, ActionError> {
        self.loaded.get_or_try_init(|| {
            let loader = self.loader.as_ref().ok_or_else(|| ActionError::Definition {
                id: self.id.clone(),
                message: String::from("action has neither a definition nor a loader"),
            })?;
            let (definition, runtime) = loader.load(&self.id)?;
            definition.validate(&self.id)?;
            Ok(Loaded {
                definition: Arc::new(definition),
                runtime,
            })
        })
    }
}

#[cfg(test)]
mod tests;
