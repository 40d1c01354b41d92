//! Containerised action runtime.
//!
//! [`ContainerRuntime`] turns a bound action invocation into a
//! [`ContainerRequest`] and hands it to a [`ContainerDriver`]. The driver is
//! a service so tests and alternative engines can replace the default
//! [`EngineDriver`], which shells out to a container engine CLI.
//!
//! Action input reaches the container as environment variables:
//! `ACTION_ARG_<NAME>` for arguments and `ACTION_OPT_<NAME>` for options.
//! Strings are passed verbatim, everything else as JSON.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use marshal_config::Config;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

use crate::action::{Input, ParamType, Parameter, RunContext, Runtime, RuntimeFlags, Streams};
use crate::cancel::CancellationToken;
use crate::error::{ActionError, ServiceError};
use crate::service::{DefaultService, ServiceRegistry};

mod engine;

pub use self::engine::{DEFAULT_ENGINE, EngineDriver};

/// Tracing target for container execution.
const CONTAINER_TARGET: &str = "marshal_core::container";

/// Flag group holding the container runtime flags.
pub const CONTAINER_GROUP: &str = "container";

/// Container settings declared by an action manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Command and arguments run inside the container.
    #[serde(default)]
    pub command: Vec<String>,
    /// Static environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Everything a driver needs to run one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Action being run.
    pub action_id: String,
    /// Image reference.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Environment passed to the container, sorted by name.
    pub env: Vec<(String, String)>,
    /// Entrypoint override.
    pub entrypoint: Option<String>,
    /// Pull the image before running.
    pub pull: bool,
    /// Remove the container after it exits.
    pub remove: bool,
}

/// Errors reported by container drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The engine process could not be started.
    #[error("failed to start container engine '{engine}': {source}")]
    Spawn {
        /// Engine program.
        engine: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Streaming output or waiting for exit failed.
    #[error("container I/O failed: {source}")]
    Io {
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The run was cancelled and the container stopped.
    #[error("container run cancelled")]
    Cancelled,
}

impl From<io::Error> for DriverError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

/// Runs containers on behalf of [`ContainerRuntime`].
pub trait ContainerDriver: Send + Sync {
    /// Runs `request` to completion and returns its exit status.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Cancelled`] when `cancel` fires, otherwise
    /// spawn or I/O failures.
    fn run(
        &self,
        request: &ContainerRequest,
        streams: &mut Streams<'_>,
        cancel: &CancellationToken,
    ) -> Result<i32, DriverError>;
}

impl DefaultService for dyn ContainerDriver {
    fn create_default(_registry: &mut ServiceRegistry) -> Result<Arc<Self>, ServiceError> {
        Ok(Arc::new(EngineDriver::default()))
    }
}

/// Runtime executing an action inside a container.
#[derive(Clone)]
pub struct ContainerRuntime {
    spec: ContainerSpec,
    driver: Arc<dyn ContainerDriver>,
    flags: RuntimeFlags,
}

impl std::fmt::Debug for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRuntime")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl ContainerRuntime {
    /// Binds `spec` to `driver`.
    #[must_use]
    pub fn new(spec: ContainerSpec, driver: Arc<dyn ContainerDriver>) -> Self {
        Self {
            spec,
            driver,
            flags: container_flags(),
        }
    }

    /// Declared container settings.
    #[must_use]
    pub const fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Builds the driver request for one invocation.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Input`] when a container flag has the wrong
    /// type.
    pub fn request(
        &self,
        action_id: &str,
        input: &Input,
        services: &ServiceRegistry,
    ) -> Result<ContainerRequest, ActionError> {
        let mut env: BTreeMap<String, String> = self.spec.env.clone();
        if let Ok(config) = services.get::<Config>() {
            env.extend(config.child_env());
        }
        export(&mut env, "ACTION_ARG_", input.arguments());
        export(&mut env, "ACTION_OPT_", input.options());

        let defaults = self.flags.defaults()?;
        let group = input.group(CONTAINER_GROUP);

        let entrypoint = match flag(group, &defaults, "entrypoint") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) if text.is_empty() => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => return Err(flag_error(action_id, "entrypoint", other)),
        };
        let pull = bool_flag(action_id, "pull", flag(group, &defaults, "pull"))?;
        let remove = bool_flag(action_id, "remove", flag(group, &defaults, "remove"))?;

        Ok(ContainerRequest {
            action_id: action_id.to_owned(),
            image: self.spec.image.clone(),
            command: self.spec.command.clone(),
            env: env.into_iter().collect(),
            entrypoint,
            pull,
            remove,
        })
    }
}

impl Runtime for ContainerRuntime {
    fn kind(&self) -> &'static str {
        "container"
    }

    fn flags(&self) -> Option<&RuntimeFlags> {
        Some(&self.flags)
    }

    fn validate_input(&self, action_id: &str, _input: &Input) -> Result<(), ActionError> {
        if self.spec.image.trim().is_empty() {
            return Err(ActionError::Validation {
                id: action_id.to_owned(),
                messages: vec![String::from("container image must not be empty")],
            });
        }
        Ok(())
    }

    fn execute(&self, context: &mut RunContext<'_>) -> Result<(), ActionError> {
        let request = self.request(context.action_id, context.input.input(), context.services)?;
        debug!(
            target: CONTAINER_TARGET,
            action = context.action_id,
            image = %request.image,
            pull = request.pull,
            remove = request.remove,
            "running container"
        );
        let status = self
            .driver
            .run(&request, &mut context.streams, context.cancel)
            .map_err(|error| match error {
                DriverError::Cancelled => ActionError::Cancelled {
                    id: context.action_id.to_owned(),
                },
                other => ActionError::Execution {
                    id: context.action_id.to_owned(),
                    message: other.to_string(),
                    exit_code: None,
                },
            })?;
        if status == 0 {
            Ok(())
        } else {
            Err(ActionError::Execution {
                id: context.action_id.to_owned(),
                message: format!("container exited with status {status}"),
                exit_code: Some(status),
            })
        }
    }
}

fn container_flags() -> RuntimeFlags {
    RuntimeFlags::new(
        CONTAINER_GROUP,
        vec![
            Parameter::new("entrypoint", ParamType::String)
                .with_description("Override the image entrypoint"),
            Parameter::new("pull", ParamType::Boolean)
                .with_description("Pull the image before running")
                .with_default(json!(false)),
            Parameter::new("remove", ParamType::Boolean)
                .with_description("Remove the container after it exits")
                .with_default(json!(true)),
        ],
    )
}

/// Environment variable name for a parameter.
#[must_use]
pub fn env_name(prefix: &str, name: &str) -> String {
    let mut key = String::from(prefix);
    key.extend(name.chars().map(|ch| {
        if ch.is_ascii_alphanumeric() {
            ch.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    key
}

fn export(env: &mut BTreeMap<String, String>, prefix: &str, values: &Map<String, Value>) {
    for (name, value) in values {
        let rendered = match value {
            Value::Null => continue,
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        env.insert(env_name(prefix, name), rendered);
    }
}

fn flag<'a>(
    group: Option<&'a Map<String, Value>>,
    defaults: &'a Map<String, Value>,
    name: &str,
) -> Option<&'a Value> {
    group
        .and_then(|values| values.get(name))
        .or_else(|| defaults.get(name))
}

fn bool_flag(action_id: &str, name: &str, value: Option<&Value>) -> Result<bool, ActionError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(flag_error(action_id, name, other)),
    }
}

fn flag_error(action_id: &str, name: &str, value: &Value) -> ActionError {
    ActionError::Input {
        id: action_id.to_owned(),
        message: format!("container flag '{name}' has unexpected value {value}"),
    }
}
