//! Registry of actions, decorators and value processors.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::action::definition::Parameter;
use crate::action::input::{Input, ValidatedInput};
use crate::action::processor::{ProcessorContext, ValueProcessor};
use crate::action::{Action, ActionDefinition};
use crate::error::ActionError;

/// Tracing target for action management.
const ACTION_TARGET: &str = "marshal_core::action";

/// Post-bind hook that may adjust an action once its input is known.
pub type Decorator = Arc<dyn Fn(&ActionManager, &mut Action) -> Result<(), ActionError> + Send + Sync>;

/// Owns every registered action plus the hooks applied to them.
#[derive(Default)]
pub struct ActionManager {
    actions: BTreeMap<String, Action>,
    decorators: Vec<Decorator>,
    processors: HashMap<String, Arc<dyn ValueProcessor>>,
}

impl fmt::Debug for ActionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionManager")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("decorators", &self.decorators.len())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Duplicate`] when the ID is taken, or the
    /// definition error of an already materialised action.
    pub fn add(&mut self, action: Action) -> Result<(), ActionError> {
        if self.actions.contains_key(action.id()) {
            return Err(ActionError::Duplicate {
                id: action.id().to_owned(),
            });
        }
        if action.is_loaded() {
            action.definition()?.validate(action.id())?;
        }
        debug!(target: ACTION_TARGET, action = action.id(), "registering action");
        self.actions.insert(action.id().to_owned(), action);
        Ok(())
    }

    /// Removes and returns an action.
    pub fn remove(&mut self, id: &str) -> Option<Action> {
        self.actions.remove(id)
    }

    /// Looks up an action by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    /// Looks up an action by ID.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] when no action has that ID.
    pub fn require(&self, id: &str) -> Result<&Action, ActionError> {
        self.actions.get(id).ok_or_else(|| ActionError::NotFound { id: id.to_owned() })
    }

    /// Mutable lookup by ID.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Action> {
        self.actions.get_mut(id)
    }

    /// Looks up an action by ID, falling back to aliases.
    ///
    /// Alias resolution loads every definition; actions that fail to load
    /// are skipped with a warning.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Action> {
        if let Some(action) = self.actions.get(name) {
            return Some(action);
        }
        self.actions.values().find(|action| match action.definition() {
            Ok(definition) => definition.aliases.iter().any(|alias| alias == name),
            Err(error) => {
                warn!(
                    target: ACTION_TARGET,
                    action = action.id(),
                    error = %error,
                    "skipping action that failed to load"
                );
                false
            }
        })
    }

    /// Registered IDs in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Registered actions in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` when no action is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Appends a decorator; decorators run in registration order.
    pub fn add_decorator(&mut self, decorator: Decorator) {
        self.decorators.push(decorator);
    }

    /// Registers a value processor under `name`, replacing any previous one.
    pub fn add_processor(&mut self, name: impl Into<String>, processor: Arc<dyn ValueProcessor>) {
        self.processors.insert(name.into(), processor);
    }

    /// Runs every decorator over `action`.
    ///
    /// # Errors
    ///
    /// Returns the first decorator failure as [`ActionError::Decorator`].
    pub fn decorate(&self, action: &mut Action) -> Result<(), ActionError> {
        let id = action.id().to_owned();
        for decorator in &self.decorators {
            decorator(self, action).map_err(|error| match error {
                ActionError::Decorator { .. } => error,
                other => ActionError::Decorator {
                    id: id.clone(),
                    message: other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    /// Validates `input` for `action`.
    ///
    /// Processors run first on each supplied value, declared defaults then
    /// fill anything still unset, required parameters are checked, flag
    /// groups are checked against option names, the result is validated
    /// against the definition's JSON Schema and finally handed to the
    /// runtime's own checks.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Input`], [`ActionError::Processor`] or
    /// [`ActionError::Validation`] describing what is wrong.
    pub fn validate_input(&self, action: &Action, mut input: Input) -> Result<ValidatedInput, ActionError> {
        let id = action.id();
        let definition = action.definition()?;
        let runtime = action.runtime()?;

        self.resolve_parameters(id, &definition.arguments, input.arguments_mut())?;
        self.resolve_parameters(id, &definition.options, input.options_mut())?;
        check_groups(id, definition, &input)?;
        check_schema(id, definition, &input)?;
        runtime.validate_input(id, &input)?;

        debug!(target: ACTION_TARGET, action = id, "input validated");
        Ok(ValidatedInput::new(input))
    }

    fn resolve_parameters(
        &self,
        id: &str,
        parameters: &[Parameter],
        values: &mut Map<String, Value>,
    ) -> Result<(), ActionError> {
        for parameter in parameters {
            let supplied = match values.remove(&parameter.name) {
                Some(Value::Null) | None => None,
                Some(value) => Some(parameter.coerce(&value).map_err(|_| ActionError::Input {
                    id: id.to_owned(),
                    message: format!(
                        "'{}' expects a value of type {}, got {value}",
                        parameter.name,
                        parameter.kind.as_str()
                    ),
                })?),
            };
            let processed = self.run_processors(id, parameter, supplied)?;
            let resolved = match processed {
                Some(value) => Some(value),
                None => parameter.resolved_default()?,
            };
            match resolved {
                Some(value) => {
                    values.insert(parameter.name.clone(), value);
                }
                None if parameter.required => {
                    return Err(ActionError::Input {
                        id: id.to_owned(),
                        message: format!("missing required parameter '{}'", parameter.name),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    fn run_processors(
        &self,
        id: &str,
        parameter: &Parameter,
        mut value: Option<Value>,
    ) -> Result<Option<Value>, ActionError> {
        for directive in &parameter.process {
            let failure = |message: String| ActionError::Processor {
                processor: directive.processor.clone(),
                parameter: parameter.name.clone(),
                message,
            };
            let processor = self
                .processors
                .get(&directive.processor)
                .ok_or_else(|| failure(String::from("processor is not registered")))?;
            let context = ProcessorContext {
                action_id: id,
                parameter,
                options: &directive.options,
            };
            value = processor
                .process(value, &context)
                .map_err(|error| failure(error.to_string()))?;
        }
        Ok(value)
    }
}

fn check_groups(id: &str, definition: &ActionDefinition, input: &Input) -> Result<(), ActionError> {
    match input
        .groups()
        .keys()
        .find(|group| definition.option(group).is_some() || input.option(group).is_some())
    {
        Some(group) => Err(ActionError::Input {
            id: id.to_owned(),
            message: format!("flag group '{group}' collides with an option of the same name"),
        }),
        None => Ok(()),
    }
}

fn check_schema(id: &str, definition: &ActionDefinition, input: &Input) -> Result<(), ActionError> {
    let schema = definition.json_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|error| ActionError::Definition {
        id: id.to_owned(),
        message: format!("schema could not be compiled: {error}"),
    })?;
    let instance = json!({
        "arguments": input.arguments(),
        "options": input.options(),
    });
    let messages: Vec<String> = validator
        .iter_errors(&instance)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{path}: {error}")
            }
        })
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(ActionError::Validation {
            id: id.to_owned(),
            messages,
        })
    }
}
