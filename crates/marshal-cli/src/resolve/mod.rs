//! Input resolution from parsed command-line matches.
//!
//! Only values the user actually typed are forwarded. Declared defaults stay
//! out of the [`Input`] so the action manager can run value processors
//! first and apply defaults afterwards.

use clap::ArgMatches;
use clap::parser::ValueSource;
use marshal_core::{ActionDefinition, Input, PERSISTENT_GROUP, ParamType, Parameter, RuntimeFlags};
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::synthesis::{argument_id, option_id, property_id, runtime_id};

/// Builds the raw input for an action from its subcommand matches.
///
/// The runtime group starts from the runtime's declared defaults and is
/// overlaid with explicit flags. The persistent group is always set.
///
/// # Errors
///
/// Returns [`AppError::Matches`] when a value cannot be read back and
/// [`AppError::Input`] when a declared default is malformed.
pub fn resolve_input(
    definition: &ActionDefinition,
    runtime_flags: Option<&RuntimeFlags>,
    matches: &ArgMatches,
    persistent: Map<String, Value>,
) -> Result<Input, AppError> {
    let mut input = Input::new();
    for argument in &definition.arguments {
        if let Some(value) = parameter_value(matches, &argument_id(&argument.name), argument)? {
            input.set_argument(argument.name.clone(), value);
        }
    }
    for option in &definition.options {
        let value = if option.kind == ParamType::Object {
            object_value(matches, option)?
        } else {
            parameter_value(matches, &option_id(&option.name), option)?
        };
        if let Some(found) = value {
            input.set_option(option.name.clone(), found);
        }
    }
    if let Some(flags) = runtime_flags {
        let mut group = flags.defaults().map_err(AppError::Input)?;
        for parameter in flags.params() {
            let id = runtime_id(flags.group(), &parameter.name);
            if let Some(value) = parameter_value(matches, &id, parameter)? {
                group.insert(parameter.name.clone(), value);
            }
        }
        input.set_group(flags.group(), group);
    }
    input.set_group(PERSISTENT_GROUP, persistent);
    Ok(input)
}

/// Returns `true` when the user supplied `id` on the command line.
#[must_use]
pub fn explicit(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Merges an object option from its JSON flag and property flags.
///
/// The base is the JSON flag when given, else the declared default, else an
/// empty object; explicit property flags overwrite individual keys. Returns
/// `None` when neither kind of flag was used.
///
/// # Errors
///
/// Returns [`AppError::Matches`] or [`AppError::Input`] as for
/// [`resolve_input`].
pub fn object_value(matches: &ArgMatches, option: &Parameter) -> Result<Option<Value>, AppError> {
    let blob = parameter_value(matches, &option_id(&option.name), option)?;
    let mut overrides = Map::new();
    for property in &option.properties {
        let id = property_id(&option.name, &property.name);
        if let Some(value) = parameter_value(matches, &id, property)? {
            overrides.insert(property.name.clone(), value);
        }
    }
    if blob.is_none() && overrides.is_empty() {
        return Ok(None);
    }

    let base = match blob {
        Some(value) => value,
        None => option.resolved_default().map_err(AppError::Input)?.unwrap_or_default(),
    };
    let mut merged = match base {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    merged.extend(overrides);
    Ok(Some(Value::Object(merged)))
}

fn parameter_value(
    matches: &ArgMatches,
    id: &str,
    parameter: &Parameter,
) -> Result<Option<Value>, AppError> {
    if !explicit(matches, id) {
        return Ok(None);
    }
    let mismatch = |error: clap::parser::MatchesError| AppError::Matches {
        flag: id.to_owned(),
        message: error.to_string(),
    };
    if parameter.kind == ParamType::Array {
        let values = matches
            .try_get_many::<Value>(id)
            .map_err(mismatch)?
            .map(|items| items.cloned().collect())
            .unwrap_or_default();
        return Ok(Some(Value::Array(values)));
    }
    Ok(matches.try_get_one::<Value>(id).map_err(mismatch)?.cloned())
}
