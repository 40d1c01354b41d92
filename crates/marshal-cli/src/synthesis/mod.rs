//! Command synthesis from action definitions.
//!
//! Every action becomes one subcommand named by its ID. Arguments map to
//! positionals in declaration order, options to long flags under the
//! "Action Options" heading, and runtime flags to long flags under
//! "Runtime Options". Persistent flags are global and render last.
//!
//! All values are parsed straight into [`serde_json::Value`] so resolution
//! reads every flag the same way regardless of its declared type.

use std::collections::HashSet;

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Args, Command};
use marshal_config::{GLOBAL_HEADING, PersistentFlags, RESERVED_FLAGS};
use marshal_core::{Action, ActionManager, ParamType, Parameter, PluginCommand};
use serde_json::{Number, Value};
use tracing::warn;

use crate::errors::AppError;

/// Tracing target for command synthesis.
const SYNTHESIS_TARGET: &str = "marshal_cli::synthesis";

/// Help heading for action options.
pub const ACTION_HEADING: &str = "Action Options";

/// Help heading for runtime flags.
pub const RUNTIME_HEADING: &str = "Runtime Options";

/// Argument identifier of a positional parameter.
#[must_use]
pub fn argument_id(name: &str) -> String {
    format!("arg.{name}")
}

/// Argument identifier of an option.
#[must_use]
pub fn option_id(name: &str) -> String {
    format!("opt.{name}")
}

/// Argument identifier of one property flag of an object option.
#[must_use]
pub fn property_id(option: &str, property: &str) -> String {
    format!("opt.{option}.{property}")
}

/// Argument identifier of a runtime flag.
#[must_use]
pub fn runtime_id(group: &str, name: &str) -> String {
    format!("rt.{group}.{name}")
}

/// Root command carrying the persistent flags.
#[must_use]
pub fn root_command(app_name: &str) -> Command {
    let root = Command::new(app_name.to_owned())
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs actions contributed by plugins.")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .next_help_heading(GLOBAL_HEADING);
    PersistentFlags::augment_args(root)
}

/// Attaches plugin commands and action commands to `root`.
///
/// When `requested` names a plugin command or an action (by ID or alias),
/// only that command is synthesised. Otherwise every action is, and actions
/// that fail to load are left out with a warning so one broken source does
/// not hide the rest.
///
/// # Errors
///
/// Returns [`AppError::Synthesis`], [`AppError::FlagCollision`] or
/// [`AppError::CommandCollision`] when the requested action cannot be
/// turned into a command.
pub fn command_line(
    root: Command,
    plugin_commands: &[PluginCommand],
    actions: &ActionManager,
    requested: Option<&str>,
) -> Result<Command, AppError> {
    let mut names = SubcommandNames::default();
    let mut command_line = root;
    for plugin_command in plugin_commands {
        let name = plugin_command.command.get_name();
        if names.contains(name) {
            warn!(
                target: SYNTHESIS_TARGET,
                command = name,
                "skipping plugin command with a duplicate name"
            );
            continue;
        }
        names.claim(name);
        command_line = command_line.subcommand(plugin_command.command.clone());
    }

    if requested.is_some_and(|name| names.contains(name)) {
        return Ok(command_line);
    }
    if let Some(action) = requested.and_then(|name| actions.find(name)) {
        return Ok(command_line.subcommand(action_command(action, &mut names)?));
    }
    for action in actions.iter() {
        match action_command(action, &mut names) {
            Ok(command) => command_line = command_line.subcommand(command),
            Err(error) => warn!(
                target: SYNTHESIS_TARGET,
                action = action.id(),
                error = %error,
                "leaving action out of the command line"
            ),
        }
    }
    Ok(command_line)
}

/// Builds the subcommand for `action`, loading its definition if needed.
///
/// # Errors
///
/// Returns [`AppError::Synthesis`] when the definition cannot be loaded or
/// a default does not match its type, [`AppError::FlagCollision`] when two
/// flags share a long name and [`AppError::CommandCollision`] when the ID is
/// taken by another command.
pub fn action_command(action: &Action, names: &mut SubcommandNames) -> Result<Command, AppError> {
    let id = action.id();
    let synthesis = |source| AppError::Synthesis {
        id: id.to_owned(),
        source,
    };
    let definition = action.definition().map_err(synthesis)?;
    let runtime = action.runtime().map_err(synthesis)?;
    if names.contains(id) {
        return Err(AppError::CommandCollision {
            name: id.to_owned(),
        });
    }

    let mut command = Command::new(id.to_owned()).about(definition.title.clone());
    if !definition.description.is_empty() {
        command = command.long_about(definition.description.clone());
    }
    let mut aliases = Vec::new();
    for alias in &definition.aliases {
        if names.contains(alias) || alias == id || aliases.contains(alias) {
            warn!(
                target: SYNTHESIS_TARGET,
                action = id,
                alias = alias.as_str(),
                "alias is already taken; ignoring it"
            );
            continue;
        }
        aliases.push(alias.clone());
    }

    let mut optional_seen = false;
    for (index, argument) in definition.arguments.iter().enumerate() {
        let mandatory = is_mandatory(argument) && !optional_seen;
        optional_seen |= !mandatory;
        command = command.arg(positional(argument, index, mandatory).map_err(synthesis)?);
    }

    let mut flags = FlagNames::new(id);
    for option in &definition.options {
        command = command.args(option_args(option, &mut flags)?);
    }
    if let Some(runtime_flags) = runtime.flags() {
        for parameter in runtime_flags.params() {
            flags.claim(&parameter.name)?;
            let flag = Arg::new(runtime_id(runtime_flags.group(), &parameter.name))
                .long(parameter.name.clone())
                .help(parameter.help_text())
                .help_heading(RUNTIME_HEADING);
            command = command.arg(with_default(typed(flag, parameter), parameter).map_err(synthesis)?);
        }
    }

    names.claim(id);
    for alias in &aliases {
        names.claim(alias);
    }
    Ok(command.visible_aliases(aliases))
}

/// Subcommand names and aliases already in use.
#[derive(Debug, Default)]
pub struct SubcommandNames {
    taken: HashSet<String>,
}

impl SubcommandNames {
    fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    fn claim(&mut self, name: &str) {
        self.taken.insert(name.to_owned());
    }
}

/// Long flag names in use within one action command.
struct FlagNames<'a> {
    action: &'a str,
    taken: HashSet<String>,
}

impl<'a> FlagNames<'a> {
    fn new(action: &'a str) -> Self {
        Self {
            action,
            taken: RESERVED_FLAGS.iter().map(|flag| (*flag).to_owned()).collect(),
        }
    }

    fn claim(&mut self, flag: &str) -> Result<(), AppError> {
        if self.taken.insert(flag.to_owned()) {
            Ok(())
        } else {
            Err(AppError::FlagCollision {
                id: self.action.to_owned(),
                flag: flag.to_owned(),
            })
        }
    }
}

/// Whether the command line itself must supply the parameter.
///
/// Parameters with a default or processors may still be filled downstream,
/// so only the action manager enforces their presence.
fn is_mandatory(parameter: &Parameter) -> bool {
    parameter.required && parameter.default.is_none() && parameter.process.is_empty()
}

fn positional(
    parameter: &Parameter,
    index: usize,
    mandatory: bool,
) -> Result<Arg, marshal_core::ActionError> {
    let base = Arg::new(argument_id(&parameter.name))
        .value_name(parameter.name.to_uppercase())
        .index(index + 1)
        .help(parameter.help_text())
        .required(mandatory);
    let arg = if parameter.kind == ParamType::Array {
        base.action(ArgAction::Append)
            .num_args(if mandatory { 1.. } else { 0.. })
            .value_parser(scalar_parser(parameter.element_type()))
    } else {
        base.action(ArgAction::Set)
            .value_parser(scalar_parser(parameter.kind))
    };
    with_default(arg, parameter)
}

/// Builds the flag for an option plus one flag per object property.
///
/// An object with property flags can be supplied through either form, so
/// its presence is left to the action manager.
fn option_args(parameter: &Parameter, flags: &mut FlagNames<'_>) -> Result<Vec<Arg>, AppError> {
    flags.claim(&parameter.name)?;
    let base = Arg::new(option_id(&parameter.name))
        .long(parameter.name.clone())
        .help(parameter.help_text())
        .help_heading(ACTION_HEADING)
        .required(is_mandatory(parameter) && parameter.properties.is_empty());
    let action = flags.action;
    let synthesis = |source| AppError::Synthesis {
        id: action.to_owned(),
        source,
    };
    let mut args = vec![with_default(typed(base, parameter), parameter).map_err(synthesis)?];

    for property in &parameter.properties {
        let long = format!("{}.{}", parameter.name, property.name);
        flags.claim(&long)?;
        let flag = Arg::new(property_id(&parameter.name, &property.name))
            .long(long)
            .help(property.help_text())
            .help_heading(ACTION_HEADING);
        args.push(typed(flag, property));
    }
    Ok(args)
}

/// Applies the value parser and arity matching the parameter type.
fn typed(arg: Arg, parameter: &Parameter) -> Arg {
    match parameter.kind {
        ParamType::Boolean => arg
            .action(ArgAction::Set)
            .value_parser(scalar_parser(ParamType::Boolean))
            .value_name("BOOL")
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true"),
        ParamType::Array => arg
            .action(ArgAction::Append)
            .value_delimiter(',')
            .value_parser(scalar_parser(parameter.element_type()))
            .value_name(parameter.element_type().as_str().to_uppercase()),
        ParamType::Object => arg
            .action(ArgAction::Set)
            .value_parser(scalar_parser(ParamType::Object))
            .value_name("JSON"),
        kind => arg
            .action(ArgAction::Set)
            .value_parser(scalar_parser(kind))
            .value_name(kind.as_str().to_uppercase()),
    }
}

/// Shows the resolved default on the flag.
///
/// Scalar defaults become clap defaults; list and object defaults are only
/// rendered in the help text. Either way the command line never forwards
/// them: the action manager applies declared defaults itself.
fn with_default(arg: Arg, parameter: &Parameter) -> Result<Arg, marshal_core::ActionError> {
    let Some(default) = parameter.resolved_default()? else {
        return Ok(arg);
    };
    Ok(match default {
        Value::String(text) => arg.default_value(text),
        Value::Bool(_) | Value::Number(_) => arg.default_value(default.to_string()),
        other => {
            let help = arg.get_help().map(ToString::to_string).unwrap_or_default();
            let rendered = format!("{help} [default: {other}]");
            arg.help(rendered.trim_start().to_owned())
        }
    })
}

fn scalar_parser(kind: ParamType) -> ValueParser {
    match kind {
        ParamType::Integer => ValueParser::new(parse_integer),
        ParamType::Number => ValueParser::new(parse_number),
        ParamType::Boolean => ValueParser::new(parse_boolean),
        ParamType::Object => ValueParser::new(parse_object),
        ParamType::String | ParamType::Array => ValueParser::new(parse_string),
    }
}

fn parse_string(raw: &str) -> Result<Value, String> {
    Ok(Value::String(raw.to_owned()))
}

fn parse_integer(raw: &str) -> Result<Value, String> {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .map_err(|error| format!("'{raw}' is not an integer: {error}"))
}

fn parse_number(raw: &str) -> Result<Value, String> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("'{raw}' is not a finite number"))
}

fn parse_boolean(raw: &str) -> Result<Value, String> {
    match raw.trim() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(format!("'{raw}' is not a boolean; use true or false")),
    }
}

fn parse_object(raw: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(String::from("expected a JSON object")),
        Err(error) => Err(format!("invalid JSON: {error}")),
    }
}
