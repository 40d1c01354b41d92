//! Commands every Marshal binary ships with.
//!
//! [`BuiltinPlugin`] contributes `version`, `actions` and the hidden `gen`
//! command, and writes an `actions.json` index when generation runs.

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Arg, ArgAction, ArgMatches, Command};
use marshal_config::{Config, DEFAULT_APP_NAME};
use marshal_core::action::processor::ProcessorPlugin;
use marshal_core::manifest::ManifestPlugin;
use marshal_core::{
    Action, ActionError, ActionManager, CommandContext, CommandRegistration, GenerateConfig,
    GenerateHook, HookError, Plugin, PluginCommand, PluginError, PluginInfo, PluginRegistry,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Tracing target for built-in commands.
const BUILTIN_TARGET: &str = "marshal_cli::builtin";

/// File written by the generation hook.
pub const ACTIONS_INDEX: &str = "actions.json";

/// Registry holding the plugins a stock binary runs with.
///
/// # Errors
///
/// Returns [`PluginError`] if two of the plugins share a capability.
pub fn default_plugins() -> Result<PluginRegistry, PluginError> {
    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(ProcessorPlugin))?;
    plugins.register(Arc::new(ManifestPlugin::new()))?;
    plugins.register(Arc::new(BuiltinPlugin))?;
    Ok(plugins)
}

/// Contributes the built-in commands and the action index generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinPlugin;

impl Plugin for BuiltinPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::of::<Self>()
    }

    fn as_command_registration(&self) -> Option<&dyn CommandRegistration> {
        Some(self)
    }

    fn as_generate(&self) -> Option<&dyn GenerateHook> {
        Some(self)
    }
}

impl CommandRegistration for BuiltinPlugin {
    fn commands(&self) -> Vec<PluginCommand> {
        vec![
            PluginCommand {
                command: Command::new("version").about("Print version information"),
                handler: Arc::new(print_version),
            },
            PluginCommand {
                command: Command::new("actions").about("List available actions").arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the listing as JSON"),
                ),
                handler: Arc::new(list_actions),
            },
            PluginCommand {
                command: Command::new("gen")
                    .about("Run code generation hooks")
                    .hide(true)
                    .arg(
                        Arg::new("output")
                            .long("output")
                            .value_name("DIR")
                            .default_value(".")
                            .help("Directory generated files are written to"),
                    ),
                handler: Arc::new(run_generate),
            },
        ]
    }
}

impl GenerateHook for BuiltinPlugin {
    fn generate(&self, config: &GenerateConfig, actions: &ActionManager) -> Result<(), HookError> {
        let summaries = actions
            .iter()
            .map(|action| ActionSummary::describe(action, true))
            .collect::<Result<Vec<_>, _>>()?;
        fs::create_dir_all(&config.output_dir)?;
        let path = config.output_dir.join(ACTIONS_INDEX);
        fs::write(&path, serde_json::to_string_pretty(&summaries)?)?;
        info!(
            target: BUILTIN_TARGET,
            path = %path,
            actions = summaries.len(),
            "wrote action index"
        );
        Ok(())
    }
}

/// Serialised view of one action.
#[derive(Debug, Serialize)]
struct ActionSummary<'a> {
    id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    aliases: &'a [String],
    runtime: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<Value>,
}

impl<'a> ActionSummary<'a> {
    fn describe(action: &'a Action, with_schema: bool) -> Result<Self, ActionError> {
        let definition = action.definition()?;
        Ok(Self {
            id: action.id(),
            title: &definition.title,
            description: &definition.description,
            aliases: &definition.aliases,
            runtime: action.runtime()?.kind(),
            schema: with_schema.then(|| definition.json_schema()),
        })
    }
}

fn app_name(context: &CommandContext<'_>) -> String {
    context
        .bootstrap
        .services()
        .get::<Config>()
        .map_or_else(|_| String::from(DEFAULT_APP_NAME), |config| config.app_name().to_owned())
}

fn print_version(_matches: &ArgMatches, context: &mut CommandContext<'_>) -> Result<(), HookError> {
    let name = app_name(context);
    writeln!(context.out, "{name} {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

fn list_actions(matches: &ArgMatches, context: &mut CommandContext<'_>) -> Result<(), HookError> {
    let summaries: Vec<ActionSummary<'_>> = context
        .bootstrap
        .actions()
        .iter()
        .filter_map(|action| match ActionSummary::describe(action, false) {
            Ok(summary) => Some(summary),
            Err(error) => {
                warn!(
                    target: BUILTIN_TARGET,
                    action = action.id(),
                    error = %error,
                    "omitting action that failed to load"
                );
                None
            }
        })
        .collect();

    if matches.get_flag("json") {
        writeln!(context.out, "{}", serde_json::to_string_pretty(&summaries)?)?;
        return Ok(());
    }
    let width = summaries.iter().map(|summary| summary.id.len()).max().unwrap_or(0);
    for summary in &summaries {
        let aliases = if summary.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", summary.aliases.join(", "))
        };
        writeln!(context.out, "{:<width$}  {}{aliases}", summary.id, summary.title)?;
    }
    Ok(())
}

fn run_generate(matches: &ArgMatches, context: &mut CommandContext<'_>) -> Result<(), HookError> {
    let output_dir = matches
        .get_one::<String>("output")
        .map_or_else(|| Utf8PathBuf::from("."), Utf8PathBuf::from);
    context.bootstrap.generate(&GenerateConfig { output_dir })?;
    Ok(())
}
