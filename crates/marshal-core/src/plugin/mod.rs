//! Plugin contracts and the weight-ordered plugin registry.
//!
//! A [`Plugin`] exposes a [`PluginInfo`] (capability identity plus weight)
//! and may implement any subset of the hook traits below. Hooks are
//! discovered through the `as_*` accessors so one object can take part in
//! several bootstrap phases.
//!
//! Hook order is a total order by weight, then registration order. Weights
//! are a priority, not a dependency graph: nothing detects two plugins whose
//! side effects conflict at the same weight.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::debug;

use crate::action::{Action, ActionManager};
use crate::bootstrap::Bootstrap;
use crate::cancel::CancellationToken;
use crate::capability::CapabilityId;
use crate::error::{HookError, PluginError};
use crate::service::ServiceRegistry;

/// Tracing target for plugin registration.
const PLUGIN_TARGET: &str = "marshal_core::plugin";

/// Largest weight; a plugin with it runs after every other plugin.
pub const MAX_WEIGHT: i32 = i32::MAX;

/// Identity and ordering of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    /// Capability identity.
    pub id: CapabilityId,
    /// Hook-ordering weight; lower runs first.
    pub weight: i32,
}

impl PluginInfo {
    /// Info for `P` with weight zero.
    #[must_use]
    pub fn of<P: ?Sized + 'static>() -> Self {
        Self {
            id: CapabilityId::of::<P>(),
            weight: 0,
        }
    }

    /// Overrides the weight.
    #[must_use]
    pub const fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// A statically registered extension.
pub trait Plugin: Send + Sync + 'static {
    /// Identity and weight.
    fn info(&self) -> PluginInfo;

    /// App-init hook, when implemented.
    fn as_app_init(&self) -> Option<&dyn OnAppInit> {
        None
    }

    /// Action discovery hook, when implemented.
    fn as_action_discovery(&self) -> Option<&dyn ActionDiscovery> {
        None
    }

    /// Action alteration hook, when implemented.
    fn as_action_alter(&self) -> Option<&dyn ActionAlter> {
        None
    }

    /// Command registration hook, when implemented.
    fn as_command_registration(&self) -> Option<&dyn CommandRegistration> {
        None
    }

    /// Code generation hook, when implemented.
    fn as_generate(&self) -> Option<&dyn GenerateHook> {
        None
    }
}

/// Mutable state handed to app-init hooks.
#[derive(Debug)]
pub struct AppInit<'a> {
    /// Service registry being wired.
    pub services: &'a mut ServiceRegistry,
    /// Action manager, for registering decorators and processors.
    pub actions: &'a mut ActionManager,
}

/// Runs once during capability wiring.
pub trait OnAppInit {
    /// Reads or registers services and configures the action manager.
    ///
    /// # Errors
    ///
    /// Any error aborts bootstrap.
    fn on_app_init(&self, app: &mut AppInit<'_>) -> Result<(), HookError>;
}

/// Inputs shared with every discovery worker.
#[derive(Debug, Clone)]
pub struct DiscoveryContext {
    /// Directory searched for action sources.
    pub actions_path: Utf8PathBuf,
    /// Fires when the discovery deadline elapses or the caller cancels.
    pub cancel: CancellationToken,
}

/// Contributes actions during discovery.
///
/// Implementations run on worker threads, concurrently with other plugins.
pub trait ActionDiscovery: Send + Sync {
    /// Returns every action this plugin provides.
    ///
    /// # Errors
    ///
    /// Any error aborts discovery as a whole.
    fn discover_actions(&self, context: &DiscoveryContext) -> Result<Vec<Action>, HookError>;
}

/// Adjusts the complete action set after discovery.
pub trait ActionAlter {
    /// May add, remove, replace or mutate actions.
    ///
    /// # Errors
    ///
    /// Any error aborts bootstrap.
    fn alter_actions(&self, actions: &mut ActionManager) -> Result<(), HookError>;
}

/// Handler invoked when a plugin command is selected.
pub type CommandHandler =
    Arc<dyn Fn(&clap::ArgMatches, &mut CommandContext<'_>) -> Result<(), HookError> + Send + Sync>;

/// A command contributed by a plugin.
#[derive(Clone)]
pub struct PluginCommand {
    /// Command definition merged into the root command.
    pub command: clap::Command,
    /// Handler run with the command's matches.
    pub handler: CommandHandler,
}

impl fmt::Debug for PluginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCommand")
            .field("name", &self.command.get_name())
            .finish_non_exhaustive()
    }
}

/// Everything a plugin command handler may use.
pub struct CommandContext<'a> {
    /// Masked standard output.
    pub out: &'a mut dyn Write,
    /// Masked standard error.
    pub err: &'a mut dyn Write,
    /// Completed bootstrap.
    pub bootstrap: &'a Bootstrap,
}

/// Contributes top-level commands.
pub trait CommandRegistration {
    /// Commands to add to the root command.
    fn commands(&self) -> Vec<PluginCommand>;
}

/// Options for code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateConfig {
    /// Directory generated files are written to.
    pub output_dir: Utf8PathBuf,
}

/// Produces build-time artefacts from the action set.
pub trait GenerateHook {
    /// Writes generated files.
    ///
    /// # Errors
    ///
    /// Any error aborts generation.
    fn generate(
        &self,
        config: &GenerateConfig,
        actions: &ActionManager,
    ) -> Result<(), HookError>;
}

/// Append-only collection of plugins, populated before bootstrap.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    ids: HashSet<CapabilityId>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|plugin| plugin.info()))
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Duplicate`] when a plugin with the same
    /// identity is already registered.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let info = plugin.info();
        if !self.ids.insert(info.id) {
            return Err(PluginError::Duplicate { plugin: info.id });
        }
        debug!(
            target: PLUGIN_TARGET,
            plugin = %info.id,
            weight = info.weight,
            "registering plugin"
        );
        self.plugins.push(plugin);
        Ok(())
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins sorted by weight, ties kept in registration order.
    #[must_use]
    pub fn ordered(&self) -> Vec<Arc<dyn Plugin>> {
        let mut ordered = self.plugins.clone();
        ordered.sort_by_key(|plugin| plugin.info().weight);
        ordered
    }
}

#[cfg(test)]
mod tests;
