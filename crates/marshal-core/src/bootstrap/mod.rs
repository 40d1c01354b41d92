//! Explicit, staged application bootstrap.
//!
//! [`Bootstrap`] owns the service registry, the weight-ordered plugins and
//! the action manager, and moves through [`Stage`]s strictly in order:
//!
//! 1. `Registered`: plugins are fixed.
//! 2. `CapabilitiesWired`: every app-init hook has run.
//! 3. `ActionsDiscovered`: discovery finished and its actions are registered.
//! 4. `ActionsAltered`: every alteration hook has run.
//! 5. `CommandsSynthesized`: the command line has been built.
//! 6. `Ready`: the selected command may run.
//!
//! Any failure leaves the bootstrap at the last completed stage and is
//! reported through the [`BootstrapReporter`].

use std::fmt;
use std::sync::Arc;

use marshal_config::Config;
use tracing::debug;

use crate::action::ActionManager;
use crate::cancel::CancellationToken;
use crate::discovery;
use crate::error::{BootstrapError, ServiceError};
use crate::plugin::{
    AppInit, DiscoveryContext, GenerateConfig, Plugin, PluginCommand, PluginRegistry,
};
use crate::service::ServiceRegistry;

mod reporter;

pub use self::reporter::{BootstrapReporter, StructuredBootstrapReporter};

/// Tracing target for bootstrap progress.
const BOOTSTRAP_TARGET: &str = "marshal_core::bootstrap";

/// Bootstrap progress, in the order stages are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Plugins are registered; nothing has run.
    Registered,
    /// App-init hooks have run.
    CapabilitiesWired,
    /// Discovered actions are registered.
    ActionsDiscovered,
    /// Alteration hooks have run.
    ActionsAltered,
    /// The command line has been synthesised.
    CommandsSynthesized,
    /// Ready to run the selected command.
    Ready,
}

impl Stage {
    /// Snake-case stage name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::CapabilitiesWired => "capabilities_wired",
            Self::ActionsDiscovered => "actions_discovered",
            Self::ActionsAltered => "actions_altered",
            Self::CommandsSynthesized => "commands_synthesized",
            Self::Ready => "ready",
        }
    }

    /// The stage that follows this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Registered => Some(Self::CapabilitiesWired),
            Self::CapabilitiesWired => Some(Self::ActionsDiscovered),
            Self::ActionsDiscovered => Some(Self::ActionsAltered),
            Self::ActionsAltered => Some(Self::CommandsSynthesized),
            Self::CommandsSynthesized => Some(Self::Ready),
            Self::Ready => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the application state assembled during startup.
pub struct Bootstrap {
    services: ServiceRegistry,
    plugins: Vec<Arc<dyn Plugin>>,
    actions: ActionManager,
    stage: Stage,
    reporter: Arc<dyn BootstrapReporter>,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("stage", &self.stage)
            .field("services", &self.services)
            .field(
                "plugins",
                &self
                    .plugins
                    .iter()
                    .map(|plugin| plugin.info())
                    .collect::<Vec<_>>(),
            )
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl Bootstrap {
    /// Fixes the plugin set and takes ownership of the services.
    #[must_use]
    pub fn new(services: ServiceRegistry, plugins: PluginRegistry) -> Self {
        Self {
            services,
            plugins: plugins.ordered(),
            actions: ActionManager::new(),
            stage: Stage::Registered,
            reporter: Arc::new(StructuredBootstrapReporter::new()),
        }
    }

    /// Replaces the default reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn BootstrapReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Service registry.
    #[must_use]
    pub const fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Mutable service registry.
    pub const fn services_mut(&mut self) -> &mut ServiceRegistry {
        &mut self.services
    }

    /// Action manager.
    #[must_use]
    pub const fn actions(&self) -> &ActionManager {
        &self.actions
    }

    /// Mutable action manager.
    pub const fn actions_mut(&mut self) -> &mut ActionManager {
        &mut self.actions
    }

    /// Plugins in hook order.
    #[must_use]
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Runs wiring, discovery and alteration in sequence.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later phases do not run.
    pub fn start(&mut self, cancel: &CancellationToken) -> Result<(), BootstrapError> {
        self.reporter.bootstrap_starting(self.plugins.len());
        self.wire()?;
        self.discover(cancel)?;
        self.alter()?;
        self.reporter.bootstrap_succeeded(self.actions.len());
        Ok(())
    }

    /// Runs every app-init hook in plugin order.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Hook`] when a hook fails, or
    /// [`BootstrapError::Stage`] when called out of order.
    pub fn wire(&mut self) -> Result<(), BootstrapError> {
        self.check_next(Stage::CapabilitiesWired)?;
        let result = run_app_init(&self.plugins, &mut self.services, &mut self.actions);
        self.settle(result, Stage::CapabilitiesWired)
    }

    /// Discovers actions from every discovery plugin and registers them.
    ///
    /// The search path and deadline come from the registered [`Config`]
    /// service, or the defaults when none is registered.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Discovery`] when discovery fails as a
    /// whole; nothing is registered in that case.
    pub fn discover(&mut self, cancel: &CancellationToken) -> Result<(), BootstrapError> {
        self.check_next(Stage::ActionsDiscovered)?;
        let config = match self.services.get::<Config>() {
            Ok(config) => config,
            Err(ServiceError::Missing { .. }) => Arc::new(Config::default()),
            Err(error) => return self.settle(Err(error.into()), Stage::ActionsDiscovered),
        };
        let context = DiscoveryContext {
            actions_path: config.actions_path().to_owned(),
            cancel: cancel.clone(),
        };
        let result = discovery::discover(&self.plugins, &context, config.discovery_timeout())
            .map_err(BootstrapError::from)
            .map(|contributions| {
                let contributed = contributions
                    .iter()
                    .map(|contribution| contribution.actions.len())
                    .sum::<usize>();
                let registered = discovery::register(&mut self.actions, contributions);
                self.reporter.actions_discovered(contributed, registered);
            });
        self.settle(result, Stage::ActionsDiscovered)
    }

    /// Runs every alteration hook in plugin order.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Hook`] when a hook fails.
    pub fn alter(&mut self) -> Result<(), BootstrapError> {
        self.check_next(Stage::ActionsAltered)?;
        let result = run_alter(&self.plugins, &mut self.actions);
        self.settle(result, Stage::ActionsAltered)
    }

    /// Commands contributed by plugins, in plugin order.
    #[must_use]
    pub fn commands(&self) -> Vec<PluginCommand> {
        self.plugins
            .iter()
            .filter_map(|plugin| plugin.as_command_registration())
            .flat_map(|hook| hook.commands())
            .collect()
    }

    /// Records that the command line has been built.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Stage`] unless actions have been altered.
    pub fn mark_commands_synthesized(&mut self) -> Result<(), BootstrapError> {
        self.advance(Stage::CommandsSynthesized)
    }

    /// Records that the selected command may now run.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Stage`] unless commands were synthesised.
    pub fn mark_ready(&mut self) -> Result<(), BootstrapError> {
        self.advance(Stage::Ready)
    }

    /// Runs every generation hook in plugin order.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Stage`] before alteration has completed and
    /// [`BootstrapError::Hook`] when a hook fails.
    pub fn generate(&self, config: &GenerateConfig) -> Result<(), BootstrapError> {
        if self.stage < Stage::ActionsAltered {
            return Err(BootstrapError::Stage {
                from: self.stage,
                to: Stage::ActionsAltered,
            });
        }
        for plugin in &self.plugins {
            if let Some(hook) = plugin.as_generate() {
                hook.generate(config, &self.actions)
                    .map_err(|source| BootstrapError::Hook {
                        plugin: plugin.info().id,
                        phase: "generate",
                        source,
                    })?;
            }
        }
        Ok(())
    }

    fn advance(&mut self, to: Stage) -> Result<(), BootstrapError> {
        self.check_next(to)?;
        self.stage = to;
        debug!(target: BOOTSTRAP_TARGET, stage = %to, "bootstrap stage reached");
        self.reporter.stage_reached(to);
        Ok(())
    }

    fn check_next(&self, to: Stage) -> Result<(), BootstrapError> {
        if self.stage.next() == Some(to) {
            Ok(())
        } else {
            Err(BootstrapError::Stage {
                from: self.stage,
                to,
            })
        }
    }

    fn settle(
        &mut self,
        result: Result<(), BootstrapError>,
        to: Stage,
    ) -> Result<(), BootstrapError> {
        match result {
            Ok(()) => self.advance(to),
            Err(error) => {
                self.reporter.bootstrap_failed(self.stage, &error);
                Err(error)
            }
        }
    }
}

fn run_app_init(
    plugins: &[Arc<dyn Plugin>],
    services: &mut ServiceRegistry,
    actions: &mut ActionManager,
) -> Result<(), BootstrapError> {
    for plugin in plugins {
        let Some(hook) = plugin.as_app_init() else {
            continue;
        };
        let id = plugin.info().id;
        debug!(target: BOOTSTRAP_TARGET, plugin = %id, "running app-init hook");
        let mut app = AppInit {
            services: &mut *services,
            actions: &mut *actions,
        };
        hook.on_app_init(&mut app)
            .map_err(|source| BootstrapError::Hook {
                plugin: id,
                phase: "app-init",
                source,
            })?;
    }
    Ok(())
}

fn run_alter(
    plugins: &[Arc<dyn Plugin>],
    actions: &mut ActionManager,
) -> Result<(), BootstrapError> {
    for plugin in plugins {
        let Some(hook) = plugin.as_action_alter() else {
            continue;
        };
        let id = plugin.info().id;
        debug!(target: BOOTSTRAP_TARGET, plugin = %id, "running alteration hook");
        hook.alter_actions(actions)
            .map_err(|source| BootstrapError::Hook {
                plugin: id,
                phase: "alter",
                source,
            })?;
    }
    Ok(())
}
