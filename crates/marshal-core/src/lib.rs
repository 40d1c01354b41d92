//! Plugin-driven action orchestration for Marshal.
//!
//! The `marshal-core` crate implements everything between the process entry
//! point and the command line: a typed [`ServiceRegistry`] for cross-cutting
//! capabilities, a weight-ordered [`PluginRegistry`] driven through an
//! explicit [`Bootstrap`] state machine, the bounded-time action discovery
//! fan-out, the action model (definitions, runtimes, input, decorators and
//! value processors) and the streaming [`SensitiveMask`] that scrubs secrets
//! from everything an action writes.
//!
//! # Architecture
//!
//! Plugins are registered once, before bootstrap, and never mutated again.
//! Bootstrap then runs app-init hooks in ascending weight order, fans action
//! discovery out across every discovery-capable plugin under one shared
//! deadline, registers the results (skipping duplicates), and finally lets
//! alteration hooks adjust the complete action set. The command-line layer
//! synthesises commands from the resulting [`ActionManager`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use marshal_core::{Bootstrap, CancellationToken, PluginRegistry, ServiceRegistry};
//! use marshal_core::manifest::ManifestPlugin;
//!
//! let mut plugins = PluginRegistry::new();
//! plugins.register(Arc::new(ManifestPlugin::new())).expect("register");
//!
//! let mut bootstrap = Bootstrap::new(ServiceRegistry::new(), plugins);
//! bootstrap.start(&CancellationToken::new()).expect("bootstrap");
//! ```

pub mod action;
pub mod bootstrap;
pub mod cancel;
pub mod capability;
pub mod container;
pub mod discovery;
pub mod error;
pub mod manifest;
pub mod mask;
pub mod plugin;
pub mod service;

#[cfg(test)]
mod tests;

pub use self::action::{
    Action, ActionDefinition, ActionLoader, ActionManager, Decorator, FnRuntime, Input,
    PERSISTENT_GROUP, ParamType, Parameter, RunContext, Runtime, RuntimeFlags, Streams,
    ValidatedInput, ValueProcessor,
};
pub use self::bootstrap::{Bootstrap, BootstrapReporter, Stage, StructuredBootstrapReporter};
pub use self::cancel::{CancellableReader, CancellationToken};
pub use self::capability::CapabilityId;
pub use self::error::{
    ActionError, BootstrapError, DiscoveryError, HookError, PluginError, ServiceError,
};
pub use self::mask::{MaskingWriter, SensitiveMask};
pub use self::plugin::{
    ActionAlter, ActionDiscovery, AppInit, CommandContext, CommandHandler, CommandRegistration,
    DiscoveryContext, GenerateConfig, GenerateHook, MAX_WEIGHT, OnAppInit, Plugin,
    PluginCommand, PluginInfo, PluginRegistry,
};
pub use self::service::{DefaultService, Service, ServiceRegistry, Witnesses};
