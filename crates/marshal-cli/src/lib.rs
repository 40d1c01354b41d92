//! Command-line runtime for the Marshal action orchestrator.
//!
//! The crate turns the plugin-driven core into a binary: it settles
//! configuration and telemetry from the raw arguments, runs bootstrap,
//! synthesises one subcommand per discovered action next to the commands
//! plugins contribute, resolves the parsed flags into action input and runs
//! the selected command with masked output streams.
//!
//! Everything is exercised through [`Runner`], which accepts substitute
//! plugins, services, environment and streams so tests can drive complete
//! invocations in process.

use std::ffi::{OsStr, OsString};
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgMatches;
use marshal_config::{
    Config, ConfigError, DEFAULT_APP_NAME, SettingsLoader, SystemEnv, SystemSettingsLoader,
};
use marshal_core::action::processor::SharedEnv;
use marshal_core::{
    Bootstrap, CancellableReader, CancellationToken, CommandContext, PluginCommand,
    PluginRegistry, SensitiveMask, ServiceRegistry, Streams, StructuredBootstrapReporter,
};
use tracing::debug;

mod builtin;
mod config;
mod errors;
pub mod resolve;
pub mod synthesis;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use builtin::{ACTIONS_INDEX, BuiltinPlugin, default_plugins};
pub use errors::{AppError, Phase};

use config::scan_arguments;

/// Tracing target for the CLI runtime.
const CLI_TARGET: &str = "marshal_cli";

/// Streams an invocation reads from and writes to.
pub struct IoStreams<'a> {
    /// Standard input handed to the selected action.
    pub stdin: Box<dyn Read + Send>,
    /// Standard output.
    pub stdout: &'a mut dyn Write,
    /// Standard error.
    pub stderr: &'a mut dyn Write,
}

impl<'a> IoStreams<'a> {
    /// Bundles the three streams.
    #[must_use]
    pub fn new(stdin: Box<dyn Read + Send>, stdout: &'a mut dyn Write, stderr: &'a mut dyn Write) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }
}

/// One configurable invocation of the orchestrator.
pub struct Runner {
    plugins: PluginRegistry,
    services: ServiceRegistry,
    env: Arc<SharedEnv>,
    settings: Arc<dyn SettingsLoader>,
    telemetry: bool,
}

impl Runner {
    /// Runner over `plugins` reading the process environment.
    #[must_use]
    pub fn new(plugins: PluginRegistry) -> Self {
        Self {
            plugins,
            services: ServiceRegistry::new(),
            env: Arc::new(SystemEnv),
            settings: Arc::new(SystemSettingsLoader),
            telemetry: true,
        }
    }

    /// Seeds the service registry. The runner still registers the resolved
    /// [`Config`] itself.
    #[must_use]
    pub fn with_services(mut self, services: ServiceRegistry) -> Self {
        self.services = services;
        self
    }

    /// Replaces the environment used for configuration and processors.
    #[must_use]
    pub fn with_env(mut self, env: Arc<SharedEnv>) -> Self {
        self.env = env;
        self
    }

    /// Replaces the loader for configuration files and `MARSHAL_*`
    /// variables.
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsLoader>) -> Self {
        self.settings = settings;
        self
    }

    /// Enables or disables installing the global tracing subscriber.
    #[must_use]
    pub const fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry = enabled;
        self
    }

    /// Runs one invocation and returns the process exit status.
    #[must_use]
    pub fn run<I>(self, args: I, io: IoStreams<'_>) -> ExitCode
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        let IoStreams {
            stdin,
            stdout,
            stderr,
        } = io;
        let mut services = self.services;
        let mask = match services.get_or_create::<SensitiveMask>() {
            Ok(mask) => mask,
            Err(error) => {
                drop(writeln!(stderr, "error: {}", AppError::from(error)));
                return ExitCode::FAILURE;
            }
        };

        let mut session = Session {
            mask,
            stdout,
            stderr,
            usage: None,
        };
        let setup = Setup {
            plugins: self.plugins,
            services,
            env: self.env,
            settings: self.settings,
            telemetry: self.telemetry,
        };
        match session.invoke(&args, setup, stdin) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                session.report(&error);
                error.exit_code()
            }
        }
    }
}

/// Runs the CLI with the stock plugins, the process environment and
/// standard input.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let plugins = match default_plugins() {
        Ok(plugins) => plugins,
        Err(error) => {
            drop(writeln!(stderr, "error: {}", AppError::from(error)));
            return ExitCode::FAILURE;
        }
    };
    Runner::new(plugins).run(args, IoStreams::new(Box::new(io::stdin()), stdout, stderr))
}

/// Inputs consumed by bootstrap.
struct Setup {
    plugins: PluginRegistry,
    services: ServiceRegistry,
    env: Arc<SharedEnv>,
    settings: Arc<dyn SettingsLoader>,
    telemetry: bool,
}

/// Output side of one invocation.
struct Session<'a> {
    mask: Arc<SensitiveMask>,
    stdout: &'a mut dyn Write,
    stderr: &'a mut dyn Write,
    /// Usage line of the selected subcommand, once parsing succeeded.
    usage: Option<String>,
}

impl Session<'_> {
    fn invoke(
        &mut self,
        args: &[OsString],
        setup: Setup,
        stdin: Box<dyn Read + Send>,
    ) -> Result<(), AppError> {
        let scan = scan_arguments(args);
        let argv0 = args
            .first()
            .map_or_else(|| OsStr::new(DEFAULT_APP_NAME), OsString::as_os_str);
        let env: &SharedEnv = &*setup.env;
        let settings = setup
            .settings
            .load(argv0)
            .map_err(ConfigError::Load)?;
        let resolved = Config::resolve(argv0, &scan.flags, &settings, &env)?;
        if setup.telemetry {
            telemetry::initialise(&resolved, &self.mask)?;
        }

        let mut services = setup.services;
        let config = services.add(resolved)?;
        if !services.contains::<SharedEnv>() {
            services.provide::<SharedEnv>(Arc::clone(&setup.env))?;
        }
        debug!(
            target: CLI_TARGET,
            app = config.app_name(),
            command = scan.command.as_deref(),
            "starting bootstrap"
        );

        let cancel = CancellationToken::new();
        let mut bootstrap = Bootstrap::new(services, setup.plugins)
            .with_reporter(Arc::new(StructuredBootstrapReporter::new()));
        bootstrap.start(&cancel)?;

        let plugin_commands = bootstrap.commands();
        let mut command = synthesis::command_line(
            synthesis::root_command(config.app_name()),
            &plugin_commands,
            bootstrap.actions(),
            scan.command.as_deref(),
        )?;
        bootstrap.mark_commands_synthesized()?;

        let matches = match command.try_get_matches_from_mut(args) {
            Ok(matches) => matches,
            Err(error) if !error.use_stderr() => {
                let mut out = self.mask.writer(&mut *self.stdout);
                write!(out, "{error}")?;
                out.close()?;
                return Ok(());
            }
            Err(error) => return Err(AppError::Usage(error)),
        };
        let Some((name, selected)) = matches.subcommand() else {
            return Err(AppError::UnknownCommand(String::new()));
        };
        self.usage = command
            .find_subcommand_mut(name)
            .map(|subcommand| subcommand.render_usage().to_string());

        if let Some(plugin_command) = find_plugin_command(&plugin_commands, name) {
            bootstrap.mark_ready()?;
            return self.run_plugin_command(plugin_command, selected, &bootstrap);
        }
        let invocation = Invocation {
            name,
            matches: selected,
            config: &config,
            cancel: &cancel,
        };
        self.run_action(&invocation, &mut bootstrap, stdin)
    }

    fn run_plugin_command(
        &mut self,
        plugin_command: &PluginCommand,
        matches: &ArgMatches,
        bootstrap: &Bootstrap,
    ) -> Result<(), AppError> {
        let mut out = self.mask.writer(&mut *self.stdout);
        let mut err = self.mask.writer(&mut *self.stderr);
        let mut context = CommandContext {
            out: &mut out,
            err: &mut err,
            bootstrap,
        };
        let result = (plugin_command.handler)(matches, &mut context);
        out.close()?;
        err.close()?;
        result.map_err(|source| AppError::Command {
            command: plugin_command.command.get_name().to_owned(),
            source,
        })
    }

    fn run_action(
        &mut self,
        invocation: &Invocation<'_>,
        bootstrap: &mut Bootstrap,
        stdin: Box<dyn Read + Send>,
    ) -> Result<(), AppError> {
        let action = bootstrap.actions().require(invocation.name).map_err(AppError::Input)?;
        let definition = action.definition().map_err(AppError::Input)?;
        let runtime = action.runtime().map_err(AppError::Input)?;
        let input = resolve::resolve_input(
            definition,
            runtime.flags(),
            invocation.matches,
            invocation.config.persistent_group(),
        )?;
        let validated = bootstrap
            .actions()
            .validate_input(action, input)
            .map_err(AppError::Input)?;

        let mut bound = action.clone();
        bound.set_input(validated);
        bootstrap
            .actions()
            .decorate(&mut bound)
            .map_err(AppError::Execution)?;
        bootstrap.mark_ready()?;
        debug!(target: CLI_TARGET, action = bound.id(), "executing action");

        let input = CancellableReader::spawn(stdin, invocation.cancel.clone())?;
        let mut out = self.mask.writer(&mut *self.stdout);
        let mut err = self.mask.writer(&mut *self.stderr);
        let result = bound.execute(
            Streams::new(Box::new(input), &mut out, &mut err),
            invocation.cancel,
            bootstrap.services(),
        );
        out.close()?;
        err.close()?;
        result.map_err(AppError::Execution)
    }

    /// Writes `error` to standard error, followed by the subcommand usage
    /// when the invocation itself was at fault.
    fn report(&mut self, error: &AppError) {
        let mut err = self.mask.writer(&mut *self.stderr);
        let message = match error {
            AppError::Usage(usage) => usage.to_string(),
            other => format!("error: {other}"),
        };
        drop(writeln!(err, "{}", message.trim_end()));
        if let (Phase::Input, Some(usage)) = (error.phase(), &self.usage) {
            drop(writeln!(err, "\n{usage}"));
        }
        drop(err.close());
    }
}

/// The parsed action invocation.
struct Invocation<'a> {
    name: &'a str,
    matches: &'a ArgMatches,
    config: &'a Config,
    cancel: &'a CancellationToken,
}

fn find_plugin_command<'a>(commands: &'a [PluginCommand], name: &str) -> Option<&'a PluginCommand> {
    commands
        .iter()
        .find(|plugin_command| plugin_command.command.get_name() == name)
}
