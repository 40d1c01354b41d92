//! Shared harness for in-process CLI tests.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Cursor, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use marshal_config::Settings;
use marshal_core::action::processor::ProcessorPlugin;
use marshal_core::container::{ContainerDriver, ContainerRequest, DriverError};
use marshal_core::{
    Action, ActionDefinition, ActionDiscovery, ActionError, CancellationToken, DiscoveryContext,
    FnRuntime, HookError, ParamType, Parameter, Plugin, PluginInfo, PluginRegistry, RunContext,
    Runtime, ServiceRegistry, Streams,
};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::{BuiltinPlugin, IoStreams, Runner};

/// Exit status of the fixture action that always fails.
pub(super) const FAILURE_STATUS: u8 = 3;

/// Captured result of one invocation.
#[derive(Debug)]
pub(super) struct Outcome {
    pub(super) exit: ExitCode,
    pub(super) stdout: String,
    pub(super) stderr: String,
}

impl Outcome {
    pub(super) fn succeeded(&self) -> bool {
        self.exit == ExitCode::SUCCESS
    }
}

/// Runs `args` (without the binary name) as `marshal`.
pub(super) fn invoke(
    runner: Runner,
    args: &[&str],
    stdin: &str,
    env: HashMap<String, String>,
) -> Outcome {
    invoke_with_settings(runner, Settings::default(), args, stdin, env)
}

/// Runs `args` with `settings` standing in for files and `MARSHAL_*`
/// variables.
pub(super) fn invoke_with_settings(
    runner: Runner,
    settings: Settings,
    args: &[&str],
    stdin: &str,
    env: HashMap<String, String>,
) -> Outcome {
    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();
    let argv = std::iter::once("marshal")
        .chain(args.iter().copied())
        .map(OsString::from);
    let io = IoStreams::new(
        Box::new(Cursor::new(stdin.as_bytes().to_vec())),
        &mut stdout,
        &mut stderr,
    );
    let exit = runner
        .with_env(Arc::new(env))
        .with_settings(Arc::new(settings))
        .with_telemetry(false)
        .run(argv, io);
    Outcome {
        exit,
        stdout: String::from_utf8(stdout).expect("stdout is utf8"),
        stderr: String::from_utf8(stderr).expect("stderr is utf8"),
    }
}

/// Runner over the processor, built-in and fixture plugins.
pub(super) fn fixture_runner() -> Runner {
    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(ProcessorPlugin)).expect("processors");
    plugins.register(Arc::new(BuiltinPlugin)).expect("builtin");
    plugins.register(Arc::new(Fixtures)).expect("fixtures");
    Runner::new(plugins)
}

/// Splits a quoted step argument into command-line words.
pub(super) fn words(line: &str) -> Vec<String> {
    line.trim_matches('"')
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// Fixture actions
// ---------------------------------------------------------------------------

/// Discovery plugin contributing in-process actions.
struct Fixtures;

impl Plugin for Fixtures {
    fn info(&self) -> PluginInfo {
        PluginInfo::of::<Self>()
    }

    fn as_action_discovery(&self) -> Option<&dyn ActionDiscovery> {
        Some(self)
    }
}

impl ActionDiscovery for Fixtures {
    fn discover_actions(&self, _context: &DiscoveryContext) -> Result<Vec<Action>, HookError> {
        let greet_definition = ActionDefinition::new("Greet someone")
            .with_alias("hi")
            .with_argument(Parameter::new("who", ParamType::String).required())
            .with_option(Parameter::new("shout", ParamType::Boolean).with_default(json!(false)))
            .with_option(
                Parameter::new("mood", ParamType::String)
                    .with_allowed(vec![json!("happy"), json!("grumpy")]),
            )
            .with_option(
                Parameter::new("token", ParamType::String)
                    .with_processor("mask.sensitive", Map::new()),
            );
        Ok(vec![
            action("greet", greet_definition, greet),
            action("fail", ActionDefinition::new("Always fails"), fail),
            action("echo", ActionDefinition::new("Copy input to output"), echo),
        ])
    }
}

fn action(
    id: &str,
    definition: ActionDefinition,
    run: fn(&mut RunContext<'_>) -> Result<(), ActionError>,
) -> Action {
    let runtime: Arc<dyn Runtime> = Arc::new(FnRuntime::new(run));
    Action::new(id, definition, runtime)
}

fn io_failure(id: &str, error: io::Error) -> ActionError {
    ActionError::Io {
        id: id.to_owned(),
        source: Arc::new(error),
    }
}

/// Writes a greeting and echoes the token so masking can be observed.
pub(super) fn greet(context: &mut RunContext<'_>) -> Result<(), ActionError> {
    let input = context.input.input();
    let who = input.argument("who").and_then(Value::as_str).unwrap_or("nobody");
    let greeting = format!("hello {who}");
    let line = if input.option("shout").and_then(Value::as_bool).unwrap_or(false) {
        greeting.to_uppercase()
    } else {
        greeting
    };
    writeln!(context.streams.out, "{line}").map_err(|error| io_failure(context.action_id, error))?;
    if let Some(token) = input.option("token").and_then(Value::as_str) {
        writeln!(context.streams.out, "token={token}")
            .map_err(|error| io_failure(context.action_id, error))?;
    }
    Ok(())
}

fn fail(context: &mut RunContext<'_>) -> Result<(), ActionError> {
    Err(ActionError::Execution {
        id: context.action_id.to_owned(),
        message: String::from("exploded"),
        exit_code: Some(i32::from(FAILURE_STATUS)),
    })
}

fn echo(context: &mut RunContext<'_>) -> Result<(), ActionError> {
    let mut input = context.streams.take_input();
    io::copy(&mut input, &mut *context.streams.out)
        .map_err(|error| io_failure(context.action_id, error))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Manifest trees and container recording
// ---------------------------------------------------------------------------

/// Temporary actions directory.
pub(super) struct ManifestTree {
    dir: TempDir,
}

impl ManifestTree {
    pub(super) fn new() -> Result<Self> {
        let dir = TempDir::new().context("create actions directory")?;
        Ok(Self { dir })
    }

    pub(super) fn write(&self, id: &str, manifest: &str) -> Result<()> {
        let path = self.dir.path().join("actions").join(id);
        fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
        fs::write(path.join("action.yaml"), manifest)
            .with_context(|| format!("write manifest for {id}"))
    }

    /// Root directory of the tree.
    pub(super) fn root(&self) -> Result<Utf8PathBuf> {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf())
            .map_err(|path| anyhow!("actions directory {} is not UTF-8", path.display()))
    }

    /// Environment pointing the orchestrator at this tree.
    pub(super) fn env(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([(
            String::from("MARSHAL_ACTIONS_PATH"),
            self.root()?.to_string(),
        )]))
    }
}

/// Container driver that records requests instead of running them.
#[derive(Default)]
pub(super) struct RecordingDriver {
    requests: Mutex<Vec<ContainerRequest>>,
    status: i32,
}

impl RecordingDriver {
    pub(super) fn exiting_with(status: i32) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            status,
        }
    }

    pub(super) fn requests(&self) -> Result<Vec<ContainerRequest>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .map_err(|error| anyhow!("lock recorded requests: {error}"))
    }
}

impl ContainerDriver for RecordingDriver {
    fn run(
        &self,
        request: &ContainerRequest,
        streams: &mut Streams<'_>,
        _cancel: &CancellationToken,
    ) -> Result<i32, DriverError> {
        writeln!(streams.out, "ran {}", request.image)?;
        self.requests.lock().expect("requests lock").push(request.clone());
        Ok(self.status)
    }
}

/// Services with `driver` standing in for the container engine.
pub(super) fn services_with_driver(driver: Arc<RecordingDriver>) -> ServiceRegistry {
    let mut services = ServiceRegistry::new();
    services
        .provide::<dyn ContainerDriver>(driver)
        .expect("container driver");
    services
}
