//! Unit tests for actions and the action manager.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::{fixture, rstest};
use serde_json::{Map, Value, json};

use super::*;
use crate::action::processor::TrimProcessor;

struct CountingLoader {
    loads: AtomicUsize,
    definition: ActionDefinition,
}

impl ActionLoader for CountingLoader {
    fn load(&self, _id: &str) -> Result<(ActionDefinition, Arc<dyn Runtime>), ActionError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok((self.definition.clone(), noop_runtime()))
    }
}

struct FailingLoader;

impl ActionLoader for FailingLoader {
    fn load(&self, id: &str) -> Result<(ActionDefinition, Arc<dyn Runtime>), ActionError> {
        Err(ActionError::Manifest {
            path: format!("{id}/action.yaml"),
            message: String::from("unreadable"),
        })
    }
}

fn noop_runtime() -> Arc<dyn Runtime> {
    Arc::new(FnRuntime::new(|_context| Ok(())))
}

fn echo_runtime() -> Arc<dyn Runtime> {
    Arc::new(FnRuntime::new(|context| {
        let rendered = serde_json::to_string(context.input.input()).map_err(|error| {
            ActionError::Execution {
                id: context.action_id.to_owned(),
                message: error.to_string(),
                exit_code: None,
            }
        })?;
        writeln!(context.streams.out, "{rendered}").map_err(|error| ActionError::Io {
            id: context.action_id.to_owned(),
            source: Arc::new(error),
        })
    }))
}

fn deploy_definition() -> ActionDefinition {
    ActionDefinition::new("Deploy")
        .with_alias("ship")
        .with_argument(Parameter::new("target", ParamType::String).required())
        .with_option(Parameter::new("replicas", ParamType::Integer).with_default(json!(2)))
        .with_option(
            Parameter::new("tier", ParamType::String)
                .with_allowed(vec![json!("gold"), json!("silver")]),
        )
}

#[fixture]
fn manager() -> ActionManager {
    let mut manager = ActionManager::new();
    manager
        .add(Action::new("deploy", deploy_definition(), echo_runtime()))
        .expect("add deploy");
    manager
}

fn input_with_target(target: &str) -> Input {
    let mut input = Input::new();
    input.set_argument("target", json!(target));
    input
}

// ---------------------------------------------------------------------------
// Registration and lookup
// ---------------------------------------------------------------------------

#[rstest]
fn duplicate_ids_are_rejected(mut manager: ActionManager) {
    let error = manager
        .add(Action::new("deploy", ActionDefinition::new("Again"), noop_runtime()))
        .expect_err("duplicate");
    assert!(matches!(error, ActionError::Duplicate { id } if id == "deploy"));
    assert_eq!(manager.len(), 1);
}

#[rstest]
fn invalid_eager_definitions_are_rejected(mut manager: ActionManager) {
    let broken = ActionDefinition::new("Broken")
        .with_option(Parameter::new("count", ParamType::Integer).with_default(json!("lots")));
    let error = manager
        .add(Action::new("broken", broken, noop_runtime()))
        .expect_err("invalid default");
    assert!(matches!(error, ActionError::InvalidDefault { .. }));
}

#[rstest]
fn find_resolves_ids_then_aliases(manager: ActionManager) {
    assert_eq!(manager.find("deploy").map(Action::id), Some("deploy"));
    assert_eq!(manager.find("ship").map(Action::id), Some("deploy"));
    assert!(manager.find("unknown").is_none());
}

#[rstest]
fn alias_lookup_skips_actions_that_fail_to_load(mut manager: ActionManager) {
    manager
        .add(Action::lazy("broken", Arc::new(FailingLoader)))
        .expect("add lazy");
    assert_eq!(manager.find("ship").map(Action::id), Some("deploy"));
}

#[test]
fn lazy_actions_load_once_and_only_on_demand() {
    let loader = Arc::new(CountingLoader {
        loads: AtomicUsize::new(0),
        definition: deploy_definition(),
    });
    let mut manager = ActionManager::new();
    manager
        .add(Action::lazy("deploy", Arc::clone(&loader) as Arc<dyn ActionLoader>))
        .expect("add");
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

    let action = manager.get("deploy").expect("registered");
    assert!(!action.is_loaded());
    assert_eq!(action.definition().expect("load").title, "Deploy");
    action.definition().expect("cached");
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

#[rstest]
fn defaults_fill_unset_options(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let validated = manager
        .validate_input(action, input_with_target("prod"))
        .expect("valid");
    assert_eq!(validated.option("replicas"), Some(&json!(2)));
    assert_eq!(validated.option("tier"), None);
}

#[rstest]
fn explicit_values_override_defaults(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let mut input = input_with_target("prod");
    input.set_option("replicas", json!(5));
    let validated = manager.validate_input(action, input).expect("valid");
    assert_eq!(validated.option("replicas"), Some(&json!(5)));
}

#[rstest]
fn missing_required_argument_is_an_input_error(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let error = manager
        .validate_input(action, Input::new())
        .expect_err("missing target");
    assert!(matches!(error, ActionError::Input { .. }));
}

#[rstest]
fn wrongly_typed_value_is_an_input_error(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let mut input = input_with_target("prod");
    input.set_option("replicas", json!("several"));
    let error = manager.validate_input(action, input).expect_err("bad type");
    assert!(matches!(error, ActionError::Input { .. }));
}

#[rstest]
fn schema_violations_are_reported(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let mut input = input_with_target("prod");
    input.set_option("tier", json!("bronze"));
    let error = manager.validate_input(action, input).expect_err("enum");
    let ActionError::Validation { messages, .. } = error else {
        panic!("expected a validation error, got {error:?}");
    };
    assert_eq!(messages.len(), 1);
    assert!(messages.iter().any(|message| message.contains("/options/tier")));
}

#[rstest]
fn flag_groups_may_not_shadow_options(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let mut input = input_with_target("prod");
    input.set_group("replicas", Map::new());
    let error = manager.validate_input(action, input).expect_err("collision");
    assert!(matches!(error, ActionError::Input { message, .. } if message.contains("replicas")));
}

#[test]
fn processors_run_before_defaults() {
    let definition = ActionDefinition::new("Greet").with_option(
        Parameter::new("name", ParamType::String)
            .with_default(json!("world"))
            .with_processor("string.trim", Map::new()),
    );
    let mut manager = ActionManager::new();
    manager.add_processor("string.trim", Arc::new(TrimProcessor));
    manager
        .add(Action::new("greet", definition, noop_runtime()))
        .expect("add");
    let action = manager.get("greet").expect("action");

    let mut input = Input::new();
    input.set_option("name", json!("  ada  "));
    let trimmed = manager.validate_input(action, input).expect("valid");
    assert_eq!(trimmed.option("name"), Some(&json!("ada")));

    let defaulted = manager.validate_input(action, Input::new()).expect("valid");
    assert_eq!(defaulted.option("name"), Some(&json!("world")));
}

#[test]
fn unknown_processors_are_reported() {
    let definition = ActionDefinition::new("Greet").with_option(
        Parameter::new("name", ParamType::String).with_processor("does.not.exist", Map::new()),
    );
    let mut manager = ActionManager::new();
    manager
        .add(Action::new("greet", definition, noop_runtime()))
        .expect("add");
    let action = manager.get("greet").expect("action");
    let error = manager
        .validate_input(action, Input::new())
        .expect_err("unknown processor");
    assert!(matches!(error, ActionError::Processor { processor, .. } if processor == "does.not.exist"));
}

// ---------------------------------------------------------------------------
// Binding, decoration and execution
// ---------------------------------------------------------------------------

#[rstest]
fn unbound_actions_refuse_to_run(manager: ActionManager) {
    let action = manager.get("deploy").expect("action");
    let mut out = Vec::new();
    let mut err = Vec::new();
    let streams = Streams::new(Box::new(io::empty()), &mut out, &mut err);
    let error = action
        .execute(streams, &CancellationToken::new(), &ServiceRegistry::new())
        .expect_err("unbound");
    assert!(matches!(error, ActionError::Unbound { .. }));
}

#[rstest]
fn decorators_see_bound_input_and_may_swap_the_runtime(mut manager: ActionManager) {
    manager.add_decorator(Arc::new(|_manager: &ActionManager, action: &mut Action| {
        let target = action
            .input()
            .and_then(|input| input.argument("target"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if target == "dry-run" {
            action.set_runtime(Arc::new(FnRuntime::new(|context| {
                context
                    .streams
                    .out
                    .write_all(b"skipped\n")
                    .map_err(|error| ActionError::Io {
                        id: context.action_id.to_owned(),
                        source: Arc::new(error),
                    })
            })));
        }
        Ok(())
    }));

    let mut action = manager.get("deploy").expect("action").clone();
    let validated = manager
        .validate_input(&action, input_with_target("dry-run"))
        .expect("valid");
    action.set_input(validated);
    manager.decorate(&mut action).expect("decorate");

    let mut out = Vec::new();
    let mut err = Vec::new();
    action
        .execute(
            Streams::new(Box::new(io::empty()), &mut out, &mut err),
            &CancellationToken::new(),
            &ServiceRegistry::new(),
        )
        .expect("execute");
    assert_eq!(out, b"skipped\n");
}

#[rstest]
fn decorator_failures_name_the_action(mut manager: ActionManager) {
    manager.add_decorator(Arc::new(|_manager: &ActionManager, action: &mut Action| {
        Err(ActionError::Input {
            id: action.id().to_owned(),
            message: String::from("no credentials"),
        })
    }));
    let mut action = manager.get("deploy").expect("action").clone();

    let error = manager.decorate(&mut action).expect_err("decorator fails");

    match error {
        ActionError::Decorator { id, message } => {
            assert_eq!(id, "deploy");
            assert!(message.contains("no credentials"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn required_lookups_report_missing_actions(manager: ActionManager) {
    assert_eq!(manager.require("deploy").expect("registered").id(), "deploy");
    let error = manager.require("launch").expect_err("not registered");
    assert!(matches!(error, ActionError::NotFound { ref id } if id == "launch"));
    assert_eq!(error.to_string(), "action 'launch' not found");
}

#[rstest]
fn bound_input_reaches_the_runtime(manager: ActionManager) {
    let mut action = manager.get("deploy").expect("action").clone();
    let validated = manager
        .validate_input(&action, input_with_target("prod"))
        .expect("valid");
    action.set_input(validated);

    let mut out = Vec::new();
    let mut err = Vec::new();
    action
        .execute(
            Streams::new(Box::new(io::empty()), &mut out, &mut err),
            &CancellationToken::new(),
            &ServiceRegistry::new(),
        )
        .expect("execute");
    let rendered: Value = serde_json::from_slice(&out).expect("json");
    assert_eq!(rendered.pointer("/arguments/target"), Some(&json!("prod")));
    assert_eq!(rendered.pointer("/options/replicas"), Some(&json!(2)));
}

#[rstest]
fn cancelled_invocations_do_not_start(manager: ActionManager) {
    let mut action = manager.get("deploy").expect("action").clone();
    let validated = manager
        .validate_input(&action, input_with_target("prod"))
        .expect("valid");
    action.set_input(validated);
    let token = CancellationToken::new();
    token.cancel();

    let mut out = Vec::new();
    let mut err = Vec::new();
    let error = action
        .execute(
            Streams::new(Box::new(io::empty()), &mut out, &mut err),
            &token,
            &ServiceRegistry::new(),
        )
        .expect_err("cancelled");
    assert!(matches!(error, ActionError::Cancelled { .. }));
    assert!(out.is_empty());
}
