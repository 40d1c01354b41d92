//! Unit tests for manifest discovery and lazy loading.

use std::fs;

use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::action::{ActionManager, FnRuntime, ParamType};
use crate::service::ServiceRegistry;

const CONTAINER_MANIFEST: &str = "\
action:
  title: Lint sources
  aliases: [lint]
  options:
    - name: fix
      type: boolean
      default: false
runtime:
  type: container
  image: ghcr.io/example/lint:1
  command: [lint, --all]
";

const FUNCTION_MANIFEST: &str = "\
action:
  title: Greet
  arguments:
    - name: who
      type: string
      required: true
runtime:
  type: function
  name: greet
";

struct Tree {
    dir: TempDir,
}

impl Tree {
    fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).expect("utf8 temp dir")
    }

    fn write(&self, relative: &str, text: &str) {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, text).expect("write manifest");
    }
}

#[fixture]
fn tree() -> Tree {
    Tree {
        dir: TempDir::new().expect("temp dir"),
    }
}

fn wired_plugin(services: &mut ServiceRegistry) -> ManifestPlugin {
    let plugin = ManifestPlugin::new();
    let mut actions = ActionManager::new();
    let mut app = AppInit {
        services,
        actions: &mut actions,
    };
    plugin.on_app_init(&mut app).expect("app-init");
    plugin
}

fn context(root: Utf8PathBuf) -> DiscoveryContext {
    DiscoveryContext {
        actions_path: root,
        cancel: CancellationToken::new(),
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

#[rstest]
fn ids_follow_the_directory_layout(tree: Tree) {
    tree.write("actions/fmt/action.yaml", CONTAINER_MANIFEST);
    tree.write("tools/lint/actions/check/action.yaml", CONTAINER_MANIFEST);
    tree.write("tools/actions/build/action.yaml", CONTAINER_MANIFEST);
    tree.write("tools/actions/notes/README.md", "no manifest here");

    let found = scan(&tree.root(), &CancellationToken::new()).expect("scan");
    let ids: Vec<&str> = found.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["fmt", "tools.lint:check", "tools:build"]);
}

#[rstest]
fn hidden_directories_are_skipped(tree: Tree) {
    tree.write(".cache/actions/stale/action.yaml", CONTAINER_MANIFEST);
    tree.write("actions/.draft/action.yaml", CONTAINER_MANIFEST);
    tree.write("actions/live/action.yaml", CONTAINER_MANIFEST);

    let found = scan(&tree.root(), &CancellationToken::new()).expect("scan");
    let ids: Vec<&str> = found.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["live"]);
}

#[rstest]
fn cancelled_scans_stop(tree: Tree) {
    tree.write("actions/fmt/action.yaml", CONTAINER_MANIFEST);
    let token = CancellationToken::new();
    token.cancel();
    assert!(scan(&tree.root(), &token).is_err());
}

// ---------------------------------------------------------------------------
// Plugin behaviour
// ---------------------------------------------------------------------------

#[test]
fn plugin_runs_after_every_other_plugin() {
    assert_eq!(ManifestPlugin::new().info().weight, MAX_WEIGHT);
}

#[rstest]
fn discovery_requires_wiring(tree: Tree) {
    let plugin = ManifestPlugin::new();
    assert!(plugin.discover_actions(&context(tree.root())).is_err());
}

#[test]
fn missing_actions_path_discovers_nothing() {
    let mut services = ServiceRegistry::new();
    let plugin = wired_plugin(&mut services);
    let actions = plugin
        .discover_actions(&context(Utf8PathBuf::from("/definitely/not/here")))
        .expect("discover");
    assert!(actions.is_empty());
}

#[rstest]
fn manifests_are_parsed_only_on_demand(tree: Tree) {
    tree.write("actions/broken/action.yaml", "action: [this is not a mapping");
    tree.write("actions/lint/action.yaml", CONTAINER_MANIFEST);
    let mut services = ServiceRegistry::new();
    let plugin = wired_plugin(&mut services);

    let actions = plugin.discover_actions(&context(tree.root())).expect("discover");
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|action| !action.is_loaded()));

    let broken = actions.iter().find(|action| action.id() == "broken").expect("broken");
    assert!(matches!(broken.definition(), Err(ActionError::Manifest { .. })));
}

#[rstest]
fn container_manifests_bind_the_container_runtime(tree: Tree) {
    tree.write("actions/lint/action.yaml", CONTAINER_MANIFEST);
    let mut services = ServiceRegistry::new();
    let plugin = wired_plugin(&mut services);
    let actions = plugin.discover_actions(&context(tree.root())).expect("discover");
    let lint = actions.first().expect("lint");

    let definition = lint.definition().expect("definition");
    assert_eq!(definition.title, "Lint sources");
    assert_eq!(definition.aliases, ["lint"]);
    let fix = definition.option("fix").expect("fix option");
    assert_eq!(fix.kind, ParamType::Boolean);
    assert_eq!(fix.default, Some(json!(false)));
    assert_eq!(lint.runtime().expect("runtime").kind(), "container");
}

#[rstest]
fn function_manifests_bind_catalog_entries(tree: Tree) {
    tree.write("actions/greet/action.yaml", FUNCTION_MANIFEST);
    let mut services = ServiceRegistry::new();
    let catalog = services
        .get_or_create::<FunctionCatalog>()
        .expect("catalog");
    catalog.register("greet", Arc::new(FnRuntime::new(|_context| Ok(()))));
    let plugin = wired_plugin(&mut services);

    let actions = plugin.discover_actions(&context(tree.root())).expect("discover");
    let greet = actions.first().expect("greet");
    assert_eq!(greet.runtime().expect("runtime").kind(), "function");
    assert!(greet.definition().expect("definition").argument("who").is_some());
}

#[rstest]
fn unknown_functions_are_definition_errors(tree: Tree) {
    tree.write("actions/greet/action.yaml", FUNCTION_MANIFEST);
    let mut services = ServiceRegistry::new();
    let plugin = wired_plugin(&mut services);
    let actions = plugin.discover_actions(&context(tree.root())).expect("discover");
    let greet = actions.first().expect("greet");
    assert!(matches!(greet.definition(), Err(ActionError::Definition { .. })));
}

#[test]
fn unknown_runtime_types_are_rejected() {
    let text = "action:\n  title: X\nruntime:\n  type: teleport\n";
    let error = ActionManifest::parse(Utf8Path::new("x/action.yaml"), text).expect_err("bad type");
    assert!(matches!(error, ActionError::Manifest { path, .. } if path == "x/action.yaml"));
}
