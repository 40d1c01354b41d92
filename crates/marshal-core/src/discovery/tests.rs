//! Unit tests for the discovery fan-out and tolerant registration.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};

use super::*;
use crate::action::{ActionDefinition, FnRuntime, Runtime};
use crate::plugin::{ActionDiscovery, PluginInfo};

struct StaticSource {
    id: CapabilityId,
    delay: Duration,
    actions: Vec<&'static str>,
    fail: bool,
}

impl StaticSource {
    fn new(name: &'static str, actions: &[&'static str]) -> Self {
        Self {
            id: CapabilityId::new("tests", name),
            delay: Duration::ZERO,
            actions: actions.to_vec(),
            fail: false,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Plugin for StaticSource {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id,
            weight: 0,
        }
    }

    fn as_action_discovery(&self) -> Option<&dyn ActionDiscovery> {
        Some(self)
    }
}

impl ActionDiscovery for StaticSource {
    fn discover_actions(&self, _context: &DiscoveryContext) -> Result<Vec<Action>, HookError> {
        thread::sleep(self.delay);
        if self.fail {
            return Err("source unavailable".into());
        }
        Ok(self.actions.iter().map(|id| action(id)).collect())
    }
}

struct Silent;

impl Plugin for Silent {
    fn info(&self) -> PluginInfo {
        PluginInfo::of::<Self>()
    }
}

fn action(id: &str) -> Action {
    let runtime: Arc<dyn Runtime> = Arc::new(FnRuntime::new(|_context| Ok(())));
    Action::new(id, ActionDefinition::new(id), runtime)
}

#[fixture]
fn context() -> DiscoveryContext {
    DiscoveryContext {
        actions_path: Utf8PathBuf::from("."),
        cancel: CancellationToken::new(),
    }
}

fn ids(contributions: &[Contribution]) -> Vec<&str> {
    contributions
        .iter()
        .flat_map(|contribution| contribution.actions.iter().map(Action::id))
        .collect()
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[rstest]
fn results_follow_plugin_order_not_completion_order(context: DiscoveryContext) {
    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(StaticSource::new("slow", &["a"]).delayed(Duration::from_millis(150))),
        Arc::new(Silent),
        Arc::new(StaticSource::new("fast", &["b", "c"])),
    ];
    let contributions = discover(&plugins, &context, Duration::from_secs(5)).expect("discover");
    assert_eq!(contributions.len(), 2);
    assert_eq!(ids(&contributions), ["a", "b", "c"]);
}

#[rstest]
fn plugins_run_concurrently_under_one_deadline(context: DiscoveryContext) {
    let plugins: Vec<Arc<dyn Plugin>> = (0..4)
        .map(|index| {
            let names = ["one", "two", "three", "four"];
            let name = names.get(index).copied().unwrap_or("other");
            Arc::new(StaticSource::new(name, &[]).delayed(Duration::from_millis(200)))
                as Arc<dyn Plugin>
        })
        .collect();
    let started = Instant::now();
    discover(&plugins, &context, Duration::from_millis(600)).expect("discover");
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[rstest]
fn timeout_discards_every_result(context: DiscoveryContext) {
    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(StaticSource::new("quick", &["a"])),
        Arc::new(StaticSource::new("stuck", &["b"]).delayed(Duration::from_secs(2))),
    ];
    let error = discover(&plugins, &context, Duration::from_millis(100)).expect_err("timeout");
    assert!(matches!(error, DiscoveryError::Timeout { timeout_ms: 100 }));
}

#[rstest]
fn plugin_failure_aborts_discovery(context: DiscoveryContext) {
    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(StaticSource::new("good", &["a"])),
        Arc::new(StaticSource::new("bad", &[]).failing()),
    ];
    let error = discover(&plugins, &context, Duration::from_secs(5)).expect_err("failure");
    assert!(matches!(error, DiscoveryError::Plugin { plugin, .. } if plugin.name() == "bad"));
}

#[rstest]
fn caller_cancellation_stops_waiting(context: DiscoveryContext) {
    let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(
        StaticSource::new("stuck", &["a"]).delayed(Duration::from_secs(2)),
    )];
    context.cancel.cancel();
    let error = discover(&plugins, &context, Duration::from_secs(5)).expect_err("cancelled");
    assert!(matches!(error, DiscoveryError::Cancelled));
}

#[rstest]
fn no_discovery_plugins_yields_nothing(context: DiscoveryContext) {
    let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(Silent)];
    let contributions = discover(&plugins, &context, Duration::from_millis(10)).expect("discover");
    assert!(contributions.is_empty());
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn duplicates_are_skipped_and_the_rest_registered() {
    let contributions = vec![
        Contribution {
            plugin: CapabilityId::new("tests", "first"),
            actions: vec![action("build"), action("deploy")],
        },
        Contribution {
            plugin: CapabilityId::new("tests", "second"),
            actions: vec![action("deploy"), action("lint")],
        },
    ];
    let mut manager = ActionManager::new();
    let registered = register(&mut manager, contributions);
    assert_eq!(registered, 3);
    assert_eq!(manager.ids().collect::<Vec<_>>(), ["build", "deploy", "lint"]);
}
