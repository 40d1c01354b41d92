//! Unit tests for plugin registration and ordering.

use std::sync::Arc;

use rstest::rstest;

use super::*;

struct Weighted {
    id: CapabilityId,
    weight: i32,
}

impl Plugin for Weighted {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id,
            weight: self.weight,
        }
    }
}

fn plugin(name: &'static str, weight: i32) -> Arc<dyn Plugin> {
    Arc::new(Weighted {
        id: CapabilityId::new("tests", name),
        weight,
    })
}

fn names(registry: &PluginRegistry) -> Vec<&'static str> {
    registry
        .ordered()
        .iter()
        .map(|plugin| plugin.info().id.name())
        .collect()
}

#[test]
fn duplicate_identity_is_rejected() {
    let mut registry = PluginRegistry::new();
    registry.register(plugin("alpha", 0)).expect("first");
    let error = registry
        .register(plugin("alpha", 5))
        .expect_err("same identity");
    assert!(matches!(error, PluginError::Duplicate { plugin } if plugin.name() == "alpha"));
    assert_eq!(registry.len(), 1);
}

#[rstest]
#[case(&[("c", 30), ("a", 10), ("b", 20)], &["a", "b", "c"])]
#[case(&[("first", 0), ("second", 0), ("third", 0)], &["first", "second", "third"])]
#[case(&[("late", MAX_WEIGHT), ("x", 1), ("early", -5), ("y", 1)], &["early", "x", "y", "late"])]
fn ordering_is_by_weight_then_registration(
    #[case] plugins: &[(&'static str, i32)],
    #[case] expected: &[&str],
) {
    let mut registry = PluginRegistry::new();
    for (name, weight) in plugins {
        registry.register(plugin(*name, *weight)).expect("register");
    }
    assert_eq!(names(&registry), expected);
}

#[test]
fn info_derives_identity_from_type() {
    struct Probe;
    let info = PluginInfo::of::<Probe>().with_weight(7);
    assert_eq!(info.id.name(), "Probe");
    assert_eq!(info.weight, 7);
}

#[test]
fn hooks_default_to_absent() {
    let plugin = plugin("bare", 0);
    assert!(plugin.as_app_init().is_none());
    assert!(plugin.as_action_discovery().is_none());
    assert!(plugin.as_action_alter().is_none());
    assert!(plugin.as_command_registration().is_none());
    assert!(plugin.as_generate().is_none());
}
