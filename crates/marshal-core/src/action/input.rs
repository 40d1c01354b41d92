//! Per-invocation action input.

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::Serialize;
use serde_json::{Map, Value};

/// Flag group holding the process-wide persistent flags.
pub const PERSISTENT_GROUP: &str = "persistent";

/// Resolved invocation state: named arguments, named options and namespaced
/// flag groups.
///
/// Group names must never coincide with option names; the action manager
/// rejects input that breaks this rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Input {
    arguments: Map<String, Value>,
    options: Map<String, Value>,
    groups: BTreeMap<String, Map<String, Value>>,
}

impl Input {
    /// Creates empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a named argument.
    pub fn set_argument(&mut self, name: impl Into<String>, value: Value) {
        self.arguments.insert(name.into(), value);
    }

    /// Sets a named option.
    pub fn set_option(&mut self, name: impl Into<String>, value: Value) {
        self.options.insert(name.into(), value);
    }

    /// Replaces the flag group `name`.
    pub fn set_group(&mut self, name: impl Into<String>, values: Map<String, Value>) {
        self.groups.insert(name.into(), values);
    }

    /// Named arguments.
    #[must_use]
    pub const fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Named options.
    #[must_use]
    pub const fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// One argument value.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// One option value.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    /// One flag group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Map<String, Value>> {
        self.groups.get(name)
    }

    /// All flag groups, ordered by name.
    #[must_use]
    pub const fn groups(&self) -> &BTreeMap<String, Map<String, Value>> {
        &self.groups
    }

    pub(crate) const fn arguments_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.arguments
    }

    pub(crate) const fn options_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.options
    }
}

/// Input that passed validation. It cannot be modified; a new invocation
/// needs a fresh [`Input`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedInput(Input);

impl ValidatedInput {
    pub(crate) const fn new(input: Input) -> Self {
        Self(input)
    }

    /// Borrows the validated input.
    #[must_use]
    pub const fn input(&self) -> &Input {
        &self.0
    }
}

impl Deref for ValidatedInput {
    type Target = Input;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
