//! Named in-process runtimes referenced by `type: function` manifests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::action::Runtime;
use crate::error::ServiceError;
use crate::service::{DefaultService, Service, ServiceRegistry};

/// Registry of in-process runtimes addressable by name.
///
/// Plugins add functions during app-init; manifests bind to them when the
/// action is first loaded.
#[derive(Default)]
pub struct FunctionCatalog {
    functions: RwLock<BTreeMap<String, Arc<dyn Runtime>>>,
}

impl fmt::Debug for FunctionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FunctionCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `runtime` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, runtime: Arc<dyn Runtime>) {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), runtime);
    }

    /// Runtime registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Runtime>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Arc::clone)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl Service for FunctionCatalog {}

impl DefaultService for FunctionCatalog {
    fn create_default(_registry: &mut ServiceRegistry) -> Result<Arc<Self>, ServiceError> {
        Ok(Arc::new(Self::new()))
    }
}
