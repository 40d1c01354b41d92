//! Action discovery from `action.yaml` manifests.
//!
//! [`ManifestPlugin`] walks the configured actions path for
//! `<dir>/actions/<name>/action.yaml` files. Each match becomes a lazy
//! [`Action`] whose ID is the dotted path of `<dir>` relative to the search
//! root, a colon, and `<name>` (`tools.lint:check`). Manifests at the root
//! (`actions/<name>/action.yaml`) use the bare name. Hidden directories are
//! not searched.
//!
//! Manifests are parsed only when the action is first materialised, so a
//! tree with hundreds of actions costs one directory walk at startup.
//!
//! ```yaml
//! action:
//!   title: Lint sources
//!   aliases: [lint]
//!   options:
//!     - name: fix
//!       type: boolean
//!       default: false
//! runtime:
//!   type: container
//!   image: ghcr.io/example/lint:1
//!   command: [lint, --all]
//! ```

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::action::{Action, ActionDefinition, ActionLoader, Runtime};
use crate::cancel::CancellationToken;
use crate::container::{ContainerDriver, ContainerRuntime, ContainerSpec};
use crate::error::{ActionError, HookError};
use crate::plugin::{
    ActionDiscovery, AppInit, DiscoveryContext, MAX_WEIGHT, OnAppInit, Plugin, PluginInfo,
};

mod functions;

pub use self::functions::FunctionCatalog;

/// Tracing target for manifest discovery.
const MANIFEST_TARGET: &str = "marshal_core::manifest";

/// File name of an action manifest.
pub const MANIFEST_FILE: &str = "action.yaml";

/// Directory holding one sub-directory per action.
pub const ACTIONS_DIR: &str = "actions";

/// Parsed `action.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionManifest {
    /// Definition block.
    pub action: ActionDefinition,
    /// Runtime selector.
    pub runtime: RuntimeSpec,
}

/// Runtime selector of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeSpec {
    /// Run inside a container.
    Container(ContainerSpec),
    /// Run a function registered in the [`FunctionCatalog`].
    Function {
        /// Catalog name.
        name: String,
    },
}

impl ActionManifest {
    /// Parses manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Manifest`] naming `path` when the text is not a
    /// valid manifest.
    pub fn parse(path: &Utf8Path, text: &str) -> Result<Self, ActionError> {
        serde_saphyr::from_str(text).map_err(|error| ActionError::Manifest {
            path: path.to_string(),
            message: error.to_string(),
        })
    }
}

#[derive(Clone)]
struct Wiring {
    driver: Arc<dyn ContainerDriver>,
    functions: Arc<FunctionCatalog>,
}

/// Built-in plugin discovering manifest-backed actions.
///
/// It runs last during app-init so services registered by other plugins
/// (a replacement container driver, catalog functions) are in place.
#[derive(Default)]
pub struct ManifestPlugin {
    wiring: OnceCell<Wiring>,
}

impl std::fmt::Debug for ManifestPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestPlugin")
            .field("wired", &self.wiring.get().is_some())
            .finish()
    }
}

impl ManifestPlugin {
    /// Creates an unwired plugin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for ManifestPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo::of::<Self>().with_weight(MAX_WEIGHT)
    }

    fn as_app_init(&self) -> Option<&dyn OnAppInit> {
        Some(self)
    }

    fn as_action_discovery(&self) -> Option<&dyn ActionDiscovery> {
        Some(self)
    }
}

impl OnAppInit for ManifestPlugin {
    fn on_app_init(&self, app: &mut AppInit<'_>) -> Result<(), HookError> {
        let driver = app.services.get_or_create::<dyn ContainerDriver>()?;
        let functions = app.services.get_or_create::<FunctionCatalog>()?;
        if self.wiring.set(Wiring { driver, functions }).is_err() {
            debug!(target: MANIFEST_TARGET, "manifest plugin already wired");
        }
        Ok(())
    }
}

impl ActionDiscovery for ManifestPlugin {
    fn discover_actions(&self, context: &DiscoveryContext) -> Result<Vec<Action>, HookError> {
        let wiring = self
            .wiring
            .get()
            .ok_or("manifest plugin used before app-init")?;
        let root = context.actions_path.as_path();
        if !root.is_dir() {
            debug!(
                target: MANIFEST_TARGET,
                path = %root,
                "actions path is not a directory; nothing to discover"
            );
            return Ok(Vec::new());
        }
        let found = scan(root, &context.cancel)?;
        debug!(
            target: MANIFEST_TARGET,
            path = %root,
            manifests = found.len(),
            "manifest scan complete"
        );
        Ok(found
            .into_iter()
            .map(|(id, path)| {
                let loader = ManifestLoader {
                    path,
                    wiring: wiring.clone(),
                };
                Action::lazy(id, Arc::new(loader))
            })
            .collect())
    }
}

struct ManifestLoader {
    path: Utf8PathBuf,
    wiring: Wiring,
}

impl ActionLoader for ManifestLoader {
    fn load(&self, id: &str) -> Result<(ActionDefinition, Arc<dyn Runtime>), ActionError> {
        debug!(target: MANIFEST_TARGET, action = id, path = %self.path, "loading manifest");
        let text = fs::read_to_string(&self.path).map_err(|error| ActionError::Manifest {
            path: self.path.to_string(),
            message: error.to_string(),
        })?;
        let manifest = ActionManifest::parse(&self.path, &text)?;
        let runtime: Arc<dyn Runtime> = match manifest.runtime {
            RuntimeSpec::Container(spec) => {
                Arc::new(ContainerRuntime::new(spec, Arc::clone(&self.wiring.driver)))
            }
            RuntimeSpec::Function { name } => {
                self.wiring
                    .functions
                    .get(&name)
                    .ok_or_else(|| ActionError::Definition {
                        id: id.to_owned(),
                        message: format!("no function named '{name}' is registered"),
                    })?
            }
        };
        Ok((manifest.action, runtime))
    }
}

/// Finds every manifest below `root`, sorted by ID.
///
/// # Errors
///
/// Returns an error when `root` cannot be read or `cancel` fires.
pub fn scan(
    root: &Utf8Path,
    cancel: &CancellationToken,
) -> Result<Vec<(String, Utf8PathBuf)>, HookError> {
    let mut found = Vec::new();
    let mut pending: Vec<(Utf8PathBuf, Vec<String>)> = vec![(root.to_owned(), Vec::new())];
    while let Some((dir, segments)) = pending.pop() {
        if cancel.is_cancelled() {
            return Err("manifest scan cancelled".into());
        }
        for (name, path) in subdirectories(&dir)? {
            if name == ACTIONS_DIR {
                collect_actions(&path, &segments, &mut found)?;
            } else {
                let mut nested = segments.clone();
                nested.push(name);
                pending.push((path, nested));
            }
        }
    }
    found.sort();
    Ok(found)
}

fn collect_actions(
    dir: &Utf8Path,
    segments: &[String],
    found: &mut Vec<(String, Utf8PathBuf)>,
) -> Result<(), HookError> {
    for (name, path) in subdirectories(dir)? {
        let manifest = path.join(MANIFEST_FILE);
        if !manifest.is_file() {
            continue;
        }
        let id = if segments.is_empty() {
            name
        } else {
            format!("{}:{name}", segments.join("."))
        };
        found.push((id, manifest));
    }
    Ok(())
}

/// Visible sub-directories of `dir` with UTF-8 names.
fn subdirectories(dir: &Utf8Path) -> Result<Vec<(String, Utf8PathBuf)>, HookError> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let entry = item?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            warn!(
                target: MANIFEST_TARGET,
                path = %entry.path().display(),
                "skipping directory with a non UTF-8 name"
            );
            continue;
        };
        let Some(name) = path.file_name().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        entries.push((name, path));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests;
