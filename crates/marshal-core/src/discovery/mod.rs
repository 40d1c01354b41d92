//! Bounded-time action discovery.
//!
//! Every plugin implementing [`ActionDiscovery`](crate::plugin::ActionDiscovery)
//! is called once, each on its own worker thread, under one deadline shared
//! by the whole fan-out. Results are all-or-nothing: if the deadline elapses
//! or any plugin fails, no action from this run is returned. Successful
//! results are registered one at a time; a rejected action is logged and
//! skipped without affecting the rest.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::action::{Action, ActionManager};
use crate::cancel::{CancellationToken, POLL_INTERVAL};
use crate::capability::CapabilityId;
use crate::error::{DiscoveryError, HookError};
use crate::plugin::{DiscoveryContext, Plugin};

/// Tracing target for discovery.
const DISCOVERY_TARGET: &str = "marshal_core::discovery";

/// Actions contributed by one plugin.
#[derive(Debug)]
pub struct Contribution {
    /// Contributing plugin.
    pub plugin: CapabilityId,
    /// Actions it returned, in its order.
    pub actions: Vec<Action>,
}

type WorkerResult = (usize, Result<Vec<Action>, HookError>);

/// Calls every discovery-capable plugin under one shared deadline.
///
/// Contributions are returned in plugin order regardless of completion
/// order.
///
/// # Errors
///
/// Returns [`DiscoveryError::Timeout`] when the deadline elapses,
/// [`DiscoveryError::Cancelled`] when the caller's token fires, and
/// [`DiscoveryError::Plugin`] or [`DiscoveryError::Worker`] when a plugin
/// fails.
pub fn discover(
    plugins: &[Arc<dyn Plugin>],
    context: &DiscoveryContext,
    timeout: Duration,
) -> Result<Vec<Contribution>, DiscoveryError> {
    let workers_token = context.cancel.child_with_timeout(timeout);
    let deadline = Instant::now().checked_add(timeout);
    let (sender, receiver) = mpsc::channel::<WorkerResult>();

    let mut slots: Vec<(CapabilityId, Option<Vec<Action>>)> = Vec::new();
    for plugin in plugins.iter().filter(|plugin| plugin.as_action_discovery().is_some()) {
        let index = slots.len();
        let id = plugin.info().id;
        slots.push((id, None));
        spawn_worker(index, Arc::clone(plugin), context, &workers_token, sender.clone())
            .map_err(|error| DiscoveryError::Worker {
                plugin: id,
                message: error.to_string(),
            })?;
    }
    drop(sender);

    debug!(
        target: DISCOVERY_TARGET,
        plugins = slots.len(),
        timeout_ms = millis(timeout),
        "starting action discovery"
    );

    let mut outstanding = slots.len();
    while outstanding > 0 {
        if context.cancel.is_cancelled() {
            workers_token.cancel();
            return Err(DiscoveryError::Cancelled);
        }
        let now = Instant::now();
        let remaining = deadline.map_or(POLL_INTERVAL, |limit| limit.saturating_duration_since(now));
        if remaining.is_zero() {
            workers_token.cancel();
            warn!(
                target: DISCOVERY_TARGET,
                outstanding,
                timeout_ms = millis(timeout),
                "action discovery timed out; discarding all results"
            );
            return Err(DiscoveryError::Timeout {
                timeout_ms: millis(timeout),
            });
        }

        match receiver.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok((index, Ok(actions))) => {
                if let Some((id, slot)) = slots.get_mut(index) {
                    debug!(
                        target: DISCOVERY_TARGET,
                        plugin = %id,
                        actions = actions.len(),
                        "plugin finished discovery"
                    );
                    *slot = Some(actions);
                }
                outstanding -= 1;
            }
            Ok((index, Err(source))) => {
                workers_token.cancel();
                let plugin = slots
                    .get(index)
                    .map_or_else(|| CapabilityId::new("", "unknown"), |(id, _)| *id);
                return Err(DiscoveryError::Plugin { plugin, source });
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let plugin = slots
                    .iter()
                    .find(|(_, slot)| slot.is_none())
                    .map_or_else(|| CapabilityId::new("", "unknown"), |(id, _)| *id);
                return Err(DiscoveryError::Worker {
                    plugin,
                    message: String::from("worker exited without reporting"),
                });
            }
        }
    }

    Ok(slots
        .into_iter()
        .map(|(plugin, actions)| Contribution {
            plugin,
            actions: actions.unwrap_or_default(),
        })
        .collect())
}

/// Registers contributed actions, skipping any the manager rejects.
///
/// Returns the number of actions registered.
pub fn register(manager: &mut ActionManager, contributions: Vec<Contribution>) -> usize {
    let mut registered = 0;
    for contribution in contributions {
        for action in contribution.actions {
            let id = action.id().to_owned();
            match manager.add(action) {
                Ok(()) => registered += 1,
                Err(error) => warn!(
                    target: DISCOVERY_TARGET,
                    plugin = %contribution.plugin,
                    action = %id,
                    error = %error,
                    "skipping action"
                ),
            }
        }
    }
    registered
}

fn spawn_worker(
    index: usize,
    plugin: Arc<dyn Plugin>,
    context: &DiscoveryContext,
    token: &CancellationToken,
    sender: mpsc::Sender<WorkerResult>,
) -> std::io::Result<()> {
    let worker_context = DiscoveryContext {
        actions_path: context.actions_path.clone(),
        cancel: token.clone(),
    };
    thread::Builder::new()
        .name(format!("marshal-discovery-{index}"))
        .spawn(move || {
            let result = plugin
                .as_action_discovery()
                .map_or_else(|| Ok(Vec::new()), |hook| hook.discover_actions(&worker_context));
            drop(sender.send((index, result)));
        })
        .map(drop)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
