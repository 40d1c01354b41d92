//! Structured reporting for bootstrap lifecycle events.

use std::sync::Arc;

use crate::bootstrap::Stage;
use crate::error::BootstrapError;

/// Observer trait used to surface bootstrap events to telemetry sinks.
pub trait BootstrapReporter: Send + Sync {
    /// Invoked before the first phase runs.
    fn bootstrap_starting(&self, plugins: usize);

    /// Invoked each time a stage is reached.
    fn stage_reached(&self, stage: Stage);

    /// Invoked after discovered actions are registered.
    fn actions_discovered(&self, contributed: usize, registered: usize);

    /// Invoked after alteration completes.
    fn bootstrap_succeeded(&self, actions: usize);

    /// Invoked when a phase fails; `stage` is the last completed stage.
    fn bootstrap_failed(&self, stage: Stage, error: &BootstrapError);
}

impl<T> BootstrapReporter for Arc<T>
where
    T: BootstrapReporter,
{
    fn bootstrap_starting(&self, plugins: usize) {
        (**self).bootstrap_starting(plugins);
    }

    fn stage_reached(&self, stage: Stage) {
        (**self).stage_reached(stage);
    }

    fn actions_discovered(&self, contributed: usize, registered: usize) {
        (**self).actions_discovered(contributed, registered);
    }

    fn bootstrap_succeeded(&self, actions: usize) {
        (**self).bootstrap_succeeded(actions);
    }

    fn bootstrap_failed(&self, stage: Stage, error: &BootstrapError) {
        (**self).bootstrap_failed(stage, error);
    }
}

/// Default reporter that records bootstrap events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredBootstrapReporter;

impl StructuredBootstrapReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BootstrapReporter for StructuredBootstrapReporter {
    fn bootstrap_starting(&self, plugins: usize) {
        tracing::info!(
            target: "marshal_core::bootstrap",
            event = "bootstrap_starting",
            plugins,
            "starting bootstrap"
        );
    }

    fn stage_reached(&self, stage: Stage) {
        tracing::debug!(
            target: "marshal_core::bootstrap",
            event = "stage_reached",
            stage = %stage,
            "bootstrap stage reached"
        );
    }

    fn actions_discovered(&self, contributed: usize, registered: usize) {
        let skipped = contributed.saturating_sub(registered);
        if skipped > 0 {
            tracing::warn!(
                target: "marshal_core::bootstrap",
                event = "actions_discovered",
                contributed,
                registered,
                skipped,
                "some discovered actions were skipped"
            );
        } else {
            tracing::info!(
                target: "marshal_core::bootstrap",
                event = "actions_discovered",
                contributed,
                registered,
                "actions discovered"
            );
        }
    }

    fn bootstrap_succeeded(&self, actions: usize) {
        tracing::info!(
            target: "marshal_core::bootstrap",
            event = "bootstrap_succeeded",
            actions,
            "bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, stage: Stage, error: &BootstrapError) {
        tracing::error!(
            target: "marshal_core::bootstrap",
            event = "bootstrap_failed",
            stage = %stage,
            error = %error,
            "bootstrap failed"
        );
    }
}
