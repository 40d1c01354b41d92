//! Structured telemetry initialisation for the CLI.
//!
//! Log records are written to standard error through the process-wide
//! [`SensitiveMask`], so a secret registered by any action never reaches the
//! terminal through a log line either.

use std::io::{self, IsTerminal, Stderr};
use std::sync::Arc;

use marshal_config::{Config, LogFormat};
use marshal_core::{MaskingWriter, SensitiveMask};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// `MakeWriter` producing masked standard-error writers.
///
/// Each log record gets its own writer, which is closed (and therefore fully
/// flushed) when the record has been formatted.
#[derive(Debug, Clone)]
pub struct MaskedStderr {
    mask: Arc<SensitiveMask>,
}

impl MaskedStderr {
    /// Masks log output with `mask`.
    #[must_use]
    pub const fn new(mask: Arc<SensitiveMask>) -> Self {
        Self { mask }
    }
}

impl<'a> MakeWriter<'a> for MaskedStderr {
    type Writer = MaskingWriter<Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        self.mask.writer(io::stderr())
    }
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Repeated calls are idempotent: only the first invocation installs the
/// global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or another global
/// subscriber is already installed.
pub fn initialise(config: &Config, mask: &Arc<SensitiveMask>) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config, mask))
        .map(|_| TelemetryHandle)
}

/// Filter directive for the resolved configuration.
#[must_use]
pub const fn filter_directive(config: &Config) -> &'static str {
    config.log_level().filter_directive()
}

fn install_subscriber(config: &Config, mask: &Arc<SensitiveMask>) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(filter_directive(config))
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let writer = MaskedStderr::new(Arc::clone(mask));

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(writer.clone())
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
