//! Process-wide persistent flags.
//!
//! These flags are attached to the root command as global arguments so they
//! are accepted before or after any subcommand. Their resolved values are
//! copied into the `persistent` flag group of every action input.

use clap::{ArgAction, Args};

use crate::logging::{LogFormat, LogLevel};

/// Help heading under which persistent flags are rendered.
pub const GLOBAL_HEADING: &str = "Global Options";

/// Long flag names owned by the root command; actions may not reuse them.
pub const RESERVED_FLAGS: &[&str] = &[
    "help",
    "version",
    "log-level",
    "log-format",
    "verbose",
    "quiet",
];

/// Flags accepted by every command.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentFlags {
    /// Log level (disabled, error, warn, info, debug, trace).
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        global = true,
        help_heading = GLOBAL_HEADING
    )]
    pub log_level: Option<LogLevel>,
    /// Increase log verbosity; repeat for more detail.
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help_heading = GLOBAL_HEADING
    )]
    pub verbose: u8,
    /// Log format (json, compact).
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        global = true,
        help_heading = GLOBAL_HEADING
    )]
    pub log_format: Option<LogFormat>,
    /// Suppress log output.
    #[arg(short = 'q', long = "quiet", global = true, help_heading = GLOBAL_HEADING)]
    pub quiet: bool,
}
