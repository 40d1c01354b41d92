//! Early argument scanning.
//!
//! Configuration and telemetry must be settled before bootstrap, but the full
//! command line cannot be parsed until bootstrap has discovered the actions.
//! This module picks the persistent flags out of the raw arguments ahead of
//! time and notes which command the user asked for, so only that action has
//! to be materialised.

use std::ffi::{OsStr, OsString};

use clap::{Args, Command, FromArgMatches};
use marshal_config::PersistentFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

/// Result of scanning the raw arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ArgumentScan {
    /// Persistent flags found anywhere before `--`.
    pub(crate) flags: PersistentFlags,
    /// First token that is neither a flag nor a flag value.
    pub(crate) command: Option<String>,
}

/// Scans `args` (including the binary name) for persistent flags and the
/// requested command.
///
/// Malformed persistent flags are ignored here; the full parse reports them.
pub(crate) fn scan_arguments(args: &[OsString]) -> ArgumentScan {
    let table = persistent_command();
    let mut selected: Vec<OsString> = Vec::new();
    let mut command = None;
    let mut tokens = args.iter().skip(1);

    while let Some(token) = tokens.next() {
        if token == "--" {
            break;
        }
        match classify(&table, token) {
            FlagAction::Include { needs_value } => {
                selected.push(token.clone());
                if needs_value {
                    selected.extend(tokens.next().cloned());
                }
            }
            FlagAction::Skip => {
                let is_flag = token.to_string_lossy().starts_with('-');
                if command.is_none() && !is_flag {
                    command = token.to_str().map(str::to_owned);
                }
            }
        }
    }

    let flags = table
        .try_get_matches_from(selected)
        .ok()
        .and_then(|matches| PersistentFlags::from_arg_matches(&matches).ok())
        .unwrap_or_default();
    ArgumentScan { flags, command }
}

fn persistent_command() -> Command {
    PersistentFlags::augment_args(Command::new("marshal").no_binary_name(true))
}

fn classify(table: &Command, argument: &OsStr) -> FlagAction {
    let Some(text) = argument.to_str() else {
        return FlagAction::Skip;
    };
    if let Some(long) = text.strip_prefix("--") {
        let (name, inline) = match long.split_once('=') {
            Some((name, _)) => (name, true),
            None => (long, false),
        };
        return table
            .get_arguments()
            .find(|arg| arg.get_long() == Some(name))
            .map_or(FlagAction::Skip, |arg| FlagAction::Include {
                needs_value: !inline && arg.get_action().takes_values(),
            });
    }
    let Some(shorts) = text.strip_prefix('-') else {
        return FlagAction::Skip;
    };
    let all_switches = !shorts.is_empty()
        && shorts.chars().all(|short| {
            table
                .get_arguments()
                .any(|arg| arg.get_short() == Some(short) && !arg.get_action().takes_values())
        });
    if all_switches {
        FlagAction::Include { needs_value: false }
    } else {
        FlagAction::Skip
    }
}

#[cfg(test)]
mod tests {
    use marshal_config::{LogFormat, LogLevel};
    use rstest::rstest;

    use super::*;

    fn scan(args: &[&str]) -> ArgumentScan {
        let owned: Vec<OsString> = args.iter().map(OsString::from).collect();
        scan_arguments(&owned)
    }

    #[test]
    fn flags_are_found_on_both_sides_of_the_command() {
        let result = scan(&["marshal", "--log-format=json", "deploy", "prod", "--log-level", "debug"]);
        assert_eq!(result.command.as_deref(), Some("deploy"));
        assert_eq!(result.flags.log_format, Some(LogFormat::Json));
        assert_eq!(result.flags.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn short_switch_clusters_are_counted() {
        let result = scan(&["marshal", "build", "-vvq"]);
        assert_eq!(result.flags.verbose, 2);
        assert!(result.flags.quiet);
    }

    #[test]
    fn flag_values_are_not_mistaken_for_commands() {
        let result = scan(&["marshal", "--log-level", "trace", "lint"]);
        assert_eq!(result.command.as_deref(), Some("lint"));
    }

    #[rstest]
    #[case(&["marshal", "--", "-q"])]
    #[case(&["marshal", "deploy", "--force", "-x"])]
    fn unrelated_flags_are_left_alone(#[case] args: &[&str]) {
        assert_eq!(scan(args).flags, PersistentFlags::default());
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let result = scan(&["marshal", "--log-level", "loud", "deploy"]);
        assert_eq!(result.flags, PersistentFlags::default());
        assert_eq!(result.command.as_deref(), Some("deploy"));
    }

    #[test]
    fn bare_invocations_have_no_command() {
        assert_eq!(scan(&["marshal"]).command, None);
    }
}
