//! CLI entrypoint for the marshal action orchestrator.
//!
//! The binary delegates to [`marshal_cli::run`], which registers the built-in
//! plugins, bootstraps them, synthesises one subcommand per discovered action
//! and runs whichever command was selected.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    marshal_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
