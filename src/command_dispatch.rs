//! Purpose: Hold top-level CLI command dispatch for `envsplit`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command writes exactly one JSON document to stdout on success.
//! Invariants: Helpers in `main.rs` remain the source of command business logic.

use super::*;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Build(args) => run_build(args, color_mode),
        Command::Scan { file, directive } => run_scan(&file, directive, color_mode),
        Command::Id { command } => run_id(command, color_mode),
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
    }
}
