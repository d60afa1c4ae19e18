//! The `stowage` binary.

use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    stowage_cli::cli::execute()
}
