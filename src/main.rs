//! `configsync` command-line entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use configsync::{cli, commands, logging};

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    let command = args.command.name();
    logging::init_subscriber(args.verbose, command);
    let log = Arc::new(logging::Logger::new(command));

    match commands::run(&args, &log) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
