//! `studyvault` command-line entry point.
//!
//! Opens the configured SQLite store, brings it up to date with the
//! migration cascade and dispatches one command.

mod cli;
mod commands;

use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    match commands::run(cli::Cli::parse()) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("studyvault error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
