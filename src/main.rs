//! Binary entry point for vibefork.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use clap::Parser;
use std::process::ExitCode;
use vibefork::cli::output::format_error;
use vibefork::cli::{execute, Cli, Outcome};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(&cli) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Interrupted) => ExitCode::from(130),
        Err(e) => {
            eprintln!("{}", format_error(&e));
            ExitCode::FAILURE
        }
    }
}
