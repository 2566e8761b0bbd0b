//! Command-line entry point: argument parsing, subcommand execution, and
//! human-readable progress/error formatting.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::{execute, Outcome};
pub use parser::{Cli, Commands};
