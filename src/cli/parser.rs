//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vibefork: local semantic search and session-forking over AI
/// coding-assistant transcripts.
#[derive(Parser, Debug)]
#[command(name = "vibefork")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base directory for all persistent state.
    ///
    /// Defaults to a user-scoped data directory. Overridden by the
    /// `STORAGE_DIR` environment variable.
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,

    /// Root directory the transcript producer writes into.
    ///
    /// Overridden by the `PRODUCER_DIR` environment variable.
    #[arg(long, global = true)]
    pub claude_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs the JSON-RPC dispatcher over stdio until EOF or a shutdown
    /// signal.
    Serve,

    /// Bulk-indexes every transcript under `claude_dir`, with optional
    /// resume, parallelism, and batch re-exec.
    Setup {
        /// Re-exec the binary per batch instead of processing in one run.
        #[arg(long)]
        batch_mode: bool,

        /// Sessions per batch, when `--batch-mode` is set.
        #[arg(long, default_value = "5")]
        batch_size: usize,

        /// Forces CPU-only embedding even if a GPU backend is available.
        #[arg(long)]
        use_cpu: bool,

        /// Per-session cooperative deadline, in seconds.
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Parallel worker count (1 = sequential).
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Resume from the last checkpointed `setup_state.json`.
        #[arg(long)]
        resume: bool,

        /// Re-attempt sessions previously recorded as timed out.
        #[arg(long)]
        retry_timeouts: bool,

        /// Internal: runs one batch against the newline-delimited path
        /// list at this file, then exits. Set by `--batch-mode`'s own
        /// re-exec; not intended for direct use.
        #[arg(long, hide = true)]
        run_batch: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_serve() {
        let cli = Cli::parse_from(["vibefork", "serve"]);
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn test_parses_setup_with_flags() {
        let cli = Cli::parse_from(["vibefork", "setup", "--batch-mode", "--workers", "4", "--resume"]);
        let Commands::Setup { batch_mode, workers, resume, .. } = cli.command else {
            unreachable!("expected Setup");
        };
        assert!(batch_mode);
        assert_eq!(workers, 4);
        assert!(resume);
    }
}
