//! First-run (and on-demand) bulk indexing over every transcript under the
//! producer's root, with resumable state and optional parallel/batch modes.

mod orchestrator;
mod state;

pub use orchestrator::{run_batch_mode, run_setup, run_setup_batch, ProgressEvent, SetupConfig, SetupOutcome};
pub use state::{default_state_path, SetupState};
