//! Bulk first-run indexing over every transcript under the producer's root,
//! with resumable state, a per-session cooperative deadline, and optional
//! parallel/batch execution modes (§4.11).

use super::state::SetupState;
use crate::chunking::MessageChunker;
use crate::embedding::EmbeddingGateway;
use crate::error::Result;
use crate::indexer::{discover_candidates, index_path, project_for_path};
use crate::io::TranscriptReader;
use crate::storage::{SessionRegistry, VectorStore};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Tunables for one bulk-setup run, mirroring §4.14's `setup` group.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    /// Cooperative per-session deadline.
    pub timeout_per_session: Duration,
    /// Sessions per child batch in batch mode.
    pub batch_size: usize,
    /// Worker threads in parallel mode (1 = sequential).
    pub workers: usize,
    /// Skip paths already recorded in `setup_state.json`.
    pub resume: bool,
    /// Re-queue paths previously recorded as timed out.
    pub retry_timeouts: bool,
    /// Emit a progress event every this many completed sessions.
    pub progress_every: usize,
    /// Checkpoint interval forwarded to the pipeline.
    pub checkpoint_interval: usize,
    /// Minimum file size, in bytes, to be considered a candidate.
    pub min_size_bytes: u64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            timeout_per_session: Duration::from_secs(30),
            batch_size: 5,
            workers: 1,
            resume: true,
            retry_timeouts: false,
            progress_every: 1,
            checkpoint_interval: 15,
            min_size_bytes: 100,
        }
    }
}

/// One progress update, suitable for relaying to a CLI progress bar.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Sessions completed (processed, timed out, or failed) this run.
    pub processed: usize,
    /// Total candidate sessions for this run.
    pub total: usize,
    /// Wall-clock time elapsed since the run started.
    pub elapsed: Duration,
    /// Linear-extrapolation ETA for the remaining sessions.
    pub eta: Option<Duration>,
    /// File name currently being (or just) processed.
    pub current_file: String,
}

/// Terminal status of a bulk-setup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Every candidate was processed, timed out, or failed; none skipped.
    Completed {
        /// Sessions successfully indexed.
        processed: usize,
        /// Sessions that failed.
        failed: usize,
        /// Sessions that exceeded the per-session deadline.
        timed_out: usize,
    },
    /// A cancellation signal was observed; state was saved for resume.
    Interrupted {
        /// Sessions completed before the interruption.
        processed: usize,
    },
}

struct Deps {
    reader: TranscriptReader,
    chunker: MessageChunker,
    gateway: EmbeddingGateway,
    store: VectorStore,
    registry: SessionRegistry,
}

enum SessionResult {
    Processed,
    Failed(String),
    TimedOut,
}

/// Runs one session through the pipeline under a cooperative deadline. If
/// the deadline elapses the spawned thread is left to finish in the
/// background (Rust has no safe thread-kill primitive); its eventual
/// result is simply dropped.
fn run_one_with_deadline(
    path: &Path,
    project: &str,
    deps: &Arc<Deps>,
    checkpoint_interval: usize,
    deadline: Duration,
) -> SessionResult {
    let (tx, rx) = channel();
    let path_owned = path.to_path_buf();
    let project_owned = project.to_string();
    let deps = Arc::clone(deps);
    std::thread::spawn(move || {
        let result = index_path(
            &path_owned,
            &project_owned,
            &deps.reader,
            &deps.chunker,
            &deps.gateway,
            &deps.store,
            &deps.registry,
            None,
            checkpoint_interval,
            |_| {},
        );
        let _ = tx.send(result);
    });

    match rx.recv_timeout(deadline) {
        Ok(Ok(_)) => SessionResult::Processed,
        Ok(Err(e)) => SessionResult::Failed(e.to_string()),
        Err(_) => SessionResult::TimedOut,
    }
}

/// Runs bulk setup over every `.jsonl` candidate under `root`.
///
/// # Errors
///
/// Returns an error if the state file cannot be saved.
#[allow(clippy::too_many_arguments)]
pub fn run_setup(
    root: &Path,
    state_path: &Path,
    reader: TranscriptReader,
    chunker: MessageChunker,
    gateway: EmbeddingGateway,
    store: VectorStore,
    registry: SessionRegistry,
    config: &SetupConfig,
    cancel: &Arc<AtomicBool>,
    on_progress: impl FnMut(ProgressEvent) + Send,
) -> Result<SetupOutcome> {
    let candidates = discover_candidates(root, config.min_size_bytes);
    run_over_candidates(root, &candidates, state_path, reader, chunker, gateway, store, registry, config, cancel, on_progress)
}

/// Runs setup over an explicit candidate list rather than a freshly
/// discovered one. Used by a `--run-batch`-invoked child process, which
/// receives its slice of paths from the parent instead of rediscovering
/// the whole tree.
///
/// # Errors
///
/// Returns an error if the state file cannot be saved.
#[allow(clippy::too_many_arguments)]
pub fn run_setup_batch(
    root: &Path,
    paths: &[PathBuf],
    state_path: &Path,
    reader: TranscriptReader,
    chunker: MessageChunker,
    gateway: EmbeddingGateway,
    store: VectorStore,
    registry: SessionRegistry,
    config: &SetupConfig,
    cancel: &Arc<AtomicBool>,
    on_progress: impl FnMut(ProgressEvent) + Send,
) -> Result<SetupOutcome> {
    run_over_candidates(root, paths, state_path, reader, chunker, gateway, store, registry, config, cancel, on_progress)
}

#[allow(clippy::too_many_arguments)]
fn run_over_candidates(
    root: &Path,
    candidates: &[PathBuf],
    state_path: &Path,
    reader: TranscriptReader,
    chunker: MessageChunker,
    gateway: EmbeddingGateway,
    store: VectorStore,
    registry: SessionRegistry,
    config: &SetupConfig,
    cancel: &Arc<AtomicBool>,
    on_progress: impl FnMut(ProgressEvent) + Send,
) -> Result<SetupOutcome> {
    let deps = Arc::new(Deps { reader, chunker, gateway, store, registry });

    let mut state = if config.resume { SetupState::load(state_path) } else { SetupState::default() };
    if config.retry_timeouts {
        state.clear_timeouts();
    }

    let pending: Vec<PathBuf> = candidates
        .iter()
        .filter(|p| !state.is_processed(&p.to_string_lossy()))
        .cloned()
        .collect();

    let total = pending.len();
    let start = Instant::now();
    let state = Mutex::new(state);
    let completed = Mutex::new(0usize);
    let on_progress = Mutex::new(on_progress);

    let process_one = |path: &Path| {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let key = path.to_string_lossy().to_string();
        let project = project_for_path(path, root);
        match run_one_with_deadline(path, &project, &deps, config.checkpoint_interval, config.timeout_per_session) {
            SessionResult::Processed => state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).mark_processed(&key),
            SessionResult::Failed(reason) => {
                state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).mark_failed(&key, reason);
            }
            SessionResult::TimedOut => state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).mark_timed_out(&key),
        }
        state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).save(state_path).ok();

        let n = {
            let mut guard = completed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += 1;
            *guard
        };
        if n % config.progress_every.max(1) == 0 || n == total {
            let elapsed = start.elapsed();
            let eta = if n > 0 {
                let per_session = elapsed.as_secs_f64() / n as f64;
                Some(Duration::from_secs_f64(per_session * (total.saturating_sub(n)) as f64))
            } else {
                None
            };
            (on_progress.lock().unwrap_or_else(std::sync::PoisonError::into_inner))(ProgressEvent {
                processed: n,
                total,
                elapsed,
                eta,
                current_file: path.file_name().map_or_else(|| key.clone(), |n| n.to_string_lossy().to_string()),
            });
        }
        true
    };

    if config.workers <= 1 {
        for path in &pending {
            if !process_one(path) {
                let processed = *completed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                return Ok(SetupOutcome::Interrupted { processed });
            }
        }
    } else {
        let queue = Arc::new(Mutex::new(VecDeque::from(pending.clone())));
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        std::thread::scope(|scope| {
            for _ in 0..config.workers {
                let queue = Arc::clone(&queue);
                let cancelled = Arc::clone(&cancelled);
                let process_one = &process_one;
                scope.spawn(move || loop {
                    let next = queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop_front();
                    let Some(path) = next else { break };
                    if !process_one(&path) {
                        cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                });
            }
        });
        if cancelled.load(Ordering::SeqCst) {
            let processed = *completed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            return Ok(SetupOutcome::Interrupted { processed });
        }
    }

    let final_state = state.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
    Ok(SetupOutcome::Completed {
        processed: final_state.processed_paths.len(),
        failed: final_state.failed_paths.len(),
        timed_out: final_state.timed_out_paths.len(),
    })
}

/// Splits `paths` into batch-mode groups of `batch_size` and, for each
/// group, re-execs the current binary with `--run-batch <paths-file>` via
/// `build_args`, waiting for it to exit before moving to the next batch.
/// The parent only ever reads `state_path`, never processes sessions
/// itself, so a crashed child never re-does completed work.
///
/// # Errors
///
/// Returns an error if the paths file cannot be written or the child
/// process cannot be spawned.
pub fn run_batch_mode(
    root: &Path,
    state_path: &Path,
    config: &SetupConfig,
    build_args: impl Fn(&Path) -> Vec<String>,
    cancel: &Arc<AtomicBool>,
) -> Result<SetupOutcome> {
    let state = SetupState::load(state_path);
    let candidates = discover_candidates(root, config.min_size_bytes);
    let pending: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|p| !state.is_processed(&p.to_string_lossy()))
        .collect();

    let batch_size = config.batch_size.max(1);
    let mut processed_total = 0usize;
    for (batch_index, chunk) in pending.chunks(batch_size).enumerate() {
        if cancel.load(Ordering::SeqCst) {
            return Ok(SetupOutcome::Interrupted { processed: processed_total });
        }

        let list_path = state_path.with_file_name(format!("batch-{batch_index}.txt"));
        let body = chunk.iter().map(|p| p.to_string_lossy().to_string()).collect::<Vec<_>>().join("\n");
        std::fs::write(&list_path, body)?;

        let exe = std::env::current_exe().map_err(crate::error::Error::Io)?;
        let status = std::process::Command::new(exe)
            .args(build_args(&list_path))
            .status()
            .map_err(crate::error::Error::Io)?;
        let _ = std::fs::remove_file(&list_path);

        let reloaded = SetupState::load(state_path);
        processed_total = reloaded.processed_paths.len();
        if !status.success() {
            tracing::warn!(?status, "batch child exited non-zero, continuing with next batch");
        }
    }

    let final_state = SetupState::load(state_path);
    Ok(SetupOutcome::Completed {
        processed: final_state.processed_paths.len(),
        failed: final_state.failed_paths.len(),
        timed_out: final_state.timed_out_paths.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{BatchConfig, EmbeddingCache, FallbackEmbedder};
    use std::io::Write as _;

    fn deps(dir: &Path) -> (TranscriptReader, MessageChunker, EmbeddingGateway, VectorStore, SessionRegistry) {
        let cache = EmbeddingCache::load(&dir.join("cache.json")).unwrap();
        let gateway = EmbeddingGateway::new(Box::new(FallbackEmbedder::new(16)), cache, BatchConfig::default());
        let store = VectorStore::in_memory().unwrap();
        let registry = SessionRegistry::load(&dir.join("registry.json")).unwrap();
        (TranscriptReader::new(), MessageChunker::default(), gateway, store, registry)
    }

    fn write_transcript(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{content}").unwrap();
        path
    }

    #[test]
    fn test_run_setup_indexes_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        write_transcript(dir.path(), "a.jsonl", r#"{"role":"user","content":"alpha question about routing"}"#);
        write_transcript(dir.path(), "b.jsonl", r#"{"role":"user","content":"beta question about caching"}"#);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let state_path = dir.path().join("setup_state.json");
        let cancel = Arc::new(AtomicBool::new(false));
        let config = SetupConfig::default();
        let mut events = Vec::new();
        let outcome = run_setup(dir.path(), &state_path, reader, chunker, gateway, store, registry, &config, &cancel, |e| events.push(e)).unwrap();
        assert_eq!(outcome, SetupOutcome::Completed { processed: 2, failed: 0, timed_out: 0 });
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_resume_skips_processed_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_transcript(dir.path(), "a.jsonl", r#"{"role":"user","content":"alpha question about routing"}"#);
        let state_path = dir.path().join("setup_state.json");
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let cancel = Arc::new(AtomicBool::new(false));
        run_setup(dir.path(), &state_path, reader, chunker, gateway, store, registry, &SetupConfig::default(), &cancel, |_| {}).unwrap();

        write_transcript(dir.path(), "b.jsonl", r#"{"role":"user","content":"beta question about caching"}"#);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let mut events = Vec::new();
        let outcome = run_setup(dir.path(), &state_path, reader, chunker, gateway, store, registry, &SetupConfig::default(), &cancel, |e| events.push(e)).unwrap();
        assert_eq!(outcome, SetupOutcome::Completed { processed: 2, failed: 0, timed_out: 0 });
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_cancel_before_start_interrupts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        write_transcript(dir.path(), "a.jsonl", r#"{"role":"user","content":"alpha"}"#);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let state_path = dir.path().join("setup_state.json");
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = run_setup(dir.path(), &state_path, reader, chunker, gateway, store, registry, &SetupConfig::default(), &cancel, |_| {}).unwrap();
        assert_eq!(outcome, SetupOutcome::Interrupted { processed: 0 });
    }

    #[test]
    fn test_parallel_workers_process_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            write_transcript(dir.path(), &format!("s{i}.jsonl"), &format!(r#"{{"role":"user","content":"question number {i} about things"}}"#));
        }
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let state_path = dir.path().join("setup_state.json");
        let cancel = Arc::new(AtomicBool::new(false));
        let config = SetupConfig { workers: 2, ..Default::default() };
        let outcome = run_setup(dir.path(), &state_path, reader, chunker, gateway, store, registry, &config, &cancel, |_| {}).unwrap();
        assert_eq!(outcome, SetupOutcome::Completed { processed: 4, failed: 0, timed_out: 0 });
    }

    #[test]
    fn test_run_setup_batch_processes_given_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_transcript(dir.path(), "a.jsonl", r#"{"role":"user","content":"alpha question about routing"}"#);
        write_transcript(dir.path(), "b.jsonl", r#"{"role":"user","content":"beta question about caching"}"#);
        let (reader, chunker, gateway, store, registry) = deps(dir.path());
        let state_path = dir.path().join("setup_state.json");
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome =
            run_setup_batch(dir.path(), &[a], &state_path, reader, chunker, gateway, store, registry, &SetupConfig::default(), &cancel, |_| {})
                .unwrap();
        assert_eq!(outcome, SetupOutcome::Completed { processed: 1, failed: 0, timed_out: 0 });
    }
}
