//! Filesystem-driven background indexing (§4.10): watches the Claude
//! transcript directory, debounces bursts of writes per path, and hands
//! settled paths to a fixed worker pool running [`super::pipeline::index_path`].

use super::pipeline::{index_path, project_for_path, IndexOutcome, IndexState};
use crate::chunking::MessageChunker;
use crate::embedding::EmbeddingGateway;
use crate::io::TranscriptReader;
use crate::storage::{SessionRegistry, VectorStore};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Tunables for the background indexer, mirroring §4.14's `indexing` group.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// How long a path must go quiet before it is enqueued for indexing.
    pub debounce_delay: Duration,
    /// How often the debounce-checker thread polls for settled paths.
    pub poll_interval: Duration,
    /// Number of worker threads draining the work queue.
    pub worker_count: usize,
    /// Capacity of the bounded work queue.
    pub queue_capacity: usize,
    /// Write a checkpoint sidecar every this many embedded chunks.
    pub checkpoint_interval: usize,
    /// Directory for checkpoint sidecars, if checkpointing is enabled.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            worker_count: 1,
            queue_capacity: 256,
            checkpoint_interval: 15,
            checkpoint_dir: None,
        }
    }
}

/// Dependencies the pipeline needs, shared read-only across worker threads.
struct Deps {
    root: PathBuf,
    reader: TranscriptReader,
    chunker: MessageChunker,
    gateway: EmbeddingGateway,
    store: Arc<VectorStore>,
    registry: Arc<SessionRegistry>,
}

/// Per-path indexing state, exposed for status reporting and tests.
#[derive(Default)]
struct StateTable {
    states: Mutex<HashMap<PathBuf, IndexState>>,
}

impl StateTable {
    fn set(&self, path: &Path, state: IndexState) {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).insert(path.to_path_buf(), state);
    }

    fn get(&self, path: &Path) -> IndexState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .unwrap_or(IndexState::Unknown)
    }
}

enum WorkItem {
    Path(PathBuf),
    Stop,
}

/// Watches a transcript root directory and indexes settled files in the
/// background, debouncing rapid writes and serializing concurrent events
/// for the same path.
pub struct BackgroundIndexer {
    _watcher: RecommendedWatcher,
    deps: Arc<Deps>,
    state: Arc<StateTable>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    work_tx: Sender<WorkItem>,
    debounce_stop: Arc<std::sync::atomic::AtomicBool>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl BackgroundIndexer {
    /// Starts watching `root` recursively, spawning the debounce thread and
    /// the worker pool. Non-`.jsonl` events are ignored.
    ///
    /// # Errors
    ///
    /// Returns a `notify::Error` if the underlying OS watch cannot be set up.
    ///
    /// `store` and `registry` are shared (not owned) so the same instances
    /// can be driven concurrently by the search orchestrator and the RPC
    /// tool layer.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        root: PathBuf,
        reader: TranscriptReader,
        chunker: MessageChunker,
        gateway: EmbeddingGateway,
        store: Arc<VectorStore>,
        registry: Arc<SessionRegistry>,
        config: IndexerConfig,
    ) -> Result<Self, notify::Error> {
        let deps = Arc::new(Deps { root: root.clone(), reader, chunker, gateway, store, registry });
        let state = Arc::new(StateTable::default());
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let (work_tx, work_rx) = channel::<WorkItem>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut handles = Vec::new();
        for _ in 0..config.worker_count.max(1) {
            let deps = Arc::clone(&deps);
            let state = Arc::clone(&state);
            let in_flight = Arc::clone(&in_flight);
            let work_rx = Arc::clone(&work_rx);
            let checkpoint_dir = config.checkpoint_dir.clone();
            let checkpoint_interval = config.checkpoint_interval;
            handles.push(std::thread::spawn(move || {
                worker_loop(&deps, &state, &in_flight, &work_rx, checkpoint_dir.as_deref(), checkpoint_interval);
            }));
        }

        let pending: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let (fs_tx, fs_rx): (Sender<notify::Result<Event>>, Receiver<notify::Result<Event>>) = channel();
        let mut watcher = RecommendedWatcher::new(fs_tx, notify::Config::default())?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        {
            let pending = Arc::clone(&pending);
            std::thread::spawn(move || {
                for res in fs_rx {
                    match res {
                        Ok(event) => record_event(&pending, &event),
                        Err(e) => tracing::warn!(error = %e, "transcript watcher error"),
                    }
                }
            });
        }

        let debounce_stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let pending = Arc::clone(&pending);
            let work_tx = work_tx.clone();
            let stop = Arc::clone(&debounce_stop);
            let delay = config.debounce_delay;
            let interval = config.poll_interval;
            std::thread::spawn(move || debounce_loop(&pending, &work_tx, delay, interval, &stop));
        }

        Ok(Self { _watcher: watcher, deps, state, in_flight, work_tx, debounce_stop, handles })
    }

    /// Enqueues a path directly, bypassing the debounce window. Used by the
    /// setup orchestrator to hand off already-discovered files.
    pub fn enqueue(&self, path: PathBuf) {
        let _ = self.work_tx.send(WorkItem::Path(path));
    }

    /// Returns the current indexing state for `path`.
    #[must_use]
    pub fn state_of(&self, path: &Path) -> IndexState {
        self.state.get(path)
    }

    /// The root directory being watched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.deps.root
    }

    /// Signals the debounce thread and all workers to stop, then joins them.
    /// In-flight indexing work is allowed to finish.
    pub fn shutdown(mut self) {
        self.debounce_stop.store(true, std::sync::atomic::Ordering::SeqCst);
        for _ in &self.handles {
            let _ = self.work_tx.send(WorkItem::Stop);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn record_event(pending: &Arc<Mutex<HashMap<PathBuf, Instant>>>, event: &Event) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    let mut guard = pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    for path in &event.paths {
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            guard.insert(path.clone(), Instant::now());
        }
    }
}

fn debounce_loop(
    pending: &Arc<Mutex<HashMap<PathBuf, Instant>>>,
    work_tx: &Sender<WorkItem>,
    delay: Duration,
    interval: Duration,
    stop: &Arc<std::sync::atomic::AtomicBool>,
) {
    while !stop.load(std::sync::atomic::Ordering::SeqCst) {
        std::thread::sleep(interval);
        let due: Vec<PathBuf> = {
            let guard = pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .iter()
                .filter(|(_, seen)| seen.elapsed() >= delay)
                .map(|(p, _)| p.clone())
                .collect()
        };
        for path in due {
            if work_tx.send(WorkItem::Path(path.clone())).is_ok() {
                pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&path);
            }
            // send failure (queue full/closed): leave it in `pending` so the
            // next tick retries; this is the non-blocking offer with
            // coalescing described for the debounce/queue handoff.
        }
    }
}

fn worker_loop(
    deps: &Arc<Deps>,
    state: &Arc<StateTable>,
    in_flight: &Arc<Mutex<HashSet<PathBuf>>>,
    work_rx: &Arc<Mutex<Receiver<WorkItem>>>,
    checkpoint_dir: Option<&Path>,
    checkpoint_interval: usize,
) {
    loop {
        let item = {
            let rx = work_rx.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            rx.recv()
        };
        let path = match item {
            Ok(WorkItem::Path(p)) => p,
            Ok(WorkItem::Stop) | Err(_) => return,
        };

        {
            let mut guard = in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if !guard.insert(path.clone()) {
                continue;
            }
        }

        if !path.exists() {
            in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&path);
            continue;
        }

        let project = project_for_path(&path, &deps.root);
        let state_ref = Arc::clone(state);
        let path_for_state = path.clone();
        let result = index_path(
            &path,
            &project,
            &deps.reader,
            &deps.chunker,
            &deps.gateway,
            &deps.store,
            &deps.registry,
            checkpoint_dir,
            checkpoint_interval,
            |s| state_ref.set(&path_for_state, s),
        );

        match result {
            Ok(IndexOutcome::Indexed { session_id, chunk_count, .. }) => {
                tracing::info!(session_id, chunk_count, "indexed transcript");
            }
            Ok(IndexOutcome::Empty { session_id }) => {
                tracing::debug!(session_id, "transcript yielded no messages");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "indexing failed");
            }
        }

        in_flight.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&path);
    }
}
