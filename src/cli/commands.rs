//! Wires parsed CLI arguments to the storage/search/rpc/indexer/setup
//! layers and runs the selected subcommand to completion.

// Bulk-setup progress is user-facing CLI output, not diagnostic logging.
#![allow(clippy::print_stderr)]

use crate::chunking::{ChunkingConfig, MessageChunker};
use crate::cli::output::{format_outcome, format_progress};
use crate::cli::parser::{Cli, Commands};
use crate::config::Config;
use crate::embedding::{create_embedder, BatchConfig, EmbeddingCache, EmbeddingGateway};
use crate::error::{Error, Result};
use crate::indexer::{BackgroundIndexer, IndexerConfig};
use crate::io::TranscriptReader;
use crate::rpc::{self, DispatcherConfig, ServiceContext};
use crate::search::{OrchestratorConfig, SearchOrchestrator};
use crate::services::history::ForkHistory;
use crate::setup::{self, SetupConfig, SetupOutcome};
use crate::storage::{SessionRegistry, VectorStore};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Terminal result of a subcommand run, distinct from a hard failure so
/// `main` can map it to the right exit code (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ran to completion.
    Success,
    /// Stopped early on an interrupt signal; state was saved for resume.
    Interrupted,
}

/// Resolved base directories, after applying the `STORAGE_DIR`/`PRODUCER_DIR`
/// environment overrides on top of the parsed CLI flags.
struct Paths {
    storage_dir: PathBuf,
    claude_dir: PathBuf,
}

fn resolve_paths(cli: &Cli) -> Paths {
    let storage_dir = std::env::var("STORAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| cli.storage_dir.clone().unwrap_or_else(crate::config::default_storage_dir));
    let claude_dir = std::env::var("PRODUCER_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| cli.claude_dir.clone().unwrap_or_else(default_claude_dir));
    Paths { storage_dir, claude_dir }
}

fn default_claude_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".claude"), |home| home.join(".claude"))
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "vibefork=debug,info" } else { "vibefork=info,warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Loads every persistent-state component from `paths`, shared via `Arc`
/// for `serve` (where the search orchestrator, the RPC layer, and the
/// background indexer all need the same live store/registry).
fn open_state(paths: &Paths) -> Result<(Arc<VectorStore>, Arc<SessionRegistry>, Arc<ForkHistory>)> {
    let (store, registry, history) = open_state_owned(paths)?;
    Ok((Arc::new(store), Arc::new(registry), Arc::new(history)))
}

/// Loads every persistent-state component for a `setup` run, which owns its
/// store/registry outright since nothing else runs concurrently with it.
fn open_state_owned(paths: &Paths) -> Result<(VectorStore, SessionRegistry, ForkHistory)> {
    std::fs::create_dir_all(&paths.storage_dir).map_err(Error::Io)?;
    let store = VectorStore::open(&paths.storage_dir.join("vector_db"))?;
    let registry = SessionRegistry::load(&paths.storage_dir.join("session-registry.json"))?;
    let history = ForkHistory::load(&paths.storage_dir.join("fork_history.json"));
    Ok((store, registry, history))
}

fn open_gateway(paths: &Paths, config: &Config, use_cpu: bool) -> Result<EmbeddingGateway> {
    let _ = use_cpu; // the fallback/fastembed embedder selection is feature-gated, not runtime-gated
    let embedder = create_embedder()?;
    let cache_path = paths.storage_dir.join("embedding_cache").join("cache.json");
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::Io)?;
    }
    let cache = EmbeddingCache::load(&cache_path)?;
    let batch = BatchConfig { min_batch: config.embedding.min_batch_size, max_batch: config.embedding.max_batch_size, max_memory_mb: config.memory.max_memory_mb };
    Ok(EmbeddingGateway::new(embedder, cache, batch))
}

fn chunker_from_config(config: &Config) -> MessageChunker {
    MessageChunker::new(ChunkingConfig {
        target_tokens: config.chunking.target_tokens,
        overlap_tokens: config.chunking.overlap_tokens,
        max_tokens: config.chunking.max_tokens,
    })
}

/// Runs the selected subcommand to completion.
///
/// # Errors
///
/// Propagates any storage, embedding, or I/O failure encountered while
/// bringing up the requested subsystem.
pub fn execute(cli: &Cli) -> Result<Outcome> {
    init_logging(cli.verbose);
    let paths = resolve_paths(cli);
    let config = Config::load(&paths.storage_dir.join("config.json"))?;

    match &cli.command {
        Commands::Serve => run_serve(&paths, &config),
        Commands::Setup { batch_mode, batch_size, use_cpu, timeout, workers, resume, retry_timeouts, run_batch } => run_setup_command(
            &paths,
            &config,
            SetupArgs {
                batch_mode: *batch_mode,
                batch_size: *batch_size,
                use_cpu: *use_cpu,
                timeout: *timeout,
                workers: *workers,
                resume: *resume,
                retry_timeouts: *retry_timeouts,
                run_batch: run_batch.clone(),
                verbose: cli.verbose,
            },
        ),
    }
}

fn run_serve(paths: &Paths, config: &Config) -> Result<Outcome> {
    let (store, registry, history) = open_state(paths)?;
    let gateway = open_gateway(paths, config, false)?;

    let search = Arc::new(SearchOrchestrator::new(
        gateway,
        Arc::clone(&store),
        Arc::clone(&registry),
        OrchestratorConfig {
            k_chunks: config.search.k_chunks,
            top_n_sessions: config.search.top_n_sessions,
            preview_length: config.search.preview_length,
            cache_size: config.cache.result_cache_size,
            cache_ttl: config.cache.ttl(),
        },
    ));
    let ctx = ServiceContext { search, registry: Arc::clone(&registry), store: Arc::clone(&store), history };

    let indexer = if config.indexing.enabled && paths.claude_dir.exists() {
        let indexer_gateway = open_gateway(paths, config, false)?;
        let indexer_config = IndexerConfig {
            debounce_delay: config.indexing.debounce_delay(),
            checkpoint_interval: config.indexing.checkpoint_interval,
            checkpoint_dir: Some(paths.storage_dir.clone()),
            ..IndexerConfig::default()
        };
        Some(
            BackgroundIndexer::start(
                paths.claude_dir.clone(),
                TranscriptReader::new(),
                chunker_from_config(config),
                indexer_gateway,
                Arc::clone(&store),
                Arc::clone(&registry),
                indexer_config,
            )
            .map_err(|e| Error::Config { message: format!("failed to start transcript watcher: {e}") })?,
        )
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::Io)?;

    let outcome = runtime.block_on(serve_until_shutdown(ctx));

    if let Some(indexer) = indexer {
        indexer.shutdown();
    }

    outcome
}

async fn serve_until_shutdown(ctx: ServiceContext) -> Result<Outcome> {
    tokio::select! {
        result = rpc::run(ctx, DispatcherConfig::default()) => result.map(|()| Outcome::Success),
        _ = tokio::signal::ctrl_c() => Ok(Outcome::Interrupted),
    }
}

struct SetupArgs {
    batch_mode: bool,
    batch_size: usize,
    use_cpu: bool,
    timeout: u64,
    workers: usize,
    resume: bool,
    retry_timeouts: bool,
    run_batch: Option<PathBuf>,
    verbose: bool,
}

fn setup_config_from(args: &SetupArgs, config: &Config) -> SetupConfig {
    SetupConfig {
        timeout_per_session: std::time::Duration::from_secs(args.timeout),
        batch_size: args.batch_size,
        workers: args.workers,
        resume: args.resume,
        retry_timeouts: args.retry_timeouts,
        progress_every: 1,
        checkpoint_interval: config.indexing.checkpoint_interval,
        min_size_bytes: 1,
    }
}

fn run_setup_command(paths: &Paths, config: &Config, args: SetupArgs) -> Result<Outcome> {
    let state_path = paths.storage_dir.join("setup_state.json");
    let setup_config = setup_config_from(&args, config);
    let cancel = install_cancel_handler();

    let outcome = if let Some(run_batch) = &args.run_batch {
        let body = std::fs::read_to_string(run_batch).map_err(Error::Io)?;
        let candidate_paths: Vec<PathBuf> = body.lines().filter(|l| !l.is_empty()).map(PathBuf::from).collect();
        let (store, registry, _history) = open_state_owned(paths)?;
        let gateway = open_gateway(paths, config, args.use_cpu)?;
        setup::run_setup_batch(
            &paths.claude_dir,
            &candidate_paths,
            &state_path,
            TranscriptReader::new(),
            chunker_from_config(config),
            gateway,
            store,
            registry,
            &setup_config,
            &cancel,
            |event| {
                if args.verbose {
                    eprintln!("{}", format_progress(&event));
                }
            },
        )?
    } else if args.batch_mode {
        let storage_dir = paths.storage_dir.clone();
        let claude_dir = paths.claude_dir.clone();
        let batch_size = args.batch_size;
        let timeout = args.timeout;
        let workers = args.workers;
        let use_cpu = args.use_cpu;
        let verbose = args.verbose;
        setup::run_batch_mode(
            &paths.claude_dir,
            &state_path,
            &setup_config,
            move |list_path: &std::path::Path| {
                let mut cmd_args = vec![
                    "--storage-dir".to_string(),
                    storage_dir.to_string_lossy().into_owned(),
                    "--claude-dir".to_string(),
                    claude_dir.to_string_lossy().into_owned(),
                ];
                if verbose {
                    cmd_args.push("--verbose".to_string());
                }
                cmd_args.extend([
                    "setup".to_string(),
                    "--batch-size".to_string(),
                    batch_size.to_string(),
                    "--timeout".to_string(),
                    timeout.to_string(),
                    "--workers".to_string(),
                    workers.to_string(),
                    "--run-batch".to_string(),
                    list_path.to_string_lossy().into_owned(),
                ]);
                if use_cpu {
                    cmd_args.push("--use-cpu".to_string());
                }
                cmd_args
            },
            &cancel,
        )?
    } else {
        let (store, registry, _history) = open_state_owned(paths)?;
        let gateway = open_gateway(paths, config, args.use_cpu)?;
        setup::run_setup(
            &paths.claude_dir,
            &state_path,
            TranscriptReader::new(),
            chunker_from_config(config),
            gateway,
            store,
            registry,
            &setup_config,
            &cancel,
            |event| {
                if args.verbose {
                    eprintln!("{}", format_progress(&event));
                }
            },
        )?
    };

    eprintln!("{}", format_outcome(&outcome));
    match outcome {
        SetupOutcome::Completed { .. } => Ok(Outcome::Success),
        SetupOutcome::Interrupted { .. } => Ok(Outcome::Interrupted),
    }
}

fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let _ = ctrlc_handler(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));
    cancel
}

/// Installs a `Ctrl-C` handler for the synchronous bulk-setup path (which
/// has no async runtime of its own). Best-effort: if a handler is already
/// installed elsewhere in the process, setup simply runs uninterruptible.
fn ctrlc_handler(mut on_signal: impl FnMut() + Send + 'static) -> std::result::Result<(), ()> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(_) => return Err(()),
    };
    std::thread::spawn(move || {
        runtime.block_on(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal();
            }
        });
    });
    Ok(())
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn test_resolve_paths_prefers_env_over_flags() {
        let cli = Cli::parse_from(["vibefork", "--storage-dir", "/flag/storage", "serve"]);
        // SAFETY: test-only; no other test in this process reads this var concurrently.
        unsafe { std::env::set_var("STORAGE_DIR", "/env/storage") };
        let paths = resolve_paths(&cli);
        unsafe { std::env::remove_var("STORAGE_DIR") };
        assert_eq!(paths.storage_dir, PathBuf::from("/env/storage"));
    }

    #[test]
    fn test_resolve_paths_falls_back_to_flag() {
        let cli = Cli::parse_from(["vibefork", "--storage-dir", "/flag/storage", "serve"]);
        // SAFETY: test-only; no other test in this process reads this var concurrently.
        unsafe { std::env::remove_var("STORAGE_DIR") };
        let paths = resolve_paths(&cli);
        assert_eq!(paths.storage_dir, PathBuf::from("/flag/storage"));
    }

    #[test]
    fn test_setup_config_from_maps_fields() {
        let args = SetupArgs {
            batch_mode: false,
            batch_size: 7,
            use_cpu: true,
            timeout: 42,
            workers: 3,
            resume: false,
            retry_timeouts: true,
            run_batch: None,
            verbose: false,
        };
        let config = Config::default();
        let setup_config = setup_config_from(&args, &config);
        assert_eq!(setup_config.batch_size, 7);
        assert_eq!(setup_config.workers, 3);
        assert_eq!(setup_config.timeout_per_session, std::time::Duration::from_secs(42));
        assert!(!setup_config.resume);
        assert!(setup_config.retry_timeouts);
    }
}
