//! End-to-end coverage of the read -> chunk -> embed -> store -> search
//! pipeline, driven through the same entry points `setup` and `serve` use.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use vibefork::chunking::{ChunkingConfig, MessageChunker};
use vibefork::embedding::{BatchConfig, EmbeddingCache, EmbeddingGateway, FallbackEmbedder};
use vibefork::indexer::{discover_candidates, index_path, IndexOutcome};
use vibefork::io::TranscriptReader;
use vibefork::rpc::{self, ServiceContext};
use vibefork::search::{OrchestratorConfig, QueryFilters, SearchOrchestrator};
use vibefork::services::history::ForkHistory;
use vibefork::storage::{ListFilter, SessionRegistry, VectorStore};

fn write_transcript(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    std::fs::write(&path, body).unwrap();
    path
}

fn message(role: &str, content: &str) -> String {
    json!({ "role": role, "content": content }).to_string()
}

struct Harness {
    reader: TranscriptReader,
    chunker: MessageChunker,
    gateway: EmbeddingGateway,
    store: Arc<VectorStore>,
    registry: Arc<SessionRegistry>,
}

fn harness(dir: &Path) -> Harness {
    let cache = EmbeddingCache::load(&dir.join("cache.json")).unwrap();
    let embedder = FallbackEmbedder::new(32);
    let gateway = EmbeddingGateway::new(Box::new(embedder), cache, BatchConfig::default());
    Harness {
        reader: TranscriptReader::new(),
        chunker: MessageChunker::new(ChunkingConfig::default()),
        gateway,
        store: Arc::new(VectorStore::in_memory().unwrap()),
        registry: Arc::new(SessionRegistry::load(&dir.join("registry.json")).unwrap()),
    }
}

#[test]
fn test_index_path_indexes_a_transcript_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let path = write_transcript(
        dir.path(),
        "routing-bug.jsonl",
        &[
            &message("user", "the http router drops query parameters on redirect"),
            &message("assistant", "check the route matcher, it strips the query string before dispatch"),
        ],
    );

    let outcome = index_path(
        &path,
        "web-service",
        &h.reader,
        &h.chunker,
        &h.gateway,
        &h.store,
        &h.registry,
        None,
        10,
        |_| {},
    )
    .unwrap();

    let (session_id, message_count, chunk_count) = match outcome {
        IndexOutcome::Indexed { session_id, message_count, chunk_count } => (session_id, message_count, chunk_count),
        IndexOutcome::Empty { .. } => panic!("expected a non-empty transcript to index"),
    };
    assert_eq!(session_id, "routing-bug");
    assert_eq!(message_count, 2);
    assert!(chunk_count >= 1);

    let session = h.registry.get(&session_id).unwrap().expect("session should be registered");
    assert_eq!(session.project, "web-service");
    assert_eq!(session.chunk_count, chunk_count);

    let stored = h.store.list_by_session(&session_id, vibefork::storage::Partition::Active).unwrap();
    assert_eq!(stored.len(), chunk_count);
    assert!(stored.iter().all(|c| c.embedding.is_some()));
}

#[test]
fn test_index_path_reports_empty_for_a_transcript_with_no_messages() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let path = write_transcript(dir.path(), "empty.jsonl", &[]);

    let outcome = index_path(&path, "web-service", &h.reader, &h.chunker, &h.gateway, &h.store, &h.registry, None, 10, |_| {}).unwrap();

    assert!(matches!(outcome, IndexOutcome::Empty { session_id } if session_id == "empty"));
    assert!(h.registry.get("empty").unwrap().is_none());
}

#[test]
fn test_reindexing_a_path_replaces_rather_than_duplicates_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let path = write_transcript(dir.path(), "s1.jsonl", &[&message("user", "one short message")]);

    index_path(&path, "proj", &h.reader, &h.chunker, &h.gateway, &h.store, &h.registry, None, 10, |_| {}).unwrap();
    std::fs::write(&path, format!("{}\n{}\n", message("user", "one short message"), message("assistant", "a reply that adds more content"))).unwrap();
    let outcome = index_path(&path, "proj", &h.reader, &h.chunker, &h.gateway, &h.store, &h.registry, None, 10, |_| {}).unwrap();

    let chunk_count = match outcome {
        IndexOutcome::Indexed { chunk_count, .. } => chunk_count,
        IndexOutcome::Empty { .. } => panic!("expected a non-empty transcript"),
    };
    let stored = h.store.list_by_session("s1", vibefork::storage::Partition::Active).unwrap();
    assert_eq!(stored.len(), chunk_count);
}

#[test]
fn test_discover_candidates_finds_nested_transcripts_and_search_ranks_the_relevant_one() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let web_dir = dir.path().join("web-service");
    std::fs::create_dir_all(&web_dir).unwrap();
    let baking_dir = dir.path().join("baking-blog");
    std::fs::create_dir_all(&baking_dir).unwrap();

    let routing_path = write_transcript(
        &web_dir,
        "routing.jsonl",
        &[&message("user", "our http router silently drops the query string during a redirect")],
    );
    let baking_path = write_transcript(&baking_dir, "sourdough.jsonl", &[&message("user", "my sourdough starter smells like vinegar today")]);

    let found = discover_candidates(dir.path(), 0);
    assert_eq!(found.len(), 2);

    index_path(&routing_path, "web-service", &h.reader, &h.chunker, &h.gateway, &h.store, &h.registry, None, 10, |_| {}).unwrap();
    index_path(&baking_path, "baking-blog", &h.reader, &h.chunker, &h.gateway, &h.store, &h.registry, None, 10, |_| {}).unwrap();

    let search = SearchOrchestrator::new(h.gateway, Arc::clone(&h.store), Arc::clone(&h.registry), OrchestratorConfig::default());
    let results = search.search("http router query string redirect bug", &QueryFilters::default(), &std::collections::HashMap::new()).unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].session.session.session_id, "routing");
}

#[test]
fn test_rpc_tools_see_mutations_through_a_shared_store_and_registry() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let path = write_transcript(
        dir.path(),
        "auth-flow.jsonl",
        &[&message("user", "walk me through the jwt refresh token flow in the auth service")],
    );
    index_path(&path, "auth-service", &h.reader, &h.chunker, &h.gateway, &h.store, &h.registry, None, 10, |_| {}).unwrap();

    let search = Arc::new(SearchOrchestrator::new(h.gateway, Arc::clone(&h.store), Arc::clone(&h.registry), OrchestratorConfig::default()));
    let history = Arc::new(ForkHistory::load(&dir.path().join("history.json")));
    let ctx = ServiceContext { search, registry: Arc::clone(&h.registry), store: Arc::clone(&h.store), history };

    let added = rpc::call(&ctx, "add-session-tag", &json!({ "session_id": "auth-flow", "tag": "security" })).unwrap();
    assert!(added.get("content").is_some());

    let tags = rpc::call(&ctx, "list-session-tags", &json!({ "session_id": "auth-flow" })).unwrap();
    let text = tags["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("security"));

    // The tag mutated via the tool layer must be visible through the same
    // registry instance the fixture holds directly.
    let session = ctx.registry.get("auth-flow").unwrap().unwrap();
    assert!(session.tags.contains("security"));

    let found = rpc::call(&ctx, "fork-detect", &json!({ "query": "jwt refresh token auth flow" })).unwrap();
    let text = found["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("auth-flow"));

    let preview = rpc::call(&ctx, "get-session-preview", &json!({ "session_id": "auth-flow" })).unwrap();
    assert!(preview["content"][0]["text"].as_str().unwrap().contains("jwt"));

    assert_eq!(ctx.registry.list(&ListFilter::default()).unwrap().len(), 1);
}
