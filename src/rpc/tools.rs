//! The 13-tool catalog backing `tools/list` and `tools/call` (§4.13).

use crate::core::PreferenceRecord;
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result, RpcError};
use crate::rpc::protocol::ToolDescriptor;
use crate::search::{OrchestratorConfig, QueryFilters, SearchOrchestrator};
use crate::services::{cluster, diff, duplicate, history, summary, tagging};
use crate::storage::{ListFilter, Partition, SessionRegistry, VectorStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Every dependency a tool handler might need, bundled so handlers take one
/// argument instead of threading five.
pub struct ServiceContext {
    /// End-to-end search pipeline (embedding + store + ranker + caches).
    pub search: Arc<SearchOrchestrator>,
    /// Durable session metadata.
    pub registry: Arc<SessionRegistry>,
    /// Chunk/embedding storage.
    pub store: Arc<VectorStore>,
    /// Fork-selection log feeding the preference boost.
    pub history: Arc<history::ForkHistory>,
}

fn preference_map(hist: &history::ForkHistory, session_ids: &[String]) -> HashMap<String, PreferenceRecord> {
    let mut map = HashMap::new();
    for id in session_ids {
        let entries = hist.for_session(id);
        if let Some(pref) = history::aggregate_preference(&entries) {
            map.insert(id.clone(), pref);
        }
    }
    map
}

fn string_arg(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::InvalidParams(format!("missing required string field `{key}`")).into())
}

fn usize_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key).and_then(Value::as_u64).map_or(default, |v| v as usize)
}

fn text_content(body: String) -> Value {
    json!({ "content": [{ "type": "text", "text": body }] })
}

fn build_preview(chunks: &[crate::core::Chunk], max_len: usize) -> String {
    let combined = chunks.iter().take(3).map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
    if combined.len() <= max_len {
        return combined;
    }
    let mut cut = max_len;
    while cut > 0 && !combined.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &combined[..cut];
    let boundary = truncated.rfind(char::is_whitespace).unwrap_or(cut);
    format!("{}...", truncated[..boundary].trim_end())
}

fn session_chunks(ctx: &ServiceContext, session_id: &str) -> Result<Vec<crate::core::Chunk>> {
    let session = ctx.registry.get(session_id)?.ok_or_else(|| Error::NotFound(session_id.to_string()))?;
    let partition = if session.archived { Partition::Archive } else { Partition::Active };
    ctx.store.list_by_session(session_id, partition)
}

/// Returns the static schema/description catalog for `tools/list`.
#[must_use]
pub fn catalog() -> Vec<ToolDescriptor> {
    let string_schema = |desc: &str| json!({ "type": "string", "description": desc });
    vec![
        ToolDescriptor {
            name: "fork-detect".to_string(),
            description: "Search indexed sessions and return a ranked list of fork candidates.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": string_schema("Free-text search query."),
                    "project": string_schema("Restrict to a project, or \"current\"."),
                    "scope": { "type": "string", "enum": ["all", "project"] },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "time_range": { "type": ["string", "object"] },
                    "include_archive": { "type": "boolean" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }),
        },
        ToolDescriptor {
            name: "get-session-preview".to_string(),
            description: "Returns a truncated text preview of a session's leading chunks.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id."), "preview_length": { "type": "integer" } },
                "required": ["session_id"]
            }),
        },
        ToolDescriptor {
            name: "get-fork-history".to_string(),
            description: "Lists recent fork-history entries, optionally scoped to one session.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Restrict to this session."), "limit": { "type": "integer" } }
            }),
        },
        ToolDescriptor {
            name: "record-fork".to_string(),
            description: "Records that the user forked into a session from a ranked result.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": string_schema("Session forked into."),
                    "query": string_schema("Query that produced the ranking."),
                    "position": { "type": "integer" }
                },
                "required": ["session_id", "query", "position"]
            }),
        },
        ToolDescriptor {
            name: "add-session-tag".to_string(),
            description: "Adds a normalized tag to a session.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id."), "tag": string_schema("Raw tag text.") },
                "required": ["session_id", "tag"]
            }),
        },
        ToolDescriptor {
            name: "remove-session-tag".to_string(),
            description: "Removes a tag from a session.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id."), "tag": string_schema("Raw tag text.") },
                "required": ["session_id", "tag"]
            }),
        },
        ToolDescriptor {
            name: "list-session-tags".to_string(),
            description: "Lists the normalized tags on a session.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id.") },
                "required": ["session_id"]
            }),
        },
        ToolDescriptor {
            name: "get-session-summary".to_string(),
            description: "Returns (regenerating if stale) a session's extractive summary.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id."), "top_k": { "type": "integer" } },
                "required": ["session_id"]
            }),
        },
        ToolDescriptor {
            name: "cluster-sessions".to_string(),
            description: "Clusters all active sessions by embedding similarity via k-means.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "k": { "type": "integer" } }
            }),
        },
        ToolDescriptor {
            name: "get-session-clusters".to_string(),
            description: "Returns the cluster assignment for one session from the last clustering run.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id.") },
                "required": ["session_id"]
            }),
        },
        ToolDescriptor {
            name: "get-cluster-sessions".to_string(),
            description: "Returns every session assigned to a cluster id from the last clustering run.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "cluster_id": { "type": "integer" } },
                "required": ["cluster_id"]
            }),
        },
        ToolDescriptor {
            name: "compare-sessions".to_string(),
            description: "Semantically diffs two sessions' chunks.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_a": string_schema("First session id."),
                    "session_b": string_schema("Second session id."),
                    "match_threshold": { "type": "number" }
                },
                "required": ["session_a", "session_b"]
            }),
        },
        ToolDescriptor {
            name: "get-similar-sessions".to_string(),
            description: "Finds sessions whose mean chunk embedding is close to a given session's.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "session_id": string_schema("Session id."), "limit": { "type": "integer" } },
                "required": ["session_id"]
            }),
        },
    ]
}

/// Dispatches one `tools/call` invocation by name.
///
/// # Errors
///
/// Returns [`RpcError::UnknownTool`] for an unregistered name, or
/// [`RpcError::InvalidParams`]/a wrapped storage-layer error.
pub fn call(ctx: &ServiceContext, name: &str, args: &Value) -> Result<Value> {
    match name {
        "fork-detect" => fork_detect(ctx, args),
        "get-session-preview" => get_session_preview(ctx, args),
        "get-fork-history" => get_fork_history(ctx, args),
        "record-fork" => record_fork(ctx, args),
        "add-session-tag" => add_session_tag(ctx, args),
        "remove-session-tag" => remove_session_tag(ctx, args),
        "list-session-tags" => list_session_tags(ctx, args),
        "get-session-summary" => get_session_summary(ctx, args),
        "cluster-sessions" => cluster_sessions_tool(ctx, args),
        "get-session-clusters" => get_session_clusters(ctx, args),
        "get-cluster-sessions" => get_cluster_sessions(ctx, args),
        "compare-sessions" => compare_sessions(ctx, args),
        "get-similar-sessions" => get_similar_sessions(ctx, args),
        other => Err(RpcError::UnknownTool(other.to_string()).into()),
    }
}

fn fork_detect(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let query = string_arg(args, "query")?;
    let limit = usize_arg(args, "limit", 5);

    let mut filters = QueryFilters::default();
    if let Some(project) = args.get("project").and_then(Value::as_str) {
        if project != "current" {
            filters.project = Some(project.to_string());
        }
    }
    filters.scope = args.get("scope").and_then(Value::as_str).map(str::to_string);
    if let Some(tags) = args.get("tags").and_then(Value::as_array) {
        filters.tags = tags.iter().filter_map(Value::as_str).map(str::to_string).collect();
    }
    filters.include_archive = args.get("include_archive").and_then(Value::as_bool).unwrap_or(false);

    let known_ids: Vec<String> = ctx.registry.list(&ListFilter::default())?.into_iter().map(|s| s.session_id).collect();
    let preferences = preference_map(&ctx.history, &known_ids);

    let results = ctx.search.search(&query, &filters, &preferences)?;
    let lines: Vec<String> = results
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| format!("{}. {} (score {:.3}): {}", i + 1, r.session.session.session_id, r.session.score.total, r.preview))
        .collect();
    let body = if lines.is_empty() { "No matching sessions.".to_string() } else { lines.join("\n") };
    Ok(text_content(body))
}

fn get_session_preview(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let preview_length = usize_arg(args, "preview_length", OrchestratorConfig::default().preview_length);
    let chunks = session_chunks(ctx, &session_id)?;
    Ok(text_content(build_preview(&chunks, preview_length)))
}

fn get_fork_history(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let limit = usize_arg(args, "limit", 20);
    let entries = if let Some(session_id) = args.get("session_id").and_then(Value::as_str) {
        ctx.history.for_session(session_id).into_iter().take(limit).collect::<Vec<_>>()
    } else {
        ctx.history.list(limit)
    };
    let lines: Vec<String> = entries
        .iter()
        .map(|e| format!("{} forked at position {} for query \"{}\" ({})", e.session_id, e.position, e.query, e.timestamp.to_rfc3339()))
        .collect();
    let body = if lines.is_empty() { "No fork history.".to_string() } else { lines.join("\n") };
    Ok(text_content(body))
}

fn record_fork(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let query = string_arg(args, "query")?;
    let position = usize_arg(args, "position", 0);
    ctx.history.record(crate::core::ForkHistoryEntry::new(session_id.clone(), query, position))?;
    Ok(text_content(format!("Recorded fork into {session_id}.")))
}

fn add_session_tag(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let tag = string_arg(args, "tag")?;
    tagging::add_tag(&ctx.registry, &ctx.store, &session_id, &tag)?;
    Ok(text_content(format!("Added tag to {session_id}.")))
}

fn remove_session_tag(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let tag = string_arg(args, "tag")?;
    tagging::remove_tag(&ctx.registry, &ctx.store, &session_id, &tag)?;
    Ok(text_content(format!("Removed tag from {session_id}.")))
}

fn list_session_tags(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let tags = tagging::list_tags(&ctx.registry, &session_id)?;
    Ok(text_content(if tags.is_empty() { "No tags.".to_string() } else { tags.join(", ") }))
}

fn get_session_summary(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let top_k = usize_arg(args, "top_k", 5);
    let session = ctx.registry.get(&session_id)?.ok_or_else(|| Error::NotFound(session_id.clone()))?;

    let stale = session.summary.is_none()
        || summary::should_regenerate(session.summarized_at_chunk_count.unwrap_or(0), session.chunk_count);

    let text = if stale {
        let chunks = session_chunks(ctx, &session_id)?;
        let joined = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        let generated = summary::generate_summary(&joined, top_k);
        let chunk_count = session.chunk_count;
        ctx.registry.update(&session_id, |s| {
            s.summary = Some(generated.clone());
            s.summarized_at_chunk_count = Some(chunk_count);
        })?;
        generated
    } else {
        session.summary.unwrap_or_default()
    };

    Ok(text_content(if text.is_empty() { "No summary available.".to_string() } else { text }))
}

fn load_sessions_with_embeddings(ctx: &ServiceContext) -> Result<Vec<(crate::core::Session, Vec<f32>)>> {
    let sessions = ctx.registry.list(&ListFilter { archived: Some(false), ..ListFilter::default() })?;
    let mut result = Vec::new();
    for session in sessions {
        let chunks = ctx.store.list_by_session(&session.session_id, Partition::Active)?;
        if let Some(embedding) = duplicate::session_embedding(&chunks) {
            result.push((session, embedding));
        }
    }
    Ok(result)
}

fn cluster_sessions_tool(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let k = usize_arg(args, "k", cluster::DEFAULT_K);
    let sessions = load_sessions_with_embeddings(ctx)?;
    let (assignments, silhouette) = cluster::cluster_sessions(&sessions, k);
    let lines: Vec<String> = assignments.iter().map(|a| format!("{} -> cluster {} ({})", a.session_id, a.cluster_id, a.label)).collect();
    let body = format!("Silhouette score: {silhouette:.3}\n{}", lines.join("\n"));
    Ok(text_content(body))
}

fn get_session_clusters(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let sessions = load_sessions_with_embeddings(ctx)?;
    let (assignments, _) = cluster::cluster_sessions(&sessions, cluster::DEFAULT_K);
    match assignments.into_iter().find(|a| a.session_id == session_id) {
        Some(a) => Ok(text_content(format!("cluster {} ({})", a.cluster_id, a.label))),
        None => Ok(text_content("Session not assigned to any cluster.".to_string())),
    }
}

fn get_cluster_sessions(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let cluster_id = args.get("cluster_id").and_then(Value::as_u64).ok_or_else(|| RpcError::InvalidParams("missing `cluster_id`".to_string()))? as usize;
    let sessions = load_sessions_with_embeddings(ctx)?;
    let (assignments, _) = cluster::cluster_sessions(&sessions, cluster::DEFAULT_K);
    let members: Vec<String> = assignments.into_iter().filter(|a| a.cluster_id == cluster_id).map(|a| a.session_id).collect();
    let body = if members.is_empty() { "No sessions in that cluster.".to_string() } else { members.join("\n") };
    Ok(text_content(body))
}

fn compare_sessions(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_a = string_arg(args, "session_a")?;
    let session_b = string_arg(args, "session_b")?;
    let match_threshold = args.get("match_threshold").and_then(Value::as_f64).unwrap_or(0.7) as f32;
    let a = session_chunks(ctx, &session_a)?;
    let b = session_chunks(ctx, &session_b)?;
    let result = diff::diff_sessions(&a, &b, match_threshold);
    let body = format!(
        "overall={:.3} common={} unique_to_a={} unique_to_b={}",
        result.overall,
        result.common.len(),
        result.unique_to_a.len(),
        result.unique_to_b.len()
    );
    Ok(text_content(body))
}

fn get_similar_sessions(ctx: &ServiceContext, args: &Value) -> Result<Value> {
    let session_id = string_arg(args, "session_id")?;
    let limit = usize_arg(args, "limit", 5);
    let target_chunks = session_chunks(ctx, &session_id)?;
    let Some(target_embedding) = duplicate::session_embedding(&target_chunks) else {
        return Ok(text_content("Session has no embedded chunks.".to_string()));
    };

    let mut scored: Vec<(String, f32)> = Vec::new();
    for (session, embedding) in load_sessions_with_embeddings(ctx)? {
        if session.session_id == session_id {
            continue;
        }
        scored.push((session.session_id, cosine_similarity(&target_embedding, &embedding)));
    }
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let lines: Vec<String> = scored.into_iter().take(limit).map(|(id, sim)| format!("{id} (similarity {sim:.3})")).collect();
    let body = if lines.is_empty() { "No similar sessions found.".to_string() } else { lines.join("\n") };
    Ok(text_content(body))
}
