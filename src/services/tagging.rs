//! Session tagging: add / remove / list / find-by-tag, with normalization
//! that keeps the registry's tag set and the vector store's per-chunk tag
//! metadata consistent (§4.12).

use crate::error::{Error, Result};
use crate::storage::{ListFilter, Partition, SessionRegistry, VectorStore};

/// Maximum tag length after normalization.
pub const MAX_TAG_LEN: usize = 64;

/// Normalizes a raw tag: trims, lowercases, and validates length/charset
/// (ASCII alphanumerics, `-`, and `_` only).
///
/// # Errors
///
/// Returns [`Error::Config`] if the tag is empty, too long, or contains a
/// disallowed character after trimming.
pub fn normalize_tag(raw: &str) -> Result<String> {
    let tag = raw.trim().to_ascii_lowercase();
    if tag.is_empty() {
        return Err(Error::Config { message: "tag must not be empty".to_string() });
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(Error::Config { message: format!("tag exceeds {MAX_TAG_LEN} characters") });
    }
    if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::Config { message: "tag may only contain alphanumerics, '-', or '_'".to_string() });
    }
    Ok(tag)
}

fn retag_chunks(store: &VectorStore, registry: &SessionRegistry, session_id: &str, tags: &[String]) -> Result<()> {
    let Some(session) = registry.get(session_id)? else {
        return Ok(());
    };
    let partition = if session.archived { Partition::Archive } else { Partition::Active };
    let mut chunks = store.list_by_session(session_id, partition)?;
    if chunks.is_empty() {
        return Ok(());
    }
    for chunk in &mut chunks {
        chunk.metadata.tags = tags.to_vec();
    }
    store.upsert_chunks(&chunks, partition)
}

/// Adds `raw_tag` to `session_id`, updating both the registry and every
/// stored chunk's tag metadata so vector-store filters stay correct.
///
/// # Errors
///
/// Returns an error if the tag fails validation, the session is unknown,
/// or a storage operation fails.
pub fn add_tag(registry: &SessionRegistry, store: &VectorStore, session_id: &str, raw_tag: &str) -> Result<()> {
    let tag = normalize_tag(raw_tag)?;
    let updated = registry.update(session_id, |s| {
        s.tags.insert(tag.clone());
    })?;
    let Some(session) = updated else {
        return Err(Error::NotFound(session_id.to_string()));
    };
    retag_chunks(store, registry, session_id, &session.tags.into_iter().collect::<Vec<_>>())
}

/// Removes `raw_tag` from `session_id`. A no-op if the tag was not present.
///
/// # Errors
///
/// Returns an error if the tag fails validation, the session is unknown,
/// or a storage operation fails.
pub fn remove_tag(registry: &SessionRegistry, store: &VectorStore, session_id: &str, raw_tag: &str) -> Result<()> {
    let tag = normalize_tag(raw_tag)?;
    let updated = registry.update(session_id, |s| {
        s.tags.remove(&tag);
    })?;
    let Some(session) = updated else {
        return Err(Error::NotFound(session_id.to_string()));
    };
    retag_chunks(store, registry, session_id, &session.tags.into_iter().collect::<Vec<_>>())
}

/// Lists the normalized tags on `session_id`, sorted.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the session does not exist.
pub fn list_tags(registry: &SessionRegistry, session_id: &str) -> Result<Vec<String>> {
    registry
        .get(session_id)?
        .map(|s| s.tags.into_iter().collect())
        .ok_or_else(|| Error::NotFound(session_id.to_string()))
}

/// Returns every session id carrying `raw_tag`.
///
/// # Errors
///
/// Returns an error if the tag fails validation or the registry read fails.
pub fn find_by_tag(registry: &SessionRegistry, raw_tag: &str) -> Result<Vec<String>> {
    let tag = normalize_tag(raw_tag)?;
    let filter = ListFilter { project: None, tag: Some(tag), archived: None };
    Ok(registry.list(&filter)?.into_iter().map(|s| s.session_id).collect())
}
