//! # vibefork
//!
//! Local, single-user semantic search and session-forking service over AI
//! coding-assistant transcripts. Chunks and embeds session transcripts into
//! a local vector store, exposes a ranked fork-detection search and a
//! handful of session-management tools over a stdio JSON-RPC interface, and
//! keeps the index current via a background filesystem watcher.
//!
//! ## Layout
//!
//! - [`io`] / [`chunking`] / [`embedding`]: read, segment, and vectorize
//!   transcripts.
//! - [`storage`]: the durable chunk/embedding vector store and session
//!   registry.
//! - [`search`]: the composite ranker and caching query orchestrator.
//! - [`indexer`] / [`setup`]: background live indexing and first-run bulk
//!   indexing.
//! - [`services`]: fork history, tagging, summarization, diffing, duplicate
//!   detection, clustering, archiving.
//! - [`rpc`]: the JSON-RPC tool catalog and stdio dispatcher.
//! - [`cli`] / [`config`]: the binary entry point and its configuration.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod io;
pub mod rpc;
pub mod search;
pub mod services;
pub mod setup;
pub mod storage;
mod util;

pub use error::{Error, Result};

pub use core::{Chunk, ChunkMetadata, Message, MessageRole, Session};
pub use storage::{SessionRegistry, VectorStore};

pub use cli::{Cli, Commands};
pub use config::Config;
