//! engram-retriever: semantic index synchronization and search over an
//! append-only commit log.
//!
//! The crate keeps a vector index consistent with an external,
//! independently-mutating commit log and answers multi-query similarity
//! search against it. Text snapshots live in the log as commits; a
//! background worker embeds each commit's message and content change into a
//! flat vector index, records slot-to-commit mappings in SQLite, and decides
//! at startup and on every tick whether to rebuild from scratch or sync
//! incrementally.
//!
//! ## Key Modules
//!
//! - **[`log`]**: the consumed commit-log boundary ([`log::CommitLog`]) plus
//!   an in-process [`log::MemoryLog`] for tests and demos
//! - **[`storage`]**: SQLite metadata store mapping index slots to commits
//! - **[`vector`]**: flat append-only vector index with file persistence
//! - **[`retrieval`]**: indexer, sync engine, search engine, and the
//!   per-branch [`retrieval::engine::MemoryEngine`] facade
//! - **[`error`]**: error types shared across the crate
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use engram_embed::{EmbedConfig, HashEmbedProvider};
//! use engram_retriever::log::MemoryLog;
//! use engram_retriever::retrieval::engine::{MemoryEngine, MemoryEngineConfig};
//!
//! # async fn example() -> engram_retriever::error::Result<()> {
//! let log = Arc::new(MemoryLog::new());
//! log.append("main", "Add feature A", "notes about feature A");
//!
//! let provider = Arc::new(HashEmbedProvider::new(EmbedConfig::default())?);
//! let config = MemoryEngineConfig::new("main", "/tmp/engram");
//! let mut engine = MemoryEngine::new(config, log, provider).await?;
//!
//! let results = engine.search(&["feature A".to_string()]).await?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! CommitLog → SyncEngine → Indexer → VectorIndex + MetadataStore
//!                 ↑                        ↓
//!          background worker        SearchEngine → SearchResponse
//! ```

pub mod error;
pub mod log;
pub mod retrieval;
pub mod storage;
pub mod vector;
