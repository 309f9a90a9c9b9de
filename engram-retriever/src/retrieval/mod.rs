//! Retrieval layer: indexer, sync engine, search engine, and the per-branch
//! engine facade.
//!
//! All components operate on one [`EngineShared`] per branch: the commit log
//! and embedding provider collaborators, the metadata store, and the vector
//! index behind a read-write lock. The sync worker is the only writer; the
//! write lock is held per single-commit insertion so searches are never
//! starved for longer than one commit's indexing time.

pub mod engine;
pub(crate) mod indexer;
pub mod search;
pub mod sync;

use crate::log::CommitLog;
use crate::storage::MetadataStore;
use crate::vector::VectorIndex;
use engram_embed::EmbeddingProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, RwLock};

/// State shared between the sync worker and concurrent searchers for one
/// branch.
pub(crate) struct EngineShared {
    pub branch: String,
    pub log: Arc<dyn CommitLog>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub store: MetadataStore,
    pub index: RwLock<VectorIndex>,
    /// `None` when running without persistence (in-memory mode)
    pub index_path: Option<PathBuf>,
    /// Serializes sync passes; a tick arriving mid-pass waits, never overlaps
    pub pass_lock: Mutex<()>,
    /// Set on shutdown; a running pass stops after its current commit
    pub shutdown: AtomicBool,
}
