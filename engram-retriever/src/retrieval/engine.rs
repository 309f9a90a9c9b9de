//! Per-branch engine facade.
//!
//! [`MemoryEngine`] wires a commit log and an embedding provider to the
//! storage, sync, and search layers, spawns the background sync worker, and
//! exposes the outward API: search, manual sync, stats, shutdown. One engine
//! serves one branch; its index and metadata files are derived from the
//! branch name under the configured data directory.

use super::EngineShared;
use super::search::{SearchEngine, SearchResponse, SearchResult};
use super::sync::{self, SyncEngine, SyncFailurePolicy};
use crate::error::{EngineError, Result};
use crate::log::CommitLog;
use crate::storage::MetadataStore;
use crate::vector::VectorIndex;
use engram_embed::EmbeddingProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for a [`MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryEngineConfig {
    /// Branch of the commit log to track
    pub branch: String,
    /// Directory holding the index and metadata files
    pub data_dir: PathBuf,
    /// Maximum results returned per search
    pub top_k: usize,
    /// Minimum similarity for a result to be returned
    pub similarity_threshold: f32,
    /// Period of the background sync worker
    pub sync_interval: Duration,
    /// What the worker does when a sync pass fails
    pub failure_policy: SyncFailurePolicy,
}

impl MemoryEngineConfig {
    pub fn new(branch: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            branch: branch.into(),
            data_dir: data_dir.into(),
            top_k: 5,
            similarity_threshold: 0.3,
            sync_interval: Duration::from_secs(60),
            failure_policy: SyncFailurePolicy::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_failure_policy(mut self, policy: SyncFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.branch.is_empty() {
            return Err(EngineError::config("branch name must not be empty"));
        }
        if self.top_k == 0 {
            return Err(EngineError::config("top_k must be at least 1"));
        }
        if !self.similarity_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(EngineError::config(format!(
                "similarity threshold {} must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.sync_interval.is_zero() {
            return Err(EngineError::config("sync interval must be non-zero"));
        }
        Ok(())
    }

    /// Path of the branch's vector index file.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}_vectors.idx", sanitize_branch(&self.branch)))
    }

    /// Path of the branch's metadata database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir
            .join(format!("{}_metadata.db", sanitize_branch(&self.branch)))
    }
}

/// Branch names may contain path separators (`feature/x`); keep them out of
/// file names.
fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Counters and sync position for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Vectors in the in-memory index
    pub vectors: u64,
    /// Slot-to-commit rows in the metadata store
    pub mapped_vectors: u64,
    pub last_synced_commit_id: Option<String>,
    pub last_sync_time: Option<i64>,
}

/// Semantic memory over one branch of a commit log.
///
/// Construction restores persisted state, runs the first sync pass, and
/// spawns the background worker; the engine is searchable as soon as `new`
/// returns. Call [`shutdown`](Self::shutdown) before dropping to stop the
/// worker and let an in-flight pass finish its current commit.
pub struct MemoryEngine {
    shared: Arc<EngineShared>,
    sync: SyncEngine,
    search: SearchEngine,
    worker: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::UnboundedSender<()>>,
}

impl MemoryEngine {
    /// Create an engine with persistent storage under `config.data_dir`.
    pub async fn new(
        config: MemoryEngineConfig,
        log: Arc<dyn CommitLog>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        let store = MetadataStore::open(&config.db_path()).await?;
        let index_path = Some(config.index_path());
        Self::new_impl(config, log, provider, store, index_path).await
    }

    /// Create an engine with in-memory storage; nothing survives a restart.
    pub async fn new_memory(
        config: MemoryEngineConfig,
        log: Arc<dyn CommitLog>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let store = MetadataStore::open_memory().await?;
        Self::new_impl(config, log, provider, store, None).await
    }

    async fn new_impl(
        config: MemoryEngineConfig,
        log: Arc<dyn CommitLog>,
        provider: Arc<dyn EmbeddingProvider>,
        store: MetadataStore,
        index_path: Option<PathBuf>,
    ) -> Result<Self> {
        let shared = Arc::new(EngineShared {
            branch: config.branch.clone(),
            index: RwLock::new(VectorIndex::new(provider.dimension())),
            log,
            provider,
            store,
            index_path,
            pass_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        });

        let sync = SyncEngine::new(shared.clone());
        sync.initialize().await?;

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let worker = sync::spawn_worker(
            sync.clone(),
            config.sync_interval,
            config.failure_policy,
            shutdown_rx,
        );
        info!(
            branch = %config.branch,
            interval_secs = config.sync_interval.as_secs(),
            "memory engine started"
        );

        let search = SearchEngine::new(shared.clone(), config.top_k, config.similarity_threshold);
        Ok(Self {
            shared,
            sync,
            search,
            worker: Some(worker),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Run a sync pass now instead of waiting for the next worker tick.
    pub async fn sync_now(&self) -> Result<()> {
        self.sync.sync_once().await?;
        Ok(())
    }

    /// Discard the index and re-index the branch from scratch.
    pub async fn rebuild(&self) -> Result<()> {
        self.sync.full_rebuild().await?;
        Ok(())
    }

    /// Rank commits against the queries; see [`SearchEngine::search`].
    pub async fn search(&self, queries: &[String]) -> Result<Vec<SearchResult>> {
        self.search.search(queries).await
    }

    /// Search with results joined to commit records and errors in-band.
    pub async fn search_response(&self, queries: &[String]) -> SearchResponse {
        self.search.search_response(queries).await
    }

    /// Current index size and sync position.
    pub async fn stats(&self) -> Result<EngineStats> {
        let vectors = self.shared.index.read().await.len() as u64;
        let mapped_vectors = self.shared.store.total_vectors().await?;
        let state = self.shared.store.load_state().await?;
        Ok(EngineStats {
            vectors,
            mapped_vectors,
            last_synced_commit_id: state.last_synced_commit_id,
            last_sync_time: state.last_sync_time,
        })
    }

    /// Stop the background worker and wait for it to exit. An in-flight pass
    /// stops after its current commit; the work already done stays resumable.
    pub async fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if let Err(error) = worker.await {
                warn!(%error, "sync worker did not shut down cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use anyhow::Result;
    use engram_embed::{EmbedConfig, HashEmbedProvider};

    fn provider() -> Arc<HashEmbedProvider> {
        Arc::new(HashEmbedProvider::new(EmbedConfig::default()).expect("config"))
    }

    fn config() -> MemoryEngineConfig {
        // A long interval keeps the worker out of these tests' way.
        MemoryEngineConfig::new("main", "/unused").with_sync_interval(Duration::from_secs(3600))
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(MemoryEngineConfig::new("", "/tmp").validate().is_err());
        assert!(config().with_top_k(0).validate().is_err());
        assert!(
            config()
                .with_similarity_threshold(1.5)
                .validate()
                .is_err()
        );
        assert!(
            config()
                .with_similarity_threshold(f32::NAN)
                .validate()
                .is_err()
        );
        assert!(
            config()
                .with_sync_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(config().validate().is_ok());
    }

    #[test]
    fn branch_names_map_to_safe_file_names() {
        let config = MemoryEngineConfig::new("feature/login v2", "/data");
        assert_eq!(
            config.index_path(),
            PathBuf::from("/data/feature_login_v2_vectors.idx")
        );
        assert_eq!(
            config.db_path(),
            PathBuf::from("/data/feature_login_v2_metadata.db")
        );
    }

    #[tokio::test]
    async fn engine_is_searchable_after_construction() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        log.append("main", "Initial commit", "readme");
        log.append("main", "Add feature A", "readme\nfeature a");

        let mut engine = MemoryEngine::new_memory(config(), log, provider()).await?;

        let stats = engine.stats().await?;
        assert!(stats.vectors > 0);
        assert_eq!(stats.vectors, stats.mapped_vectors);
        assert!(stats.last_synced_commit_id.is_some());

        let results = engine.search(&["feature A".to_string()]).await?;
        assert!(!results.is_empty());

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn sync_now_picks_up_new_commits() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        log.append("main", "Initial commit", "readme");

        let mut engine = MemoryEngine::new_memory(config(), log.clone(), provider()).await?;
        let before = engine.stats().await?;

        let added = log.append("main", "Add caching layer", "readme\ncache");
        engine.sync_now().await?;

        let after = engine.stats().await?;
        assert!(after.vectors > before.vectors);
        assert_eq!(after.last_synced_commit_id.as_deref(), Some(added.id.as_str()));

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn background_worker_syncs_on_its_own() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        log.append("main", "Initial commit", "readme");

        let fast = config().with_sync_interval(Duration::from_millis(50));
        let mut engine = MemoryEngine::new_memory(fast, log.clone(), provider()).await?;

        let added = log.append("main", "Add background job", "readme\njobs");
        let mut synced = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if engine.stats().await?.last_synced_commit_id.as_deref() == Some(added.id.as_str()) {
                synced = true;
                break;
            }
        }
        assert!(synced, "worker never picked up the new commit");

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let mut engine = MemoryEngine::new_memory(config(), log, provider()).await?;
        engine.shutdown().await;
        engine.shutdown().await;
        Ok(())
    }
}
