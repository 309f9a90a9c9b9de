//! Background synchronization between the commit log and the vector index.
//!
//! Each pass decides between a full rebuild and an incremental catch-up.
//! A rebuild is forced when the stored embedding signature no longer matches
//! the active provider, when no previous sync completed, or when the last
//! synced commit is no longer reachable from the branch tip. Otherwise only
//! the commits between the tip and the last synced commit are indexed,
//! oldest first, so an interrupted pass leaves a resumable prefix.
//!
//! The index file and sync state are persisted once per pass, together with
//! the final commit's insertion, by the indexer.

use super::EngineShared;
use super::indexer::{self, IndexOutcome};
use crate::error::Result;
use crate::log::CommitRecord;
use crate::storage::SyncState;
use crate::vector::VectorIndex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What the background worker does when a sync pass fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailurePolicy {
    /// Stop the worker; searches keep serving the last good index.
    Halt,
    /// Keep the worker alive and retry with exponential backoff.
    Retry { max_backoff: Duration },
}

impl Default for SyncFailurePolicy {
    fn default() -> Self {
        Self::Halt
    }
}

/// Drives rebuild and incremental sync passes for one branch.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<EngineShared>,
}

impl SyncEngine {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    /// Restore persisted state and run the first sync pass.
    ///
    /// The saved index file is adopted only when the stored embedding
    /// signature matches the active provider and the file itself loads with
    /// the expected dimension; anything else falls back to a full rebuild.
    /// Metadata rows beyond the restored index size were committed by a pass
    /// that crashed before persisting the index file, and are dropped.
    pub(crate) async fn initialize(&self) -> Result<()> {
        let _pass = self.shared.pass_lock.lock().await;

        let signature = self.shared.provider.signature();
        let state = self.shared.store.load_state().await?;
        let mut resumed = false;

        if state.embedding_signature.as_deref() == Some(signature.as_str())
            && state.last_synced_commit_id.is_some()
        {
            if let Some(path) = &self.shared.index_path {
                if path.exists() {
                    match VectorIndex::load(path) {
                        Ok(index) if index.dimension() == self.shared.provider.dimension() => {
                            let restored = index.len() as u64;
                            *self.shared.index.write().await = index;
                            let orphans = self.shared.store.delete_slots_from(restored).await?;
                            if orphans > 0 {
                                warn!(orphans, "dropped metadata rows past the saved index");
                            }
                            info!(vectors = restored, "restored vector index from disk");
                            resumed = true;
                        }
                        Ok(index) => {
                            warn!(
                                found = index.dimension(),
                                expected = self.shared.provider.dimension(),
                                "saved index has the wrong dimension, rebuilding"
                            );
                        }
                        Err(error) => {
                            warn!(%error, "saved index failed to load, rebuilding");
                        }
                    }
                }
            }
        }

        if resumed {
            self.sync_locked().await?;
        } else {
            self.rebuild_locked().await?;
        }
        Ok(())
    }

    /// Run one sync pass now, waiting for any in-flight pass to finish first.
    /// Returns `false` when the pass was abandoned by a shutdown request.
    pub async fn sync_once(&self) -> Result<bool> {
        let _pass = self.shared.pass_lock.lock().await;
        self.sync_locked().await
    }

    /// Discard the index and re-index the whole branch history.
    pub async fn full_rebuild(&self) -> Result<bool> {
        let _pass = self.shared.pass_lock.lock().await;
        self.rebuild_locked().await
    }

    async fn rebuild_locked(&self) -> Result<bool> {
        info!(branch = %self.shared.branch, "starting full index rebuild");

        // Truncating first means a crash mid-rebuild reads back a null sync
        // state and rebuilds again instead of resuming against partial rows.
        self.shared.store.truncate_all().await?;
        *self.shared.index.write().await = VectorIndex::new(self.shared.provider.dimension());

        let mut history = self.shared.log.walk_history(&self.shared.branch).await?;
        if history.is_empty() {
            debug!(branch = %self.shared.branch, "branch has no commits");
            return Ok(true);
        }
        history.reverse();

        let tip = history
            .last()
            .map(|record| record.id.clone())
            .unwrap_or_default();
        let state = SyncState {
            last_synced_commit_id: Some(tip),
            embedding_signature: Some(self.shared.provider.signature()),
            last_sync_time: Some(chrono::Utc::now().timestamp()),
        };
        let completed = self.index_batch(&history, &state).await?;
        if completed {
            info!(
                branch = %self.shared.branch,
                commits = history.len(),
                "full rebuild complete"
            );
        }
        Ok(completed)
    }

    async fn sync_locked(&self) -> Result<bool> {
        // Nothing to index and nothing stale to tear down; keep idle ticks
        // on an empty branch from re-running the rebuild path.
        let Some(head) = self.shared.log.head_commit(&self.shared.branch).await? else {
            debug!(branch = %self.shared.branch, "branch has no commits");
            return Ok(true);
        };

        let signature = self.shared.provider.signature();
        let state = self.shared.store.load_state().await?;

        if state.embedding_signature.as_deref() != Some(signature.as_str()) {
            info!("embedding configuration changed, rebuilding index");
            return self.rebuild_locked().await;
        }
        let Some(last_synced) = state.last_synced_commit_id.clone() else {
            return self.rebuild_locked().await;
        };
        if head.id == last_synced {
            debug!(branch = %self.shared.branch, "index is up to date");
            return Ok(true);
        }

        // Collect the commits above the last synced one, tip first.
        let mut pending: Vec<CommitRecord> = Vec::new();
        let mut reached_synced = false;
        for record in self.shared.log.walk_history(&self.shared.branch).await? {
            if record.id == last_synced {
                reached_synced = true;
                break;
            }
            pending.push(record);
        }
        if !reached_synced {
            warn!(
                branch = %self.shared.branch,
                "last synced commit is not reachable from the tip, rebuilding"
            );
            return self.rebuild_locked().await;
        }
        pending.reverse();

        debug!(
            branch = %self.shared.branch,
            commits = pending.len(),
            "incremental sync"
        );
        let new_state = SyncState {
            last_synced_commit_id: Some(head.id),
            embedding_signature: state.embedding_signature,
            last_sync_time: Some(chrono::Utc::now().timestamp()),
        };
        self.index_batch(&pending, &new_state).await
    }

    /// Index a batch oldest-first, persisting the index file and `state`
    /// along with the final commit. Stops early, without persisting, when a
    /// shutdown is requested; the commits already indexed remain resumable.
    async fn index_batch(&self, commits: &[CommitRecord], state: &SyncState) -> Result<bool> {
        if commits.is_empty() {
            indexer::persist_pass(&self.shared, state).await?;
            return Ok(true);
        }

        let last = commits.len() - 1;
        for (position, commit) in commits.iter().enumerate() {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                info!(
                    indexed = position,
                    total = commits.len(),
                    "shutdown requested, abandoning sync pass"
                );
                return Ok(false);
            }
            let outcome = if position == last {
                indexer::index_commit_finalizing(&self.shared, commit, state).await?
            } else {
                indexer::index_commit(&self.shared, commit).await?
            };
            if let IndexOutcome::AlreadyIndexed = outcome {
                debug!(commit = %commit.id, "skipped already indexed commit");
            }
        }
        Ok(true)
    }
}

/// Spawn the periodic sync worker. The first pass runs immediately; later
/// passes follow `period`. A message on `shutdown_rx` stops the worker
/// between passes; mid-pass shutdown is handled by the shared flag.
pub(crate) fn spawn_worker(
    sync: SyncEngine,
    period: Duration,
    policy: SyncFailurePolicy,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let base_backoff = Duration::from_secs(1);
        let mut backoff = base_backoff;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("sync worker stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match sync.sync_once().await {
                Ok(_) => backoff = base_backoff,
                Err(error) => match policy {
                    SyncFailurePolicy::Halt => {
                        error!(%error, "sync pass failed, halting background worker");
                        break;
                    }
                    SyncFailurePolicy::Retry { max_backoff } => {
                        warn!(
                            %error,
                            backoff_secs = backoff.as_secs(),
                            "sync pass failed, backing off"
                        );
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(max_backoff);
                    }
                },
            }
        }
    })
}
