//! Idempotent per-commit indexing.
//!
//! A commit yields up to two vectors: its message, and a second text derived
//! from its content change — the diff against the first parent when
//! non-empty, or the full snapshot for the root commit. A non-root commit
//! whose diff is empty legitimately carries only the message vector, and a
//! text that embeds to the zero vector is not stored at all.
//!
//! Each vector's index insertion and metadata record happen together, under
//! the index write lock and inside the commit's transaction, before the next
//! vector is attempted, so index size and metadata population never diverge.

use super::EngineShared;
use crate::error::Result;
use crate::log::CommitRecord;
use crate::storage::{MetadataStore, SyncState};
use tracing::{debug, warn};

/// What [`index_commit`] did for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexOutcome {
    /// The commit already had its full set of vectors
    AlreadyIndexed,
    /// The commit was (re-)indexed with this many vectors
    Indexed { vectors: usize },
}

/// Index one commit idempotently.
pub(crate) async fn index_commit(
    shared: &EngineShared,
    commit: &CommitRecord,
) -> Result<IndexOutcome> {
    index_commit_inner(shared, commit, None).await
}

/// Index the final commit of a pass, then persist the index file and the new
/// sync state under the same write lock as the last insertion.
pub(crate) async fn index_commit_finalizing(
    shared: &EngineShared,
    commit: &CommitRecord,
    state: &SyncState,
) -> Result<IndexOutcome> {
    index_commit_inner(shared, commit, Some(state)).await
}

/// Persist the index file and sync state without indexing anything. Used
/// when a pass ends on an empty batch or an already-indexed commit.
pub(crate) async fn persist_pass(shared: &EngineShared, state: &SyncState) -> Result<()> {
    let index = shared.index.write().await;
    if let Some(path) = &shared.index_path {
        index.save(path)?;
    }
    shared.store.save_state(state).await?;
    Ok(())
}

async fn index_commit_inner(
    shared: &EngineShared,
    commit: &CommitRecord,
    finalize: Option<&SyncState>,
) -> Result<IndexOutcome> {
    let existing = shared.store.count_vectors_for(&commit.id).await?;
    if existing >= 2 {
        debug!(commit = %commit.id, "commit already indexed");
        if let Some(state) = finalize {
            persist_pass(shared, state).await?;
        }
        return Ok(IndexOutcome::AlreadyIndexed);
    }

    // Embed before taking the index lock; embedding is the slow part.
    // Zero-norm embeddings (whitespace-only text) are never inserted: a zero
    // vector sits at distance 1 from every unit query and would match
    // anything at similarity 0.5.
    let mut embeddings = Vec::with_capacity(2);
    let message_embedding = shared.provider.embed_text(&commit.message).await?;
    if is_zero(&message_embedding) {
        debug!(commit = %commit.id, "message embeds to zero, skipping its vector");
    } else {
        embeddings.push(message_embedding);
    }

    let secondary_text = match commit.first_parent() {
        Some(parent) => shared.log.diff(parent, &commit.id).await?,
        None => shared.log.snapshot(&commit.id).await?,
    };
    if !secondary_text.is_empty() {
        let secondary_embedding = shared.provider.embed_text(&secondary_text).await?;
        if !is_zero(&secondary_embedding) {
            embeddings.push(secondary_embedding);
        }
    }

    let mut tx = shared.store.begin().await?;
    if existing == 1 {
        // One of the two expected rows is missing and we cannot tell which;
        // drop what is there and re-index the commit from scratch.
        warn!(commit = %commit.id, "partial index found, reindexing");
        MetadataStore::delete_vectors_for(&mut *tx, &commit.id).await?;
    }

    let vectors = embeddings.len();
    {
        let mut index = shared.index.write().await;

        for embedding in embeddings {
            let slot = index.insert(embedding)?;
            MetadataStore::record_vector(&mut *tx, slot, &commit.id).await?;
        }

        tx.commit().await?;

        if let Some(state) = finalize {
            if let Some(path) = &shared.index_path {
                index.save(path)?;
            }
            shared.store.save_state(state).await?;
        }
    }

    debug!(commit = %commit.id, vectors, "indexed commit");
    Ok(IndexOutcome::Indexed { vectors })
}

fn is_zero(embedding: &[f32]) -> bool {
    embedding.iter().all(|value| *value == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use crate::retrieval::test_support::memory_shared;
    use anyhow::Result;
    use std::sync::Arc;

    #[tokio::test]
    async fn root_commit_gets_message_and_snapshot_vectors() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let root = log.append("main", "Initial commit", "initial content");
        let shared = memory_shared(log).await;

        let outcome = index_commit(&shared, &root).await?;
        assert_eq!(outcome, IndexOutcome::Indexed { vectors: 2 });
        assert_eq!(shared.store.count_vectors_for(&root.id).await?, 2);
        assert_eq!(shared.index.read().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn root_commit_with_empty_content_gets_one_vector() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let root = log.append("main", "Initial commit", "");
        let shared = memory_shared(log).await;

        let outcome = index_commit(&shared, &root).await?;
        assert_eq!(outcome, IndexOutcome::Indexed { vectors: 1 });
        assert_eq!(shared.store.count_vectors_for(&root.id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_content_yields_message_vector_only() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        log.append("main", "Initial commit", "same content");
        let second = log.append("main", "message only", "same content");
        let shared = memory_shared(log).await;

        let outcome = index_commit(&shared, &second).await?;
        assert_eq!(outcome, IndexOutcome::Indexed { vectors: 1 });
        Ok(())
    }

    #[tokio::test]
    async fn whitespace_only_message_gets_no_message_vector() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let root = log.append("main", "   ", "real content");
        let shared = memory_shared(log).await;

        let outcome = index_commit(&shared, &root).await?;
        assert_eq!(outcome, IndexOutcome::Indexed { vectors: 1 });
        assert_eq!(shared.store.count_vectors_for(&root.id).await?, 1);
        assert_eq!(shared.index.read().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn blank_message_and_unchanged_content_store_nothing() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        log.append("main", "Initial commit", "content");
        let blank = log.append("main", " ", "content");
        let shared = memory_shared(log).await;

        let outcome = index_commit(&shared, &blank).await?;
        assert_eq!(outcome, IndexOutcome::Indexed { vectors: 0 });
        assert_eq!(shared.store.count_vectors_for(&blank.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn reindexing_a_fully_indexed_commit_changes_nothing() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let root = log.append("main", "Initial commit", "content");
        let shared = memory_shared(log).await;

        index_commit(&shared, &root).await?;
        let size_before = shared.index.read().await.len();
        let rows_before = shared.store.total_vectors().await?;

        let outcome = index_commit(&shared, &root).await?;
        assert_eq!(outcome, IndexOutcome::AlreadyIndexed);
        assert_eq!(shared.index.read().await.len(), size_before);
        assert_eq!(shared.store.total_vectors().await?, rows_before);
        Ok(())
    }

    #[tokio::test]
    async fn partially_indexed_commit_is_repaired() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let root = log.append("main", "Initial commit", "content");
        let shared = memory_shared(log).await;

        index_commit(&shared, &root).await?;

        // Simulate a partial failure by deleting one of the two rows.
        let mut tx = shared.store.begin().await?;
        sqlx::query("DELETE FROM vector_map WHERE slot_id = 1")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        assert_eq!(shared.store.count_vectors_for(&root.id).await?, 1);

        let outcome = index_commit(&shared, &root).await?;
        assert_eq!(outcome, IndexOutcome::Indexed { vectors: 2 });
        assert_eq!(shared.store.count_vectors_for(&root.id).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn slot_ids_match_index_positions() -> Result<()> {
        let log = Arc::new(MemoryLog::new());
        let first = log.append("main", "first", "a");
        let second = log.append("main", "second", "a\nb");
        let shared = memory_shared(log).await;

        index_commit(&shared, &first).await?;
        index_commit(&shared, &second).await?;

        let total = shared.store.total_vectors().await?;
        assert_eq!(total as usize, shared.index.read().await.len());

        let slots: Vec<u64> = (0..total).collect();
        let resolved = shared.store.resolve_slots(&slots).await?;
        assert_eq!(resolved.len(), total as usize);
        Ok(())
    }
}
