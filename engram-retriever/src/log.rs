//! Commit log boundary.
//!
//! The engine never owns the log: commits are written by an external
//! collaborator and consumed here read-only through [`CommitLog`]. The trait
//! mirrors exactly what synchronization and search need — the branch tip, a
//! tip-to-root history walk, the tracked-content diff between a commit and
//! its parent, and the full content snapshot of a commit.
//!
//! [`MemoryLog`] is an in-process implementation used by tests and demos. It
//! is content-addressed like the real log: commit ids are blake3 hashes over
//! the parent id, message, content, and sequence number.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Immutable snapshot record in the external log.
///
/// Owned by the log collaborator; the engine only reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Stable content hash identifying the commit
    pub id: String,
    /// Commit message
    pub message: String,
    /// Parent commit ids; empty for the root commit
    pub parent_ids: Vec<String>,
    /// Unix timestamp of the commit
    pub timestamp: i64,
}

impl CommitRecord {
    /// `true` when the commit has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    /// First parent id, if any.
    pub fn first_parent(&self) -> Option<&str> {
        self.parent_ids.first().map(|id| id.as_str())
    }
}

/// Read-only view of the external commit log.
#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Tip commit of the branch, `None` when the branch has no commits.
    async fn head_commit(&self, branch: &str) -> Result<Option<CommitRecord>>;

    /// Full history of the branch, tip to root.
    async fn walk_history(&self, branch: &str) -> Result<Vec<CommitRecord>>;

    /// Look up a single commit by id.
    async fn commit(&self, id: &str) -> Result<Option<CommitRecord>>;

    /// Tracked-content diff between a commit and its parent; empty when the
    /// content did not change.
    async fn diff(&self, parent_id: &str, id: &str) -> Result<String>;

    /// Full tracked-content snapshot of a commit.
    async fn snapshot(&self, id: &str) -> Result<String>;
}

#[derive(Default)]
struct MemoryLogState {
    /// commit id -> (record, content snapshot)
    commits: HashMap<String, (CommitRecord, String)>,
    /// branch name -> tip commit id
    branches: HashMap<String, String>,
    sequence: u64,
}

/// In-process, content-addressed commit log.
///
/// Single-parent chains only; each [`append`](Self::append) creates one
/// commit on the given branch with the full content snapshot attached.
#[derive(Default)]
pub struct MemoryLog {
    state: RwLock<MemoryLogState>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit to a branch, creating the branch on first use.
    pub fn append(&self, branch: &str, message: &str, content: &str) -> CommitRecord {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.sequence += 1;
        let parent = state.branches.get(branch).cloned();

        let mut hasher = blake3::Hasher::new();
        hasher.update(parent.as_deref().unwrap_or("").as_bytes());
        hasher.update(message.as_bytes());
        hasher.update(content.as_bytes());
        hasher.update(&state.sequence.to_le_bytes());
        let id = hasher.finalize().to_hex().to_string();

        let record = CommitRecord {
            id: id.clone(),
            message: message.to_string(),
            parent_ids: parent.into_iter().collect(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        state
            .commits
            .insert(id.clone(), (record.clone(), content.to_string()));
        state.branches.insert(branch.to_string(), id);
        record
    }

    fn lookup(&self, id: &str) -> Option<(CommitRecord, String)> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.commits.get(id).cloned()
    }
}

#[async_trait]
impl CommitLog for MemoryLog {
    async fn head_commit(&self, branch: &str) -> Result<Option<CommitRecord>> {
        let tip = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.branches.get(branch).cloned()
        };
        match tip {
            Some(id) => self.commit(&id).await,
            None => Ok(None),
        }
    }

    async fn walk_history(&self, branch: &str) -> Result<Vec<CommitRecord>> {
        let mut history = Vec::new();
        let mut cursor = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.branches.get(branch).cloned()
        };
        while let Some(id) = cursor {
            let (record, _) = self
                .lookup(&id)
                .ok_or_else(|| EngineError::log(format!("dangling commit id {id}")))?;
            cursor = record.first_parent().map(|p| p.to_string());
            history.push(record);
        }
        Ok(history)
    }

    async fn commit(&self, id: &str) -> Result<Option<CommitRecord>> {
        Ok(self.lookup(id).map(|(record, _)| record))
    }

    async fn diff(&self, parent_id: &str, id: &str) -> Result<String> {
        let (_, old) = self
            .lookup(parent_id)
            .ok_or_else(|| EngineError::log(format!("unknown commit id {parent_id}")))?;
        let (_, new) = self
            .lookup(id)
            .ok_or_else(|| EngineError::log(format!("unknown commit id {id}")))?;
        Ok(line_diff(&old, &new))
    }

    async fn snapshot(&self, id: &str) -> Result<String> {
        let (_, content) = self
            .lookup(id)
            .ok_or_else(|| EngineError::log(format!("unknown commit id {id}")))?;
        Ok(content)
    }
}

/// Line-multiset diff: lines removed from `old` prefixed with `-`, lines
/// added in `new` prefixed with `+`. Empty exactly when the content is
/// unchanged.
fn line_diff(old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    let mut out = String::new();

    // Each old line beyond its count in new is a removal.
    let mut budget: HashMap<&str, isize> = HashMap::new();
    for line in new.lines() {
        *budget.entry(line).or_default() += 1;
    }
    for line in old.lines() {
        let remaining = budget.entry(line).or_default();
        *remaining -= 1;
        if *remaining < 0 {
            out.push('-');
            out.push_str(line);
            out.push('\n');
        }
    }

    // Each new line beyond its count in old is an addition.
    let mut budget: HashMap<&str, isize> = HashMap::new();
    for line in old.lines() {
        *budget.entry(line).or_default() += 1;
    }
    for line in new.lines() {
        let remaining = budget.entry(line).or_default();
        *remaining -= 1;
        if *remaining < 0 {
            out.push('+');
            out.push_str(line);
            out.push('\n');
        }
    }

    // Pure reorders leave the multisets equal; fall back to the new snapshot
    // so a changed commit never reports an empty diff.
    if out.is_empty() { new.to_string() } else { out }
}
