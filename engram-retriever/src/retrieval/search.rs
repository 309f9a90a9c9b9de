//! Multi-query similarity search over the vector index.
//!
//! Each query is embedded and matched independently; per-commit scores are
//! max-merged across queries and across a commit's own vectors, so a commit
//! that matches any query through either its message or its content change
//! surfaces once, with its best score. Distances from the index convert to
//! similarity as `1 - d^2 / 2`, which equals cosine similarity for unit
//! vectors and lands in `[-1, 1]`.

use super::EngineShared;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A matching commit with its merged similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub commit_id: String,
    pub similarity: f32,
}

/// A search result joined with the commit's log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub commit_id: String,
    pub message: String,
    pub timestamp: i64,
    pub similarity: f32,
}

/// Outward-facing search envelope; errors are reported in-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-side engine: embeds queries and ranks commits.
#[derive(Clone)]
pub struct SearchEngine {
    shared: Arc<EngineShared>,
    top_k: usize,
    threshold: f32,
}

impl SearchEngine {
    pub(crate) fn new(shared: Arc<EngineShared>, top_k: usize, threshold: f32) -> Self {
        Self {
            shared,
            top_k,
            threshold,
        }
    }

    /// Rank commits against the queries, best first, at most `top_k` results
    /// at or above the similarity threshold.
    pub async fn search(&self, queries: &[String]) -> Result<Vec<SearchResult>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        // slot -> best similarity across all queries
        let mut best_slots: HashMap<u64, f32> = HashMap::new();
        for query in queries {
            let embedding = self.shared.provider.embed_text(query).await?;
            let hits = {
                let index = self.shared.index.read().await;
                index.search(&embedding, self.top_k)?
            };
            for (slot, distance) in hits {
                let similarity = 1.0 - distance * distance / 2.0;
                if similarity < self.threshold {
                    continue;
                }
                let entry = best_slots.entry(slot).or_insert(f32::NEG_INFINITY);
                if similarity > *entry {
                    *entry = similarity;
                }
            }
        }
        if best_slots.is_empty() {
            debug!(queries = queries.len(), "no matches above threshold");
            return Ok(Vec::new());
        }

        let slots: Vec<u64> = best_slots.keys().copied().collect();
        let resolved = self.shared.store.resolve_slots(&slots).await?;

        // commit -> best similarity across its slots
        let mut best_commits: HashMap<String, f32> = HashMap::new();
        for (slot, similarity) in best_slots {
            let Some(commit_id) = resolved.get(&slot) else {
                // A slot without a row was inserted by an in-flight pass that
                // has not committed its transaction yet; skip it.
                debug!(slot, "slot has no metadata row yet");
                continue;
            };
            let entry = best_commits
                .entry(commit_id.clone())
                .or_insert(f32::NEG_INFINITY);
            if similarity > *entry {
                *entry = similarity;
            }
        }

        let mut results: Vec<SearchResult> = best_commits
            .into_iter()
            .map(|(commit_id, similarity)| SearchResult {
                commit_id,
                similarity,
            })
            .collect();
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(self.top_k);
        Ok(results)
    }

    /// Search and join each result with its commit record. Failures are
    /// folded into the response envelope instead of propagating.
    pub async fn search_response(&self, queries: &[String]) -> SearchResponse {
        let results = match self.search(queries).await {
            Ok(results) => results,
            Err(error) => {
                warn!(%error, "search failed");
                return SearchResponse {
                    success: false,
                    results: Vec::new(),
                    error: Some(error.to_string()),
                };
            }
        };

        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            match self.shared.log.commit(&result.commit_id).await {
                Ok(Some(record)) => hits.push(SearchHit {
                    commit_id: result.commit_id,
                    message: record.message,
                    timestamp: record.timestamp,
                    similarity: result.similarity,
                }),
                Ok(None) => {
                    warn!(commit = %result.commit_id, "indexed commit missing from log");
                }
                Err(error) => {
                    warn!(%error, "commit lookup failed");
                    return SearchResponse {
                        success: false,
                        results: Vec::new(),
                        error: Some(error.to_string()),
                    };
                }
            }
        }
        SearchResponse {
            success: true,
            results: hits,
            error: None,
        }
    }
}
