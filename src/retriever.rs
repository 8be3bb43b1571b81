// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query-time retrieval.
//!
//! A query is normalized, embedded, searched with over-fetch so that
//! post-filtering and reranking do not starve the result, thresholded,
//! reranked, cited and truncated to `k`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::citation::{Citation, CitationBinder};
use crate::config::Config;
use crate::embedding::BoundedEmbedder;
use crate::errors::{RagError, Result};
use crate::filters::EntryFilter;
use crate::index::VectorIndex;
use crate::rerank::{NoRerank, RerankCandidate, Reranker};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Configuration for retrieval
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Number of results when the caller does not ask for a specific k
    pub default_k: usize,
    /// Hits below this similarity are dropped; 0.0 disables the threshold
    pub min_score: f32,
    /// Candidates fetched per requested result
    pub overfetch_factor: usize,
    /// Deadline for embedding the query
    pub embed_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            min_score: 0.0,
            overfetch_factor: 3,
            embed_timeout: Duration::from_secs(30),
        }
    }
}

impl RetrieverConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_k: config.retrieval.default_k(),
            min_score: config.retrieval.min_score(),
            overfetch_factor: config.retrieval.overfetch_factor(),
            embed_timeout: config.embeddings.timeout(),
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_overfetch_factor(mut self, factor: usize) -> Self {
        self.overfetch_factor = factor.max(1);
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    fn threshold(&self) -> Option<f32> {
        (self.min_score != 0.0).then_some(self.min_score)
    }
}

/// A single ranked passage with its citation.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    /// Raw cosine similarity
    pub similarity: f32,
    /// Similarity plus rerank adjustment; the ranking key
    pub score: f32,
    pub text: String,
    pub citation: Citation,
    #[serde(skip)]
    ingested_at: i64,
    #[serde(skip)]
    seq: u64,
}

/// Ordered retrieval output for one query. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    fn empty(query: String) -> Self {
        Self {
            query,
            hits: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }
}

/// Trims and collapses whitespace. Returns `None` for blank queries.
pub fn normalize_query(query: &str) -> Option<String> {
    let normalized = WHITESPACE_RE.replace_all(query.trim(), " ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.into_owned())
    }
}

/// Retrieval orchestrator.
pub struct Retriever {
    embedder: BoundedEmbedder,
    index: Arc<VectorIndex>,
    binder: CitationBinder,
    reranker: Box<dyn Reranker>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(
        embedder: BoundedEmbedder,
        index: Arc<VectorIndex>,
        binder: CitationBinder,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            binder,
            reranker: Box::new(NoRerank),
            config,
        }
    }

    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieves up to `k` passages for `query_text`.
    ///
    /// An empty index yields an empty result. A blank query or `k == 0` is
    /// `InvalidQuery`. A hit whose chunk cannot be cited fails the whole call
    /// with `NotFound`, unless its entry left the index after the search, in
    /// which case the hit is dropped.
    pub fn retrieve(
        &self,
        query_text: &str,
        k: usize,
        filter: &EntryFilter,
    ) -> Result<RetrievalResult> {
        let query = normalize_query(query_text)
            .ok_or_else(|| RagError::InvalidQuery("query is empty".to_string()))?;
        if k == 0 {
            return Err(RagError::InvalidQuery("k must be at least 1".to_string()));
        }

        let total = self.index.len()?;
        if total == 0 {
            debug!(query = %query, "index is empty; returning no results");
            return Ok(RetrievalResult::empty(query));
        }

        let vector = self.embedder.embed_query(&query, self.config.embed_timeout)?;
        if vector.len() != self.index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: vector.len(),
            });
        }

        let fetch = k
            .saturating_mul(self.config.overfetch_factor.max(1))
            .min(total);
        let mut candidates = self
            .index
            .search(&vector, fetch, |meta| filter.matches(meta))?;
        let fetched = candidates.len();

        if let Some(threshold) = self.config.threshold() {
            candidates.retain(|hit| hit.score >= threshold);
        }

        let mut hits = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some((chunk, citation)) = self.binder.lookup(&candidate.chunk_id)? else {
                if self.index.contains(&candidate.chunk_id)? {
                    error!(
                        chunk_id = %candidate.chunk_id,
                        "integrity fault: chunk has no metadata record and cannot be cited"
                    );
                    return Err(RagError::NotFound(candidate.chunk_id));
                }
                debug!(chunk_id = %candidate.chunk_id, "skipping hit removed during retrieval");
                continue;
            };
            let adjustment = self.reranker.rerank(
                &query,
                &RerankCandidate {
                    chunk_id: &candidate.chunk_id,
                    similarity: candidate.score,
                    text: &chunk.text,
                    metadata: &candidate.metadata,
                },
            );
            hits.push(RetrievalHit {
                chunk_id: candidate.chunk_id,
                similarity: candidate.score,
                score: candidate.score + adjustment,
                text: chunk.text,
                citation,
                ingested_at: candidate.metadata.ingested_at,
                seq: candidate.seq,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.ingested_at.cmp(&a.ingested_at))
                .then_with(|| a.seq.cmp(&b.seq))
        });
        hits.truncate(k);

        debug!(
            query = %query,
            k,
            fetched,
            returned = hits.len(),
            reranker = self.reranker.name(),
            "retrieval complete"
        );
        Ok(RetrievalResult { query, hits })
    }

    /// Retrieves with the configured default k.
    pub fn retrieve_default(&self, query_text: &str, filter: &EntryFilter) -> Result<RetrievalResult> {
        self.retrieve(query_text, self.config.default_k, filter)
    }
}
