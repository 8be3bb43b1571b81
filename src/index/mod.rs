// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector index over chunk embeddings.
//!
//! The index keeps one entry per embedded chunk: its vector, a filterable
//! metadata snapshot and an insertion sequence number. Search is exact cosine
//! similarity, scored in parallel, with ties broken by lower insertion order.
//!
//! Readers and writers follow a reader-writer discipline: any number of
//! concurrent searches, exclusive insert/remove. Multi-entry writes validate
//! everything before touching state, so a failed call leaves the index as it
//! was.

mod storage;

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::deadline::{is_cancelled, run_with_timeout};
use crate::errors::{RagError, Result};
use crate::model::EntryMetadata;
use crate::persist::StagedFile;

use storage::Snapshot;

/// On-disk format version of the persisted index.
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the persisted index inside the index directory.
pub const INDEX_FILE: &str = "vectors.sqlite";

/// Identity marker persisted with the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexIdentity {
    pub model_id: String,
    pub dimension: usize,
    pub schema_version: u32,
}

impl IndexIdentity {
    /// Verifies that vectors from `model_id` with `dimension` may be used
    /// against this index.
    pub fn check_compatible(&self, model_id: &str, dimension: usize) -> Result<()> {
        if self.dimension != dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension,
            });
        }
        if self.model_id != model_id {
            return Err(RagError::Configuration(format!(
                "index was built with model '{}', configured model is '{}'",
                self.model_id, model_id
            )));
        }
        Ok(())
    }
}

/// A stored vector and its metadata snapshot.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
    /// Insertion order, used for deterministic tie-breaking
    pub seq: u64,
    norm: f32,
}

impl IndexEntry {
    fn new(chunk_id: String, vector: Vec<f32>, metadata: EntryMetadata, seq: u64) -> Self {
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        Self {
            chunk_id,
            vector,
            metadata,
            seq,
            norm,
        }
    }
}

/// Input for [`VectorIndex::insert_batch`].
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
    pub seq: u64,
    pub metadata: EntryMetadata,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: BTreeMap<u64, IndexEntry>,
    by_chunk: HashMap<String, u64>,
    next_seq: u64,
}

impl IndexState {
    fn push(&mut self, chunk_id: String, vector: Vec<f32>, metadata: EntryMetadata) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_chunk.insert(chunk_id.clone(), seq);
        self.entries
            .insert(seq, IndexEntry::new(chunk_id, vector, metadata, seq));
    }
}

/// In-memory exact vector index with SQLite persistence.
#[derive(Debug)]
pub struct VectorIndex {
    identity: IndexIdentity,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Creates an empty index for vectors of `dimension` produced by `model_id`.
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Configuration(
                "index dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            identity: IndexIdentity {
                model_id: model_id.into(),
                dimension,
                schema_version: SCHEMA_VERSION,
            },
            state: RwLock::new(IndexState::default()),
        })
    }

    pub fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    pub fn dimension(&self) -> usize {
        self.identity.dimension
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, chunk_id: &str) -> Result<bool> {
        Ok(self.read()?.by_chunk.contains_key(chunk_id))
    }

    /// Chunk ids of every entry, in insertion order.
    pub fn chunk_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .entries
            .values()
            .map(|entry| entry.chunk_id.clone())
            .collect())
    }

    /// Inserts a single entry.
    ///
    /// Fails with `DuplicateChunk` when the id is present and with
    /// `DimensionMismatch` when the vector has the wrong length.
    pub fn insert(
        &self,
        chunk_id: impl Into<String>,
        vector: Vec<f32>,
        metadata: EntryMetadata,
    ) -> Result<()> {
        self.insert_batch(vec![NewEntry {
            chunk_id: chunk_id.into(),
            vector,
            metadata,
        }])
    }

    /// Inserts entries all-or-nothing.
    ///
    /// Every entry is validated (dimension, duplicates within the batch and
    /// against the index) before any is inserted.
    pub fn insert_batch(&self, batch: Vec<NewEntry>) -> Result<()> {
        for entry in &batch {
            self.check_dimension(&entry.vector)?;
        }

        let mut state = self.write()?;
        let mut seen = HashSet::with_capacity(batch.len());
        for entry in &batch {
            if state.by_chunk.contains_key(&entry.chunk_id) || !seen.insert(entry.chunk_id.as_str())
            {
                return Err(RagError::DuplicateChunk(entry.chunk_id.clone()));
            }
        }

        let count = batch.len();
        for entry in batch {
            state.push(entry.chunk_id, entry.vector, entry.metadata);
        }
        debug!(count, total = state.entries.len(), "inserted index entries");
        Ok(())
    }

    /// Removes one entry; fails with `NotFound` if absent.
    pub fn remove(&self, chunk_id: &str) -> Result<()> {
        let mut state = self.write()?;
        let seq = state
            .by_chunk
            .remove(chunk_id)
            .ok_or_else(|| RagError::NotFound(chunk_id.to_string()))?;
        state.entries.remove(&seq);
        Ok(())
    }

    /// Removes every entry of a document and returns how many were removed.
    pub fn remove_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.write()?;
        let doomed: Vec<(u64, String)> = state
            .entries
            .values()
            .filter(|entry| entry.metadata.document_id == document_id)
            .map(|entry| (entry.seq, entry.chunk_id.clone()))
            .collect();
        for (seq, chunk_id) in &doomed {
            state.entries.remove(seq);
            state.by_chunk.remove(chunk_id);
        }
        if !doomed.is_empty() {
            info!(document_id, removed = doomed.len(), "removed document from index");
        }
        Ok(doomed.len())
    }

    /// Updates the classification snapshot of every entry of a document.
    pub fn retag(&self, document_id: &str, classification: Option<&str>) -> Result<usize> {
        let mut state = self.write()?;
        let mut updated = 0;
        for entry in state.entries.values_mut() {
            if entry.metadata.document_id == document_id {
                entry.metadata.classification = classification.map(str::to_string);
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Returns up to `k` entries most similar to `query`, restricted to
    /// entries whose metadata satisfies `filter`.
    ///
    /// Results are ordered by cosine similarity descending, then by insertion
    /// order ascending. The dimension is checked before any scoring.
    pub fn search<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<SearchHit>>
    where
        F: Fn(&EntryMetadata) -> bool + Sync,
    {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = query.iter().map(|v| v * v).sum::<f32>().sqrt();
        let state = self.read()?;

        let mut scored: Vec<(f32, &IndexEntry)> = state
            .entries
            .par_iter()
            .filter(|(_, entry)| filter(&entry.metadata))
            .map(|(_, entry)| (cosine(query, query_norm, entry), entry))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.seq.cmp(&b.1.seq)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| SearchHit {
                chunk_id: entry.chunk_id.clone(),
                score,
                seq: entry.seq,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    /// Persists the full index to `path`, replacing any previous file.
    ///
    /// The state is staged in a temporary file and renamed into place, so a
    /// failed or timed-out save leaves the previous file intact.
    pub fn save(&self, path: &Path, timeout: Duration) -> Result<()> {
        let entries = self.len()?;
        self.stage(path, timeout)?.commit()?;
        info!(path = %path.display(), entries, "saved vector index");
        Ok(())
    }

    /// Writes a snapshot of the index next to `path` without replacing it.
    ///
    /// The caller commits the returned file; dropping it discards the
    /// snapshot. On timeout nothing is left on disk.
    pub fn stage(&self, path: &Path, timeout: Duration) -> Result<StagedFile> {
        let snapshot = {
            let state = self.read()?;
            Snapshot {
                identity: self.identity.clone(),
                next_seq: state.next_seq,
                entries: state.entries.values().cloned().collect(),
            }
        };
        let count = snapshot.entries.len();
        let target = path.to_path_buf();

        let staged = run_with_timeout("index save", timeout, move |cancel| {
            let staged =
                StagedFile::write(&target, |tmp| storage::write_snapshot(tmp, &snapshot))?;
            if is_cancelled(cancel) {
                return Err(RagError::timeout("index save", timeout));
            }
            Ok(staged)
        })?;
        debug!(path = %path.display(), entries = count, "staged vector index");
        Ok(staged)
    }

    /// Loads an index previously written by [`save`](Self::save).
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.is_file() {
            return Err(RagError::NotFound(path.display().to_string()));
        }
        let source = path.to_path_buf();
        let snapshot = run_with_timeout("index open", timeout, move |_| {
            storage::read_snapshot(&source)
        })?;

        let mut state = IndexState {
            next_seq: snapshot.next_seq,
            ..Default::default()
        };
        for entry in snapshot.entries {
            state.next_seq = state.next_seq.max(entry.seq + 1);
            state.by_chunk.insert(entry.chunk_id.clone(), entry.seq);
            state.entries.insert(entry.seq, entry);
        }

        info!(
            path = %path.display(),
            entries = state.entries.len(),
            model = %snapshot.identity.model_id,
            "opened vector index"
        );
        Ok(Self {
            identity: snapshot.identity,
            state: RwLock::new(state),
        })
    }

    /// Opens an index and verifies it matches the expected embedder.
    pub fn open_compatible(
        path: &Path,
        model_id: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let index = Self::open(path, timeout)?;
        index.identity.check_compatible(model_id, dimension)?;
        Ok(index)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.identity.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.identity.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|_| RagError::LockPoisoned("vector index"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|_| RagError::LockPoisoned("vector index"))
    }
}

fn cosine(query: &[f32], query_norm: f32, entry: &IndexEntry) -> f32 {
    if query_norm == 0.0 || entry.norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(&entry.vector).map(|(a, b)| a * b).sum();
    dot / (query_norm * entry.norm)
}
