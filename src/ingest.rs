// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document ingestion: chunk, embed, record metadata, index.
//!
//! Ingestions of different documents run independently. Ingestions of the
//! same document id are serialized by a per-document exclusion scope, and a
//! failure at any step leaves neither the metadata store nor the index
//! holding part of the document.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::chunker::DocumentChunker;
use crate::embedding::BoundedEmbedder;
use crate::errors::{RagError, Result};
use crate::index::{NewEntry, VectorIndex};
use crate::model::{now_unix_secs, Chunk, Document, DocumentInput, EntryMetadata};
use crate::store::MetadataStore;

/// Per-document exclusion scopes.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    active: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Held while a document is being mutated; releases the scope on drop.
#[derive(Debug)]
pub struct DocumentGuard<'a> {
    locks: &'a DocumentLocks,
    document_id: String,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive access to `document_id`.
    pub fn acquire(&self, document_id: &str, timeout: Duration) -> Result<DocumentGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut active = self
            .active
            .lock()
            .map_err(|_| RagError::LockPoisoned("document locks"))?;

        while active.contains(document_id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RagError::timeout(
                    format!("waiting for document {}", document_id),
                    timeout,
                ));
            }
            let (guard, _) = self
                .released
                .wait_timeout(active, remaining)
                .map_err(|_| RagError::LockPoisoned("document locks"))?;
            active = guard;
        }

        active.insert(document_id.to_string());
        Ok(DocumentGuard {
            locks: self,
            document_id: document_id.to_string(),
        })
    }

    fn release(&self, document_id: &str) {
        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(document_id);
        drop(active);
        self.released.notify_all();
    }
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.document_id);
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub chars: usize,
}

/// Runs the chunk → embed → store → index pipeline.
pub struct Ingestor {
    chunker: DocumentChunker,
    embedder: BoundedEmbedder,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    locks: DocumentLocks,
}

impl Ingestor {
    pub fn new(
        chunker: DocumentChunker,
        embedder: BoundedEmbedder,
        index: Arc<VectorIndex>,
        store: Arc<MetadataStore>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            store,
            locks: DocumentLocks::new(),
        }
    }

    /// Exclusion scope shared with other document mutations.
    pub fn locks(&self) -> &DocumentLocks {
        &self.locks
    }

    /// Ingests one document.
    ///
    /// `timeout` bounds the lock wait and the embedding call. Re-ingesting a
    /// known document id fails with `DuplicateChunk`; remove it first for
    /// replace semantics.
    pub fn ingest(&self, input: DocumentInput, timeout: Duration) -> Result<IngestReport> {
        let started = Instant::now();
        validate_input(&input)?;
        if self.embedder.dimension() != self.index.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: self.embedder.dimension(),
            });
        }
        let _guard = self.locks.acquire(&input.document_id, timeout)?;

        if self.store.contains_document(&input.document_id)? {
            return Err(RagError::DuplicateChunk(Chunk::make_id(&input.document_id, 0)));
        }

        let mut chunks = self.chunker.chunk(&input.document_id, &input.text)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(RagError::timeout("embed batch", timeout));
        }
        let vectors = self.embedder.embed_batch(texts, remaining)?;

        let document = Document {
            document_id: input.document_id.clone(),
            source_ref: input.source_ref,
            format: input.format,
            classification: input.classification,
            ingested_at: input.ingested_at.unwrap_or_else(now_unix_secs),
            page_starts: input.page_starts,
            char_len: input.text.chars().count(),
        };
        let metadata = EntryMetadata::for_document(&document);

        let entries: Vec<NewEntry> = chunks
            .iter_mut()
            .zip(vectors)
            .map(|(chunk, vector)| {
                chunk.vector = Some(vector.clone());
                NewEntry {
                    chunk_id: chunk.chunk_id.clone(),
                    vector,
                    metadata: metadata.clone(),
                }
            })
            .collect();

        let report = IngestReport {
            document_id: document.document_id.clone(),
            chunks: chunks.len(),
            chars: document.char_len,
        };

        self.store.put_document(document, chunks)?;
        if let Err(err) = self.index.insert_batch(entries) {
            warn!(document_id = %report.document_id, error = %err, "index insert failed; rolling back metadata");
            self.store.remove_document(&report.document_id)?;
            return Err(err);
        }

        info!(
            document_id = %report.document_id,
            chunks = report.chunks,
            chars = report.chars,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingested document"
        );
        Ok(report)
    }
}

fn validate_input(input: &DocumentInput) -> Result<()> {
    if input.document_id.trim().is_empty() {
        return Err(RagError::InvalidDocument(
            "document id must not be empty".to_string(),
        ));
    }
    if input.page_starts.is_empty() {
        return Ok(());
    }
    if input.page_starts[0] != 0 {
        return Err(RagError::InvalidDocument(format!(
            "{}: first page must start at offset 0",
            input.document_id
        )));
    }
    if input.page_starts.windows(2).any(|w| w[0] >= w[1]) {
        return Err(RagError::InvalidDocument(format!(
            "{}: page starts must be strictly increasing",
            input.document_id
        )));
    }
    let char_len = input.text.chars().count();
    if input.page_starts.iter().any(|&start| start > char_len) {
        return Err(RagError::InvalidDocument(format!(
            "{}: page start beyond end of text ({} chars)",
            input.document_id, char_len
        )));
    }
    Ok(())
}
