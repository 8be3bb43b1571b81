// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core records: documents, chunks and the metadata snapshot kept per index entry.
//!
//! Chunks refer to their document by id only. Documents are looked up in the
//! [`MetadataStore`](crate::store::MetadataStore); nothing holds a pointer back.

use serde::{Deserialize, Serialize};

/// A document as delivered by the extraction pipeline, before ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentInput {
    pub document_id: String,
    /// Normalized text produced by the external extractor
    pub text: String,
    /// External location of the source (path, object key, ...)
    pub source_ref: Option<String>,
    /// Format tag such as "pdf" or "docx"
    pub format: Option<String>,
    /// Classification assigned by the external classifier
    pub classification: Option<String>,
    /// Character offsets where each page begins
    #[serde(default)]
    pub page_starts: Vec<usize>,
    /// Ingestion timestamp (unix seconds); defaults to now
    pub ingested_at: Option<i64>,
}

impl DocumentInput {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            source_ref: None,
            format: None,
            classification: None,
            page_starts: Vec::new(),
            ingested_at: None,
        }
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn with_source(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_page_starts(mut self, page_starts: Vec<usize>) -> Self {
        self.page_starts = page_starts;
        self
    }

    pub fn with_ingested_at(mut self, ingested_at: i64) -> Self {
        self.ingested_at = Some(ingested_at);
        self
    }

    /// Derives page starts from form-feed page separators in the text.
    ///
    /// The first page always starts at offset 0.
    pub fn page_starts_from_form_feeds(text: &str) -> Vec<usize> {
        let mut starts = vec![0];
        for (idx, ch) in text.chars().enumerate() {
            if ch == '\u{c}' {
                starts.push(idx + 1);
            }
        }
        starts
    }
}

/// An ingested document. Immutable except for its classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub document_id: String,
    pub source_ref: Option<String>,
    pub format: Option<String>,
    pub classification: Option<String>,
    pub ingested_at: i64,
    pub page_starts: Vec<usize>,
    /// Length of the normalized text in characters
    pub char_len: usize,
}

impl Document {
    /// Returns the 1-indexed page containing the given character offset.
    pub fn page_of(&self, offset: usize) -> Option<u32> {
        if self.page_starts.is_empty() {
            return None;
        }
        let idx = self.page_starts.partition_point(|&start| start <= offset);
        Some(idx.max(1) as u32)
    }

    /// Label used in citation strings: the source reference, else the id.
    pub fn label(&self) -> &str {
        self.source_ref.as_deref().unwrap_or(&self.document_id)
    }
}

/// A contiguous, bounded span of a document's normalized text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `<document_id>#<sequence>`
    pub chunk_id: String,
    pub document_id: String,
    pub sequence: u32,
    /// Start offset in characters (inclusive)
    pub start: usize,
    /// End offset in characters (exclusive)
    pub end: usize,
    pub text: String,
    /// blake3 hex digest of `text`
    pub text_hash: String,
    /// Populated once by the embedder, never mutated afterwards
    pub vector: Option<Vec<f32>>,
}

impl Chunk {
    pub fn make_id(document_id: &str, sequence: u32) -> String {
        format!("{}#{}", document_id, sequence)
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Filterable metadata snapshot stored alongside each index entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryMetadata {
    pub document_id: String,
    pub classification: Option<String>,
    pub ingested_at: i64,
}

impl EntryMetadata {
    pub fn for_document(document: &Document) -> Self {
        Self {
            document_id: document.document_id.clone(),
            classification: document.classification.clone(),
            ingested_at: document.ingested_at,
        }
    }
}

pub(crate) fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
