// SPDX-License-Identifier: MIT OR Apache-2.0

//! Citation binding: chunk id to a verifiable source reference.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::error;

use crate::errors::{RagError, Result};
use crate::model::{Chunk, Document};
use crate::store::MetadataStore;

/// Inclusive 1-indexed page span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "p. {}", self.first)
        } else {
            write!(f, "pp. {}-{}", self.first, self.last)
        }
    }
}

/// A resolved reference from a chunk back to its source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    /// Character offset range `[start, end)` in the normalized text
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageRange>,
    /// Normalized citation string, e.g. `lease.txt, pp. 2-3, chars 1600-2600`
    pub display: String,
}

impl Citation {
    /// Builds the citation for a chunk of `document`.
    pub fn for_chunk(chunk: &Chunk, document: &Document) -> Self {
        let pages = document.page_of(chunk.start).and_then(|first| {
            let last = document.page_of(chunk.end.saturating_sub(1).max(chunk.start))?;
            Some(PageRange { first, last })
        });

        let display = match pages {
            Some(pages) => format!(
                "{}, {}, chars {}-{}",
                document.label(),
                pages,
                chunk.start,
                chunk.end
            ),
            None => format!("{}, chars {}-{}", document.label(), chunk.start, chunk.end),
        };

        Self {
            chunk_id: chunk.chunk_id.clone(),
            document_id: document.document_id.clone(),
            start: chunk.start,
            end: chunk.end,
            pages,
            display,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Resolves chunk ids into citations using stored metadata only.
#[derive(Debug, Clone)]
pub struct CitationBinder {
    store: Arc<MetadataStore>,
}

impl CitationBinder {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    /// Binds a chunk id to its citation.
    ///
    /// An unknown id means the index and the metadata store disagree. That
    /// is logged as an integrity fault and returned as `NotFound`.
    pub fn bind(&self, chunk_id: &str) -> Result<Citation> {
        self.bind_with_chunk(chunk_id)
            .map(|(_, citation)| citation)
    }

    /// Binds a chunk id and also returns the chunk record.
    pub fn bind_with_chunk(&self, chunk_id: &str) -> Result<(Chunk, Citation)> {
        self.lookup(chunk_id)?.ok_or_else(|| {
            error!(
                chunk_id,
                "integrity fault: chunk has no metadata record and cannot be cited"
            );
            RagError::NotFound(chunk_id.to_string())
        })
    }

    /// Like [`bind_with_chunk`](Self::bind_with_chunk), but an unknown chunk
    /// is `None` and nothing is logged. Callers decide whether a miss is a
    /// fault.
    pub fn lookup(&self, chunk_id: &str) -> Result<Option<(Chunk, Citation)>> {
        match self.store.resolve(chunk_id) {
            Ok((chunk, document)) => {
                let citation = Citation::for_chunk(&chunk, &document);
                Ok(Some((chunk, citation)))
            }
            Err(RagError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }
}
