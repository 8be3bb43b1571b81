// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metadata filtering for retrieval
//!
//! An [`EntryFilter`] is evaluated against the metadata snapshot of every
//! index entry during search. Each populated field narrows the result; an
//! empty filter accepts everything.

use serde::{Deserialize, Serialize};

use crate::model::EntryMetadata;

/// Predicate over index entry metadata.
///
/// - `classifications`: entry classification is any of these tags (case-insensitive)
/// - `document_ids`: entry belongs to any of these documents
/// - `ingested_after` / `ingested_before`: inclusive unix-second bounds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_after: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_before: Option<i64>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classification(mut self, tag: impl Into<String>) -> Self {
        self.classifications.push(tag.into());
        self
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_ids.push(document_id.into());
        self
    }

    pub fn ingested_between(mut self, after: Option<i64>, before: Option<i64>) -> Self {
        self.ingested_after = after;
        self.ingested_before = before;
        self
    }

    /// True when no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.classifications.is_empty()
            && self.document_ids.is_empty()
            && self.ingested_after.is_none()
            && self.ingested_before.is_none()
    }

    /// Check whether an entry satisfies every populated constraint
    pub fn matches(&self, meta: &EntryMetadata) -> bool {
        if !self.classifications.is_empty() {
            let Some(tag) = meta.classification.as_deref() else {
                return false;
            };
            if !self
                .classifications
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(tag))
            {
                return false;
            }
        }

        if !self.document_ids.is_empty()
            && !self.document_ids.iter().any(|id| *id == meta.document_id)
        {
            return false;
        }

        if let Some(after) = self.ingested_after {
            if meta.ingested_at < after {
                return false;
            }
        }
        if let Some(before) = self.ingested_before {
            if meta.ingested_at > before {
                return false;
            }
        }

        true
    }
}
