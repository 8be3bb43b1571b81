// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pluggable reranking.
//!
//! A reranker returns an additive adjustment; the final score of a hit is
//! `similarity + adjustment`.

use std::collections::HashMap;

use crate::config::RerankConfig;
use crate::model::EntryMetadata;

/// What a reranker may inspect about a candidate.
#[derive(Debug, Clone, Copy)]
pub struct RerankCandidate<'a> {
    pub chunk_id: &'a str,
    pub similarity: f32,
    pub text: &'a str,
    pub metadata: &'a EntryMetadata,
}

/// Score adjustment strategy.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Additive adjustment for `candidate` given the normalized query.
    fn rerank(&self, query: &str, candidate: &RerankCandidate<'_>) -> f32;
}

/// Keeps raw similarity ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRerank;

impl Reranker for NoRerank {
    fn name(&self) -> &str {
        "none"
    }

    fn rerank(&self, _query: &str, _candidate: &RerankCandidate<'_>) -> f32 {
        0.0
    }
}

/// Boosts chunks whose document carries a configured classification.
#[derive(Debug, Clone, Default)]
pub struct ClassificationBoost {
    boosts: HashMap<String, f32>,
}

impl ClassificationBoost {
    pub fn new<I, S>(boosts: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: AsRef<str>,
    {
        Self {
            boosts: boosts
                .into_iter()
                .map(|(tag, boost)| (tag.as_ref().to_lowercase(), boost))
                .collect(),
        }
    }
}

impl Reranker for ClassificationBoost {
    fn name(&self) -> &str {
        "classification-boost"
    }

    fn rerank(&self, _query: &str, candidate: &RerankCandidate<'_>) -> f32 {
        candidate
            .metadata
            .classification
            .as_deref()
            .and_then(|tag| self.boosts.get(&tag.to_lowercase()))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Picks the reranker described by configuration.
pub fn from_config(config: &RerankConfig) -> Box<dyn Reranker> {
    if config.classification_boosts.is_empty() {
        Box::new(NoRerank)
    } else {
        Box::new(ClassificationBoost::new(
            config
                .classification_boosts
                .iter()
                .map(|(tag, boost)| (tag.as_str(), *boost)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate<'a>(meta: &'a EntryMetadata) -> RerankCandidate<'a> {
        RerankCandidate {
            chunk_id: "a#0",
            similarity: 0.5,
            text: "text",
            metadata: meta,
        }
    }

    #[test]
    fn test_classification_boost() {
        let boost = ClassificationBoost::new([("Statute", 0.2_f32)]);
        let statute = EntryMetadata {
            document_id: "a".into(),
            classification: Some("statute".into()),
            ingested_at: 0,
        };
        let other = EntryMetadata {
            classification: Some("contract".into()),
            ..statute.clone()
        };
        assert_eq!(boost.rerank("q", &candidate(&statute)), 0.2);
        assert_eq!(boost.rerank("q", &candidate(&other)), 0.0);
    }

    #[test]
    fn test_from_config() {
        assert_eq!(from_config(&RerankConfig::default()).name(), "none");
        let mut config = RerankConfig::default();
        config.classification_boosts.insert("brief".into(), 0.1);
        assert_eq!(from_config(&config).name(), "classification-boost");
    }
}
