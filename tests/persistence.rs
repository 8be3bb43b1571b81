// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use lexrag::config::{EmbeddingConfig, EmbeddingProviderType};
use lexrag::embedding::HashingProvider;
use lexrag::index::INDEX_FILE;
use lexrag::{Config, DocumentInput, EntryFilter, EntryMetadata, RagError, VectorIndex, Workspace};

const TIMEOUT: Duration = Duration::from_secs(10);

fn hashing_config(dimension: usize) -> Config {
    Config {
        embeddings: EmbeddingConfig {
            provider: Some(EmbeddingProviderType::Hashing),
            dimension: Some(dimension),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn meta(document_id: &str) -> EntryMetadata {
    EntryMetadata {
        document_id: document_id.to_string(),
        classification: Some("contract".to_string()),
        ingested_at: 42,
    }
}

#[test]
fn index_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(INDEX_FILE);

    let index = VectorIndex::new("test-model", 3).unwrap();
    index.insert("a#0", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
    index.insert("a#1", vec![0.0, 1.0, 0.0], meta("a")).unwrap();
    index.insert("b#0", vec![0.6, 0.8, 0.0], meta("b")).unwrap();
    index.save(&path, TIMEOUT).unwrap();

    let reopened = VectorIndex::open(&path, TIMEOUT).unwrap();
    assert_eq!(reopened.identity(), index.identity());
    assert_eq!(reopened.len().unwrap(), 3);

    let before = index.search(&[1.0, 0.2, 0.0], 3, |_| true).unwrap();
    let after = reopened.search(&[1.0, 0.2, 0.0], 3, |_| true).unwrap();
    assert_eq!(before, after);

    // Sequence numbers continue after the persisted ones.
    reopened.insert("c#0", vec![0.0, 0.0, 1.0], meta("c")).unwrap();
    let hits = reopened.search(&[0.0, 0.0, 1.0], 1, |_| true).unwrap();
    assert_eq!(hits[0].chunk_id, "c#0");
    assert!(hits[0].seq > before.iter().map(|h| h.seq).max().unwrap());
}

#[test]
fn opening_with_other_dimension_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(INDEX_FILE);
    let index = VectorIndex::new("test-model", 3).unwrap();
    index.insert("a#0", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
    index.save(&path, TIMEOUT).unwrap();

    assert!(matches!(
        VectorIndex::open_compatible(&path, "test-model", 4, TIMEOUT),
        Err(RagError::DimensionMismatch {
            expected: 3,
            actual: 4
        })
    ));
}

#[test]
fn workspace_survives_restart() {
    let dir = TempDir::new().unwrap();
    let first_hits = {
        let ws = Workspace::open(dir.path(), hashing_config(128)).unwrap();
        ws.ingest(
            DocumentInput::new("lease", "Rent is due on the first day of each month.")
                .with_classification("contract"),
        )
        .unwrap();
        ws.ingest(DocumentInput::new("memo", "The partners met to discuss billing."))
            .unwrap();
        let hits = ws
            .retrieve("rent due", Some(2), &EntryFilter::new())
            .unwrap()
            .hits;
        ws.close().unwrap();
        hits
    };

    let ws = Workspace::open(dir.path(), hashing_config(128)).unwrap();
    let hits = ws
        .retrieve("rent due", Some(2), &EntryFilter::new())
        .unwrap()
        .hits;
    assert_eq!(hits.len(), first_hits.len());
    for (a, b) in hits.iter().zip(&first_hits) {
        assert_eq!(a.chunk_id, b.chunk_id);
        assert_eq!(a.citation, b.citation);
        assert!((a.score - b.score).abs() < 1e-6);
    }

    let docs = ws.documents().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(
        ws.status().unwrap().identity.model_id,
        "lexrag-hashing-v1"
    );
}

#[test]
fn workspace_rejects_incompatible_embedder() {
    let dir = TempDir::new().unwrap();
    let ws = Workspace::open(dir.path(), hashing_config(64)).unwrap();
    ws.ingest(DocumentInput::new("lease", "Rent is due monthly.")).unwrap();
    ws.close().unwrap();

    assert!(matches!(
        Workspace::open(dir.path(), hashing_config(32)),
        Err(RagError::DimensionMismatch { .. })
    ));

    let provider = Box::new(HashingProvider::new(64).with_model_id("other-model"));
    assert!(matches!(
        Workspace::open_with_provider(dir.path(), hashing_config(64), provider),
        Err(RagError::Configuration(_))
    ));
}

#[test]
fn corrupt_index_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let ws = Workspace::open(dir.path(), hashing_config(16)).unwrap();
    ws.ingest(DocumentInput::new("a", "alpha")).unwrap();
    ws.close().unwrap();

    fs::write(dir.path().join(".lexrag").join(INDEX_FILE), b"not a database").unwrap();
    assert!(Workspace::open(dir.path(), hashing_config(16)).is_err());
}
