// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace lifecycle: open → serve → checkpoint/close.
//!
//! A workspace ties the configured embedder to a persisted vector index and
//! metadata store under one directory. The persisted files are the single
//! source of truth; each process loads them explicitly in [`Workspace::open`]
//! and writes them back in [`Workspace::checkpoint`].

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{error, info};

use crate::chunker::DocumentChunker;
use crate::citation::{Citation, CitationBinder};
use crate::config::Config;
use crate::embedding::{create_provider, BoundedEmbedder, EmbeddingProvider};
use crate::errors::{RagError, Result};
use crate::filters::EntryFilter;
use crate::index::{IndexIdentity, VectorIndex, INDEX_FILE};
use crate::ingest::{IngestReport, Ingestor};
use crate::model::{Chunk, Document, DocumentInput};
use crate::rerank;
use crate::retriever::{RetrievalResult, Retriever, RetrieverConfig};
use crate::store::{MetadataStore, STORE_FILE};

/// Snapshot of workspace state for `status` reporting.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub root: PathBuf,
    pub index_path: PathBuf,
    pub identity: IndexIdentity,
    pub documents: usize,
    pub chunks: usize,
    pub index_entries: usize,
    pub persisted: bool,
}

/// An open retrieval workspace.
pub struct Workspace {
    root: PathBuf,
    index_dir: PathBuf,
    config: Config,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    binder: CitationBinder,
    ingestor: Ingestor,
    retriever: Retriever,
    /// Mutations hold this shared; a checkpoint holds it exclusively so the
    /// index and the store are captured at the same point.
    persist_gate: RwLock<()>,
}

impl Workspace {
    /// Opens the workspace at `root`, loading configuration from it.
    pub fn open_at(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let config = Config::load_for_dir(root)?;
        Self::open(root, config)
    }

    /// Opens the workspace at `root` with the configured embedding provider.
    pub fn open(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let provider = create_provider(&config.embeddings)?;
        Self::open_with_provider(root, config, provider)
    }

    /// Opens the workspace with an explicit provider.
    ///
    /// A persisted index built with a different dimension fails with
    /// `DimensionMismatch`; one built with a different model fails with
    /// `Configuration`.
    pub fn open_with_provider(
        root: impl AsRef<Path>,
        config: Config,
        provider: Box<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        let index_dir = config.index.resolve_path(&root);
        let io_timeout = config.index.io_timeout();
        let embedder = BoundedEmbedder::new(provider);

        let index_path = index_dir.join(INDEX_FILE);
        let store_path = index_dir.join(STORE_FILE);
        let (index, store) = match (index_path.is_file(), store_path.is_file()) {
            (true, true) => {
                let index = VectorIndex::open_compatible(
                    &index_path,
                    embedder.model_id(),
                    embedder.dimension(),
                    io_timeout,
                )?;
                let store = MetadataStore::open(&store_path, io_timeout)?;
                (index, store)
            }
            (false, false) => (
                VectorIndex::new(embedder.model_id(), embedder.dimension())?,
                MetadataStore::new(),
            ),
            (has_index, _) => {
                let missing = if has_index { &store_path } else { &index_path };
                error!(missing = %missing.display(), "workspace is missing half of its persisted state");
                return Err(RagError::Configuration(format!(
                    "incomplete workspace: {} is missing",
                    missing.display()
                )));
            }
        };
        check_consistency(&index, &store)?;

        let index = Arc::new(index);
        let store = Arc::new(store);
        let binder = CitationBinder::new(Arc::clone(&store));
        let ingestor = Ingestor::new(
            DocumentChunker::new(config.chunking.to_chunk_config()?)?,
            embedder.clone(),
            Arc::clone(&index),
            Arc::clone(&store),
        );
        let retriever = Retriever::new(
            embedder,
            Arc::clone(&index),
            binder.clone(),
            RetrieverConfig::from_config(&config),
        )
        .with_reranker(rerank::from_config(&config.rerank));

        info!(
            root = %root.display(),
            entries = index.len()?,
            model = %index.identity().model_id,
            "opened workspace"
        );
        Ok(Self {
            root,
            index_dir,
            config,
            index,
            store,
            binder,
            ingestor,
            retriever,
            persist_gate: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Chunks, embeds and indexes a document.
    pub fn ingest(&self, input: DocumentInput) -> Result<IngestReport> {
        let _mutation = self.mutation_scope()?;
        self.ingestor
            .ingest(input, self.config.embeddings.timeout())
    }

    /// Runs a query. `k` defaults to the configured `default_k`.
    pub fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        filter: &EntryFilter,
    ) -> Result<RetrievalResult> {
        match k {
            Some(k) => self.retriever.retrieve(query, k, filter),
            None => self.retriever.retrieve_default(query, filter),
        }
    }

    /// Binds a chunk id to its citation.
    pub fn cite(&self, chunk_id: &str) -> Result<Citation> {
        self.binder.bind(chunk_id)
    }

    pub fn chunk(&self, chunk_id: &str) -> Result<Chunk> {
        self.store.get_chunk(chunk_id)
    }

    pub fn documents(&self) -> Result<Vec<Document>> {
        self.store.list_documents()
    }

    /// Removes a document with all of its chunks and index entries.
    ///
    /// Index entries go first, so a concurrent search never sees an entry
    /// whose chunk record is already gone.
    pub fn remove_document(&self, document_id: &str) -> Result<usize> {
        let _mutation = self.mutation_scope()?;
        let _guard = self
            .ingestor
            .locks()
            .acquire(document_id, self.config.embeddings.timeout())?;
        if !self.store.contains_document(document_id)? {
            return Err(RagError::NotFound(document_id.to_string()));
        }
        let removed = self.index.remove_document(document_id)?;
        let (_, chunks) = self.store.remove_document(document_id)?;
        if removed != chunks.len() {
            error!(
                document_id,
                chunks = chunks.len(),
                entries = removed,
                "index and metadata disagreed on document size"
            );
        }
        info!(document_id, chunks = chunks.len(), "removed document");
        Ok(chunks.len())
    }

    /// Replaces a document's classification in the store and the index.
    pub fn reclassify(&self, document_id: &str, classification: Option<String>) -> Result<Document> {
        let _mutation = self.mutation_scope()?;
        let _guard = self
            .ingestor
            .locks()
            .acquire(document_id, self.config.embeddings.timeout())?;
        let document = self.store.reclassify(document_id, classification)?;
        self.index
            .retag(document_id, document.classification.as_deref())?;
        info!(
            document_id,
            classification = document.classification.as_deref().unwrap_or("-"),
            "reclassified document"
        );
        Ok(document)
    }

    pub fn status(&self) -> Result<WorkspaceStatus> {
        Ok(WorkspaceStatus {
            root: self.root.clone(),
            index_path: self.index_dir.clone(),
            identity: self.index.identity().clone(),
            documents: self.store.document_count()?,
            chunks: self.store.chunk_count()?,
            index_entries: self.index.len()?,
            persisted: self.index_dir.join(INDEX_FILE).is_file(),
        })
    }

    /// Writes the index and metadata store to disk as one consistent pair.
    ///
    /// Both snapshots are taken while no mutation is in flight and both files
    /// are fully written before either replaces its predecessor. A failed or
    /// timed-out checkpoint leaves the previous pair in place.
    pub fn checkpoint(&self) -> Result<()> {
        let timeout = self.config.index.io_timeout();
        let _exclusive = self
            .persist_gate
            .write()
            .map_err(|_| RagError::LockPoisoned("workspace"))?;
        std::fs::create_dir_all(&self.index_dir)?;

        let store_file = self.store.stage(&self.index_dir.join(STORE_FILE), timeout)?;
        let index_file = self.index.stage(&self.index_dir.join(INDEX_FILE), timeout)?;
        store_file.commit()?;
        if let Err(err) = index_file.commit() {
            error!(
                path = %self.index_dir.display(),
                error = %err,
                "metadata committed but index rename failed"
            );
            return Err(err);
        }
        info!(path = %self.index_dir.display(), "checkpoint complete");
        Ok(())
    }

    /// Checkpoints and releases the workspace.
    pub fn close(self) -> Result<()> {
        self.checkpoint()
    }

    fn mutation_scope(&self) -> Result<RwLockReadGuard<'_, ()>> {
        self.persist_gate
            .read()
            .map_err(|_| RagError::LockPoisoned("workspace"))
    }
}

/// Every index entry must have a chunk record and vice versa.
fn check_consistency(index: &VectorIndex, store: &MetadataStore) -> Result<()> {
    for chunk_id in index.chunk_ids()? {
        if !store.contains_chunk(&chunk_id)? {
            error!(chunk_id = %chunk_id, "integrity fault: index entry without chunk record");
            return Err(RagError::NotFound(chunk_id));
        }
    }
    let (entries, chunks) = (index.len()?, store.chunk_count()?);
    if entries != chunks {
        error!(entries, chunks, "integrity fault: chunk records without index entries");
        return Err(RagError::Configuration(format!(
            "index holds {} entries but metadata holds {} chunks",
            entries, chunks
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, EmbeddingProviderType};
    use crate::embedding::HashingProvider;
    use crate::index::INDEX_FILE;
    use crate::persist::tmp_path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use tempfile::tempdir;

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

    #[test]
    fn test_lifecycle_round_trip() {
        let dir = tempdir().unwrap();
        {
            let ws = Workspace::open(dir.path(), hashing_config(64)).unwrap();
            ws.ingest(
                DocumentInput::new("lease.txt", "Rent is due monthly. Notice must be written.")
                    .with_classification("contract"),
            )
            .unwrap();
            ws.close().unwrap();
        }

        let ws = Workspace::open(dir.path(), hashing_config(64)).unwrap();
        let status = ws.status().unwrap();
        assert_eq!(status.documents, 1);
        assert_eq!(status.chunks, status.index_entries);
        assert!(status.persisted);

        let result = ws.retrieve("written notice", Some(1), &EntryFilter::new()).unwrap();
        assert_eq!(result.hits[0].citation.document_id, "lease.txt");
    }

    #[test]
    fn test_reopen_with_other_dimension_fails() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path(), hashing_config(64)).unwrap();
        ws.ingest(DocumentInput::new("a", "some text")).unwrap();
        ws.close().unwrap();

        assert!(matches!(
            Workspace::open(dir.path(), hashing_config(32)),
            Err(RagError::DimensionMismatch {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_reopen_with_other_model_fails() {
        let dir = tempdir().unwrap();
        Workspace::open(dir.path(), hashing_config(16))
            .unwrap()
            .close()
            .unwrap();

        let provider = Box::new(HashingProvider::new(16).with_model_id("another-model"));
        assert!(matches!(
            Workspace::open_with_provider(dir.path(), hashing_config(16), provider),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_remove_and_reclassify() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path(), hashing_config(64)).unwrap();
        ws.ingest(DocumentInput::new("a", "alpha clause")).unwrap();
        ws.ingest(DocumentInput::new("b", "beta clause")).unwrap();

        let doc = ws.reclassify("a", Some("brief".to_string())).unwrap();
        assert_eq!(doc.classification.as_deref(), Some("brief"));
        let briefs = ws
            .retrieve("clause", Some(5), &EntryFilter::new().with_classification("brief"))
            .unwrap();
        assert_eq!(briefs.chunk_ids(), vec!["a#0"]);

        assert_eq!(ws.remove_document("a").unwrap(), 1);
        assert!(matches!(ws.cite("a#0"), Err(RagError::NotFound(_))));
        assert!(matches!(ws.remove_document("a"), Err(RagError::NotFound(_))));

        // Remove then ingest gives replace semantics.
        ws.ingest(DocumentInput::new("a", "alpha clause, amended")).unwrap();
        assert!(ws.chunk("a#0").unwrap().text.contains("amended"));
    }

    #[test]
    fn test_half_persisted_workspace_is_rejected() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path(), hashing_config(8)).unwrap();
        ws.close().unwrap();
        std::fs::remove_file(dir.path().join(".lexrag").join(STORE_FILE)).unwrap();

        assert!(matches!(
            Workspace::open(dir.path(), hashing_config(8)),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_failed_checkpoint_keeps_previous_pair() {
        let dir = tempdir().unwrap();
        let index_dir = dir.path().join(".lexrag");
        let ws = Workspace::open(dir.path(), hashing_config(32)).unwrap();
        ws.ingest(DocumentInput::new("a", "first lease")).unwrap();
        ws.checkpoint().unwrap();

        ws.ingest(DocumentInput::new("b", "second lease")).unwrap();
        // The index cannot be staged over a directory; the store already was.
        let blocked = tmp_path(&index_dir.join(INDEX_FILE));
        std::fs::create_dir(&blocked).unwrap();
        assert!(ws.checkpoint().is_err());
        assert!(!tmp_path(&index_dir.join(STORE_FILE)).exists());
        std::fs::remove_dir(&blocked).unwrap();

        let reopened = Workspace::open(dir.path(), hashing_config(32)).unwrap();
        let status = reopened.status().unwrap();
        assert_eq!(status.documents, 1);
        assert_eq!(status.index_entries, status.chunks);

        // The live workspace still checkpoints once the path is clear.
        ws.checkpoint().unwrap();
        let reopened = Workspace::open(dir.path(), hashing_config(32)).unwrap();
        assert_eq!(reopened.status().unwrap().documents, 2);
    }

    #[test]
    fn test_checkpoint_during_ingest_is_consistent() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path(), hashing_config(32)).unwrap();

        thread::scope(|scope| {
            let writer = scope.spawn(|| {
                for i in 0..40 {
                    let text = format!("clause {} of the master agreement", i);
                    ws.ingest(DocumentInput::new(format!("doc-{}", i), text)).unwrap();
                }
            });
            while !writer.is_finished() {
                ws.checkpoint().unwrap();
                let snapshot = Workspace::open(dir.path(), hashing_config(32)).unwrap();
                let status = snapshot.status().unwrap();
                assert_eq!(status.index_entries, status.chunks);
            }
        });

        ws.checkpoint().unwrap();
        let reopened = Workspace::open(dir.path(), hashing_config(32)).unwrap();
        assert_eq!(reopened.status().unwrap().documents, 40);
    }

    #[test]
    fn test_retrieve_during_removal_never_faults() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path(), hashing_config(32)).unwrap();
        ws.ingest(DocumentInput::new("stable", "termination requires written notice"))
            .unwrap();
        let done = AtomicBool::new(false);
        let (ws, done) = (&ws, &done);

        thread::scope(|scope| {
            let readers: Vec<_> = (0..3)
                .map(|_| {
                    scope.spawn(move || {
                        while !done.load(Ordering::Relaxed) {
                            let result = ws
                                .retrieve("written notice of termination", Some(5), &EntryFilter::new())
                                .unwrap();
                            assert!(result.chunk_ids().contains(&"stable#0"));
                        }
                    })
                })
                .collect();

            for _ in 0..100 {
                ws.ingest(DocumentInput::new("churn", "written notice of termination served"))
                    .unwrap();
                assert_eq!(ws.remove_document("churn").unwrap(), 1);
            }
            done.store(true, Ordering::Relaxed);
            for reader in readers {
                reader.join().unwrap();
            }
        });

        let status = ws.status().unwrap();
        assert_eq!(status.documents, 1);
        assert_eq!(status.index_entries, status.chunks);
    }
}
