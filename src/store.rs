// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document and chunk metadata store.
//!
//! Holds every ingested [`Document`] and the records of its chunks, keyed by
//! id. Chunks refer to their document by id and documents list their chunk
//! ids; there are no pointers in either direction. Citation binding resolves
//! exclusively from this store.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::info;

use crate::deadline::{is_cancelled, run_with_timeout};
use crate::errors::{RagError, Result};
use crate::model::{Chunk, Document};
use crate::persist::StagedFile;

/// File name of the persisted store inside the index directory.
pub const STORE_FILE: &str = "metadata.sqlite";

const STORE_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Default, Clone)]
struct StoreState {
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    /// Chunk ids per document, in sequence order
    document_chunks: HashMap<String, Vec<String>>,
}

/// Thread-safe metadata store with SQLite persistence.
#[derive(Debug, Default)]
pub struct MetadataStore {
    state: RwLock<StoreState>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a document and its chunks.
    ///
    /// Fails with `DuplicateChunk` when the document id or any chunk id is
    /// already present; nothing is written in that case. Chunk vectors are
    /// not kept here.
    pub fn put_document(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        let mut state = self.write()?;
        if state.documents.contains_key(&document.document_id) {
            return Err(RagError::DuplicateChunk(Chunk::make_id(
                &document.document_id,
                0,
            )));
        }
        if let Some(existing) = chunks.iter().find(|c| state.chunks.contains_key(&c.chunk_id)) {
            return Err(RagError::DuplicateChunk(existing.chunk_id.clone()));
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        for mut chunk in chunks {
            chunk.vector = None;
            state.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        state
            .document_chunks
            .insert(document.document_id.clone(), ids);
        state
            .documents
            .insert(document.document_id.clone(), document);
        Ok(())
    }

    pub fn get_document(&self, document_id: &str) -> Result<Document> {
        self.read()?
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| RagError::NotFound(document_id.to_string()))
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        self.read()?
            .chunks
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| RagError::NotFound(chunk_id.to_string()))
    }

    /// Resolves a chunk together with its owning document.
    pub fn resolve(&self, chunk_id: &str) -> Result<(Chunk, Document)> {
        let state = self.read()?;
        let chunk = state
            .chunks
            .get(chunk_id)
            .ok_or_else(|| RagError::NotFound(chunk_id.to_string()))?;
        let document = state
            .documents
            .get(&chunk.document_id)
            .ok_or_else(|| RagError::NotFound(chunk.document_id.clone()))?;
        Ok((chunk.clone(), document.clone()))
    }

    pub fn contains_chunk(&self, chunk_id: &str) -> Result<bool> {
        Ok(self.read()?.chunks.contains_key(chunk_id))
    }

    pub fn contains_document(&self, document_id: &str) -> Result<bool> {
        Ok(self.read()?.documents.contains_key(document_id))
    }

    /// Chunks of a document in sequence order.
    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let state = self.read()?;
        let ids = state
            .document_chunks
            .get(document_id)
            .ok_or_else(|| RagError::NotFound(document_id.to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.chunks.get(id).cloned())
            .collect())
    }

    /// Removes a document and all of its chunks, returning what was removed.
    pub fn remove_document(&self, document_id: &str) -> Result<(Document, Vec<Chunk>)> {
        let mut state = self.write()?;
        let document = state
            .documents
            .remove(document_id)
            .ok_or_else(|| RagError::NotFound(document_id.to_string()))?;
        let ids = state.document_chunks.remove(document_id).unwrap_or_default();
        let chunks = ids
            .iter()
            .filter_map(|id| state.chunks.remove(id))
            .collect();
        Ok((document, chunks))
    }

    /// Replaces a document's classification.
    pub fn reclassify(&self, document_id: &str, classification: Option<String>) -> Result<Document> {
        let mut state = self.write()?;
        let document = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| RagError::NotFound(document_id.to_string()))?;
        document.classification = classification;
        Ok(document.clone())
    }

    /// All documents, oldest first.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self.read()?.documents.values().cloned().collect();
        documents.sort_by(|a, b| {
            a.ingested_at
                .cmp(&b.ingested_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        Ok(documents)
    }

    pub fn document_count(&self) -> Result<usize> {
        Ok(self.read()?.documents.len())
    }

    pub fn chunk_count(&self) -> Result<usize> {
        Ok(self.read()?.chunks.len())
    }

    /// Persists the store to `path` via a temporary file and rename.
    pub fn save(&self, path: &Path, timeout: Duration) -> Result<()> {
        let documents = self.document_count()?;
        self.stage(path, timeout)?.commit()?;
        info!(path = %path.display(), documents, "saved metadata store");
        Ok(())
    }

    /// Writes a snapshot of the store next to `path` without replacing it.
    pub fn stage(&self, path: &Path, timeout: Duration) -> Result<StagedFile> {
        let snapshot = self.read()?.clone();
        let target = path.to_path_buf();

        run_with_timeout("metadata save", timeout, move |cancel| {
            let staged = StagedFile::write(&target, |tmp| write_store(tmp, &snapshot))?;
            if is_cancelled(cancel) {
                return Err(RagError::timeout("metadata save", timeout));
            }
            Ok(staged)
        })
    }

    /// Loads a store written by [`save`](Self::save).
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.is_file() {
            return Err(RagError::NotFound(path.display().to_string()));
        }
        let source = path.to_path_buf();
        let state = run_with_timeout("metadata open", timeout, move |_| read_store(&source))?;
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| RagError::LockPoisoned("metadata store"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| RagError::LockPoisoned("metadata store"))
    }
}

fn write_store(path: &Path, state: &StoreState) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        r#"
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE documents (
            document_id TEXT PRIMARY KEY,
            source_ref TEXT,
            format TEXT,
            classification TEXT,
            ingested_at INTEGER NOT NULL,
            page_starts TEXT NOT NULL,
            char_len INTEGER NOT NULL
        );

        CREATE TABLE chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(document_id),
            sequence INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            text_hash TEXT NOT NULL
        );

        CREATE INDEX idx_chunks_document ON chunks(document_id, sequence);
        "#,
    )?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![STORE_SCHEMA_VERSION],
    )?;
    {
        let mut insert_document = tx.prepare(
            r#"
            INSERT INTO documents
                (document_id, source_ref, format, classification, ingested_at, page_starts, char_len)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for document in state.documents.values() {
            insert_document.execute(params![
                document.document_id,
                document.source_ref,
                document.format,
                document.classification,
                document.ingested_at,
                serde_json::to_string(&document.page_starts)?,
                document.char_len as i64,
            ])?;
        }

        let mut insert_chunk = tx.prepare(
            r#"
            INSERT INTO chunks
                (chunk_id, document_id, sequence, start_offset, end_offset, text, text_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;
        for chunk in state.chunks.values() {
            insert_chunk.execute(params![
                chunk.chunk_id,
                chunk.document_id,
                chunk.sequence,
                chunk.start as i64,
                chunk.end as i64,
                chunk.text,
                chunk.text_hash,
            ])?;
        }
    }
    tx.commit()?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

fn read_store(path: &Path) -> Result<StoreState> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let version: String = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if version != STORE_SCHEMA_VERSION {
        return Err(RagError::Configuration(format!(
            "metadata schema version {} is not supported",
            version
        )));
    }

    let mut state = StoreState::default();

    let mut stmt = conn.prepare(
        r#"
        SELECT document_id, source_ref, format, classification, ingested_at, page_starts, char_len
        FROM documents
        "#,
    )?;
    let rows = stmt
        .query_map([], |row| {
            let char_len: i64 = row.get(6)?;
            Ok((
                Document {
                    document_id: row.get(0)?,
                    source_ref: row.get(1)?,
                    format: row.get(2)?,
                    classification: row.get(3)?,
                    ingested_at: row.get(4)?,
                    page_starts: Vec::new(),
                    char_len: char_len as usize,
                },
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (mut document, page_starts) in rows {
        document.page_starts = serde_json::from_str(&page_starts)?;
        state
            .document_chunks
            .insert(document.document_id.clone(), Vec::new());
        state
            .documents
            .insert(document.document_id.clone(), document);
    }

    let mut stmt = conn.prepare(
        r#"
        SELECT chunk_id, document_id, sequence, start_offset, end_offset, text, text_hash
        FROM chunks
        ORDER BY document_id, sequence
        "#,
    )?;
    let chunks = stmt
        .query_map([], |row| {
            let start: i64 = row.get(3)?;
            let end: i64 = row.get(4)?;
            Ok(Chunk {
                chunk_id: row.get(0)?,
                document_id: row.get(1)?,
                sequence: row.get(2)?,
                start: start as usize,
                end: end as usize,
                text: row.get(5)?,
                text_hash: row.get(6)?,
                vector: None,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for chunk in chunks {
        let ids = state
            .document_chunks
            .get_mut(&chunk.document_id)
            .ok_or_else(|| RagError::NotFound(chunk.document_id.clone()))?;
        ids.push(chunk.chunk_id.clone());
        state.chunks.insert(chunk.chunk_id.clone(), chunk);
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::tmp_path;
    use std::thread;
    use tempfile::tempdir;

    fn document(id: &str, at: i64) -> Document {
        Document {
            document_id: id.to_string(),
            source_ref: Some(format!("inbox/{}", id)),
            format: Some("txt".to_string()),
            classification: Some("contract".to_string()),
            ingested_at: at,
            page_starts: vec![0, 5],
            char_len: 10,
        }
    }

    fn chunks(doc: &str) -> Vec<Chunk> {
        (0..2)
            .map(|seq| Chunk {
                chunk_id: Chunk::make_id(doc, seq),
                document_id: doc.to_string(),
                sequence: seq,
                start: seq as usize * 5,
                end: seq as usize * 5 + 5,
                text: "hello".to_string(),
                text_hash: "h".to_string(),
                vector: Some(vec![1.0]),
            })
            .collect()
    }

    #[test]
    fn test_put_and_resolve() {
        let store = MetadataStore::new();
        store.put_document(document("a", 1), chunks("a")).unwrap();

        let (chunk, doc) = store.resolve("a#1").unwrap();
        assert_eq!(chunk.start, 5);
        assert!(chunk.vector.is_none());
        assert_eq!(doc.document_id, "a");
        assert_eq!(store.chunks_for_document("a").unwrap().len(), 2);
        assert!(matches!(store.resolve("a#9"), Err(RagError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_document_rejected() {
        let store = MetadataStore::new();
        store.put_document(document("a", 1), chunks("a")).unwrap();
        let err = store.put_document(document("a", 2), chunks("a")).unwrap_err();
        assert!(matches!(err, RagError::DuplicateChunk(_)));
        assert_eq!(store.get_document("a").unwrap().ingested_at, 1);
    }

    #[test]
    fn test_remove_cascades() {
        let store = MetadataStore::new();
        store.put_document(document("a", 1), chunks("a")).unwrap();
        store.put_document(document("b", 2), chunks("b")).unwrap();

        let (doc, removed) = store.remove_document("a").unwrap();
        assert_eq!(doc.document_id, "a");
        assert_eq!(removed.len(), 2);
        assert!(!store.contains_chunk("a#0").unwrap());
        assert_eq!(store.chunk_count().unwrap(), 2);
        assert!(matches!(
            store.remove_document("a"),
            Err(RagError::NotFound(_))
        ));
    }

    #[test]
    fn test_reclassify_and_list_order() {
        let store = MetadataStore::new();
        store.put_document(document("late", 9), chunks("late")).unwrap();
        store.put_document(document("early", 1), chunks("early")).unwrap();

        let updated = store.reclassify("late", Some("brief".into())).unwrap();
        assert_eq!(updated.classification.as_deref(), Some("brief"));

        let ids: Vec<String> = store
            .list_documents()
            .unwrap()
            .into_iter()
            .map(|d| d.document_id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        let store = MetadataStore::new();
        store.put_document(document("a", 1), chunks("a")).unwrap();
        store.save(&path, Duration::from_secs(10)).unwrap();

        let reopened = MetadataStore::open(&path, Duration::from_secs(10)).unwrap();
        assert_eq!(reopened.get_document("a").unwrap(), store.get_document("a").unwrap());
        let ids: Vec<String> = reopened
            .chunks_for_document("a")
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(ids, vec!["a#0", "a#1"]);
    }

    #[test]
    fn test_save_timeout_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        let store = MetadataStore::new();
        store.put_document(document("a", 1), chunks("a")).unwrap();
        store.save(&path, Duration::from_secs(10)).unwrap();

        store.put_document(document("b", 2), chunks("b")).unwrap();
        assert!(matches!(
            store.save(&path, Duration::from_nanos(1)),
            Err(RagError::Timeout { .. })
        ));

        // The abandoned writer discards its temporary file once it finishes.
        thread::sleep(Duration::from_millis(300));
        let mut waited = 0;
        while tmp_path(&path).exists() && waited < 100 {
            thread::sleep(Duration::from_millis(50));
            waited += 1;
        }
        assert!(!tmp_path(&path).exists());

        let reopened = MetadataStore::open(&path, Duration::from_secs(10)).unwrap();
        assert_eq!(reopened.document_count().unwrap(), 1);
        assert!(!reopened.contains_document("b").unwrap());
    }

    #[test]
    fn test_open_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STORE_FILE);
        let store = MetadataStore::new();
        store.put_document(document("a", 1), chunks("a")).unwrap();
        store.save(&path, Duration::from_secs(10)).unwrap();

        assert!(matches!(
            MetadataStore::open(&path, Duration::from_nanos(1)),
            Err(RagError::Timeout { .. })
        ));
        assert!(MetadataStore::open(&path, Duration::from_secs(10)).is_ok());
    }
}
