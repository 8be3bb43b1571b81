// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite file format for a persisted vector index.
//!
//! One `meta` table carries the identity marker (schema version, model id,
//! dimension) and the insertion counter; one `entries` table carries the
//! vectors and their metadata snapshots. Vectors are stored as little-endian
//! f32 blobs.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::errors::{RagError, Result};
use crate::model::EntryMetadata;

use super::{IndexEntry, IndexIdentity, SCHEMA_VERSION};

/// Full index state as read from or written to disk.
pub(crate) struct Snapshot {
    pub identity: IndexIdentity,
    pub next_seq: u64,
    pub entries: Vec<IndexEntry>,
}

/// Writes a complete snapshot into a fresh database at `path`.
pub(crate) fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    init_schema(&conn)?;

    let tx = conn.transaction()?;
    set_meta(&tx, "schema_version", &snapshot.identity.schema_version.to_string())?;
    set_meta(&tx, "model_id", &snapshot.identity.model_id)?;
    set_meta(&tx, "dimension", &snapshot.identity.dimension.to_string())?;
    set_meta(&tx, "next_seq", &snapshot.next_seq.to_string())?;
    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO entries (seq, chunk_id, document_id, classification, ingested_at, vector)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        for entry in &snapshot.entries {
            stmt.execute(params![
                entry.seq as i64,
                entry.chunk_id,
                entry.metadata.document_id,
                entry.metadata.classification,
                entry.metadata.ingested_at,
                embedding_to_blob(&entry.vector),
            ])?;
        }
    }
    tx.commit()?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

/// Reads a snapshot, validating the identity marker and every vector length.
pub(crate) fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let schema_version: u32 = parse_meta(&conn, "schema_version")?;
    if schema_version != SCHEMA_VERSION {
        return Err(RagError::Configuration(format!(
            "index schema version {} is not supported (expected {})",
            schema_version, SCHEMA_VERSION
        )));
    }
    let model_id = get_meta(&conn, "model_id")?
        .ok_or_else(|| RagError::Configuration("index is missing its model id".to_string()))?;
    let dimension: usize = parse_meta(&conn, "dimension")?;
    let next_seq: u64 = parse_meta(&conn, "next_seq")?;

    let mut stmt = conn.prepare(
        r#"
        SELECT seq, chunk_id, document_id, classification, ingested_at, vector
        FROM entries
        ORDER BY seq
        "#,
    )?;
    let rows = stmt
        .query_map([], |row| {
            let seq: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(5)?;
            Ok((
                seq as u64,
                row.get::<_, String>(1)?,
                EntryMetadata {
                    document_id: row.get(2)?,
                    classification: row.get(3)?,
                    ingested_at: row.get(4)?,
                },
                blob,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut entries = Vec::with_capacity(rows.len());
    for (seq, chunk_id, metadata, blob) in rows {
        if blob.len() != dimension * 4 {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: blob.len() / 4,
            });
        }
        entries.push(IndexEntry::new(chunk_id, blob_to_embedding(&blob), metadata, seq));
    }

    Ok(Snapshot {
        identity: IndexIdentity {
            model_id,
            dimension,
            schema_version,
        },
        next_seq,
        entries,
    })
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            seq INTEGER PRIMARY KEY,
            chunk_id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            classification TEXT,
            ingested_at INTEGER NOT NULL,
            vector BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_document
            ON entries(document_id);
        "#,
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn parse_meta<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<T> {
    get_meta(conn, key)?
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| RagError::Configuration(format!("index meta '{}' is missing or invalid", key)))
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO meta (key, value)
        VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}

/// Converts an embedding vector to a compact blob.
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector.
pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
