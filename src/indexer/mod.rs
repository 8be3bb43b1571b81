// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexer module - document ingestion from the filesystem

pub mod ingest;
pub mod scanner;
