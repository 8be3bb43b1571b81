// SPDX-License-Identifier: MIT OR Apache-2.0

//! lexrag - Retrieval core for legal document corpora
//!
//! Splits normalized document text into overlapping chunks, embeds them,
//! stores the vectors in a persisted index, answers natural-language queries
//! with ranked passages, and binds every passage to a verifiable citation.
//!
//! Most callers only need [`Workspace`]:
//!
//! ```no_run
//! use lexrag::{DocumentInput, EntryFilter, Workspace};
//!
//! # fn main() -> lexrag::Result<()> {
//! let ws = Workspace::open_at(".")?;
//! ws.ingest(DocumentInput::new("lease.txt", "The tenant shall pay rent monthly.")
//!     .with_classification("contract"))?;
//! for hit in ws.retrieve("when is rent due", Some(3), &EntryFilter::new())?.hits {
//!     println!("{:.3} {}", hit.score, hit.citation);
//! }
//! ws.close()?;
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod citation;
pub mod config;
pub mod deadline;
pub mod embedding;
pub mod errors;
pub mod filters;
pub mod index;
pub mod ingest;
pub mod model;
pub mod output;
pub mod persist;
pub mod rerank;
pub mod retriever;
pub mod store;
pub mod utils;
pub mod workspace;

pub use chunker::{ChunkConfig, DocumentChunker};
pub use citation::{Citation, CitationBinder, PageRange};
pub use config::Config;
pub use errors::{RagError, Result};
pub use filters::EntryFilter;
pub use index::{SearchHit, VectorIndex};
pub use model::{Chunk, Document, DocumentInput, EntryMetadata};
pub use retriever::{RetrievalHit, RetrievalResult, Retriever, RetrieverConfig};
pub use workspace::{Workspace, WorkspaceStatus};
