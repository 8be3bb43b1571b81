// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// lexrag - Retrieval core for legal document corpora
///
/// Ingests normalized document text, answers natural-language queries with
/// ranked passages and binds every passage to a citation.
#[derive(Parser, Debug)]
#[command(name = "lexrag")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Workspace root (defaults to the nearest workspace above the current directory)
    #[arg(short, long, global = true)]
    pub path: Option<PathBuf>,

    /// Configuration file overriding workspace discovery
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest normalized text files (or directories of .txt files)
    #[command(alias = "i")]
    Ingest {
        /// Files or directories to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Classification tag applied to every ingested document
        #[arg(short, long)]
        classification: Option<String>,

        /// Source format tag recorded on each document (e.g. pdf, docx)
        #[arg(long = "format-tag")]
        format_tag: Option<String>,

        /// Document id (only valid with a single file)
        #[arg(long)]
        id: Option<String>,
    },

    /// Retrieve the passages most relevant to a query
    #[command(alias = "s")]
    Search {
        /// Natural-language query
        query: String,

        /// Number of passages to return
        #[arg(short)]
        k: Option<usize>,

        /// Only documents with this classification (repeatable)
        #[arg(short, long)]
        classification: Vec<String>,

        /// Only this document (repeatable)
        #[arg(short, long)]
        document: Vec<String>,

        /// Only documents ingested at or after this unix timestamp
        #[arg(long)]
        after: Option<i64>,

        /// Only documents ingested at or before this unix timestamp
        #[arg(long)]
        before: Option<i64>,

        /// Drop passages scoring below this value
        #[arg(long, allow_negative_numbers = true)]
        min_score: Option<f32>,
    },

    /// Print the citation for a chunk id
    Cite {
        /// Chunk id, e.g. `lease.txt#2`
        chunk_id: String,
    },

    /// Remove a document with all of its chunks
    #[command(alias = "rm")]
    Remove {
        document_id: String,
    },

    /// Replace a document's classification tag
    Reclassify {
        document_id: String,
        classification: String,
    },

    /// Show workspace status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
