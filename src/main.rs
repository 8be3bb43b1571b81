// SPDX-License-Identifier: MIT OR Apache-2.0

//! lexrag - Retrieval core for legal document corpora
//!
//! Command-line front end: ingest normalized text, search it and resolve
//! citations against a local workspace.

mod cli;
mod indexer;
mod query;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use lexrag::EntryFilter;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with LEXRAG_LOG env var (e.g., LEXRAG_LOG=debug lexrag search "query")
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("LEXRAG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let session = || query::Session::new(cli.path.as_deref(), cli.config.as_deref(), cli.format);

    match cli.command {
        Commands::Ingest {
            paths,
            classification,
            format_tag,
            id,
        } => {
            let options = indexer::ingest::IngestOptions {
                classification,
                format_tag,
                id,
            };
            indexer::ingest::run(session()?, &paths, options)?;
        }
        Commands::Search {
            query,
            k,
            classification,
            document,
            after,
            before,
            min_score,
        } => {
            let mut filter = EntryFilter::new().ingested_between(after, before);
            for tag in classification {
                filter = filter.with_classification(tag);
            }
            for document_id in document {
                filter = filter.with_document(document_id);
            }
            query::search::run(session()?, &query, k, &filter, min_score)?;
        }
        Commands::Cite { chunk_id } => {
            query::cite::run(session()?, &chunk_id)?;
        }
        Commands::Remove { document_id } => {
            query::manage::remove(session()?, &document_id)?;
        }
        Commands::Reclassify {
            document_id,
            classification,
        } => {
            query::manage::reclassify(session()?, &document_id, classification)?;
        }
        Commands::Status => {
            query::status::run(session()?)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "lexrag", &mut std::io::stdout());
        }
    }

    Ok(())
}
