// SPDX-License-Identifier: MIT OR Apache-2.0

//! Citation lookup for a single chunk

use anyhow::Result;
use serde::Serialize;

use super::{print_json, Session};
use crate::cli::OutputFormat;
use lexrag::output::{colorize_citation, colorize_id, use_colors};
use lexrag::Citation;

#[derive(Debug, Serialize)]
struct CiteOutput {
    citation: Citation,
    text: String,
}

/// Resolve a chunk id to its citation and passage text
pub fn run(session: Session, chunk_id: &str) -> Result<()> {
    let workspace = session.open()?;
    let citation = workspace.cite(chunk_id)?;
    let chunk = workspace.chunk(chunk_id)?;

    match session.format {
        OutputFormat::Json => print_json(&CiteOutput {
            citation,
            text: chunk.text,
        })?,
        OutputFormat::Text => {
            let use_color = use_colors();
            println!("{}", colorize_id(&citation.chunk_id, use_color));
            println!("{}\n", colorize_citation(&citation.display, use_color));
            println!("{}", chunk.text);
        }
    }

    Ok(())
}
