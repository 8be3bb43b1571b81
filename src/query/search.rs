// SPDX-License-Identifier: MIT OR Apache-2.0

//! Passage retrieval with citations

use anyhow::Result;
use colored::Colorize;
use std::time::Instant;

use super::{print_json, Session};
use crate::cli::OutputFormat;
use lexrag::output::{
    colorize_citation, colorize_id, colorize_passage, colorize_score, preview, use_colors,
};
use lexrag::{EntryFilter, RetrievalResult};

const PREVIEW_CHARS: usize = 240;

/// Run a retrieval query
pub fn run(
    mut session: Session,
    query: &str,
    k: Option<usize>,
    filter: &EntryFilter,
    min_score: Option<f32>,
) -> Result<()> {
    if let Some(min_score) = min_score {
        session.config.retrieval.min_score = Some(min_score);
    }

    let start_time = Instant::now();
    let workspace = session.open()?;
    let result = workspace.retrieve(query, k, filter)?;
    tracing::debug!(
        hits = result.len(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "search finished"
    );

    match session.format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_text(&result, use_colors()),
    }

    Ok(())
}

fn print_text(result: &RetrievalResult, use_color: bool) {
    if result.is_empty() {
        if use_color {
            println!("{} No results found for: {}", "✗".red(), result.query.yellow());
        } else {
            println!("No results found for: {}", result.query);
        }
        return;
    }

    if use_color {
        println!(
            "\n{} Found {} passages for: {}\n",
            "✓".green(),
            result.len().to_string().cyan(),
            result.query.yellow()
        );
    } else {
        println!("\nFound {} passages for: {}\n", result.len(), result.query);
    }

    for (rank, hit) in result.hits.iter().enumerate() {
        println!(
            "{:>2}. {}  {}",
            rank + 1,
            colorize_score(hit.score, use_color),
            colorize_id(&hit.chunk_id, use_color)
        );
        println!("    {}", colorize_citation(&hit.citation.display, use_color));
        println!(
            "    {}\n",
            colorize_passage(&preview(&hit.text, PREVIEW_CHARS), use_color)
        );
    }
}
