// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingest command: read normalized text files into the workspace

use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use crate::indexer::scanner::collect_files;
use crate::query::{print_json, Session};
use lexrag::ingest::IngestReport;
use lexrag::output::{colorize_id, use_colors};
use lexrag::{DocumentInput, Workspace};

/// Page separator emitted by common PDF text extractors
const PAGE_BREAK: char = '\u{c}';

/// Per-run document attributes from the command line
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub classification: Option<String>,
    pub format_tag: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
struct IngestFailure {
    path: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct IngestSummary {
    ingested: Vec<IngestReport>,
    failed: Vec<IngestFailure>,
}

/// Run the ingest command
pub fn run(session: Session, paths: &[PathBuf], options: IngestOptions) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("No text files found to ingest");
    }
    if options.id.is_some() && files.len() > 1 {
        bail!("--id can only be used when ingesting a single file");
    }

    let workspace = session.open()?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos}/{len} documents | Ingesting {msg}")
            .expect("valid progress bar template")
            .progress_chars("##."),
    );
    if session.format == OutputFormat::Json {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    // Distinct documents ingest in parallel; same-id calls serialise on the workspace lock.
    let outcomes: Vec<(PathBuf, Result<IngestReport>)> = files
        .par_iter()
        .progress_with(pb.clone())
        .map(|path| {
            pb.set_message(path.display().to_string());
            (path.clone(), ingest_file(&workspace, path, &options))
        })
        .collect();
    pb.finish_and_clear();

    let mut summary = IngestSummary {
        ingested: Vec::new(),
        failed: Vec::new(),
    };
    for (path, outcome) in outcomes {
        match outcome {
            Ok(report) => summary.ingested.push(report),
            Err(err) => summary.failed.push(IngestFailure {
                path: path.display().to_string(),
                error: format!("{:#}", err),
            }),
        }
    }

    workspace.close().context("Failed to checkpoint workspace")?;

    match session.format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print_text(&summary, use_colors()),
    }

    if !summary.failed.is_empty() {
        bail!(
            "{} of {} documents failed to ingest",
            summary.failed.len(),
            files.len()
        );
    }
    Ok(())
}

fn ingest_file(workspace: &Workspace, path: &Path, options: &IngestOptions) -> Result<IngestReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let report = workspace.ingest(document_input(path, text, options))?;
    Ok(report)
}

/// Builds the ingestion request for one file.
///
/// The document id defaults to the file name. Form feeds in the text mark
/// page boundaries; text without them carries no page metadata.
fn document_input(path: &Path, text: String, options: &IngestOptions) -> DocumentInput {
    let document_id = options.id.clone().unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });
    let format = options.format_tag.clone().or_else(|| {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    });
    let page_starts = if text.contains(PAGE_BREAK) {
        DocumentInput::page_starts_from_form_feeds(&text)
    } else {
        Vec::new()
    };

    let mut input = DocumentInput::new(document_id, text)
        .with_source(path.display().to_string())
        .with_page_starts(page_starts);
    if let Some(format) = format {
        input = input.with_format(format);
    }
    if let Some(classification) = &options.classification {
        input = input.with_classification(classification.clone());
    }
    input
}

fn print_text(summary: &IngestSummary, use_color: bool) {
    for failure in &summary.failed {
        eprintln!("Warning: {}: {}", failure.path, failure.error);
    }
    let chunks: usize = summary.ingested.iter().map(|r| r.chunks).sum();
    if use_color {
        println!(
            "{} Ingested {} documents ({} chunks)",
            "✓".green(),
            summary.ingested.len().to_string().cyan(),
            chunks
        );
    } else {
        println!(
            "✓ Ingested {} documents ({} chunks)",
            summary.ingested.len(),
            chunks
        );
    }
    for report in &summary.ingested {
        println!(
            "  {}  {} chunks, {} chars",
            colorize_id(&report.document_id, use_color),
            report.chunks,
            report.chars
        );
    }
}
