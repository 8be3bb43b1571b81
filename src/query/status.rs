// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace status report

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::{print_json, Session};
use crate::cli::OutputFormat;
use lexrag::output::{colorize_id, colorize_tag, use_colors};
use lexrag::{Document, WorkspaceStatus};

#[derive(Debug, Serialize)]
struct StatusOutput {
    #[serde(flatten)]
    status: WorkspaceStatus,
    document_list: Vec<Document>,
}

/// Print index identity, counts and the ingested documents
pub fn run(session: Session) -> Result<()> {
    let workspace = session.open()?;
    let status = workspace.status()?;
    let documents = workspace.documents()?;

    match session.format {
        OutputFormat::Json => print_json(&StatusOutput {
            status,
            document_list: documents,
        })?,
        OutputFormat::Text => {
            let use_color = use_colors();
            let label = |text: &str| {
                if use_color {
                    text.bold().to_string()
                } else {
                    text.to_string()
                }
            };
            println!("{} {}", label("workspace:"), status.root.display());
            println!("{} {}", label("index:    "), status.index_path.display());
            println!(
                "{} {} ({} dims, schema v{})",
                label("model:    "),
                status.identity.model_id,
                status.identity.dimension,
                status.identity.schema_version
            );
            println!(
                "{} {} documents, {} chunks, {} index entries{}",
                label("contents: "),
                status.documents,
                status.chunks,
                status.index_entries,
                if status.persisted { "" } else { " (not persisted)" }
            );
            if !documents.is_empty() {
                println!();
            }
            for document in &documents {
                println!(
                    "  {}  {}  {} chars",
                    colorize_id(&document.document_id, use_color),
                    colorize_tag(document.classification.as_deref().unwrap_or("-"), use_color),
                    document.char_len
                );
            }
        }
    }
    Ok(())
}
