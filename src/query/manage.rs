// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document removal and reclassification

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::{print_json, Session};
use crate::cli::OutputFormat;
use lexrag::output::{colorize_id, colorize_tag, use_colors};

/// Remove a document and checkpoint the workspace
pub fn remove(session: Session, document_id: &str) -> Result<()> {
    let workspace = session.open()?;
    let chunks = workspace.remove_document(document_id)?;
    workspace.close()?;

    match session.format {
        OutputFormat::Json => print_json(&json!({
            "document_id": document_id,
            "removed_chunks": chunks,
        }))?,
        OutputFormat::Text => {
            let use_color = use_colors();
            let mark = if use_color { "✓".green().to_string() } else { "✓".to_string() };
            println!(
                "{} Removed {} ({} chunks)",
                mark,
                colorize_id(document_id, use_color),
                chunks
            );
        }
    }
    Ok(())
}

/// Replace a document's classification and checkpoint the workspace
pub fn reclassify(session: Session, document_id: &str, classification: String) -> Result<()> {
    let workspace = session.open()?;
    let document = workspace.reclassify(document_id, Some(classification))?;
    workspace.close()?;

    match session.format {
        OutputFormat::Json => print_json(&document)?,
        OutputFormat::Text => {
            let use_color = use_colors();
            println!(
                "{} -> {}",
                colorize_id(&document.document_id, use_color),
                colorize_tag(document.classification.as_deref().unwrap_or("-"), use_color)
            );
        }
    }
    Ok(())
}
