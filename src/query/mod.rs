// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query module - retrieval, citation and workspace management commands

pub mod cite;
pub mod manage;
pub mod search;
pub mod status;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::OutputFormat;
use lexrag::config::ConfigOutputFormat;
use lexrag::utils::resolve_workspace_root;
use lexrag::{Config, Workspace};

/// Resolved workspace root, configuration and output format for one command.
pub struct Session {
    pub root: PathBuf,
    pub config: Config,
    pub format: OutputFormat,
}

impl Session {
    /// Resolves the workspace root and loads its configuration.
    ///
    /// An explicit `--config` file replaces workspace discovery; the CLI
    /// `--format` flag wins over the configured default.
    pub fn new(
        path: Option<&Path>,
        config_path: Option<&Path>,
        format: Option<OutputFormat>,
    ) -> Result<Self> {
        let root = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let cwd = std::env::current_dir().context("Failed to read current directory")?;
                resolve_workspace_root(cwd)
            }
        };

        let config = match config_path {
            Some(file) => Config::load_from_path(file)?,
            None => Config::load_for_dir(&root)?,
        };

        let format = format.unwrap_or(match config.output_format() {
            Some(ConfigOutputFormat::Json) => OutputFormat::Json,
            _ => OutputFormat::Text,
        });

        Ok(Self {
            root,
            config,
            format,
        })
    }

    /// Opens the workspace with the session configuration.
    pub fn open(&self) -> Result<Workspace> {
        Workspace::open(&self.root, self.config.clone())
            .with_context(|| format!("Failed to open workspace at {}", self.root.display()))
    }
}

/// Prints a value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
