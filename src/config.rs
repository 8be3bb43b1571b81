// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for lexrag
//!
//! Loads configuration from .lexragrc.toml in the workspace root or
//! ~/.config/lexrag/config.toml. Every value is validated at startup; a
//! malformed file or an out-of-range value is a configuration error rather
//! than a silent fallback.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::{ChunkConfig, DEFAULT_BOUNDARY_LOOKBACK, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedding::DEFAULT_MAX_CHARS;
use crate::errors::{RagError, Result};
use crate::utils::INDEX_DIR;

/// Name of the per-workspace configuration file
pub const CONFIG_FILE: &str = ".lexragrc.toml";

/// Output format for results (mirrored from cli for library use)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOutputFormat {
    #[default]
    Text,
    Json,
}

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    /// In-process fastembed model
    #[default]
    Builtin,
    /// External command speaking JSON over stdin/stdout
    Command,
    /// Deterministic feature hashing, no model download
    Hashing,
}

/// Chunking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk
    pub chunk_size: Option<usize>,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: Option<usize>,
    /// Look-back window for sentence and paragraph breaks
    pub boundary_lookback: Option<usize>,
}

impl ChunkingConfig {
    /// Get chunk size (defaults to 1000)
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    /// Get chunk overlap (defaults to 200)
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP)
    }

    /// Get boundary look-back (defaults to 100)
    pub fn boundary_lookback(&self) -> usize {
        self.boundary_lookback.unwrap_or(DEFAULT_BOUNDARY_LOOKBACK)
    }

    /// Builds a validated chunker configuration.
    pub fn to_chunk_config(&self) -> Result<ChunkConfig> {
        Ok(ChunkConfig::new(self.chunk_size(), self.chunk_overlap())?
            .with_boundary_lookback(self.boundary_lookback()))
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, hashing)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Vector dimension (required for the command provider)
    pub dimension: Option<usize>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Texts per provider call
    pub batch_size: Option<usize>,
    /// Inputs are truncated to this many characters before embedding
    pub max_chars: Option<usize>,
    /// Deadline for a single embedding call in milliseconds
    pub timeout_ms: Option<u64>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier; the default depends on the provider
    pub fn model(&self) -> &str {
        match (&self.model, self.provider()) {
            (Some(model), _) => model,
            (None, EmbeddingProviderType::Builtin) => "all-MiniLM-L6-v2",
            (None, EmbeddingProviderType::Hashing) => "lexrag-hashing-v1",
            (None, EmbeddingProviderType::Command) => "local-model-id",
        }
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get batch size (defaults to 64)
    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(64)
    }

    /// Get max chars per input (defaults to 2000)
    pub fn max_chars(&self) -> usize {
        self.max_chars.unwrap_or(DEFAULT_MAX_CHARS)
    }

    /// Get embedding timeout (defaults to 30s)
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(30_000))
    }
}

/// Index persistence configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Index directory, relative to the workspace root
    pub path: Option<PathBuf>,
    /// Deadline for index save/load in milliseconds
    pub io_timeout_ms: Option<u64>,
}

impl IndexConfig {
    /// Resolve the index directory against a workspace root (defaults to .lexrag)
    pub fn resolve_path(&self, root: &Path) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(INDEX_DIR),
        }
    }

    /// Get persistence timeout (defaults to 10s)
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.unwrap_or(10_000))
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Default number of results
    pub default_k: Option<usize>,
    /// Minimum similarity a hit must reach (0.0 disables the threshold)
    pub min_score: Option<f32>,
    /// Candidates fetched per requested result before post-filtering
    pub overfetch_factor: Option<usize>,
}

impl RetrievalConfig {
    /// Get default k (defaults to 5)
    pub fn default_k(&self) -> usize {
        self.default_k.unwrap_or(5)
    }

    /// Get min score (defaults to 0.0)
    pub fn min_score(&self) -> f32 {
        self.min_score.unwrap_or(0.0)
    }

    /// Get over-fetch factor (defaults to 3)
    pub fn overfetch_factor(&self) -> usize {
        self.overfetch_factor.unwrap_or(3)
    }
}

/// Reranking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RerankConfig {
    /// Additive score boost per classification tag
    pub classification_boosts: BTreeMap<String, f32>,
}

/// Configuration loaded from .lexragrc.toml or ~/.config/lexrag/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Default output format (text or json)
    pub default_format: Option<String>,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub rerank: RerankConfig,
}

impl Config {
    /// Load configuration for a workspace
    ///
    /// Precedence (highest to lowest):
    /// 1. .lexragrc.toml in the workspace root
    /// 2. ~/.config/lexrag/config.toml
    /// 3. built-in defaults
    pub fn load_for_dir(root: &Path) -> Result<Self> {
        let local = root.join(CONFIG_FILE);
        if local.is_file() {
            return Self::load_from_path(&local);
        }

        if let Some(home) = dirs::home_dir() {
            let global = home.join(".config").join("lexrag").join("config.toml");
            if global.is_file() {
                return Self::load_from_path(&global);
            }
        }

        Ok(Self::default())
    }

    /// Load and validate a specific configuration file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            RagError::Configuration(msg) => {
                RagError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| RagError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value; invalid settings are fatal at startup
    pub fn validate(&self) -> Result<()> {
        self.chunking.to_chunk_config()?;

        let embeddings = &self.embeddings;
        if embeddings.batch_size() == 0 {
            return Err(invalid("embeddings.batch_size must be greater than 0"));
        }
        if embeddings.max_chars() == 0 {
            return Err(invalid("embeddings.max_chars must be greater than 0"));
        }
        if embeddings.timeout().is_zero() {
            return Err(invalid("embeddings.timeout_ms must be greater than 0"));
        }
        if embeddings.model().trim().is_empty() {
            return Err(invalid("embeddings.model must not be empty"));
        }
        if embeddings.dimension == Some(0) {
            return Err(invalid("embeddings.dimension must be greater than 0"));
        }
        if embeddings.provider() == EmbeddingProviderType::Command {
            if embeddings.command().trim().is_empty() {
                return Err(invalid("embeddings.command must not be empty"));
            }
            if embeddings.dimension.is_none() {
                return Err(invalid(
                    "embeddings.dimension is required for the command provider",
                ));
            }
        }

        if self.index.io_timeout().is_zero() {
            return Err(invalid("index.io_timeout_ms must be greater than 0"));
        }

        let retrieval = &self.retrieval;
        if retrieval.default_k() == 0 {
            return Err(invalid("retrieval.default_k must be at least 1"));
        }
        let min_score = retrieval.min_score();
        if !min_score.is_finite() || !(-1.0..=1.0).contains(&min_score) {
            return Err(RagError::Configuration(format!(
                "retrieval.min_score must be within [-1.0, 1.0], got {}",
                min_score
            )));
        }
        if retrieval.overfetch_factor() == 0 {
            return Err(invalid("retrieval.overfetch_factor must be at least 1"));
        }

        for (tag, boost) in &self.rerank.classification_boosts {
            if !boost.is_finite() {
                return Err(RagError::Configuration(format!(
                    "rerank.classification_boosts.{} must be finite",
                    tag
                )));
            }
        }

        if let Some(format) = &self.default_format {
            if self.output_format().is_none() {
                return Err(RagError::Configuration(format!(
                    "default_format must be text or json, got {}",
                    format
                )));
            }
        }

        Ok(())
    }

    /// Get output format from config, parsing the string to ConfigOutputFormat
    pub fn output_format(&self) -> Option<ConfigOutputFormat> {
        self.default_format.as_ref().and_then(|s| match s.to_lowercase().as_str() {
            "json" => Some(ConfigOutputFormat::Json),
            "text" => Some(ConfigOutputFormat::Text),
            _ => None,
        })
    }

    /// Merge CLI k with config (CLI wins)
    pub fn merge_k(&self, cli_value: Option<usize>) -> usize {
        cli_value.unwrap_or_else(|| self.retrieval.default_k())
    }
}

fn invalid(message: &str) -> RagError {
    RagError::Configuration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size(), 1000);
        assert_eq!(config.chunking.chunk_overlap(), 200);
        assert_eq!(config.embeddings.provider(), EmbeddingProviderType::Builtin);
        assert_eq!(config.embeddings.model(), "all-MiniLM-L6-v2");
        assert_eq!(config.embeddings.max_chars(), DEFAULT_MAX_CHARS);
        assert_eq!(config.retrieval.default_k(), 5);
        assert_eq!(config.retrieval.min_score(), 0.0);
        assert_eq!(config.retrieval.overfetch_factor(), 3);
        assert_eq!(
            config.index.resolve_path(Path::new("/work")),
            PathBuf::from("/work/.lexrag")
        );
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::from_toml(
            r#"
default_format = "json"

[chunking]
chunk_size = 500
chunk_overlap = 50

[embeddings]
provider = "hashing"
dimension = 128

[retrieval]
default_k = 3
min_score = 0.25

[rerank.classification_boosts]
statute = 0.1
"#,
        )
        .unwrap();

        assert_eq!(config.output_format(), Some(ConfigOutputFormat::Json));
        assert_eq!(config.chunking.chunk_size(), 500);
        assert_eq!(config.embeddings.provider(), EmbeddingProviderType::Hashing);
        assert_eq!(config.embeddings.model(), "lexrag-hashing-v1");
        assert_eq!(config.embeddings.dimension, Some(128));
        assert_eq!(config.retrieval.default_k(), 3);
        assert_eq!(config.rerank.classification_boosts.get("statute"), Some(&0.1));
        assert_eq!(config.merge_k(None), 3);
        assert_eq!(config.merge_k(Some(9)), 9);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let cases = [
            "[chunking]\nchunk_size = 100\nchunk_overlap = 100",
            "[chunking]\nchunk_size = 0",
            "[retrieval]\ndefault_k = 0",
            "[retrieval]\nmin_score = 2.5",
            "[retrieval]\noverfetch_factor = 0",
            "[embeddings]\nprovider = \"command\"",
            "[embeddings]\nbatch_size = 0",
            "[embeddings]\nprovider = \"unknown\"",
            "default_format = \"yaml\"",
            "[chunking]\nchunk_lines = 80",
            "not toml at all [",
        ];
        for case in cases {
            let err = Config::from_toml(case).unwrap_err();
            assert!(
                matches!(err, RagError::Configuration(_)),
                "expected configuration error for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_load_for_dir_prefers_workspace_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[retrieval]\ndefault_k = 7\n",
        )
        .unwrap();

        let config = Config::load_for_dir(dir.path()).unwrap();
        assert_eq!(config.retrieval.default_k(), 7);
    }

    #[test]
    fn test_load_from_path_reports_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[index]\nio_timeout_ms = 0\n").unwrap();

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("io_timeout_ms"));
    }

    #[test]
    fn test_relative_and_absolute_index_path() {
        let relative = IndexConfig {
            path: Some(PathBuf::from("state/index")),
            io_timeout_ms: None,
        };
        assert_eq!(
            relative.resolve_path(Path::new("/work")),
            PathBuf::from("/work/state/index")
        );

        let absolute = IndexConfig {
            path: Some(PathBuf::from("/var/lexrag")),
            io_timeout_ms: None,
        };
        assert_eq!(
            absolute.resolve_path(Path::new("/work")),
            PathBuf::from("/var/lexrag")
        );
    }
}
