// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Three providers share one narrow trait: an in-process fastembed model, an
//! external command speaking JSON over stdin/stdout, and a deterministic
//! feature-hashing embedder that needs no model download.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde_json::Value;
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{EmbeddingConfig, EmbeddingProviderType};
use crate::deadline::is_cancelled;
use crate::errors::{RagError, Result};

/// Output dimension of the supported fastembed models.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

const DEFAULT_BATCH_SIZE: usize = 64;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
/// Longest text, in characters, handed to an in-process model.
pub const DEFAULT_MAX_CHARS: usize = 2000;
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Trait for embedding providers.
///
/// Implementations must be deterministic for a fixed model version and must
/// preserve input order in [`embed_batch`](EmbeddingProvider::embed_batch).
pub trait EmbeddingProvider: Send {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates embeddings for the given texts, in input order.
    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_batch(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| RagError::Embedding("no embedding returned".to_string()))
    }

    /// Embeds a search query. Asymmetric models override this.
    fn embed_query(&mut self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }

    /// [`embed_batch`](EmbeddingProvider::embed_batch) for a caller that may
    /// give up. Providers that block on outside work override this and stop
    /// once `cancel` is set.
    fn embed_batch_cancellable(
        &mut self,
        texts: &[String],
        _cancel: &AtomicBool,
    ) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }

    /// [`embed_query`](EmbeddingProvider::embed_query) for a caller that may
    /// give up.
    fn embed_query_cancellable(&mut self, text: &str, _cancel: &AtomicBool) -> Result<Vec<f32>> {
        self.embed_query(text)
    }
}

/// Builds the provider selected by configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    let provider: Box<dyn EmbeddingProvider> = match config.provider() {
        EmbeddingProviderType::Builtin => Box::new(FastEmbedder::new(config)?),
        EmbeddingProviderType::Command => {
            let dimension = config.dimension.ok_or_else(|| {
                RagError::Configuration(
                    "embeddings.dimension is required for the command provider".to_string(),
                )
            })?;
            Box::new(
                CommandProvider::new(config.command(), config.model(), dimension)
                    .with_batch_size(config.batch_size()),
            )
        }
        EmbeddingProviderType::Hashing => Box::new(
            HashingProvider::new(config.dimension.unwrap_or(DEFAULT_EMBEDDING_DIM))
                .with_model_id(config.model())
                .with_batch_size(config.batch_size()),
        ),
    };
    tracing::debug!(
        model = provider.model_id(),
        dimension = provider.dimension(),
        "embedding provider ready"
    );
    Ok(provider)
}

/// FastEmbed provider running an ONNX sentence-transformer in process.
pub struct FastEmbedder {
    embedder: TextEmbedding,
    model_id: String,
    batch_size: usize,
    max_chars: usize,
}

impl FastEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, model_id) = parse_model(config.model())?;
        if let Some(dimension) = config.dimension {
            if dimension != DEFAULT_EMBEDDING_DIM {
                return Err(RagError::Configuration(format!(
                    "model {} produces {}-d vectors, configured dimension is {}",
                    model_id, DEFAULT_EMBEDDING_DIM, dimension
                )));
            }
        }

        let mut batch_size = config.batch_size();
        if batch_size > MAX_FASTEMBED_BATCH_SIZE {
            tracing::warn!(
                batch_size,
                max = MAX_FASTEMBED_BATCH_SIZE,
                "embeddings.batch_size exceeds maximum; clamping"
            );
            batch_size = MAX_FASTEMBED_BATCH_SIZE;
        }

        let embedder = TextEmbedding::try_new(InitOptions::new(model))
            .map_err(|e| RagError::Embedding(format!("failed to initialize fastembed model: {}", e)))?;

        Ok(Self {
            embedder,
            model_id: model_id.to_string(),
            batch_size,
            max_chars: config.max_chars(),
        })
    }
}

impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        DEFAULT_EMBEDDING_DIM
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = truncate_texts(texts, self.max_chars);
        let mut embeddings = self
            .embedder
            .embed(&prepared, Some(self.batch_size))
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        for embedding in embeddings.iter_mut() {
            l2_normalize(embedding);
        }

        Ok(embeddings)
    }
}

/// Command provider that shells out to an external process.
///
/// The command receives `{"model": ..., "texts": [...]}` on stdin and prints
/// either a JSON array of vectors or an object with an `embeddings`,
/// `vectors` or `data` field.
pub struct CommandProvider {
    command: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
            dimension,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Runs the command once for `texts`.
    ///
    /// The child is polled rather than waited on, so a raised `cancel` flag
    /// kills and reaps it instead of leaving the provider busy until the
    /// command exits on its own.
    fn run_command(&self, texts: &[String], cancel: &AtomicBool) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        })
        .to_string();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RagError::Embedding(format!(
                    "failed to spawn embedding command {}: {}",
                    self.command, e
                ))
            })?;

        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(payload.as_bytes())?;
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if is_cancelled(cancel) {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(command = %self.command, "killed abandoned embedding command");
                return Err(RagError::Embedding(format!(
                    "embedding command {} was cancelled",
                    self.command
                )));
            }
            thread::sleep(COMMAND_POLL_INTERVAL);
        };

        match writer.join() {
            Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
            Err(_) => {
                return Err(RagError::Embedding(
                    "embedding command stdin writer panicked".to_string(),
                ))
            }
            _ => {}
        }
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(RagError::Embedding(format!(
                "embedding command failed (status {}): {}",
                status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        parse_command_output(stdout.trim())
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_cancellable(texts, &AtomicBool::new(false))
    }

    fn embed_batch_cancellable(
        &mut self,
        texts: &[String],
        cancel: &AtomicBool,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.run_command(texts, cancel)?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "embedding command returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn embed_query_cancellable(&mut self, text: &str, cancel: &AtomicBool) -> Result<Vec<f32>> {
        self.embed_batch_cancellable(&[text.to_string()], cancel)?
            .pop()
            .ok_or_else(|| RagError::Embedding("no embedding returned".to_string()))
    }
}

/// Reads a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    reader
        .join()
        .map_err(|_| RagError::Embedding("embedding command reader panicked".to_string()))?
        .map_err(RagError::from)
}

fn parse_command_output(raw: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(raw)?;

    let rows = match &parsed {
        Value::Array(_) => &parsed,
        Value::Object(obj) => ["embeddings", "vectors", "data"]
            .iter()
            .find_map(|key| obj.get(*key))
            .ok_or_else(|| {
                RagError::Embedding("embedding output missing 'embeddings' field".to_string())
            })?,
        _ => {
            return Err(RagError::Embedding(
                "embedding output must be a JSON array or object".to_string(),
            ))
        }
    };

    rows.as_array()
        .ok_or_else(|| RagError::Embedding("embeddings must be a JSON array".to_string()))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| RagError::Embedding("embedding row must be an array".to_string()))?
                .iter()
                .map(|value| {
                    value.as_f64().map(|v| v as f32).ok_or_else(|| {
                        RagError::Embedding("embedding value must be a number".to_string())
                    })
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Tokens are lowercased alphanumeric runs. Each token adds a signed unit to
/// one bucket chosen by its blake3 digest; the result is L2-normalised, so
/// texts sharing vocabulary have high cosine similarity.
pub struct HashingProvider {
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: "lexrag-hashing-v1".to_string(),
            dimension: dimension.max(1),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = digest.as_bytes();
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingProvider for HashingProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn parse_model(raw: &str) -> Result<(EmbeddingModel, &'static str)> {
    match raw.trim().to_lowercase().as_str() {
        "" | "minilm"
        | "all-minilm-l6-v2"
        | "sentence-transformers/all-minilm-l6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, "all-MiniLM-L6-v2"))
        }
        "bge-small" | "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
            Ok((EmbeddingModel::BGESmallENV15, "bge-small-en-v1.5"))
        }
        other => Err(RagError::Configuration(format!(
            "unsupported embedding model '{}'. Supported values: all-MiniLM-L6-v2, bge-small-en-v1.5",
            other
        ))),
    }
}

fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
