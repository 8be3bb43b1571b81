// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared, deadline-bounded access to an embedding provider.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::deadline::{is_cancelled, run_with_timeout};
use crate::errors::{RagError, Result};

use super::provider::EmbeddingProvider;

/// Thread-safe embedder handle that enforces a timeout on every call.
///
/// Calls run on a worker thread that owns a clone of the provider handle.
/// A call abandoned by its caller raises the provider's cancel flag, releases
/// the provider lock when the worker returns, and its output is discarded. Every returned vector is
/// checked against the provider dimension.
#[derive(Clone)]
pub struct BoundedEmbedder {
    provider: Arc<Mutex<Box<dyn EmbeddingProvider>>>,
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl BoundedEmbedder {
    pub fn new(provider: Box<dyn EmbeddingProvider>) -> Self {
        let model_id = provider.model_id().to_string();
        let dimension = provider.dimension();
        let batch_size = provider.batch_size().max(1);
        Self {
            provider: Arc::new(Mutex::new(provider)),
            model_id,
            dimension,
            batch_size,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds texts in provider-sized batches, preserving order.
    pub fn embed_batch(&self, texts: Vec<String>, timeout: Duration) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let provider = Arc::clone(&self.provider);
        let batch_size = self.batch_size;
        let expected = texts.len();

        let vectors = run_with_timeout("embed batch", timeout, move |cancel| {
            let mut guard = provider
                .lock()
                .map_err(|_| RagError::LockPoisoned("embedding provider"))?;
            let mut vectors = Vec::with_capacity(texts.len());
            for batch in texts.chunks(batch_size) {
                if is_cancelled(cancel) {
                    break;
                }
                vectors.extend(guard.embed_batch_cancellable(batch, cancel)?);
            }
            Ok(vectors)
        })?;

        if vectors.len() != expected {
            return Err(RagError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        Ok(vectors)
    }

    /// Embeds a single search query.
    pub fn embed_query(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        let provider = Arc::clone(&self.provider);
        let text = text.to_string();

        let vector = run_with_timeout("embed query", timeout, move |cancel| {
            let mut guard = provider
                .lock()
                .map_err(|_| RagError::LockPoisoned("embedding provider"))?;
            guard.embed_query_cancellable(&text, cancel)
        })?;

        self.check_dimension(&vector)?;
        Ok(vector)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for BoundedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedEmbedder")
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{CommandProvider, HashingProvider};
    use std::thread;
    use std::time::Instant;

    struct SlowProvider {
        delay: Duration,
    }

    impl EmbeddingProvider for SlowProvider {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            2
        }

        fn batch_size(&self) -> usize {
            1
        }

        fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            thread::sleep(self.delay);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct WrongDimProvider;

    impl EmbeddingProvider for WrongDimProvider {
        fn model_id(&self) -> &str {
            "wrong"
        }

        fn dimension(&self) -> usize {
            4
        }

        fn batch_size(&self) -> usize {
            8
        }

        fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
        }
    }

    #[test]
    fn test_batches_preserve_order() {
        let embedder = BoundedEmbedder::new(Box::new(HashingProvider::new(32).with_batch_size(2)));
        let texts: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let batched = embedder
            .embed_batch(texts.clone(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(batched.len(), 5);
        for (text, vector) in texts.iter().zip(&batched) {
            let single = embedder.embed_query(text, Duration::from_secs(5)).unwrap();
            assert_eq!(&single, vector);
        }
    }

    #[test]
    fn test_timeout_releases_provider() {
        let embedder = BoundedEmbedder::new(Box::new(SlowProvider {
            delay: Duration::from_millis(200),
        }));

        let err = embedder
            .embed_query("late", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, RagError::Timeout { .. }));

        // The abandoned worker finishes and the lock becomes available again.
        let vector = embedder
            .embed_query("on time", Duration::from_secs(5))
            .unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
    }

    #[test]
    fn test_wrong_dimension_is_rejected() {
        let embedder = BoundedEmbedder::new(Box::new(WrongDimProvider));
        let err = embedder
            .embed_query("anything", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_stuck_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");
        // Hangs on the first call only.
        let command = format!(
            "if [ -e '{m}' ]; then cat >/dev/null; echo '[[1.0, 0.0]]'; \
             else touch '{m}'; sleep 5; fi",
            m = marker.display()
        );
        let embedder = BoundedEmbedder::new(Box::new(CommandProvider::new(command, "fixture", 2)));
        let started = Instant::now();

        let err = embedder
            .embed_query("stuck", Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, RagError::Timeout { .. }));
        assert!(marker.exists());

        let vector = embedder
            .embed_query("next", Duration::from_secs(2))
            .unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
