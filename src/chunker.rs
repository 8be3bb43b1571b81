// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text chunker for embedding generation.
//!
//! This module splits a document's normalized text into overlapping chunks
//! suitable for embedding generation. Units are Unicode scalar values
//! (characters), and all offsets are character offsets.
//!
//! The window advances by `chunk_size - chunk_overlap` characters. Before a
//! hard cut, the chunker looks back up to `boundary_lookback` characters for
//! a paragraph or sentence boundary so citable statements are not severed.
//! The next chunk always starts `chunk_overlap` characters before the end of
//! the previous one, so consecutive chunks overlap by exactly that amount.

use crate::errors::{RagError, Result};
use crate::model::Chunk;

/// Default number of characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Default look-back window when searching for a sentence boundary.
pub const DEFAULT_BOUNDARY_LOOKBACK: usize = 100;

/// Configuration for the text chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum number of characters per chunk.
    pub chunk_size: usize,
    /// Number of characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// How far before a hard cut to look for a paragraph or sentence break.
    pub boundary_lookback: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            boundary_lookback: DEFAULT_BOUNDARY_LOOKBACK,
        }
    }
}

impl ChunkConfig {
    /// Creates a new ChunkConfig with the specified parameters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the boundary look-back window.
    pub fn with_boundary_lookback(mut self, lookback: usize) -> Self {
        self.boundary_lookback = lookback;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Number of characters the window advances per step when no boundary
    /// adjustment happens.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Look-back clamped so every step still advances past the overlap.
    fn effective_lookback(&self) -> usize {
        self.boundary_lookback.min(self.stride() - 1)
    }
}

/// Splits document text into overlapping chunks.
#[derive(Debug, Clone)]
pub struct DocumentChunker {
    config: ChunkConfig,
}

impl DocumentChunker {
    /// Creates a new chunker, validating the configuration.
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Creates a chunker with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Splits text into overlapping chunks.
    ///
    /// Algorithm:
    /// ```text
    /// start = 0
    /// loop:
    ///   hard_end = min(start + chunk_size, len)
    ///   end = hard_end == len ? len : last boundary in (hard_end - lookback ..= hard_end), else hard_end
    ///   emit [start, end)
    ///   if end == len: stop
    ///   start = end - chunk_overlap
    /// ```
    ///
    /// Empty text yields no chunks. Output depends only on the text and the
    /// configuration.
    pub fn chunk(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>> {
        self.config.validate()?;

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        // Byte offset of every character plus the end of the string.
        let byte_offsets: Vec<usize> = text
            .char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(text.len()))
            .collect();

        let lookback = self.config.effective_lookback();
        let mut chunks = Vec::with_capacity(total.div_ceil(self.config.stride()));
        let mut start = 0_usize;
        let mut sequence = 0_u32;

        loop {
            let hard_end = (start + self.config.chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                find_break(&chars, hard_end, lookback).unwrap_or(hard_end)
            };

            let span = &text[byte_offsets[start]..byte_offsets[end]];
            chunks.push(Chunk {
                chunk_id: Chunk::make_id(document_id, sequence),
                document_id: document_id.to_string(),
                sequence,
                start,
                end,
                text: span.to_string(),
                text_hash: blake3::hash(span.as_bytes()).to_hex().to_string(),
                vector: None,
            });

            if end == total {
                break;
            }
            start = end - self.config.chunk_overlap;
            sequence += 1;
        }

        Ok(chunks)
    }
}

/// Finds the best break position in `(hard_end - lookback) ..= hard_end`.
///
/// A paragraph or page break wins over a sentence end; the latest candidate
/// of the preferred kind is chosen. The returned position is exclusive: the
/// chunk keeps the separator.
fn find_break(chars: &[char], hard_end: usize, lookback: usize) -> Option<usize> {
    if lookback == 0 {
        return None;
    }
    let window_start = hard_end - lookback;
    let window = (window_start + 1..=hard_end).rev();

    window
        .clone()
        .find(|&p| is_paragraph_break(chars, p))
        .or_else(|| window.clone().find(|&p| is_sentence_break(chars, p)))
}

fn is_paragraph_break(chars: &[char], p: usize) -> bool {
    match p {
        0 => false,
        1 => chars[0] == '\u{c}',
        _ => chars[p - 1] == '\u{c}' || (chars[p - 1] == '\n' && chars[p - 2] == '\n'),
    }
}

fn is_sentence_break(chars: &[char], p: usize) -> bool {
    if p < 2 || !chars[p - 1].is_whitespace() {
        return false;
    }
    let mut i = p - 2;
    // Skip closing quotes and brackets after the terminator.
    while i > 0 && matches!(chars[i], '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}') {
        i -= 1;
    }
    matches!(chars[i], '.' | '!' | '?')
}
