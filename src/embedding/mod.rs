// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - maps chunk and query text to fixed-dimension vectors
//!
//! The model is a pluggable capability selected by configuration. The core only
//! relies on the provider's model id, its dimension, and order-preserving batch
//! embedding.

pub mod bounded;
pub mod provider;

pub use bounded::BoundedEmbedder;
pub use provider::{
    create_provider, CommandProvider, EmbeddingProvider, FastEmbedder, HashingProvider,
    DEFAULT_EMBEDDING_DIM, DEFAULT_MAX_CHARS,
};
