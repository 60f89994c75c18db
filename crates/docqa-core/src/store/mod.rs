//! Retrieval backend abstraction for docqa.
//!
//! The [`VectorBackend`] and [`LexicalBackend`] traits define the two
//! independent ranking signals the hybrid search fuses. Every call is
//! explicitly parameterized by a [`SearchScope`]; implementations must not
//! consult any ambient session state.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkMatch, SearchScope};

/// Nearest-neighbor lookup over chunk embeddings.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Return chunks whose cosine similarity to `query_vec` is at least
    /// `threshold`, ranked descending, at most `limit` of them.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<ChunkMatch>>;
}

/// Keyword / term-frequency lookup over chunk text.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    /// Return chunks ranked by term relevance (higher score first).
    ///
    /// `terms` are compact key terms, not a raw question sentence.
    async fn lexical_search(
        &self,
        terms: &[String],
        scope: &SearchScope,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>>;
}
