//! In-memory chunk store for testing and embedding in other hosts.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Vector search
//! is brute-force cosine similarity; lexical search counts matched terms
//! with an occurrence-count tiebreak.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ChunkMatch, SearchScope};

use super::{LexicalBackend, VectorBackend};

/// In-memory store implementing both retrieval backends.
pub struct InMemoryStore {
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: RwLock::new(chunks),
        }
    }

    /// Insert a chunk, replacing any existing chunk with the same id.
    pub fn upsert(&self, chunk: Chunk) -> Result<()> {
        let mut chunks = self
            .chunks
            .write()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        chunks.retain(|c| c.id != chunk.id);
        chunks.push(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_matches(matches: &mut [ChunkMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
}

#[async_trait]
impl VectorBackend for InMemoryStore {
    async fn vector_search(
        &self,
        query_vec: &[f32],
        scope: &SearchScope,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<ChunkMatch>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        let mut matches: Vec<ChunkMatch> = chunks
            .iter()
            .filter(|c| scope.admits(&c.document_id, c.owner_id.as_deref()))
            .filter_map(|c| {
                let vector = c.embedding.as_ref()?;
                let sim = cosine_similarity(query_vec, vector) as f64;
                (sim >= threshold).then(|| ChunkMatch {
                    chunk: c.clone(),
                    score: sim,
                })
            })
            .collect();
        sort_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }
}

#[async_trait]
impl LexicalBackend for InMemoryStore {
    async fn lexical_search(
        &self,
        terms: &[String],
        scope: &SearchScope,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let mut words: Vec<String> = terms
            .iter()
            .flat_map(|t| t.split_whitespace())
            .map(|w| w.to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        words.sort();
        words.dedup();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self
            .chunks
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        let mut matches: Vec<ChunkMatch> = chunks
            .iter()
            .filter(|c| scope.admits(&c.document_id, c.owner_id.as_deref()))
            .filter_map(|c| {
                let text = c.content.to_lowercase();
                let matched = words.iter().filter(|w| text.contains(w.as_str())).count();
                if matched == 0 {
                    return None;
                }
                let occurrences: usize = words
                    .iter()
                    .map(|w| text.matches(w.as_str()).count())
                    .sum();
                Some(ChunkMatch {
                    chunk: c.clone(),
                    score: matched as f64 + occurrences.min(50) as f64 * 0.01,
                })
            })
            .collect();
        sort_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc: &str, owner: Option<&str>, text: &str, emb: Vec<f32>) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: doc.into(),
            owner_id: owner.map(String::from),
            content: text.into(),
            embedding: Some(emb),
            ..Default::default()
        }
    }

    fn store() -> InMemoryStore {
        InMemoryStore::with_chunks(vec![
            chunk("c1", "d1", Some("u1"), "Termination requires notice", vec![1.0, 0.0]),
            chunk("c2", "d1", Some("u1"), "Payment terms and notice notice", vec![0.7, 0.7]),
            chunk("c3", "d2", Some("u2"), "Unrelated notice", vec![0.0, 1.0]),
        ])
    }

    #[tokio::test]
    async fn test_vector_threshold_and_order() {
        let s = store();
        let hits = s
            .vector_search(&[1.0, 0.0], &SearchScope::default(), 10, 0.5)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|m| m.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_scope_is_enforced() {
        let s = store();
        let scope = SearchScope::new(None, Some("u2".into()));
        let hits = s
            .lexical_search(&["notice".into()], &scope, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c3");
    }

    #[tokio::test]
    async fn test_lexical_ranks_by_matched_terms() {
        let s = store();
        let hits = s
            .lexical_search(
                &["termination".into(), "notice".into()],
                &SearchScope::default(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.id, "c1");
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let s = store();
        s.upsert(chunk("c1", "d1", None, "replaced", vec![1.0, 0.0]))
            .unwrap();
        assert_eq!(s.len(), 3);
    }
}
