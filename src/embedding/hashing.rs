//! Deterministic feature-hashing embedder.
//!
//! Each lowercased alphanumeric token is hashed with SHA-256 into one of
//! `dims` buckets with a ±1 sign, and the result is L2-normalized. Texts
//! sharing vocabulary get positive cosine similarity; unrelated texts sit
//! near zero. No model, no network. Useful for offline demos and tests.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docqa_core::embedding::EmbeddingService;

pub const DEFAULT_DIMS: usize = 256;

pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingService for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::embedding::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let e = HashingEmbedder::new(128);
        let a = e.embed_one("Termination requires notice");
        let b = e.embed_one("termination  requires NOTICE");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_one("termination notice period");
        let related = e.embed_one("the termination notice period is thirty days");
        let unrelated = e.embed_one("invoices are payable monthly by wire transfer");
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
        assert!(cosine_similarity(&q, &related) > 0.5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        assert!(e.embed_one("  ").iter().all(|x| *x == 0.0));
    }
}
