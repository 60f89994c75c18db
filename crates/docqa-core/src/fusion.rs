//! Weighted Reciprocal Rank Fusion and content deduplication.
//!
//! # Fusion
//!
//! For smoothing constant `K` (default 60):
//!
//! ```text
//! score(c) = vector_weight · 1/(K + rank_v(c)) + bm25_weight · 1/(K + rank_l(c))
//! ```
//!
//! Ranks are 1-based positions in each source list; a chunk absent from a
//! list gets no contribution from it. With non-negative weights, appearing
//! in both lists never scores lower than appearing in only one.
//!
//! # Deduplication
//!
//! Results whose normalized leading content (lowercased, whitespace
//! collapsed, first N characters) hashes to the same fingerprint are
//! collapsed onto the highest-scoring one. The operation is idempotent.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{ChunkMatch, SearchResult};

/// Default RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

/// Default number of leading characters that make up a fingerprint.
pub const DEFAULT_PREFIX_CHARS: usize = 200;

/// Fuse vector and lexical result lists into at most `limit` results.
///
/// Inputs must already be ranked best-first. Chunks are merged by id, with
/// metadata taken from whichever source has it. Output is sorted by fused
/// score descending, ties broken by chunk id so the result is deterministic.
pub fn fuse(
    vector: &[ChunkMatch],
    lexical: &[ChunkMatch],
    vector_weight: f64,
    bm25_weight: f64,
    k: f64,
    limit: usize,
) -> Vec<SearchResult> {
    let mut merged: HashMap<String, SearchResult> = HashMap::new();

    for (i, m) in vector.iter().enumerate() {
        if merged.contains_key(&m.chunk.id) {
            continue;
        }
        let rank = (i + 1) as f64;
        merged.insert(
            m.chunk.id.clone(),
            SearchResult {
                chunk: m.chunk.clone(),
                vector_similarity: Some(m.score),
                lexical_rank: None,
                combined_score: vector_weight / (k + rank),
                reranked_score: None,
            },
        );
    }

    for (i, m) in lexical.iter().enumerate() {
        let rank = i + 1;
        let contribution = bm25_weight / (k + rank as f64);
        match merged.get_mut(&m.chunk.id) {
            Some(existing) if existing.lexical_rank.is_some() => {}
            Some(existing) => {
                existing.lexical_rank = Some(rank);
                existing.combined_score += contribution;
                existing.chunk.merge_missing(&m.chunk);
            }
            None => {
                merged.insert(
                    m.chunk.id.clone(),
                    SearchResult {
                        chunk: m.chunk.clone(),
                        vector_similarity: None,
                        lexical_rank: Some(rank),
                        combined_score: contribution,
                        reranked_score: None,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(limit);
    results
}

/// Fingerprint of the normalized leading `prefix_chars` characters.
pub fn fingerprint(content: &str, prefix_chars: usize) -> String {
    let normalized: String = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(prefix_chars)
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse near-identical results onto the best-scoring representative.
///
/// Survivors keep their relative order.
pub fn deduplicate(results: Vec<SearchResult>, prefix_chars: usize) -> Vec<SearchResult> {
    let prints: Vec<String> = results
        .iter()
        .map(|r| fingerprint(&r.chunk.content, prefix_chars))
        .collect();

    let mut best: HashMap<&str, usize> = HashMap::new();
    for (i, fp) in prints.iter().enumerate() {
        match best.get(fp.as_str()) {
            Some(&j) if results[j].effective_score() >= results[i].effective_score() => {}
            _ => {
                best.insert(fp.as_str(), i);
            }
        }
    }

    let keep: Vec<bool> = prints
        .iter()
        .enumerate()
        .map(|(i, fp)| best.get(fp.as_str()) == Some(&i))
        .collect();

    results
        .into_iter()
        .zip(keep)
        .filter_map(|(r, k)| k.then_some(r))
        .collect()
}
