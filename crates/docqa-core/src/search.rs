//! Hybrid retrieval: concurrent vector + lexical search, fused and deduplicated.
//!
//! # Algorithm
//!
//! 1. Embed the query, then run vector search with the clamped threshold.
//! 2. Concurrently, run lexical search over the analyzer's key terms.
//! 3. Both paths over-fetch `overfetch_factor × chunk_count` candidates.
//! 4. Fuse with weighted RRF and truncate to `chunk_count`.
//! 5. Deduplicate by leading-content fingerprint.
//!
//! A failure on either path is returned as a
//! [`PipelineError::Retrieval`] naming the stage; the search never
//! silently continues on a single signal.

use futures::future::join;
use tracing::{debug, info};

use crate::analyzer::tokenize;
use crate::cost::TokenUsage;
use crate::error::{PipelineError, RetrievalStage};
use crate::fusion::{deduplicate, fuse, DEFAULT_PREFIX_CHARS, RRF_K};
use crate::models::{ChunkMatch, QueryAnalysis, SearchResult, SearchScope};
use crate::services::Services;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// RRF smoothing constant.
    pub rrf_k: f64,
    /// Candidates fetched per path, as a multiple of `chunk_count`.
    pub overfetch_factor: usize,
    /// Characters of leading content used for dedup fingerprints.
    pub dedup_prefix_chars: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            rrf_k: RRF_K,
            overfetch_factor: 2,
            dedup_prefix_chars: DEFAULT_PREFIX_CHARS,
        }
    }
}

/// Everything a single hybrid search needs.
#[derive(Debug, Clone)]
pub struct SearchPlan<'a> {
    pub query: &'a str,
    pub key_terms: &'a [String],
    pub scope: &'a SearchScope,
    pub vector_weight: f64,
    pub bm25_weight: f64,
    pub chunk_count: usize,
    /// Vector similarity floor, already clamped by the caller.
    pub threshold: f64,
}

impl<'a> SearchPlan<'a> {
    pub fn from_analysis(
        query: &'a str,
        analysis: &'a QueryAnalysis,
        scope: &'a SearchScope,
        threshold: f64,
    ) -> Self {
        Self {
            query,
            key_terms: &analysis.key_terms,
            scope,
            vector_weight: analysis.vector_weight,
            bm25_weight: analysis.bm25_weight,
            chunk_count: analysis.chunk_count,
            threshold,
        }
    }
}

/// Fused, deduplicated retrieval output.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub results: Vec<SearchResult>,
    /// Distinct chunks seen across both paths before truncation.
    pub candidates_seen: usize,
    pub vector_hits: usize,
    pub lexical_hits: usize,
}

/// Run both retrieval paths concurrently and return their raw hits.
pub async fn retrieve_candidates(
    services: &Services,
    plan: &SearchPlan<'_>,
    limit: usize,
    usage: &mut TokenUsage,
) -> Result<(Vec<ChunkMatch>, Vec<ChunkMatch>), PipelineError> {
    let lexical_terms: Vec<String> = if plan.key_terms.is_empty() {
        tokenize(plan.query)
    } else {
        plan.key_terms.to_vec()
    };

    let vector_path = async {
        let query_vec = services
            .embedder
            .embed_query(plan.query)
            .await
            .map_err(|e| PipelineError::retrieval(RetrievalStage::Embedding, e))?;
        services
            .vectors
            .vector_search(&query_vec, plan.scope, limit, plan.threshold)
            .await
            .map_err(|e| PipelineError::retrieval(RetrievalStage::Vector, e))
    };

    let lexical_path = async {
        services
            .lexical
            .lexical_search(&lexical_terms, plan.scope, limit)
            .await
            .map_err(|e| PipelineError::retrieval(RetrievalStage::Lexical, e))
    };

    let (vector_hits, lexical_hits) = join(vector_path, lexical_path).await;
    let vector_hits = vector_hits?;
    usage.record_embedding(plan.query);
    let lexical_hits = lexical_hits?;

    debug!(
        vector = vector_hits.len(),
        lexical = lexical_hits.len(),
        terms = ?lexical_terms,
        "retrieval candidates"
    );
    Ok((vector_hits, lexical_hits))
}

/// Full hybrid search: retrieve, fuse, truncate, deduplicate.
pub async fn hybrid_search(
    services: &Services,
    params: &SearchParams,
    plan: &SearchPlan<'_>,
    usage: &mut TokenUsage,
) -> Result<Retrieved, PipelineError> {
    let limit = plan.chunk_count.saturating_mul(params.overfetch_factor.max(1));
    let (vector_hits, lexical_hits) = retrieve_candidates(services, plan, limit, usage).await?;

    let mut fused = fuse(
        &vector_hits,
        &lexical_hits,
        plan.vector_weight,
        plan.bm25_weight,
        params.rrf_k,
        usize::MAX,
    );
    let candidates_seen = fused.len();
    fused.truncate(plan.chunk_count);
    let results = deduplicate(fused, params.dedup_prefix_chars);

    info!(
        vector_hits = vector_hits.len(),
        lexical_hits = lexical_hits.len(),
        candidates = candidates_seen,
        results = results.len(),
        "hybrid search complete"
    );

    Ok(Retrieved {
        results,
        candidates_seen,
        vector_hits: vector_hits.len(),
        lexical_hits: lexical_hits.len(),
    })
}
