//! The answering pipeline.
//!
//! ```text
//! validate → analyze → (embed + vector ∥ lexical) → fuse → dedup
//!          → [empty? short-circuit] → rerank → draft → critique → (revise)
//! ```
//!
//! The analyzer's suggested similarity threshold is capped at
//! `threshold_ceiling` before vector search. Raw cosine scores usually sit
//! well below what a classifier suggests, and an uncapped threshold is the
//! most common cause of zero-result retrieval.

use std::time::Instant;

use tracing::info;

use crate::analyzer::{AnalysisBounds, QueryAnalyzer};
use crate::cost::{CostModel, TokenUsage};
use crate::error::PipelineError;
use crate::models::{
    AnswerRequest, AnswerResponse, QueryAnalysis, ResponseMetadata, SearchResult,
};
use crate::multipass::MultiPassGenerator;
use crate::rerank::Reranker;
use crate::search::{hybrid_search, SearchParams, SearchPlan};
use crate::services::Services;

/// Answer returned when retrieval finds nothing.
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find any information in the document that answers this question.";

/// Tuning knobs for one [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub search: SearchParams,
    /// Upper bound applied to the analyzer's vector similarity threshold.
    pub threshold_ceiling: f64,
    pub bounds: AnalysisBounds,
    pub reranker: Reranker,
    /// Re-ranked results handed to generation.
    pub top_n: usize,
    pub revision_threshold: f64,
    pub max_query_chars: usize,
    pub cost: CostModel,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            search: SearchParams::default(),
            threshold_ceiling: 0.35,
            bounds: AnalysisBounds::default(),
            reranker: Reranker::default(),
            top_n: 8,
            revision_threshold: 0.8,
            max_query_chars: 2000,
            cost: CostModel::default(),
        }
    }
}

pub struct Pipeline {
    services: Services,
    config: PipelineConfig,
    analyzer: QueryAnalyzer,
    generator: MultiPassGenerator,
}

/// Reject empty or oversized queries.
pub fn validate_query(query: &str, max_chars: usize) -> Result<&str, PipelineError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Validation("query is empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(PipelineError::Validation(format!(
            "query is {} characters; the maximum is {}",
            len, max_chars
        )));
    }
    Ok(trimmed)
}

/// Retrieval output shared by [`Pipeline::answer`] and [`Pipeline::search`].
struct Ranked {
    analysis: QueryAnalysis,
    results: Vec<SearchResult>,
    candidates_seen: usize,
}

impl Pipeline {
    pub fn new(services: Services, config: PipelineConfig) -> Self {
        let analyzer = QueryAnalyzer::new(config.bounds);
        let generator = MultiPassGenerator::new(config.revision_threshold, config.cost);
        Self {
            services,
            config,
            analyzer,
            generator,
        }
    }

    /// Vector threshold actually used for `analysis`.
    pub fn effective_threshold(&self, analysis: &QueryAnalysis) -> f64 {
        analysis
            .confidence_threshold
            .min(self.config.threshold_ceiling)
    }

    /// Analyze, retrieve, and re-rank. `results` is empty on no match, in
    /// which case the re-ranker is not called.
    async fn retrieve(
        &self,
        request: &AnswerRequest,
        query: &str,
        usage: &mut TokenUsage,
    ) -> Result<Ranked, PipelineError> {
        let llm = self.services.llm.as_ref();
        let analysis = self
            .analyzer
            .analyze(llm, query, request.document_context.as_ref(), usage)
            .await;
        let threshold = self.effective_threshold(&analysis);
        info!(
            query_type = %analysis.query_type,
            vector_weight = analysis.vector_weight,
            chunk_count = analysis.chunk_count,
            suggested_threshold = analysis.confidence_threshold,
            threshold,
            "query analyzed"
        );

        let scope = request.scope();
        let plan = SearchPlan::from_analysis(query, &analysis, &scope, threshold);
        let retrieved = hybrid_search(&self.services, &self.config.search, &plan, usage).await?;

        let results = if retrieved.results.is_empty() {
            retrieved.results
        } else {
            self.config
                .reranker
                .rerank(llm, query, &analysis.key_terms, retrieved.results, usage)
                .await
        };

        Ok(Ranked {
            analysis,
            results,
            candidates_seen: retrieved.candidates_seen,
        })
    }

    /// Answer a question with citations.
    pub async fn answer(&self, request: &AnswerRequest) -> Result<AnswerResponse, PipelineError> {
        let started = Instant::now();
        let query = validate_query(&request.query, self.config.max_query_chars)?;
        let mut usage = TokenUsage::default();

        let ranked = self.retrieve(request, query, &mut usage).await?;

        if ranked.results.is_empty() {
            info!("no results; skipping generation");
            return Ok(AnswerResponse {
                answer: NO_INFORMATION_ANSWER.to_string(),
                confidence_score: 0.0,
                citations: Vec::new(),
                reasoning: "Retrieval returned no matching passages for this question."
                    .to_string(),
                metadata: ResponseMetadata {
                    query_type: ranked.analysis.query_type,
                    sources_searched: ranked.candidates_seen,
                    sources_used: 0,
                    was_revised: false,
                    total_passes: 0,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    cost_estimate: self.config.cost.estimate(&usage),
                },
                critique: None,
            });
        }

        let top_n = self.config.top_n.max(1);
        let sources: Vec<SearchResult> = ranked.results.into_iter().take(top_n).collect();
        let outcome = self
            .generator
            .run(self.services.llm.as_ref(), query, &sources, usage)
            .await?;

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            passes = outcome.total_passes,
            revised = outcome.was_revised,
            citations = outcome.final_answer.citations.len(),
            confidence = outcome.final_answer.confidence_score,
            usd = outcome.cost_estimate.estimated_usd,
            ms = processing_time_ms,
            "answer complete"
        );

        let final_answer = outcome.final_answer;
        Ok(AnswerResponse {
            answer: final_answer.answer,
            confidence_score: final_answer.confidence_score,
            citations: final_answer.citations,
            reasoning: final_answer.reasoning,
            metadata: ResponseMetadata {
                query_type: ranked.analysis.query_type,
                sources_searched: ranked.candidates_seen,
                sources_used: final_answer.sources_used,
                was_revised: outcome.was_revised,
                total_passes: outcome.total_passes,
                processing_time_ms,
                cost_estimate: outcome.cost_estimate,
            },
            critique: Some(outcome.critique),
        })
    }

    /// Retrieval only: ranked results without generation.
    pub async fn search(&self, request: &AnswerRequest) -> Result<Vec<SearchResult>, PipelineError> {
        let query = validate_query(&request.query, self.config.max_query_chars)?;
        let mut usage = TokenUsage::default();
        let ranked = self.retrieve(request, query, &mut usage).await?;
        Ok(ranked.results)
    }
}
