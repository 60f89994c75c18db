//! Self-critique of a draft answer (Pass 2).
//!
//! The model-backed critic scores accuracy, completeness, and citation
//! quality. When the call fails or the reply does not validate, a
//! deterministic rule-based critic stands in, so a revise decision is
//! always available.
//!
//! Boundary convention: `should_revise` is `overall_score < threshold`.
//! A score exactly equal to the threshold is accepted.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::cost::TokenUsage;
use crate::error::{EnhancementStage, PipelineError};
use crate::llm::CompletionService;
use crate::models::{AnswerGeneration, SearchResult, SelfCritique};
use crate::prompts;
use crate::structured::{self, CritiqueReply};

/// Revise when the score falls strictly below the threshold.
pub fn should_revise(overall_score: f64, threshold: f64) -> bool {
    overall_score < threshold
}

const MIN_ANSWER_CHARS: usize = 50;

/// Deterministic critique from observable properties of the draft.
pub fn rule_based_critique(
    draft: &AnswerGeneration,
    sources: &[SearchResult],
    threshold: f64,
) -> SelfCritique {
    let known: HashSet<&str> = sources.iter().map(|s| s.chunk.id.as_str()).collect();
    let total = draft.citations.len();
    let invalid = draft
        .citations
        .iter()
        .filter(|c| !known.contains(c.chunk_id.as_str()))
        .count();
    let valid = total - invalid;
    let answer_chars = draft.answer.chars().count();

    let mut score = 0.5;
    let mut improvements: Vec<String> = Vec::new();
    let mut notes: Vec<&str> = Vec::new();

    if sources.is_empty() {
        score -= 0.3;
        notes.push("no search results were available");
    }
    if total == 0 {
        score -= 0.2;
        notes.push("answer has no citations");
        improvements.push("Cite the numbered sources that support each claim.".to_string());
    }
    if invalid > 0 {
        score -= (0.15 * invalid as f64).min(0.3);
        notes.push("some citations do not match the supplied sources");
        improvements.push("Only cite sources from the provided list.".to_string());
    }
    if answer_chars < MIN_ANSWER_CHARS {
        score -= 0.1;
        notes.push("answer is very short");
        improvements.push("Give a fuller answer with supporting detail.".to_string());
    }

    if let Some(top) = sources.first() {
        if draft.citations.iter().any(|c| c.chunk_id == top.chunk.id) {
            score += 0.15;
        } else {
            score -= 0.1;
            notes.push("the top-ranked source is not cited");
            improvements.push("Use the most relevant source (source 1) if it applies.".to_string());
        }
    }

    let cited_chunks: HashSet<&str> = draft
        .citations
        .iter()
        .filter(|c| known.contains(c.chunk_id.as_str()))
        .map(|c| c.chunk_id.as_str())
        .collect();
    if cited_chunks.len() >= 2 {
        score += 0.1;
    }
    let cited_pages: HashSet<i64> = draft.citations.iter().filter_map(|c| c.page).collect();
    if cited_pages.len() >= 2 {
        score += 0.05;
    }

    score += 0.2 * draft.confidence_score.clamp(0.0, 1.0);
    let overall_score = score.clamp(0.0, 1.0);
    let revise = should_revise(overall_score, threshold);

    improvements.truncate(3);
    if revise && improvements.is_empty() {
        improvements.push("Answer the question more directly using the sources.".to_string());
    }

    let citation_quality = if total == 0 {
        0.0
    } else {
        valid as f64 / total as f64
    };

    SelfCritique {
        is_accurate: invalid == 0 && total > 0,
        is_complete: answer_chars >= MIN_ANSWER_CHARS && !sources.is_empty(),
        citation_quality,
        suggested_improvements: improvements,
        overall_score,
        should_revise: revise,
        critique_reasoning: if notes.is_empty() {
            "rule-based critique: no issues detected".to_string()
        } else {
            format!("rule-based critique: {}", notes.join("; "))
        },
    }
}

/// Model-backed critic with a revision threshold.
#[derive(Debug, Clone, Copy)]
pub struct Critic {
    pub revision_threshold: f64,
}

impl Default for Critic {
    fn default() -> Self {
        Self {
            revision_threshold: 0.8,
        }
    }
}

impl Critic {
    /// Critique `draft`. Never fails; falls back to [`rule_based_critique`].
    pub async fn critique(
        &self,
        llm: &dyn CompletionService,
        query: &str,
        sources: &[SearchResult],
        draft: &AnswerGeneration,
        usage: &mut TokenUsage,
    ) -> SelfCritique {
        match self.judge(llm, query, sources, draft, usage).await {
            Ok(critique) => critique,
            Err(e) => {
                let err = PipelineError::degraded(EnhancementStage::Critique, e);
                warn!(error = %err, "using rule-based critique");
                rule_based_critique(draft, sources, self.revision_threshold)
            }
        }
    }

    async fn judge(
        &self,
        llm: &dyn CompletionService,
        query: &str,
        sources: &[SearchResult],
        draft: &AnswerGeneration,
        usage: &mut TokenUsage,
    ) -> anyhow::Result<SelfCritique> {
        let request = prompts::critique(query, sources, draft);
        let completion = llm.complete(&request).await?;
        usage.record_completion(&request, &completion);
        let reply = structured::parse::<CritiqueReply>(&completion.text)?.validate()?;

        let revise = should_revise(reply.overall_score, self.revision_threshold);
        let mut improvements = reply.suggested_improvements;
        if revise && improvements.is_empty() {
            improvements.push("Address the reviewer's concerns using the sources.".to_string());
        }
        debug!(
            overall = reply.overall_score,
            accurate = reply.is_accurate,
            complete = reply.is_complete,
            "critique reply"
        );

        Ok(SelfCritique {
            is_accurate: reply.is_accurate,
            is_complete: reply.is_complete,
            citation_quality: reply.citation_quality,
            suggested_improvements: improvements,
            overall_score: reply.overall_score,
            should_revise: revise,
            critique_reasoning: reply.critique_reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest};
    use crate::models::{Chunk, Citation};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    fn source(id: &str, page: i64) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: id.into(),
                document_id: "d1".into(),
                content: "text".into(),
                page: Some(page),
                ..Default::default()
            },
            vector_similarity: None,
            lexical_rank: Some(1),
            combined_score: 0.01,
            reranked_score: None,
        }
    }

    fn cite(id: &str, page: i64) -> Citation {
        Citation {
            chunk_id: id.into(),
            excerpt: "text".into(),
            page: Some(page),
            relevance: 0.9,
        }
    }

    fn draft(answer: &str, citations: Vec<Citation>, confidence: f64) -> AnswerGeneration {
        AnswerGeneration {
            answer: answer.into(),
            confidence_score: confidence,
            sources_used: citations.len(),
            citations,
            reasoning: String::new(),
            generation_time_ms: 0,
        }
    }

    const LONG: &str = "Either party may terminate the agreement by giving thirty days written notice.";

    #[test]
    fn test_boundary_is_strict() {
        assert!(should_revise(0.79, 0.8));
        assert!(!should_revise(0.8, 0.8));
        assert!(!should_revise(0.95, 0.8));
    }

    #[test]
    fn test_rule_based_rewards_grounded_answer() {
        let sources = vec![source("c1", 1), source("c2", 2)];
        let d = draft(LONG, vec![cite("c1", 1), cite("c2", 2)], 1.0);
        let c = rule_based_critique(&d, &sources, 0.8);
        // 0.5 + 0.15 + 0.1 + 0.05 + 0.2
        assert!((c.overall_score - 1.0).abs() < 1e-9);
        assert!(c.is_accurate && c.is_complete);
        assert!(!c.should_revise);
        assert_eq!(c.citation_quality, 1.0);
    }

    #[test]
    fn test_rule_based_penalizes_uncited_short_answer() {
        let sources = vec![source("c1", 1)];
        let d = draft("Yes.", vec![], 0.5);
        let c = rule_based_critique(&d, &sources, 0.8);
        // 0.5 - 0.2 - 0.1 - 0.1 + 0.1
        assert!((c.overall_score - 0.2).abs() < 1e-9);
        assert!(c.should_revise);
        assert!(!c.is_accurate);
        assert!((1..=3).contains(&c.suggested_improvements.len()));
    }

    #[test]
    fn test_rule_based_flags_unknown_citation() {
        let sources = vec![source("c1", 1)];
        let d = draft(LONG, vec![cite("c1", 1), cite("ghost", 4)], 0.5);
        let c = rule_based_critique(&d, &sources, 0.8);
        assert!(!c.is_accurate);
        assert!((c.citation_quality - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rule_based_without_sources() {
        let d = draft(LONG, vec![], 0.0);
        let c = rule_based_critique(&d, &[], 0.8);
        assert!(c.overall_score.abs() < 1e-9);
        assert!(c.should_revise);
        assert!(!c.is_complete);
    }

    struct Scripted(Option<&'static str>);

    #[async_trait]
    impl CompletionService for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            match self.0 {
                Some(text) => Ok(Completion::text(text)),
                None => bail!("critic offline"),
            }
        }
    }

    #[tokio::test]
    async fn test_model_critique_equal_score_accepts() {
        let llm = Scripted(Some(
            r#"{"is_accurate": true, "is_complete": true, "citation_quality": 0.9,
                "overall_score": 0.8, "suggested_improvements": [],
                "critique_reasoning": "fine"}"#,
        ));
        let sources = vec![source("c1", 1)];
        let d = draft(LONG, vec![cite("c1", 1)], 0.9);
        let mut usage = TokenUsage::default();
        let c = Critic::default()
            .critique(&llm, "q", &sources, &d, &mut usage)
            .await;
        assert!(!c.should_revise);
        assert_eq!(c.critique_reasoning, "fine");
    }

    #[tokio::test]
    async fn test_critic_failure_falls_back() {
        let sources = vec![source("c1", 1)];
        let d = draft(LONG, vec![cite("c1", 1)], 0.9);
        let mut usage = TokenUsage::default();
        let c = Critic::default()
            .critique(&Scripted(None), "q", &sources, &d, &mut usage)
            .await;
        assert!(c.critique_reasoning.starts_with("rule-based"));
        assert_eq!(usage, TokenUsage::default());
    }
}
