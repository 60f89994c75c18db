//! Draft → critique → conditional revision.
//!
//! ```text
//! DRAFTED ──critique──▶ CRITIQUED ──should_revise = false──▶ ACCEPTED (2 passes)
//!                           │
//!                           └──should_revise = true──▶ revise ─ok──▶ REVISED (3 passes)
//!                                                         └─err─▶ ACCEPTED (2 passes)
//! ```
//!
//! Only the draft pass is mandatory. Its failure aborts with
//! [`PipelineError::Generation`]; critique and revision failures degrade.

use std::time::Instant;

use tracing::{info, warn};

use crate::cost::{CostModel, TokenUsage};
use crate::critique::Critic;
use crate::error::{EnhancementStage, PipelineError};
use crate::generate;
use crate::llm::CompletionService;
use crate::models::{MultiPassResult, SearchResult};

/// Terminal state of one generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Accepted,
    Revised,
}

/// Runs the multi-pass cycle over a fixed source list.
#[derive(Debug, Clone)]
pub struct MultiPassGenerator {
    pub critic: Critic,
    pub cost: CostModel,
}

impl MultiPassGenerator {
    pub fn new(revision_threshold: f64, cost: CostModel) -> Self {
        Self {
            critic: Critic { revision_threshold },
            cost,
        }
    }

    /// Run the cycle. `prior` is usage already spent on this request
    /// (analysis, embedding, re-rank) and is folded into the estimate.
    pub async fn run(
        &self,
        llm: &dyn CompletionService,
        query: &str,
        sources: &[SearchResult],
        prior: TokenUsage,
    ) -> Result<MultiPassResult, PipelineError> {
        let started = Instant::now();
        let mut usage = TokenUsage::default();

        let initial = generate::draft(llm, query, sources, &mut usage)
            .await
            .map_err(PipelineError::generation)?;
        info!(
            citations = initial.citations.len(),
            confidence = initial.confidence_score,
            ms = initial.generation_time_ms,
            "draft generated"
        );

        let critique_started = Instant::now();
        let critique = self
            .critic
            .critique(llm, query, sources, &initial, &mut usage)
            .await;
        info!(
            overall = critique.overall_score,
            should_revise = critique.should_revise,
            ms = critique_started.elapsed().as_millis() as u64,
            "draft critiqued"
        );

        let (final_answer, outcome) = if critique.should_revise {
            match generate::revise(llm, query, sources, &initial, &critique, &mut usage).await {
                Ok(revised) => {
                    info!(
                        citations = revised.citations.len(),
                        ms = revised.generation_time_ms,
                        "answer revised"
                    );
                    (revised, PassOutcome::Revised)
                }
                Err(e) => {
                    let err = PipelineError::degraded(EnhancementStage::Revision, e);
                    warn!(error = %err, "keeping draft answer");
                    (initial.clone(), PassOutcome::Accepted)
                }
            }
        } else {
            (initial.clone(), PassOutcome::Accepted)
        };

        let was_revised = outcome == PassOutcome::Revised;
        info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "generation usage"
        );
        let mut total = prior;
        total.merge(&usage);
        Ok(MultiPassResult {
            initial_answer: initial,
            critique,
            final_answer,
            total_passes: if was_revised { 3 } else { 2 },
            was_revised,
            total_time_ms: started.elapsed().as_millis() as u64,
            cost_estimate: self.cost.estimate(&total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest};
    use crate::models::Chunk;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies in order; `None` entries fail.
    struct Script(Mutex<Vec<Option<&'static str>>>);

    impl Script {
        fn new(replies: Vec<Option<&'static str>>) -> Self {
            let mut replies = replies;
            replies.reverse();
            Self(Mutex::new(replies))
        }
    }

    #[async_trait]
    impl CompletionService for Script {
        fn model_name(&self) -> &str {
            "script"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            match self.0.lock().unwrap().pop().flatten() {
                Some(text) => Ok(Completion::text(text)),
                None => bail!("scripted failure"),
            }
        }
    }

    const DRAFT: &str = r#"{"answer": "Thirty days written notice is required to terminate.",
        "citations": [{"source": 1}], "confidence_score": 0.9, "reasoning": "direct"}"#;
    const REVISED: &str = r#"{"answer": "Either party may terminate with 30 days written notice.",
        "citations": [{"source": 1}], "confidence_score": 0.95, "reasoning": "revised"}"#;
    const LOW: &str = r#"{"is_accurate": true, "is_complete": false, "citation_quality": 0.7,
        "overall_score": 0.5, "suggested_improvements": ["quote the clause"]}"#;
    const HIGH: &str = r#"{"is_accurate": true, "is_complete": true, "citation_quality": 1.0,
        "overall_score": 0.9, "suggested_improvements": []}"#;

    fn sources() -> Vec<SearchResult> {
        vec![SearchResult {
            chunk: Chunk {
                id: "c1".into(),
                document_id: "d1".into(),
                content: "Either party may terminate with 30 days written notice.".into(),
                page: Some(3),
                ..Default::default()
            },
            vector_similarity: Some(0.8),
            lexical_rank: Some(1),
            combined_score: 0.016,
            reranked_score: None,
        }]
    }

    fn generator() -> MultiPassGenerator {
        MultiPassGenerator::new(0.8, CostModel::default())
    }

    #[tokio::test]
    async fn test_accepted_after_two_passes() {
        let llm = Script::new(vec![Some(DRAFT), Some(HIGH)]);
        let r = generator()
            .run(&llm, "q", &sources(), TokenUsage::default())
            .await
            .unwrap();
        assert_eq!(r.total_passes, 2);
        assert!(!r.was_revised);
        assert_eq!(r.final_answer.answer, r.initial_answer.answer);
    }

    #[tokio::test]
    async fn test_revised_after_three_passes() {
        let llm = Script::new(vec![Some(DRAFT), Some(LOW), Some(REVISED)]);
        let r = generator()
            .run(&llm, "q", &sources(), TokenUsage::default())
            .await
            .unwrap();
        assert_eq!(r.total_passes, 3);
        assert!(r.was_revised);
        assert!(r.final_answer.answer.contains("30 days"));
    }

    #[tokio::test]
    async fn test_revision_failure_keeps_draft_and_critique() {
        let llm = Script::new(vec![Some(DRAFT), Some(LOW), None]);
        let r = generator()
            .run(&llm, "q", &sources(), TokenUsage::default())
            .await
            .unwrap();
        assert_eq!(r.total_passes, 2);
        assert!(!r.was_revised);
        assert!(r.critique.should_revise);
        assert_eq!(r.final_answer.answer, r.initial_answer.answer);
    }

    #[tokio::test]
    async fn test_draft_failure_is_fatal() {
        let llm = Script::new(vec![None]);
        let err = generator()
            .run(&llm, "q", &sources(), TokenUsage::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_cost_grows_with_passes() {
        let two = generator()
            .run(&Script::new(vec![Some(DRAFT), Some(HIGH)]), "q", &sources(), TokenUsage::default())
            .await
            .unwrap();
        let three = generator()
            .run(
                &Script::new(vec![Some(DRAFT), Some(LOW), Some(REVISED)]),
                "q",
                &sources(),
                TokenUsage::default(),
            )
            .await
            .unwrap();
        assert!(three.cost_estimate.input_tokens > two.cost_estimate.input_tokens);
        assert!(three.cost_estimate.estimated_usd > two.cost_estimate.estimated_usd);
    }

    #[tokio::test]
    async fn test_prior_usage_is_folded_into_estimate() {
        let prior = TokenUsage {
            input_tokens: 500,
            output_tokens: 40,
            embedding_tokens: 12,
        };
        let fresh = generator()
            .run(&Script::new(vec![Some(DRAFT), Some(HIGH)]), "q", &sources(), TokenUsage::default())
            .await
            .unwrap();
        let carried = generator()
            .run(&Script::new(vec![Some(DRAFT), Some(HIGH)]), "q", &sources(), prior)
            .await
            .unwrap();
        assert_eq!(
            carried.cost_estimate.input_tokens,
            fresh.cost_estimate.input_tokens + 500
        );
        assert_eq!(
            carried.cost_estimate.output_tokens,
            fresh.cost_estimate.output_tokens + 40
        );
        assert_eq!(carried.cost_estimate.embedding_tokens, 12);
    }
}
