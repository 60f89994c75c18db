//! Second-pass relevance scoring over fused results.
//!
//! The judgment re-ranker asks the language model to score each of the top
//! `window` candidates for relevance, quality, and citability, then
//! combines those with the original fused score and a diversity bonus:
//!
//! ```text
//! final = 0.5·relevance + 0.25·quality + 0.15·citation + 0.10·fused + diversity
//! ```
//!
//! The diversity bonus rewards the first candidate seen from each page and
//! the first seen from each section (falling back to semantic category),
//! capped at a combined maximum. This counters fusion's habit of returning
//! several adjacent chunks of the same page.
//!
//! Re-ranking is an enhancement: on any call or schema failure the fused
//! ordering is returned untouched. [`heuristic_rerank`] is a cheaper
//! substitute that needs no external call.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cost::TokenUsage;
use crate::error::{EnhancementStage, PipelineError};
use crate::llm::CompletionService;
use crate::models::SearchResult;
use crate::prompts;
use crate::structured::{self, Judgment, RerankReply};

const W_RELEVANCE: f64 = 0.5;
const W_QUALITY: f64 = 0.25;
const W_CITATION: f64 = 0.15;
const W_FUSED: f64 = 0.10;

/// Which re-ranking algorithm runs after fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMode {
    #[default]
    Llm,
    Heuristic,
    Off,
}

impl std::str::FromStr for RerankMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(RerankMode::Llm),
            "heuristic" => Ok(RerankMode::Heuristic),
            "off" => Ok(RerankMode::Off),
            other => anyhow::bail!(
                "Unknown rerank mode: '{}'. Must be llm, heuristic, or off.",
                other
            ),
        }
    }
}

/// Diversity bonus amounts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityWeights {
    pub page_bonus: f64,
    pub section_bonus: f64,
    pub max_bonus: f64,
}

impl Default for DiversityWeights {
    fn default() -> Self {
        Self {
            page_bonus: 0.05,
            section_bonus: 0.05,
            max_bonus: 0.08,
        }
    }
}

/// Bonus per result, in input order.
pub fn diversity_bonuses(results: &[SearchResult], weights: &DiversityWeights) -> Vec<f64> {
    let mut pages: HashSet<(String, i64)> = HashSet::new();
    let mut sections: HashSet<(String, String)> = HashSet::new();

    results
        .iter()
        .map(|r| {
            let mut bonus = 0.0;
            if let Some(page) = r.chunk.page {
                if pages.insert((r.chunk.document_id.clone(), page)) {
                    bonus += weights.page_bonus;
                }
            }
            let section = r
                .chunk
                .section
                .as_ref()
                .or(r.chunk.semantic_category.as_ref());
            if let Some(section) = section {
                if sections.insert((r.chunk.document_id.clone(), section.to_lowercase())) {
                    bonus += weights.section_bonus;
                }
            }
            bonus.min(weights.max_bonus)
        })
        .collect()
}

/// Weighted combination of a judgment, the fused score, and the bonus.
pub fn judged_score(judgment: &Judgment, fused: f64, bonus: f64) -> f64 {
    W_RELEVANCE * judgment.relevance
        + W_QUALITY * judgment.quality
        + W_CITATION * judgment.citation
        + W_FUSED * fused
        + bonus
}

fn sort_by_reranked(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.effective_score()
            .partial_cmp(&a.effective_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Cheap deterministic re-ranker.
///
/// Scores each result by its fused score relative to the best one, plus a
/// boost for key-term overlap with content/summary/keywords, a boost for
/// carrying an AI summary, and the diversity bonus.
pub fn heuristic_rerank(
    mut results: Vec<SearchResult>,
    key_terms: &[String],
    weights: &DiversityWeights,
) -> Vec<SearchResult> {
    if results.is_empty() {
        return results;
    }
    let max_fused = results
        .iter()
        .map(|r| r.combined_score)
        .fold(f64::MIN, f64::max);
    let bonuses = diversity_bonuses(&results, weights);

    for (r, bonus) in results.iter_mut().zip(bonuses) {
        let base = if max_fused > 0.0 {
            r.combined_score / max_fused
        } else {
            0.0
        };
        let mut haystack = r.chunk.content.to_lowercase();
        if let Some(summary) = &r.chunk.ai_summary {
            haystack.push(' ');
            haystack.push_str(&summary.to_lowercase());
        }
        if let Some(keywords) = &r.chunk.keywords {
            haystack.push(' ');
            haystack.push_str(&keywords.join(" ").to_lowercase());
        }
        let overlap = if key_terms.is_empty() {
            0.0
        } else {
            key_terms
                .iter()
                .filter(|t| haystack.contains(t.to_lowercase().as_str()))
                .count() as f64
                / key_terms.len() as f64
        };
        let summary_boost = if r.chunk.ai_summary.is_some() { 0.1 } else { 0.0 };
        r.reranked_score = Some(0.6 * base + 0.3 * overlap + summary_boost + bonus);
    }

    sort_by_reranked(&mut results);
    results
}

/// Re-ranker configured with a mode, judgment window, and diversity weights.
#[derive(Debug, Clone)]
pub struct Reranker {
    pub mode: RerankMode,
    pub window: usize,
    pub diversity: DiversityWeights,
}

impl Default for Reranker {
    fn default() -> Self {
        Self {
            mode: RerankMode::Llm,
            window: 10,
            diversity: DiversityWeights::default(),
        }
    }
}

impl Reranker {
    /// Re-order `results`. Never fails; see module docs for fallbacks.
    pub async fn rerank(
        &self,
        llm: &dyn CompletionService,
        query: &str,
        key_terms: &[String],
        results: Vec<SearchResult>,
        usage: &mut TokenUsage,
    ) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }
        match self.mode {
            RerankMode::Off => results,
            RerankMode::Heuristic => heuristic_rerank(results, key_terms, &self.diversity),
            RerankMode::Llm => match self.judge(llm, query, &results, usage).await {
                Ok(reranked) => reranked,
                Err(e) => {
                    let err = PipelineError::degraded(EnhancementStage::Rerank, e);
                    warn!(error = %err, "keeping fused ordering");
                    results
                }
            },
        }
    }

    async fn judge(
        &self,
        llm: &dyn CompletionService,
        query: &str,
        results: &[SearchResult],
        usage: &mut TokenUsage,
    ) -> anyhow::Result<Vec<SearchResult>> {
        let window = self.window.clamp(1, results.len());
        let (head, tail) = results.split_at(window);

        let request = prompts::rerank(query, head);
        let completion = llm.complete(&request).await?;
        usage.record_completion(&request, &completion);
        let judgments = structured::parse::<RerankReply>(&completion.text)?.validate(head.len())?;

        let bonuses = diversity_bonuses(head, &self.diversity);
        let mut judged: Vec<SearchResult> = head.to_vec();
        for (i, r) in judged.iter_mut().enumerate() {
            let judgment = judgments
                .iter()
                .find(|j| j.index == i)
                .copied()
                .unwrap_or(Judgment {
                    index: i,
                    relevance: 0.0,
                    quality: 0.0,
                    citation: 0.0,
                });
            r.reranked_score = Some(judged_score(&judgment, r.combined_score, bonuses[i]));
        }
        sort_by_reranked(&mut judged);

        info!(
            judged = judgments.len(),
            window,
            passthrough = tail.len(),
            "re-ranked candidates"
        );

        judged.extend(tail.iter().cloned());
        Ok(judged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest};
    use crate::models::Chunk;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct Scripted(Option<String>);

    #[async_trait]
    impl CompletionService for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            match &self.0 {
                Some(text) => Ok(Completion::text(text.clone())),
                None => bail!("judge unavailable"),
            }
        }
    }

    fn result(id: &str, page: Option<i64>, section: Option<&str>, fused: f64) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: id.into(),
                document_id: "d1".into(),
                content: format!("content of {}", id),
                page,
                section: section.map(String::from),
                ..Default::default()
            },
            vector_similarity: None,
            lexical_rank: None,
            combined_score: fused,
            reranked_score: None,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_diversity_bonus_first_per_page_and_section() {
        let results = vec![
            result("a", Some(1), Some("Terms"), 0.03),
            result("b", Some(1), Some("Terms"), 0.02),
            result("c", Some(2), Some("Terms"), 0.01),
            result("d", Some(3), Some("Fees"), 0.01),
        ];
        let b = diversity_bonuses(&results, &DiversityWeights::default());
        assert!((b[0] - 0.08).abs() < 1e-9);
        assert_eq!(b[1], 0.0);
        assert!((b[2] - 0.05).abs() < 1e-9);
        assert!((b[3] - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_judged_score_formula() {
        let j = Judgment {
            index: 0,
            relevance: 1.0,
            quality: 0.8,
            citation: 0.6,
        };
        let s = judged_score(&j, 0.5, 0.05);
        assert!((s - (0.5 + 0.2 + 0.09 + 0.05 + 0.05)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_llm_rerank_reorders_window_and_keeps_tail() {
        let results = vec![
            result("a", Some(1), None, 0.03),
            result("b", Some(2), None, 0.02),
            result("c", Some(3), None, 0.01),
        ];
        let llm = Scripted(Some(
            r#"{"rankings": [
                {"index": 1, "relevance": 0.2, "quality": 0.5, "citation": 0.5},
                {"index": 2, "relevance": 0.95, "quality": 0.9, "citation": 0.9}
            ]}"#
            .to_string(),
        ));
        let reranker = Reranker {
            window: 2,
            ..Default::default()
        };
        let mut usage = TokenUsage::default();
        let out = reranker
            .rerank(&llm, "q", &[], results, &mut usage)
            .await;
        assert_eq!(ids(&out), vec!["b", "a", "c"]);
        assert!(out[0].reranked_score.is_some());
        assert!(out[2].reranked_score.is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_fused_order() {
        let results = vec![result("a", None, None, 0.03), result("b", None, None, 0.02)];
        let reranker = Reranker::default();
        let mut usage = TokenUsage::default();

        let out = reranker
            .rerank(&Scripted(None), "q", &[], results.clone(), &mut usage)
            .await;
        assert_eq!(ids(&out), vec!["a", "b"]);
        assert!(out.iter().all(|r| r.reranked_score.is_none()));

        let out = reranker
            .rerank(&Scripted(Some("not json".into())), "q", &[], results, &mut usage)
            .await;
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_heuristic_prefers_term_overlap_and_summary() {
        let mut a = result("a", None, None, 0.02);
        a.chunk.content = "general provisions".into();
        let mut b = result("b", None, None, 0.019);
        b.chunk.content = "termination requires thirty days notice".into();
        b.chunk.ai_summary = Some("termination notice".into());
        let out = heuristic_rerank(
            vec![a, b],
            &["termination".into(), "notice".into()],
            &DiversityWeights::default(),
        );
        assert_eq!(ids(&out), vec!["b", "a"]);
    }

    #[test]
    fn test_rerank_mode_from_str() {
        assert_eq!("heuristic".parse::<RerankMode>().unwrap(), RerankMode::Heuristic);
        assert!("fancy".parse::<RerankMode>().is_err());
    }
}
