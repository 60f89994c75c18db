//! Grounded answer generation (the draft and revision passes).
//!
//! Both passes share one reply contract: answer text, citations by 1-based
//! source number, a confidence score, and reasoning. Citation references
//! are resolved against the exact slice of sources passed into the call;
//! anything that does not resolve is dropped, so every returned
//! [`Citation`] names a chunk the model was actually shown.

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Result;
use tracing::debug;

use crate::cost::TokenUsage;
use crate::llm::{CompletionRequest, CompletionService};
use crate::models::{AnswerGeneration, Citation, SearchResult, SelfCritique};
use crate::prompts;
use crate::structured::{self, resolve_source_index, CitationItem, GenerationReply};

const DEFAULT_EXCERPT_CHARS: usize = 200;

/// Map reply citations onto source chunks, dropping unresolvable and
/// repeated references.
pub fn resolve_citations(items: &[CitationItem], sources: &[SearchResult]) -> Vec<Citation> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut out = Vec::new();

    for item in items {
        let Some(index) = resolve_source_index(&item.source, sources.len()) else {
            debug!(source = %item.source, "dropping unresolvable citation");
            continue;
        };
        if !seen.insert(index) {
            continue;
        }
        let chunk = &sources[index].chunk;
        let excerpt = item
            .excerpt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| chunk.content.chars().take(DEFAULT_EXCERPT_CHARS).collect());
        let relevance = item
            .relevance
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 1.0))
            .unwrap_or_else(|| sources[index].effective_score().clamp(0.0, 1.0));

        out.push(Citation {
            chunk_id: chunk.id.clone(),
            excerpt,
            page: chunk.page,
            relevance,
        });
    }
    out
}

async fn run(
    llm: &dyn CompletionService,
    request: CompletionRequest,
    sources: &[SearchResult],
    usage: &mut TokenUsage,
) -> Result<AnswerGeneration> {
    let started = Instant::now();
    let completion = llm.complete(&request).await?;
    usage.record_completion(&request, &completion);

    let reply = structured::parse::<GenerationReply>(&completion.text)?.validate()?;
    let citations = resolve_citations(&reply.citations, sources);
    let sources_used = citations.len();

    Ok(AnswerGeneration {
        answer: reply.answer.trim().to_string(),
        confidence_score: reply.confidence_score,
        citations,
        reasoning: reply.reasoning,
        sources_used,
        generation_time_ms: started.elapsed().as_millis() as u64,
    })
}

/// Pass 1: draft an answer from `sources`.
pub async fn draft(
    llm: &dyn CompletionService,
    query: &str,
    sources: &[SearchResult],
    usage: &mut TokenUsage,
) -> Result<AnswerGeneration> {
    run(llm, prompts::generation(query, sources), sources, usage).await
}

/// Pass 3: regenerate using the critic's directives.
pub async fn revise(
    llm: &dyn CompletionService,
    query: &str,
    sources: &[SearchResult],
    previous: &AnswerGeneration,
    critique: &SelfCritique,
    usage: &mut TokenUsage,
) -> Result<AnswerGeneration> {
    let request = prompts::revision(query, sources, previous, critique);
    run(llm, request, sources, usage).await
}
