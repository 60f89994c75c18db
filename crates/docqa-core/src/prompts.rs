//! Prompt construction for every language-model call site.
//!
//! Each builder pairs a system prompt stating the JSON contract with a user
//! prompt carrying the data. Sources are always numbered from 1 in the
//! order they are passed, and replies refer to them by that number.

use std::fmt::Write;

use crate::llm::CompletionRequest;
use crate::models::{AnswerGeneration, DocumentContext, SearchResult, SelfCritique};

const MAX_SOURCE_CHARS: usize = 1500;
const MAX_RERANK_CHARS: usize = 600;

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Render numbered sources with page/section labels.
pub fn format_sources(results: &[SearchResult], max_chars: usize) -> String {
    let mut out = String::new();
    for (i, r) in results.iter().enumerate() {
        let _ = write!(out, "[{}]", i + 1);
        if let Some(page) = r.chunk.page {
            let _ = write!(out, " (page {})", page);
        }
        if let Some(section) = &r.chunk.section {
            let _ = write!(out, " [{}]", section);
        }
        out.push('\n');
        out.push_str(&truncate_chars(&r.chunk.content, max_chars));
        out.push_str("\n\n");
    }
    out
}

pub fn analysis(query: &str, context: Option<&DocumentContext>) -> CompletionRequest {
    let system = "You classify questions asked about a document and choose a retrieval \
strategy. Respond with a single JSON object and nothing else, with keys: \
query_type (one of \"factual\", \"conceptual\", \"comparative\", \"extractive\"), \
requires_exact_match (bool), temporal_context (bool), needs_cross_reference (bool), \
vector_weight (0-1), bm25_weight (0-1, the two weights sum to 1), \
chunk_count (integer 5-20), confidence_threshold (0-1), \
detected_entities (array of strings), key_terms (array of 2-8 short search keywords, \
not the full question), temporal_indicators (array of strings), reasoning (string).";

    let mut prompt = String::new();
    if let Some(ctx) = context {
        if let Some(kind) = &ctx.document_type {
            let _ = writeln!(prompt, "Document type: {}", kind);
        }
        if let Some(complexity) = &ctx.complexity {
            let _ = writeln!(prompt, "Document complexity: {}", complexity);
        }
        if !ctx.key_entities.is_empty() {
            let _ = writeln!(prompt, "Key entities: {}", ctx.key_entities.join(", "));
        }
    }
    let _ = write!(prompt, "Question: {}", query);

    CompletionRequest::json(system, prompt).with_temperature(0.0)
}

pub fn rerank(query: &str, candidates: &[SearchResult]) -> CompletionRequest {
    let system = "You judge how well document excerpts support answering a question. \
Score each excerpt independently. Respond with a single JSON object and nothing else: \
{\"rankings\": [{\"index\": <source number>, \"relevance\": 0-1, \"quality\": 0-1, \
\"citation\": 0-1}]}. relevance: how directly it answers the question. quality: how \
clear and self-contained it is. citation: how suitable it is to quote as evidence.";

    let prompt = format!(
        "Question: {}\n\nExcerpts:\n{}",
        query,
        format_sources(candidates, MAX_RERANK_CHARS)
    );
    CompletionRequest::json(system, prompt).with_temperature(0.0)
}

const GENERATION_SYSTEM: &str = "You answer questions strictly from the numbered sources \
provided. Never use outside knowledge. If the sources do not contain the answer, say so \
and give a low confidence. Respond with a single JSON object and nothing else, with keys: \
answer (string), citations (array of {\"source\": <source number>, \"excerpt\": <short \
quote from that source>, \"relevance\": 0-1}), confidence_score (0-1), reasoning (string). \
Cite every source you rely on by its number.";

pub fn generation(query: &str, sources: &[SearchResult]) -> CompletionRequest {
    let prompt = format!(
        "Sources:\n{}\nQuestion: {}",
        format_sources(sources, MAX_SOURCE_CHARS),
        query
    );
    CompletionRequest::json(GENERATION_SYSTEM, prompt)
}

pub fn revision(
    query: &str,
    sources: &[SearchResult],
    draft: &AnswerGeneration,
    critique: &SelfCritique,
) -> CompletionRequest {
    let mut prompt = format!(
        "Sources:\n{}\nQuestion: {}\n\nPrevious answer:\n{}\n\nReviewer feedback:\n",
        format_sources(sources, MAX_SOURCE_CHARS),
        query,
        draft.answer
    );
    for item in &critique.suggested_improvements {
        let _ = writeln!(prompt, "- {}", item);
    }
    if !critique.critique_reasoning.is_empty() {
        let _ = writeln!(prompt, "Reviewer notes: {}", critique.critique_reasoning);
    }
    prompt.push_str("\nWrite an improved answer that addresses the feedback.");
    CompletionRequest::json(GENERATION_SYSTEM, prompt)
}

pub fn critique(query: &str, sources: &[SearchResult], draft: &AnswerGeneration) -> CompletionRequest {
    let system = "You review an answer that was generated from numbered sources. Check \
that every claim is supported by the sources, that the question is fully answered, and \
that citations point at the right sources. Respond with a single JSON object and nothing \
else, with keys: is_accurate (bool), is_complete (bool), citation_quality (0-1), \
overall_score (0-1), suggested_improvements (array of 1-3 concrete instructions), \
critique_reasoning (string).";

    let mut cited = String::new();
    for c in &draft.citations {
        let _ = writeln!(cited, "- chunk {}: \"{}\"", c.chunk_id, c.excerpt);
    }
    let prompt = format!(
        "Sources:\n{}\nQuestion: {}\n\nAnswer:\n{}\n\nCitations:\n{}\nStated confidence: {:.2}",
        format_sources(sources, MAX_SOURCE_CHARS),
        query,
        draft.answer,
        if cited.is_empty() { "(none)\n".to_string() } else { cited },
        draft.confidence_score
    );
    CompletionRequest::json(system, prompt).with_temperature(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    #[test]
    fn test_format_sources_numbers_from_one() {
        let results = vec![SearchResult {
            chunk: Chunk {
                id: "c1".into(),
                document_id: "d1".into(),
                content: "alpha".into(),
                page: Some(4),
                section: Some("Terms".into()),
                ..Default::default()
            },
            vector_similarity: None,
            lexical_rank: Some(1),
            combined_score: 0.01,
            reranked_score: None,
        }];
        let text = format_sources(&results, 100);
        assert!(text.starts_with("[1] (page 4) [Terms]\nalpha"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
