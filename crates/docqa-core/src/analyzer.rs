//! Query analysis: classify a question and derive its retrieval strategy.
//!
//! The primary path asks the language model for a structured
//! classification. When that call fails or returns something that does not
//! fit the schema, a deterministic keyword classifier takes over. Either way
//! the result passes through [`QueryAnalyzer::finalize`], which guarantees
//! the strategy invariants downstream stages rely on:
//!
//! - `vector_weight + bm25_weight == 1.0`
//! - `min_chunks <= chunk_count <= max_chunks`
//! - `min_threshold <= confidence_threshold <= max_threshold`
//!
//! # Strategy table
//!
//! | type        | vector | bm25 | chunks | threshold |
//! |-------------|--------|------|--------|-----------|
//! | factual     | 0.5    | 0.5  | 8      | 0.75      |
//! | conceptual  | 0.8    | 0.2  | 12     | 0.65      |
//! | comparative | 0.6    | 0.4  | 15     | 0.60      |
//! | extractive  | 0.3    | 0.7  | 20     | 0.70      |

use tracing::{debug, warn};

use crate::cost::TokenUsage;
use crate::error::{EnhancementStage, PipelineError};
use crate::llm::CompletionService;
use crate::models::{DocumentContext, QueryAnalysis, QueryType};
use crate::prompts;
use crate::structured::{self, AnalysisReply};

const MAX_KEY_TERMS: usize = 8;

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been", "being",
    "between", "both", "but", "by", "can", "could", "did", "do", "does", "each", "either",
    "for", "from", "had", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its",
    "list", "may", "me", "might", "must", "my", "of", "on", "or", "our", "shall", "should",
    "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "to", "us", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
    "explain", "describe", "tell", "compare", "versus", "vs", "every", "give", "show",
    "please", "document",
];

const CONCEPTUAL_WORDS: &[&str] = &["explain", "why", "describe", "meaning", "purpose", "concept"];
const CONCEPTUAL_PHRASES: &[&str] = &["how does", "how do", "what does it mean"];
const COMPARATIVE_WORDS: &[&str] = &[
    "compare", "comparison", "versus", "vs", "differ", "difference", "differences", "contrast",
];
const EXTRACTIVE_WORDS: &[&str] = &["list", "all", "every", "enumerate", "extract", "itemize"];

const TEMPORAL_WORDS: &[&str] = &[
    "when", "date", "dates", "deadline", "before", "after", "during", "until", "since", "year",
    "years", "month", "months", "week", "weeks", "day", "days", "period", "expire", "expires",
    "expiration", "effective", "duration", "renewal", "january", "february", "march", "april",
    "june", "july", "august", "september", "october", "november", "december",
];
const EXACT_WORDS: &[&str] = &["exact", "exactly", "verbatim", "quote", "clause", "section"];
const CROSS_REF_WORDS: &[&str] = &[
    "relationship", "across", "between", "relate", "relates", "impact", "affect", "affects",
];

/// Bounds every [`QueryAnalysis`] is clamped into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisBounds {
    pub min_chunks: usize,
    pub max_chunks: usize,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

impl Default for AnalysisBounds {
    fn default() -> Self {
        Self {
            min_chunks: 5,
            max_chunks: 20,
            min_threshold: 0.3,
            max_threshold: 0.9,
        }
    }
}

impl AnalysisBounds {
    /// Bounds with each pair in ascending order and non-finite thresholds
    /// replaced by the defaults, so `clamp` never sees an inverted range.
    pub fn ordered(self) -> Self {
        let defaults = Self::default();
        let finite = |t: f64, fallback: f64| if t.is_finite() { t } else { fallback };
        let lo_t = finite(self.min_threshold, defaults.min_threshold);
        let hi_t = finite(self.max_threshold, defaults.max_threshold);
        Self {
            min_chunks: self.min_chunks.min(self.max_chunks),
            max_chunks: self.min_chunks.max(self.max_chunks),
            min_threshold: lo_t.min(hi_t),
            max_threshold: lo_t.max(hi_t),
        }
    }
}

/// Fixed strategy for a query type: `(vector_weight, bm25_weight, chunk_count, threshold)`.
pub fn strategy_for(query_type: QueryType) -> (f64, f64, usize, f64) {
    match query_type {
        QueryType::Factual => (0.5, 0.5, 8, 0.75),
        QueryType::Conceptual => (0.8, 0.2, 12, 0.65),
        QueryType::Comparative => (0.6, 0.4, 15, 0.60),
        QueryType::Extractive => (0.3, 0.7, 20, 0.70),
    }
}

/// Lowercased alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|t| t.trim_matches(|c: char| c == '-' || c == '\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Compact search keywords for lexical retrieval.
///
/// Drops stopwords and short tokens (numbers are kept), deduplicates in
/// order, and caps the list.
pub fn extract_key_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(query) {
        let numeric = token.chars().all(|c| c.is_ascii_digit());
        if !numeric && token.chars().count() < 3 {
            continue;
        }
        if STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if !terms.contains(&token) {
            terms.push(token);
        }
        if terms.len() == MAX_KEY_TERMS {
            break;
        }
    }
    terms
}

fn has_word(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|t| words.contains(&t.as_str()))
}

/// Deterministic keyword classifier.
pub fn classify(query: &str) -> QueryType {
    let lower = query.to_lowercase();
    let tokens = tokenize(&lower);
    if has_word(&tokens, CONCEPTUAL_WORDS) || CONCEPTUAL_PHRASES.iter().any(|p| lower.contains(p)) {
        QueryType::Conceptual
    } else if has_word(&tokens, COMPARATIVE_WORDS) {
        QueryType::Comparative
    } else if has_word(&tokens, EXTRACTIVE_WORDS) {
        QueryType::Extractive
    } else {
        QueryType::Factual
    }
}

fn detect_entities(query: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();

    let mut rest = query;
    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        match after.find('"') {
            Some(end) => {
                let quoted = after[..end].trim();
                if !quoted.is_empty() {
                    entities.push(quoted.to_string());
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }

    for (i, word) in query.split_whitespace().enumerate() {
        let clean = word.trim_matches(|c: char| !c.is_alphanumeric());
        let Some(first) = clean.chars().next() else {
            continue;
        };
        let acronym = clean.len() > 1 && clean.chars().all(|c| c.is_ascii_uppercase());
        if (i > 0 && first.is_uppercase()) || acronym {
            let owned = clean.to_string();
            if !entities.contains(&owned) {
                entities.push(owned);
            }
        }
    }
    entities
}

fn temporal_indicators(query: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for token in tokenize(query) {
        let year = token.len() == 4
            && token.chars().all(|c| c.is_ascii_digit())
            && (token.starts_with("19") || token.starts_with("20"));
        if (year || TEMPORAL_WORDS.contains(&token.as_str())) && !found.contains(&token) {
            found.push(token);
        }
    }
    found
}

/// Rule-based analysis used when the classifier call fails.
pub fn rule_based_analysis(query: &str) -> QueryAnalysis {
    let query_type = classify(query);
    let (vector_weight, bm25_weight, chunk_count, confidence_threshold) = strategy_for(query_type);
    let tokens = tokenize(query);
    let indicators = temporal_indicators(query);

    let requires_exact_match = query_type == QueryType::Extractive
        || query.contains('"')
        || query.chars().any(|c| c.is_ascii_digit())
        || has_word(&tokens, EXACT_WORDS);
    let needs_cross_reference =
        query_type == QueryType::Comparative || has_word(&tokens, CROSS_REF_WORDS);

    QueryAnalysis {
        query_type,
        requires_exact_match,
        temporal_context: !indicators.is_empty(),
        needs_cross_reference,
        vector_weight,
        bm25_weight,
        chunk_count,
        confidence_threshold,
        detected_entities: detect_entities(query),
        key_terms: extract_key_terms(query),
        temporal_indicators: indicators,
        reasoning: format!("rule-based classification as {}", query_type),
    }
}

fn from_reply(reply: AnalysisReply) -> Result<QueryAnalysis, anyhow::Error> {
    let query_type = QueryType::parse(&reply.query_type)
        .ok_or_else(|| anyhow::anyhow!("unknown query_type '{}'", reply.query_type))?;
    let (vw, bw, count, threshold) = strategy_for(query_type);

    let chunk_count = match reply.chunk_count {
        Some(c) if c.is_finite() => c.round().max(0.0) as usize,
        _ => count,
    };

    Ok(QueryAnalysis {
        query_type,
        requires_exact_match: reply.requires_exact_match,
        temporal_context: reply.temporal_context,
        needs_cross_reference: reply.needs_cross_reference,
        vector_weight: reply.vector_weight.unwrap_or(vw),
        bm25_weight: reply.bm25_weight.unwrap_or(bw),
        chunk_count,
        confidence_threshold: reply.confidence_threshold.unwrap_or(threshold),
        detected_entities: reply.detected_entities,
        key_terms: reply.key_terms,
        temporal_indicators: reply.temporal_indicators,
        reasoning: reply.reasoning,
    })
}

/// Query classifier with a deterministic fallback.
#[derive(Debug, Clone, Default)]
pub struct QueryAnalyzer {
    bounds: AnalysisBounds,
}

impl QueryAnalyzer {
    pub fn new(bounds: AnalysisBounds) -> Self {
        Self {
            bounds: bounds.ordered(),
        }
    }

    pub fn bounds(&self) -> &AnalysisBounds {
        &self.bounds
    }

    /// Analyze `query`. Never fails: classifier problems degrade to the
    /// rule-based path.
    pub async fn analyze(
        &self,
        llm: &dyn CompletionService,
        query: &str,
        context: Option<&DocumentContext>,
        usage: &mut TokenUsage,
    ) -> QueryAnalysis {
        let request = prompts::analysis(query, context);
        let raw = match llm.complete(&request).await {
            Ok(completion) => {
                usage.record_completion(&request, &completion);
                structured::parse::<AnalysisReply>(&completion.text).and_then(from_reply)
            }
            Err(e) => Err(e),
        };

        let analysis = match raw {
            Ok(a) => {
                debug!(query_type = %a.query_type, "classifier analysis accepted");
                a
            }
            Err(e) => {
                let err = PipelineError::degraded(EnhancementStage::Analysis, e);
                warn!(error = %err, "falling back to rule-based query analysis");
                rule_based_analysis(query)
            }
        };

        self.finalize(query, analysis)
    }

    /// Enforce strategy invariants regardless of where `analysis` came from.
    pub fn finalize(&self, query: &str, mut analysis: QueryAnalysis) -> QueryAnalysis {
        let (default_vw, default_bw, _, default_threshold) = strategy_for(analysis.query_type);

        let sanitize = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let vw = sanitize(analysis.vector_weight);
        let bw = sanitize(analysis.bm25_weight);
        let sum = vw + bw;
        if sum <= f64::EPSILON {
            let default_sum = default_vw + default_bw;
            analysis.vector_weight = default_vw / default_sum;
        } else {
            analysis.vector_weight = vw / sum;
        }
        analysis.bm25_weight = 1.0 - analysis.vector_weight;

        analysis.chunk_count = analysis
            .chunk_count
            .clamp(self.bounds.min_chunks, self.bounds.max_chunks);

        if !analysis.confidence_threshold.is_finite() {
            analysis.confidence_threshold = default_threshold;
        }
        analysis.confidence_threshold = analysis
            .confidence_threshold
            .clamp(self.bounds.min_threshold, self.bounds.max_threshold);

        let mut terms: Vec<String> = Vec::new();
        for term in analysis.key_terms.drain(..) {
            let t = term.trim().to_lowercase();
            if !t.is_empty() && !terms.contains(&t) {
                terms.push(t);
            }
        }
        terms.truncate(MAX_KEY_TERMS * 2);
        if terms.is_empty() {
            terms = extract_key_terms(query);
        }
        analysis.key_terms = terms;

        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct Scripted(Option<&'static str>);

    #[async_trait]
    impl CompletionService for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            match self.0 {
                Some(text) => Ok(Completion::text(text)),
                None => bail!("service unavailable"),
            }
        }
    }

    fn assert_invariants(a: &QueryAnalysis, bounds: &AnalysisBounds) {
        assert!((a.vector_weight + a.bm25_weight - 1.0).abs() < 1e-9);
        assert!(a.chunk_count >= bounds.min_chunks && a.chunk_count <= bounds.max_chunks);
        assert!(a.confidence_threshold >= bounds.min_threshold);
        assert!(a.confidence_threshold <= bounds.max_threshold);
    }

    #[test]
    fn test_classify_keywords() {
        assert_eq!(classify("Explain the indemnity clause"), QueryType::Conceptual);
        assert_eq!(classify("Why was the fee increased?"), QueryType::Conceptual);
        assert_eq!(classify("Compare plan A versus plan B"), QueryType::Comparative);
        assert_eq!(classify("List all obligations of the tenant"), QueryType::Extractive);
        assert_eq!(classify("What is the termination notice period?"), QueryType::Factual);
        assert_eq!(classify("Is installation allowed?"), QueryType::Factual);
    }

    #[test]
    fn test_key_terms_are_compact() {
        let terms = extract_key_terms("What is the termination notice period?");
        assert_eq!(terms, vec!["termination", "notice", "period"]);
        let terms = extract_key_terms("Is the fee 30 or 60 days?");
        assert_eq!(terms, vec!["fee", "30", "60", "days"]);
    }

    #[test]
    fn test_rule_based_flags() {
        let a = rule_based_analysis("When does the Acme lease expire in 2025?");
        assert!(a.temporal_context);
        assert!(a.temporal_indicators.contains(&"2025".to_string()));
        assert!(a.detected_entities.contains(&"Acme".to_string()));
        assert!(a.requires_exact_match);

        let b = rule_based_analysis("Compare the warranty versus the guarantee");
        assert!(b.needs_cross_reference);
    }

    #[test]
    fn test_finalize_renormalizes_and_clamps() {
        let analyzer = QueryAnalyzer::default();
        let mut raw = rule_based_analysis("what is x");
        raw.vector_weight = 3.0;
        raw.bm25_weight = 1.0;
        raw.chunk_count = 100;
        raw.confidence_threshold = 0.99;
        let a = analyzer.finalize("what is x", raw);
        assert!((a.vector_weight - 0.75).abs() < 1e-9);
        assert_invariants(&a, analyzer.bounds());
        assert_eq!(a.chunk_count, 20);
        assert_eq!(a.confidence_threshold, 0.9);
    }

    #[test]
    fn test_inverted_bounds_are_ordered() {
        let analyzer = QueryAnalyzer::new(AnalysisBounds {
            min_chunks: 20,
            max_chunks: 5,
            min_threshold: 0.9,
            max_threshold: f64::NAN,
        });
        assert_eq!(
            *analyzer.bounds(),
            AnalysisBounds {
                min_chunks: 5,
                max_chunks: 20,
                min_threshold: 0.9,
                max_threshold: 0.9,
            }
        );

        let mut raw = rule_based_analysis("what is x");
        raw.chunk_count = 60;
        raw.confidence_threshold = 0.1;
        let a = analyzer.finalize("what is x", raw);
        assert_eq!(a.chunk_count, 20);
        assert_eq!(a.confidence_threshold, 0.9);
    }

    #[test]
    fn test_finalize_handles_degenerate_weights() {
        let analyzer = QueryAnalyzer::default();
        let mut raw = rule_based_analysis("explain x");
        raw.vector_weight = f64::NAN;
        raw.bm25_weight = -2.0;
        raw.chunk_count = 0;
        raw.confidence_threshold = f64::INFINITY;
        let a = analyzer.finalize("explain x", raw);
        assert!((a.vector_weight - 0.8).abs() < 1e-9);
        assert_invariants(&a, analyzer.bounds());
        assert_eq!(a.chunk_count, 5);
    }

    #[tokio::test]
    async fn test_classifier_output_is_used_and_clamped() {
        let llm = Scripted(Some(
            r#"{"query_type": "extractive", "vector_weight": 0.2, "bm25_weight": 0.2,
                "chunk_count": 40, "confidence_threshold": 0.1,
                "key_terms": ["Payment", "schedule", "payment"], "reasoning": "lists"}"#,
        ));
        let analyzer = QueryAnalyzer::default();
        let mut usage = TokenUsage::default();
        let a = analyzer
            .analyze(&llm, "List every payment date", None, &mut usage)
            .await;
        assert_eq!(a.query_type, QueryType::Extractive);
        assert!((a.vector_weight - 0.5).abs() < 1e-9);
        assert_eq!(a.chunk_count, 20);
        assert_eq!(a.confidence_threshold, 0.3);
        assert_eq!(a.key_terms, vec!["payment", "schedule"]);
        assert!(usage.input_tokens > 0);
        assert_invariants(&a, analyzer.bounds());
    }

    #[tokio::test]
    async fn test_malformed_output_falls_back() {
        let llm = Scripted(Some(r#"{"query_type": "philosophical"}"#));
        let analyzer = QueryAnalyzer::default();
        let mut usage = TokenUsage::default();
        let a = analyzer
            .analyze(&llm, "Why is the sky blue?", None, &mut usage)
            .await;
        assert_eq!(a.query_type, QueryType::Conceptual);
        assert!(a.reasoning.starts_with("rule-based"));
    }

    #[tokio::test]
    async fn test_service_failure_falls_back() {
        let llm = Scripted(None);
        let analyzer = QueryAnalyzer::default();
        let mut usage = TokenUsage::default();
        let a = analyzer
            .analyze(&llm, "What is the termination notice period?", None, &mut usage)
            .await;
        assert_eq!(a.query_type, QueryType::Factual);
        assert_eq!(a.key_terms, vec!["termination", "notice", "period"]);
        assert_eq!(usage, TokenUsage::default());
        assert_invariants(&a, analyzer.bounds());
    }
}
