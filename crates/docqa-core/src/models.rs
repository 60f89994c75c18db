//! Core data models used throughout docqa.
//!
//! These types represent the chunks, scored candidates, strategies, and
//! answers that flow through a single pipeline invocation. Only [`Chunk`]
//! outlives a request; it is owned by the ingestion collaborator and is
//! read-only here.

use serde::{Deserialize, Serialize};

/// Explicit search scope carried by every backend call.
///
/// Backends must never fall back to ambient session state: a `None` field
/// means "unrestricted on this axis", not "whatever the caller last used".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchScope {
    /// Restrict results to chunks of this document.
    pub document_id: Option<String>,
    /// Restrict results to chunks owned by this principal.
    pub owner_id: Option<String>,
}

impl SearchScope {
    pub fn new(document_id: Option<String>, owner_id: Option<String>) -> Self {
        Self {
            document_id,
            owner_id,
        }
    }

    /// Returns `true` when a chunk with the given ids falls inside this scope.
    pub fn admits(&self, document_id: &str, owner_id: Option<&str>) -> bool {
        if let Some(doc) = &self.document_id {
            if doc != document_id {
                return false;
            }
        }
        if let Some(owner) = &self.owner_id {
            if owner_id != Some(owner.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A contiguous excerpt of a source document with position metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub chunk_index: i64,
    pub content: String,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub semantic_category: Option<String>,
}

impl Chunk {
    /// Merge enrichment fields from `other`, keeping our non-null values.
    pub fn merge_missing(&mut self, other: &Chunk) {
        if self.page.is_none() {
            self.page = other.page;
        }
        if self.section.is_none() {
            self.section = other.section.clone();
        }
        if self.ai_summary.is_none() {
            self.ai_summary = other.ai_summary.clone();
        }
        if self.keywords.is_none() {
            self.keywords = other.keywords.clone();
        }
        if self.semantic_category.is_none() {
            self.semantic_category = other.semantic_category.clone();
        }
        if self.owner_id.is_none() {
            self.owner_id = other.owner_id.clone();
        }
        if self.embedding.is_none() {
            self.embedding = other.embedding.clone();
        }
    }
}

/// A single hit returned by a vector or lexical backend.
///
/// `score` is backend-specific: cosine similarity for vector search, a
/// higher-is-better relevance value (e.g. negated BM25 rank) for lexical.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk: Chunk,
    pub score: f64,
}

/// A scored candidate shared by fusion and re-ranking.
///
/// Fusion fills `vector_similarity`, `lexical_rank`, and `combined_score`;
/// the re-ranker only ever writes `reranked_score`. Either stage can be
/// swapped without touching the other.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity from the vector backend, if the chunk was found there.
    pub vector_similarity: Option<f64>,
    /// 1-based position in the lexical result list, if present there.
    pub lexical_rank: Option<usize>,
    /// Weighted reciprocal rank fusion score.
    pub combined_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranked_score: Option<f64>,
}

impl SearchResult {
    /// The score that currently orders this result.
    pub fn effective_score(&self) -> f64 {
        self.reranked_score.unwrap_or(self.combined_score)
    }
}

/// Coarse query classes that drive retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Factual,
    Conceptual,
    Comparative,
    Extractive,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Conceptual => "conceptual",
            QueryType::Comparative => "comparative",
            QueryType::Extractive => "extractive",
        }
    }

    /// Lenient parse used on classifier output.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "factual" => Some(QueryType::Factual),
            "conceptual" => Some(QueryType::Conceptual),
            "comparative" => Some(QueryType::Comparative),
            "extractive" => Some(QueryType::Extractive),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional description of the document being queried, fed to the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentContext {
    pub document_type: Option<String>,
    pub complexity: Option<String>,
    #[serde(default)]
    pub key_entities: Vec<String>,
}

/// Search and generation strategy derived for one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub requires_exact_match: bool,
    pub temporal_context: bool,
    pub needs_cross_reference: bool,
    pub vector_weight: f64,
    pub bm25_weight: f64,
    pub chunk_count: usize,
    pub confidence_threshold: f64,
    pub detected_entities: Vec<String>,
    pub key_terms: Vec<String>,
    pub temporal_indicators: Vec<String>,
    pub reasoning: String,
}

/// A structured link between the answer and one source chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub excerpt: String,
    pub page: Option<i64>,
    pub relevance: f64,
}

/// One generated answer (Pass 1 or Pass 3).
#[derive(Debug, Clone, Serialize)]
pub struct AnswerGeneration {
    pub answer: String,
    pub confidence_score: f64,
    pub citations: Vec<Citation>,
    pub reasoning: String,
    pub sources_used: usize,
    pub generation_time_ms: u64,
}

/// The critic's evaluation of a draft answer.
#[derive(Debug, Clone, Serialize)]
pub struct SelfCritique {
    pub is_accurate: bool,
    pub is_complete: bool,
    pub citation_quality: f64,
    pub suggested_improvements: Vec<String>,
    pub overall_score: f64,
    pub should_revise: bool,
    pub critique_reasoning: String,
}

/// Static, token-count-based cost estimate. Not a metered figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub embedding_tokens: u64,
    pub estimated_usd: f64,
}

/// Outcome of the draft → critique → (revise) cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MultiPassResult {
    pub initial_answer: AnswerGeneration,
    pub critique: SelfCritique,
    pub final_answer: AnswerGeneration,
    pub total_passes: u8,
    pub was_revised: bool,
    pub total_time_ms: u64,
    pub cost_estimate: CostEstimate,
}

/// Input to [`Pipeline::answer`](crate::pipeline::Pipeline::answer) and
/// [`Pipeline::search`](crate::pipeline::Pipeline::search).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub document_context: Option<DocumentContext>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn scope(&self) -> SearchScope {
        SearchScope::new(self.document_id.clone(), self.owner_id.clone())
    }
}

/// Observability block attached to every answer.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub query_type: QueryType,
    pub sources_searched: usize,
    pub sources_used: usize,
    pub was_revised: bool,
    pub total_passes: u8,
    pub processing_time_ms: u64,
    pub cost_estimate: CostEstimate,
}

/// The complete answer object returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub confidence_score: f64,
    pub citations: Vec<Citation>,
    pub reasoning: String,
    pub metadata: ResponseMetadata,
    /// Critique of the initial draft, absent on the empty-result path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<SelfCritique>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_admits() {
        let open = SearchScope::default();
        assert!(open.admits("d1", None));

        let doc = SearchScope::new(Some("d1".into()), None);
        assert!(doc.admits("d1", Some("u1")));
        assert!(!doc.admits("d2", Some("u1")));

        let owner = SearchScope::new(None, Some("u1".into()));
        assert!(owner.admits("d9", Some("u1")));
        assert!(!owner.admits("d9", Some("u2")));
        assert!(!owner.admits("d9", None));
    }

    #[test]
    fn test_merge_missing_prefers_existing() {
        let mut a = Chunk {
            id: "c1".into(),
            document_id: "d1".into(),
            content: "text".into(),
            page: Some(3),
            ..Default::default()
        };
        let b = Chunk {
            id: "c1".into(),
            document_id: "d1".into(),
            content: "text".into(),
            page: Some(9),
            ai_summary: Some("summary".into()),
            ..Default::default()
        };
        a.merge_missing(&b);
        assert_eq!(a.page, Some(3));
        assert_eq!(a.ai_summary.as_deref(), Some("summary"));
    }

    #[test]
    fn test_query_type_parse() {
        assert_eq!(QueryType::parse(" Comparative "), Some(QueryType::Comparative));
        assert_eq!(QueryType::parse("other"), None);
    }
}
