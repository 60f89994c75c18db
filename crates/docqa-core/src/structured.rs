//! Structured-output parsing for language-model replies.
//!
//! Every call site has its own schema type. Replies are extracted from
//! surrounding prose or code fences, deserialized, then validated and
//! coerced (scores clamped to `[0, 1]`, indices resolved). Any violation is
//! an `Err`, which callers map to their typed fallback.

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Pull the first top-level JSON object out of `text`.
///
/// Tolerates markdown code fences and leading/trailing commentary.
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Ok(v);
        }
    }

    let start = trimmed
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in model output"))?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| anyhow!("unterminated JSON object in model output"))?;
    if end <= start {
        bail!("no JSON object in model output");
    }

    let value: Value = serde_json::from_str(&trimmed[start..=end])
        .context("model output is not valid JSON")?;
    if !value.is_object() {
        bail!("model output JSON is not an object");
    }
    Ok(value)
}

/// Extract and deserialize a reply into schema `T`.
pub fn parse<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = extract_json(text)?;
    serde_json::from_value(value).context("model output does not match the expected schema")
}

/// Validate a score: must be finite, then clamped to `[0, 1]`.
pub fn unit(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        bail!("{} is not a finite number", name);
    }
    Ok(value.clamp(0.0, 1.0))
}

/// Resolve a 1-based source reference (`2`, `"2"`, `"[2]"`, `"Source 2"`)
/// to a 0-based index below `len`. Returns `None` if it does not resolve.
pub fn resolve_source_index(value: &Value, len: usize) -> Option<usize> {
    let n = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        })?,
        Value::String(s) => {
            let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse::<u64>().ok()?
        }
        _ => return None,
    };
    let n = usize::try_from(n).ok()?;
    (n >= 1 && n <= len).then(|| n - 1)
}

// ============ Query analysis ============

#[derive(Debug, Deserialize)]
pub struct AnalysisReply {
    pub query_type: String,
    #[serde(default)]
    pub requires_exact_match: bool,
    #[serde(default)]
    pub temporal_context: bool,
    #[serde(default)]
    pub needs_cross_reference: bool,
    pub vector_weight: Option<f64>,
    pub bm25_weight: Option<f64>,
    pub chunk_count: Option<f64>,
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub detected_entities: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub temporal_indicators: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

// ============ Re-ranking ============

#[derive(Debug, Deserialize)]
pub struct RerankReply {
    #[serde(alias = "scores", alias = "results")]
    pub rankings: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
pub struct RerankItem {
    /// 1-based candidate reference.
    #[serde(alias = "source", alias = "id")]
    pub index: Value,
    pub relevance: f64,
    #[serde(default)]
    pub quality: f64,
    #[serde(default, alias = "citability")]
    pub citation: f64,
}

/// Validated per-candidate judgment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Judgment {
    pub index: usize,
    pub relevance: f64,
    pub quality: f64,
    pub citation: f64,
}

impl RerankReply {
    /// Validate against `len` candidates. Fails when nothing resolves.
    pub fn validate(self, len: usize) -> Result<Vec<Judgment>> {
        let mut out: Vec<Judgment> = Vec::with_capacity(self.rankings.len());
        for item in self.rankings {
            let Some(index) = resolve_source_index(&item.index, len) else {
                continue;
            };
            if out.iter().any(|j| j.index == index) {
                continue;
            }
            out.push(Judgment {
                index,
                relevance: unit("relevance", item.relevance)?,
                quality: unit("quality", item.quality)?,
                citation: unit("citation", item.citation)?,
            });
        }
        if out.is_empty() {
            bail!("re-rank reply scored no known candidates");
        }
        Ok(out)
    }
}

// ============ Generation ============

#[derive(Debug, Deserialize)]
pub struct GenerationReply {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<CitationItem>,
    #[serde(alias = "confidence")]
    pub confidence_score: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
pub struct CitationItem {
    #[serde(alias = "source_index", alias = "index")]
    pub source: Value,
    #[serde(default, alias = "rationale")]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub relevance: Option<f64>,
}

impl GenerationReply {
    pub fn validate(mut self) -> Result<Self> {
        if self.answer.trim().is_empty() {
            bail!("generation reply has an empty answer");
        }
        self.confidence_score = unit("confidence_score", self.confidence_score)?;
        Ok(self)
    }
}

// ============ Critique ============

#[derive(Debug, Deserialize)]
pub struct CritiqueReply {
    pub is_accurate: bool,
    pub is_complete: bool,
    pub citation_quality: f64,
    pub overall_score: f64,
    #[serde(default)]
    pub suggested_improvements: Vec<String>,
    #[serde(default, alias = "reasoning")]
    pub critique_reasoning: String,
}

impl CritiqueReply {
    pub fn validate(mut self) -> Result<Self> {
        self.citation_quality = unit("citation_quality", self.citation_quality)?;
        self.overall_score = unit("overall_score", self.overall_score)?;
        self.suggested_improvements = self
            .suggested_improvements
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(3)
            .collect();
        Ok(self)
    }
}
