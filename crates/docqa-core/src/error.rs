//! Error taxonomy for the answering pipeline.
//!
//! Mandatory stages (validation, retrieval, the first generation pass)
//! surface a [`PipelineError`] to the caller. Optional stages (analysis,
//! re-ranking, critique, revision) are caught at their boundary and replaced
//! with a safe default; [`PipelineError::DegradedEnhancement`] exists so
//! those events can be reported and logged uniformly.

use std::fmt;

/// Boxed cause preserved on every stage error.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Retrieval path that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    Embedding,
    Vector,
    Lexical,
}

impl fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalStage::Embedding => "embedding",
            RetrievalStage::Vector => "vector search",
            RetrievalStage::Lexical => "lexical search",
        })
    }
}

/// Optional stage whose failure is absorbed by a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementStage {
    Analysis,
    Rerank,
    Critique,
    Revision,
}

impl fmt::Display for EnhancementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnhancementStage::Analysis => "query analysis",
            EnhancementStage::Rerank => "re-ranking",
            EnhancementStage::Critique => "critique",
            EnhancementStage::Revision => "revision",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid query: {0}")]
    Validation(String),

    #[error("retrieval failed during {stage}: {source}")]
    Retrieval {
        stage: RetrievalStage,
        #[source]
        source: Cause,
    },

    #[error("answer generation failed: {source}")]
    Generation {
        #[source]
        source: Cause,
    },

    #[error("{stage} degraded: {source}")]
    DegradedEnhancement {
        stage: EnhancementStage,
        #[source]
        source: Cause,
    },
}

impl PipelineError {
    pub fn retrieval(stage: RetrievalStage, err: anyhow::Error) -> Self {
        PipelineError::Retrieval {
            stage,
            source: err.into(),
        }
    }

    pub fn generation(err: anyhow::Error) -> Self {
        PipelineError::Generation { source: err.into() }
    }

    pub fn degraded(stage: EnhancementStage, err: anyhow::Error) -> Self {
        PipelineError::DegradedEnhancement {
            stage,
            source: err.into(),
        }
    }

    /// Short machine-readable name of the failing stage.
    pub fn stage_name(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Retrieval { .. } => "retrieval",
            PipelineError::Generation { .. } => "generation",
            PipelineError::DegradedEnhancement { .. } => "enhancement",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_error_names_stage_and_cause() {
        let err = PipelineError::retrieval(
            RetrievalStage::Lexical,
            anyhow::anyhow!("fts index missing"),
        );
        let msg = err.to_string();
        assert!(msg.contains("lexical search"));
        assert!(msg.contains("fts index missing"));
        assert_eq!(err.stage_name(), "retrieval");
        assert!(std::error::Error::source(&err).is_some());
    }
}
