//! Externally injected service context.
//!
//! [`Services`] bundles every external collaborator the pipeline talks to.
//! It is constructed once by the host application and passed explicitly
//! into each stage, so tests can substitute fakes for any of them.

use std::sync::Arc;

use crate::embedding::EmbeddingService;
use crate::llm::CompletionService;
use crate::store::{LexicalBackend, VectorBackend};

#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn EmbeddingService>,
    pub vectors: Arc<dyn VectorBackend>,
    pub lexical: Arc<dyn LexicalBackend>,
    pub llm: Arc<dyn CompletionService>,
}

impl Services {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        vectors: Arc<dyn VectorBackend>,
        lexical: Arc<dyn LexicalBackend>,
        llm: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            lexical,
            llm,
        }
    }
}
