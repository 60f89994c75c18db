//! Wiring from a loaded [`Config`] to a ready [`Pipeline`].

use std::sync::Arc;

use anyhow::Result;

use docqa_core::{Pipeline, Services};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::create_llm;
use crate::sqlite_store::SqliteChunkStore;
use crate::{db, migrate};

/// Connect to the configured database and bring its schema up to date.
pub async fn open_store(config: &Config) -> Result<SqliteChunkStore> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteChunkStore::new(pool))
}

/// Build the answering pipeline with the configured store, embedder, and LLM.
pub async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let store = Arc::new(open_store(config).await?);
    let services = Services::new(
        create_embedder(&config.embedding)?,
        store.clone(),
        store,
        create_llm(&config.llm)?,
    );
    tracing::debug!(
        embedding = %services.embedder.model_name(),
        llm = %services.llm.model_name(),
        "pipeline ready"
    );
    Ok(Pipeline::new(services, config.pipeline_config()))
}
