//! JSONL chunk import.
//!
//! Chunking and enrichment happen upstream; `docqa import` only loads the
//! finished chunks. Each line is one JSON object:
//!
//! ```json
//! {"document_id": "msa-2024", "content": "Either party may terminate...",
//!  "page": 12, "section": "Termination", "keywords": ["termination"]}
//! ```
//!
//! `id` defaults to a fresh UUID v4 and `chunk_index` to the line's position
//! within its document. Lines with an `embedding` array keep it; the rest
//! are embedded in batches when an embedding provider is configured.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use docqa_core::embedding::EmbeddingService;
use docqa_core::models::Chunk;

use crate::embedding::embed_in_batches;
use crate::sqlite_store::SqliteChunkStore;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub document_id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub chunk_index: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub semantic_category: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub chunks: usize,
    pub embedded: usize,
    pub without_vectors: usize,
}

/// Parse JSONL text into chunks. Errors name the offending line.
pub fn parse_records(text: &str) -> Result<Vec<Chunk>> {
    let mut next_index: HashMap<String, i64> = HashMap::new();
    let mut chunks = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid chunk record", line_no + 1))?;
        if record.document_id.trim().is_empty() {
            bail!("line {}: document_id must not be empty", line_no + 1);
        }
        if record.content.trim().is_empty() {
            bail!("line {}: content must not be empty", line_no + 1);
        }

        let counter = next_index.entry(record.document_id.clone()).or_insert(0);
        let chunk_index = record.chunk_index.unwrap_or(*counter);
        *counter = chunk_index + 1;

        chunks.push(Chunk {
            id: record
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            document_id: record.document_id,
            owner_id: record.owner_id,
            chunk_index,
            content: record.content,
            page: record.page,
            section: record.section,
            embedding: record.embedding,
            ai_summary: record.ai_summary,
            keywords: record.keywords,
            semantic_category: record.semantic_category,
        });
    }
    Ok(chunks)
}

/// Embed every chunk still lacking a vector. Returns how many were embedded.
pub async fn embed_missing(
    chunks: &mut [Chunk],
    embedder: &dyn EmbeddingService,
    batch_size: usize,
) -> Result<usize> {
    let pending: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = pending.iter().map(|&i| chunks[i].content.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, batch_size).await?;
    for (&i, vector) in pending.iter().zip(vectors) {
        chunks[i].embedding = Some(vector);
    }
    Ok(pending.len())
}

/// Load a JSONL file into the store.
pub async fn import_file(
    path: &Path,
    store: &SqliteChunkStore,
    embedder: Option<&dyn EmbeddingService>,
    batch_size: usize,
) -> Result<ImportStats> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut chunks = parse_records(&text).with_context(|| format!("parsing {}", path.display()))?;

    let (embedded, model) = match embedder {
        Some(embedder) => (
            embed_missing(&mut chunks, embedder, batch_size).await?,
            embedder.model_name().to_string(),
        ),
        None => (0, "external".to_string()),
    };

    store.upsert_chunks(&chunks, &model).await?;

    let stats = ImportStats {
        chunks: chunks.len(),
        embedded,
        without_vectors: chunks.iter().filter(|c| c.embedding.is_none()).count(),
    };
    tracing::info!(
        file = %path.display(),
        chunks = stats.chunks,
        embedded = stats.embedded,
        without_vectors = stats.without_vectors,
        "import complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[test]
    fn test_parse_assigns_ids_and_indices() {
        let text = r#"
{"document_id": "a", "content": "first"}
{"document_id": "b", "content": "other doc"}
{"document_id": "a", "content": "second", "page": 3}
"#;
        let chunks = parse_records(text).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 0);
        assert_eq!(chunks[2].chunk_index, 1);
        assert_eq!(chunks[2].page, Some(3));
        assert_ne!(chunks[0].id, chunks[2].id);
    }

    #[test]
    fn test_parse_error_names_line() {
        let text = "{\"document_id\": \"a\", \"content\": \"ok\"}\nnot json\n";
        let err = format!("{:#}", parse_records(text).unwrap_err());
        assert!(err.contains("line 2"), "{}", err);

        let empty = "{\"document_id\": \"a\", \"content\": \"  \"}";
        let err = format!("{:#}", parse_records(empty).unwrap_err());
        assert!(err.contains("content must not be empty"), "{}", err);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = "{\"document_id\": \"a\", \"content\": \"x\", \"pgae\": 1}";
        assert!(parse_records(text).is_err());
    }

    #[tokio::test]
    async fn test_embed_missing_keeps_supplied_vectors() {
        let text = r#"{"document_id": "a", "content": "given", "embedding": [1.0, 0.0]}
{"document_id": "a", "content": "needs a vector"}"#;
        let mut chunks = parse_records(text).unwrap();
        let embedded = embed_missing(&mut chunks, &HashingEmbedder::new(8), 16)
            .await
            .unwrap();
        assert_eq!(embedded, 1);
        assert_eq!(chunks[0].embedding.as_deref(), Some(&[1.0f32, 0.0][..]));
        assert_eq!(chunks[1].embedding.as_ref().map(|v| v.len()), Some(8));
    }
}
