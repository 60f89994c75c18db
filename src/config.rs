//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/docqa.sqlite"
//! ```
//!
//! [`load_config`] validates the parsed file and names the offending key in
//! every error. [`Config::pipeline_config`] maps the file onto the core
//! crate's [`PipelineConfig`], which knows nothing about TOML.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docqa_core::analyzer::AnalysisBounds;
use docqa_core::cost::CostModel;
use docqa_core::rerank::{DiversityWeights, RerankMode, Reranker};
use docqa_core::search::SearchParams;
use docqa_core::PipelineConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cost: CostModel,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_threshold_ceiling")]
    pub threshold_ceiling: f64,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,
    #[serde(default = "default_max_threshold")]
    pub max_threshold: f64,
    #[serde(default = "default_min_chunks")]
    pub min_chunks: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_dedup_prefix_chars")]
    pub dedup_prefix_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            overfetch_factor: default_overfetch_factor(),
            threshold_ceiling: default_threshold_ceiling(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
            min_chunks: default_min_chunks(),
            max_chunks: default_max_chunks(),
            dedup_prefix_chars: default_dedup_prefix_chars(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_overfetch_factor() -> usize {
    2
}
fn default_threshold_ceiling() -> f64 {
    0.35
}
fn default_min_threshold() -> f64 {
    0.3
}
fn default_max_threshold() -> f64 {
    0.9
}
fn default_min_chunks() -> usize {
    5
}
fn default_max_chunks() -> usize {
    20
}
fn default_dedup_prefix_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub mode: RerankMode,
    #[serde(default = "default_rerank_window")]
    pub window: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            mode: RerankMode::default(),
            window: default_rerank_window(),
        }
    }
}

fn default_rerank_window() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_revision_threshold")]
    pub revision_threshold: f64,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            revision_threshold: default_revision_threshold(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

fn default_top_n() -> usize {
    8
}
fn default_revision_threshold() -> f64 {
    0.8
}
fn default_max_query_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the provider (Ollama default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL. OpenAI-compatible default `https://api.openai.com/v1`,
    /// Ollama default `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Overrides the per-call-site sampling temperature when set.
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
            temperature: None,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Core pipeline settings derived from this file.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            search: SearchParams {
                rrf_k: self.retrieval.rrf_k,
                overfetch_factor: self.retrieval.overfetch_factor,
                dedup_prefix_chars: self.retrieval.dedup_prefix_chars,
            },
            threshold_ceiling: self.retrieval.threshold_ceiling,
            bounds: AnalysisBounds {
                min_chunks: self.retrieval.min_chunks,
                max_chunks: self.retrieval.max_chunks,
                min_threshold: self.retrieval.min_threshold,
                max_threshold: self.retrieval.max_threshold,
            },
            reranker: Reranker {
                mode: self.rerank.mode,
                window: self.rerank.window,
                diversity: DiversityWeights::default(),
            },
            top_n: self.generation.top_n,
            revision_threshold: self.generation.revision_threshold,
            max_query_chars: self.generation.max_query_chars,
            cost: self.cost,
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.rrf_k.is_nan() || r.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    if r.overfetch_factor == 0 {
        bail!("retrieval.overfetch_factor must be >= 1");
    }
    if r.threshold_ceiling.is_nan() || r.threshold_ceiling <= 0.0 || r.threshold_ceiling > 1.0 {
        bail!("retrieval.threshold_ceiling must be in (0.0, 1.0]");
    }
    // The analysis bands may be narrowed, never widened.
    let band = AnalysisBounds::default();
    let thresholds = band.min_threshold..=band.max_threshold;
    if !thresholds.contains(&r.min_threshold) || !thresholds.contains(&r.max_threshold) {
        bail!(
            "retrieval.min_threshold and retrieval.max_threshold must be in [{}, {}]",
            band.min_threshold,
            band.max_threshold
        );
    }
    if r.min_threshold > r.max_threshold {
        bail!("retrieval.min_threshold must be <= retrieval.max_threshold");
    }
    let chunks = band.min_chunks..=band.max_chunks;
    if !chunks.contains(&r.min_chunks) || !chunks.contains(&r.max_chunks) {
        bail!(
            "retrieval.min_chunks and retrieval.max_chunks must be in [{}, {}]",
            band.min_chunks,
            band.max_chunks
        );
    }
    if r.min_chunks > r.max_chunks {
        bail!("retrieval.min_chunks must be <= retrieval.max_chunks");
    }

    if config.rerank.window == 0 {
        bail!("rerank.window must be >= 1");
    }

    let g = &config.generation;
    if g.top_n == 0 {
        bail!("generation.top_n must be >= 1");
    }
    if !(0.0..=1.0).contains(&g.revision_threshold) {
        bail!("generation.revision_threshold must be in [0.0, 1.0]");
    }
    if g.max_query_chars == 0 {
        bail!("generation.max_query_chars must be >= 1");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "hashing" | "local" => {}
        "openai" | "ollama" => {
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hashing, or local.",
            other
        ),
    }
    if e.provider == "hashing" && e.dims == Some(0) {
        bail!("embedding.dims must be > 0 when provider is 'hashing'");
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    let l = &config.llm;
    match l.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if l.model.is_none() {
                bail!("llm.model must be specified when provider is '{}'", l.provider);
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if let Some(t) = l.temperature {
        if !(0.0..=2.0).contains(&t) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
    }

    let c = &config.cost;
    let valid_price = |p: f64| p.is_finite() && p >= 0.0;
    if !valid_price(c.input_per_1k) || !valid_price(c.output_per_1k) || !valid_price(c.embedding_per_1k) {
        bail!("cost.input_per_1k, cost.output_per_1k and cost.embedding_per_1k must be finite and >= 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[db]\npath = \"./data/docqa.sqlite\"\n";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.retrieval.threshold_ceiling, 0.35);
        assert_eq!(config.generation.top_n, 8);
        assert_eq!(config.rerank.mode, RerankMode::Llm);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.search.rrf_k, 60.0);
        assert_eq!(pipeline.revision_threshold, 0.8);
        assert_eq!(pipeline.max_query_chars, 2000);
    }

    #[test]
    fn test_db_section_required() {
        assert!(parse_config("[generation]\ntop_n = 4\n").is_err());
    }

    #[test]
    fn test_rejects_inverted_threshold_band() {
        let toml = format!("{}[retrieval]\nmin_threshold = 0.8\nmax_threshold = 0.4\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err().to_string();
        assert!(err.contains("retrieval.min_threshold"));
    }

    #[test]
    fn test_rejects_widened_chunk_band() {
        for band in ["min_chunks = 1\nmax_chunks = 10", "min_chunks = 5\nmax_chunks = 100"] {
            let toml = format!("{}[retrieval]\n{}\n", MINIMAL, band);
            let err = parse_config(&toml).unwrap_err().to_string();
            assert!(err.contains("retrieval.min_chunks"), "{}", err);
        }
        let toml = format!("{}[retrieval]\nmin_chunks = 12\nmax_chunks = 8\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_rejects_widened_threshold_band() {
        for band in ["min_threshold = 0.0", "max_threshold = 0.95"] {
            let toml = format!("{}[retrieval]\n{}\n", MINIMAL, band);
            let err = parse_config(&toml).unwrap_err().to_string();
            assert!(err.contains("retrieval.min_threshold"), "{}", err);
        }
    }

    #[test]
    fn test_accepts_narrowed_bands() {
        let toml = format!(
            "{}[retrieval]\nmin_chunks = 8\nmax_chunks = 12\nmin_threshold = 0.4\nmax_threshold = 0.6\n",
            MINIMAL
        );
        let bounds = parse_config(&toml).unwrap().pipeline_config().bounds;
        assert_eq!((bounds.min_chunks, bounds.max_chunks), (8, 12));
        assert_eq!((bounds.min_threshold, bounds.max_threshold), (0.4, 0.6));
    }

    #[test]
    fn test_rejects_nan_price() {
        let toml = format!("{}[cost]\noutput_per_1k = nan\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err().to_string();
        assert!(err.contains("cost.output_per_1k"), "{}", err);
    }

    #[test]
    fn test_rejects_revision_threshold_out_of_range() {
        let toml = format!("{}[generation]\nrevision_threshold = 1.5\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err().to_string();
        assert!(err.contains("generation.revision_threshold"));
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let toml = format!("{}[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err().to_string();
        assert!(err.contains("embedding.model"));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let toml = format!("{}[embedding]\nprovider = \"magic\"\n", MINIMAL);
        assert!(parse_config(&toml)
            .unwrap_err()
            .to_string()
            .contains("Unknown embedding provider"));

        let toml = format!("{}[llm]\nprovider = \"magic\"\n", MINIMAL);
        assert!(parse_config(&toml)
            .unwrap_err()
            .to_string()
            .contains("Unknown llm provider"));
    }

    #[test]
    fn test_rerank_mode_parses() {
        let toml = format!("{}[rerank]\nmode = \"heuristic\"\nwindow = 5\n", MINIMAL);
        let config = parse_config(&toml).unwrap();
        assert_eq!(config.rerank.mode, RerankMode::Heuristic);
        assert_eq!(config.pipeline_config().reranker.window, 5);
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/docqa.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.cost.output_per_1k, 0.0006);
    }
}
