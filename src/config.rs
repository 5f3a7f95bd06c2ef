use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub temporal: TemporalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token budget for page/paragraph chunks (approximated at 4 chars/token).
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemporalConfig {
    /// Minimum share of non-empty sampled cells that must parse as dates.
    #[serde(default = "default_min_valid_ratio")]
    pub min_valid_ratio: f64,
    /// Rows sampled for column detection; statistics still scan the full table.
    #[serde(default = "default_detection_sample_rows")]
    pub detection_sample_rows: usize,
    #[serde(default = "default_min_months_for_seasonality")]
    pub min_months_for_seasonality: u32,
    /// Peak deviation (% of yearly baseline) required for a seasonal label.
    #[serde(default = "default_seasonal_deviation_pct")]
    pub seasonal_deviation_pct: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            min_valid_ratio: default_min_valid_ratio(),
            detection_sample_rows: default_detection_sample_rows(),
            min_months_for_seasonality: default_min_months_for_seasonality(),
            seasonal_deviation_pct: default_seasonal_deviation_pct(),
        }
    }
}

fn default_min_valid_ratio() -> f64 {
    0.8
}
fn default_detection_sample_rows() -> usize {
    1000
}
fn default_min_months_for_seasonality() -> u32 {
    6
}
fn default_seasonal_deviation_pct() -> f64 {
    15.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Provider-imposed batch ceiling for one embedding call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Absolute expiry horizon for index records and cached embeddings.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// Records per insert batch; batch failures are isolated.
    #[serde(default = "default_index_batch")]
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            batch_size: default_index_batch(),
        }
    }
}

fn default_ttl_hours() -> u64 {
    24
}
fn default_index_batch() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the semantic channel in the blended score; lexical gets the rest.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_candidate_k() -> i64 {
    80
}
fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Token ceiling for the assembled grounding context.
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
        }
    }
}

fn default_context_tokens() -> usize {
    3000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if !(0.0..=1.0).contains(&config.temporal.min_valid_ratio) {
        anyhow::bail!("temporal.min_valid_ratio must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        anyhow::bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.index.ttl_hours == 0 {
        anyhow::bail!("index.ttl_hours must be > 0");
    }

    if config.index.batch_size == 0 {
        anyhow::bail!("index.batch_size must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/anchorage.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_tokens, 1000);
        assert_eq!(config.index.ttl_hours, 24);
        assert_eq!(config.index.batch_size, 100);
        assert!((config.retrieval.semantic_weight - 0.7).abs() < 1e-9);
        assert!((config.temporal.min_valid_ratio - 0.8).abs() < 1e-9);
        assert_eq!(config.context.max_tokens, 3000);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let err = parse(
            "[db]\npath = \"/tmp/a.sqlite\"\n[embedding]\nprovider = \"ollama\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("dims"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse(
            "[db]\npath = \"/tmp/a.sqlite\"\n[embedding]\nprovider = \"typesense\"\nmodel = \"m\"\ndims = 8\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn semantic_weight_out_of_range_rejected() {
        let err = parse(
            "[db]\npath = \"/tmp/a.sqlite\"\n[retrieval]\nsemantic_weight = 1.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("semantic_weight"));
    }
}
