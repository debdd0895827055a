//! Configuration parsing and validation.
//!
//! The knowledge base is configured via a TOML file (default:
//! `config/kb.toml`). It carries the environment configuration §6 calls for:
//! data-root path, embedding-model identity and index dimension D, LLM
//! endpoint identity and credentials, retrieval K default, and context
//! character budget, plus OCR provider selection for the `image` extraction
//! family.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data_root: PathBuf,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

/// Embedding provider selection and model identity (§4.2, §6). `dims` is the
/// fixed index dimension D; it must never change for an existing index
/// without a full reindex (the `reindex` admin operation).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Required when provider == "openai"; may also be supplied via the
    /// OPENAI_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Ollama endpoint base URL; defaults to `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
            api_base: None,
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// LLM endpoint identity and credentials for the grounded RAG answer call
/// (§4.4).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            api_base: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// Retrieval tuning: default K, snippet length, and context character budget
/// (§4.4 steps 4 and 6).
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k_retrieve")]
    pub k_retrieve: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    #[serde(default = "default_source_display_chars")]
    pub source_display_chars: usize,
    #[serde(default = "default_question_deadline_secs")]
    pub question_deadline_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_retrieve: default_k_retrieve(),
            snippet_chars: default_snippet_chars(),
            context_budget_chars: default_context_budget_chars(),
            source_display_chars: default_source_display_chars(),
            question_deadline_secs: default_question_deadline_secs(),
        }
    }
}

fn default_k_retrieve() -> usize {
    5
}
fn default_snippet_chars() -> usize {
    1_500
}
fn default_context_budget_chars() -> usize {
    8_000
}
fn default_source_display_chars() -> usize {
    240
}
fn default_question_deadline_secs() -> u64 {
    30
}

/// OCR provider selection for the `image` extraction family (§4.1).
#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_provider")]
    pub provider: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { provider: default_ocr_provider() }
    }
}

fn default_ocr_provider() -> String {
    "disabled".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.retrieval.k_retrieve < 1 || config.retrieval.k_retrieve > 20 {
        anyhow::bail!("retrieval.k_retrieve must be in 1..=20");
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

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!("Unknown LLM provider: '{}'. Must be disabled or openai.", other),
    }

    match config.ocr.provider.as_str() {
        "disabled" | "tesseract" => {}
        other => anyhow::bail!("Unknown OCR provider: '{}'. Must be disabled or tesseract.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let f = write_config("data_root = \"/tmp/kb-data\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.embedding.provider, "disabled");
        assert_eq!(cfg.retrieval.k_retrieve, 5);
        assert_eq!(cfg.retrieval.context_budget_chars, 8_000);
    }

    #[test]
    fn enabled_embedding_without_dims_is_rejected() {
        let f = write_config(
            "data_root = \"/tmp/kb-data\"\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn out_of_range_k_retrieve_is_rejected() {
        let f = write_config("data_root = \"/tmp/kb-data\"\n[retrieval]\nk_retrieve = 50\n");
        assert!(load_config(f.path()).is_err());
    }
}
