//! TOML configuration parsing and start-up validation.
//!
//! Every section is optional; missing values fall back to the defaults of
//! the reference deployment (Gemini `text-embedding-004` embeddings, a
//! Groq-hosted completion model, 400-word chunks with 100 words of overlap).
//!
//! ```toml
//! [chunking]
//! chunk_size = 400
//! overlap = 100
//!
//! [retrieval]
//! top_k = 7
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! dims = 768
//!
//! [generation]
//! provider = "groq"
//! model = "groq/compound"
//! ```
//!
//! All invariants that the pipeline relies on (`overlap < chunk_size`,
//! non-zero batch sizes, known provider names) are checked once by
//! [`Config::validate`], never per call.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub source: SourceConfig,
    pub snapshot: SnapshotConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in whitespace-delimited words.
    pub chunk_size: usize,
    /// Words shared by two adjacent windows. Must be `< chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 400,
            overlap: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 7 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    pub batch_size: usize,
    /// Maximum number of batches in flight at once.
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "text-embedding-004".to_string(),
            dims: 768,
            batch_size: 100,
            concurrency: 4,
            timeout_secs: 30,
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a strict JSON-schema response.
    pub structured_output: bool,
    pub timeout_secs: u64,
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "groq/compound".to_string(),
            temperature: 0.3,
            max_tokens: None,
            structured_output: true,
            timeout_secs: 60,
            url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    /// Wall-clock budget for one logical provider call, retries included.
    pub max_elapsed_secs: u64,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_elapsed_secs: 5,
            backoff_base_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.max_elapsed_secs),
            Duration::from_millis(self.backoff_base_ms),
        )
        .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    /// Where remote repositories are cloned.
    pub scratch_dir: PathBuf,
    pub code_extensions: Vec<String>,
    pub doc_extensions: Vec<String>,
    /// Directory names pruned from the walk wherever they appear.
    pub exclude_dirs: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("./data/repos"),
            code_extensions: ["py", "js", "ts", "java", "cpp", "c", "go", "rs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            doc_extensions: ["md", "txt", "rst", "json", "yaml", "yml"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: [".git", ".venv", "node_modules"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SnapshotConfig {
    /// SQLite file holding index snapshots. Snapshots are off when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

const EMBEDDING_PROVIDERS: &[&str] = &["gemini", "openai", "ollama", "disabled"];
const GENERATION_PROVIDERS: &[&str] = &["groq", "openai", "ollama", "disabled"];

impl Config {
    /// Check cross-field invariants. Called once by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            bail!(
                "Unknown embedding provider: '{}'. Must be one of: {}",
                self.embedding.provider,
                EMBEDDING_PROVIDERS.join(", ")
            );
        }
        if self.embedding.is_enabled() {
            if self.embedding.dims == 0 {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.trim().is_empty() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
        if self.embedding.concurrency == 0 {
            bail!("embedding.concurrency must be >= 1");
        }

        if !GENERATION_PROVIDERS.contains(&self.generation.provider.as_str()) {
            bail!(
                "Unknown generation provider: '{}'. Must be one of: {}",
                self.generation.provider,
                GENERATION_PROVIDERS.join(", ")
            );
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }

        if self.retry.backoff_base_ms == 0 {
            bail!("retry.backoff_base_ms must be > 0");
        }

        if self.source.code_extensions.is_empty() && self.source.doc_extensions.is_empty() {
            bail!("source.code_extensions and source.doc_extensions cannot both be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` when it exists, otherwise validate and return the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::info!(path = %path.display(), "config file not found, using defaults");
    let config = Config::default();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("repo-chat.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 400);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.embedding.batch_size, 100);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_tmp, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.generation.provider, "groq");
        assert_eq!(config.retry.max_elapsed_secs, 5);
        assert!(config.snapshot.path.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let (_tmp, path) = write_config("[chunking]\nchunk_size = 200\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 7);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let (_tmp, path) = write_config("[chunking]\nchunk_size = 10\noverlap = 10\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("overlap"), "{}", err);
    }

    #[test]
    fn test_unknown_embedding_provider_rejected() {
        let (_tmp, path) = write_config("[embedding]\nprovider = \"magic\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_zero_dims_rejected_when_enabled() {
        let (_tmp, path) = write_config("[embedding]\nprovider = \"openai\"\ndims = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let (_tmp, path) = write_config("[retrieval]\ntop_k = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/repo-chat.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.top_k, Config::default().retrieval.top_k);
    }
}
